use anyhow::Result;

fn main() -> Result<()> {
    parker::cli::run(parker::cli::CliMode::Build)
}
