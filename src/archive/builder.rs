//! Archive builder: turns a directory plus a runner stub into a self-extracting binary.
//!
//! Output layout: `[runner stub][gzip(tar(payload))][16-byte decimal length]`.
//! The output is staged in a temporary file next to the payload and renamed
//! into place only after the trailer is written.

use crate::archive::trailer;
use crate::config::types::{BuildReport, ParkerConfig, ParkerError, Result, TARGET_MARKER};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Kind of a payload entry as stored in the archive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink,
}

/// One enumerated payload entry
#[derive(Clone, Debug)]
pub struct PayloadEntry {
    /// Path relative to the payload root
    pub relative: PathBuf,
    /// Path on disk
    pub source: PathBuf,
    pub kind: EntryKind,
}

/// Paths derived from the target executable
#[derive(Clone, Debug, PartialEq)]
pub struct BuildPlan {
    pub target: PathBuf,
    pub target_name: String,
    pub payload_root: PathBuf,
    pub archive_path: PathBuf,
    pub output_path: PathBuf,
    pub marker_path: PathBuf,
}

impl BuildPlan {
    /// Resolve `target` (relative to `cwd` when not absolute) into the build layout.
    pub fn resolve(target: &Path, cwd: &Path) -> Result<Self> {
        let target = if target.is_absolute() {
            target.to_path_buf()
        } else {
            cwd.join(target)
        };

        if !target.is_file() {
            return Err(ParkerError::NotFound(format!(
                "target {} not found",
                target.display()
            )));
        }

        let target_name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ParkerError::NotFound(format!("target {} has no file name", target.display()))
            })?;
        let payload_root = target
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                ParkerError::NotFound(format!("target {} has no parent", target.display()))
            })?;

        Ok(Self {
            archive_path: payload_root.join(archive_name(&target_name)),
            output_path: payload_root.join(output_name(&target_name)),
            marker_path: payload_root.join(TARGET_MARKER),
            target,
            target_name,
            payload_root,
        })
    }

    /// Top-level names that were generated by an earlier build of the same target
    fn generated_names(&self) -> [String; 2] {
        [archive_name(&self.target_name), output_name(&self.target_name)]
    }
}

/// Side artifact name for a target: `<name>.tar.gz`
pub fn archive_name(target_name: &str) -> String {
    format!("{}.tar.gz", target_name)
}

/// Output artifact name for a target: `<name>-c`
pub fn output_name(target_name: &str) -> String {
    format!("{}-c", target_name)
}

/// Runner stub location: explicit config, else `runner` next to the builder executable.
pub fn resolve_runner(config: &ParkerConfig) -> Result<PathBuf> {
    let runner = match &config.runner_path {
        Some(path) => path.clone(),
        None => {
            let exe = std::env::current_exe()?;
            exe.parent()
                .unwrap_or_else(|| Path::new("/"))
                .join("runner")
        }
    };

    if !runner.is_file() {
        return Err(ParkerError::NotFound(format!(
            "runner file {} not found",
            runner.display()
        )));
    }

    log::debug!("runner_path={} found", runner.display());
    Ok(runner)
}

/// Removes the marker and side artifact however the build ends.
struct BuildScratch<'a> {
    plan: &'a BuildPlan,
}

impl Drop for BuildScratch<'_> {
    fn drop(&mut self) {
        for path in [&self.plan.archive_path, &self.plan.marker_path] {
            match fs::remove_file(path) {
                Ok(()) => log::debug!("removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

fn build_err(what: &str, path: &Path, err: impl std::fmt::Display) -> ParkerError {
    ParkerError::Build(format!("{} {}: {}", what, path.display(), err))
}

/// Enumerate the payload root. Directories precede their contents; siblings are
/// sorted by name. Generated artifacts at the top level are skipped.
pub fn collect_entries(root: &Path, excluded: &[String]) -> Result<Vec<PayloadEntry>> {
    let mut entries = Vec::new();
    walk(root, Path::new(""), excluded, &mut entries)?;
    Ok(entries)
}

fn walk(
    dir: &Path,
    relative: &Path,
    excluded: &[String],
    out: &mut Vec<PayloadEntry>,
) -> Result<()> {
    let mut children = fs::read_dir(dir)
        .map_err(|e| build_err("Failed to read directory", dir, e))?
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| build_err("Failed to read directory", dir, e))?;
    children.sort_by_key(|entry| entry.file_name());

    for child in children {
        let name = child.file_name();
        if relative.as_os_str().is_empty()
            && excluded.iter().any(|skip| name.as_os_str() == skip.as_str())
        {
            log::debug!("skipping generated artifact {:?}", name);
            continue;
        }

        let source = child.path();
        let child_relative = relative.join(&name);
        let file_type = child
            .file_type()
            .map_err(|e| build_err("Failed to stat", &source, e))?;

        let kind = if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            log::debug!("skipping special file {}", source.display());
            continue;
        };

        out.push(PayloadEntry {
            relative: child_relative.clone(),
            source: source.clone(),
            kind,
        });

        if kind == EntryKind::Directory {
            walk(&source, &child_relative, excluded, out)?;
        }
    }

    Ok(())
}

/// Write `entries` as a gzip-compressed tar to `dest`. Returns the compressed size.
pub fn write_archive(entries: &[PayloadEntry], dest: &Path) -> Result<u64> {
    let file = File::create(dest).map_err(|e| build_err("Failed to create", dest, e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);

    for entry in entries {
        tar.append_path_with_name(&entry.source, &entry.relative)
            .map_err(|e| build_err("Failed to archive", &entry.source, e))?;
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| build_err("Failed to finish tar stream", dest, e))?;
    let mut writer = encoder
        .finish()
        .map_err(|e| build_err("Failed to finish gzip stream", dest, e))?;
    writer
        .flush()
        .map_err(|e| build_err("Failed to flush", dest, e))?;
    drop(writer);

    let size = fs::metadata(dest)
        .map_err(|e| build_err("Failed to stat", dest, e))?
        .len();
    Ok(size)
}

fn append_file(out: &mut impl Write, src: &Path) -> Result<u64> {
    let mut file = File::open(src).map_err(|e| build_err("Failed to open", src, e))?;
    io::copy(&mut file, out).map_err(|e| build_err("Failed to append", src, e))
}

/// Concatenate `[runner][archive][trailer]` into `output`, atomically.
pub fn write_self_extracting(runner: &Path, archive: &Path, output: &Path) -> Result<u64> {
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::Builder::new()
        .prefix(".parker-")
        .suffix(".partial")
        .tempfile_in(dir)
        .map_err(|e| build_err("Failed to stage output in", dir, e))?;

    let archive_len = {
        let mut writer = BufWriter::new(staged.as_file());
        append_file(&mut writer, runner)?;
        let archive_len = append_file(&mut writer, archive)?;
        writer
            .write_all(&trailer::encode(archive_len)?)
            .map_err(|e| build_err("Failed to write trailer to", output, e))?;
        writer
            .flush()
            .map_err(|e| build_err("Failed to flush", output, e))?;
        archive_len
    };

    staged
        .as_file()
        .set_permissions(fs::Permissions::from_mode(0o755))
        .map_err(|e| build_err("Failed to chmod", output, e))?;
    staged
        .persist(output)
        .map_err(|e| build_err("Failed to persist", output, e.error))?;

    Ok(archive_len)
}

/// Build a self-extracting binary for `target`.
pub fn build(config: &ParkerConfig, target: &Path) -> Result<BuildReport> {
    let cwd = std::env::current_dir()?;
    let plan = BuildPlan::resolve(target, &cwd)?;
    log::debug!(
        "workdir: {}, target name: {}",
        plan.payload_root.display(),
        plan.target_name
    );

    let runner = resolve_runner(config)?;

    let scratch = BuildScratch { plan: &plan };
    fs::write(&plan.marker_path, plan.target_name.as_bytes())
        .map_err(|e| build_err("Failed to write", &plan.marker_path, e))?;

    let entries = collect_entries(&plan.payload_root, &plan.generated_names())?;
    log::debug!("collected {} payload entries", entries.len());

    let archive_len = write_archive(&entries, &plan.archive_path)?;
    log::debug!(
        "encoded {} ({} bytes)",
        plan.archive_path.display(),
        archive_len
    );

    write_self_extracting(&runner, &plan.archive_path, &plan.output_path)?;
    drop(scratch);

    log::debug!("runner {} made successfully", plan.output_path.display());

    Ok(BuildReport {
        output: plan.output_path.clone(),
        target: plan.target_name.clone(),
        payload_root: plan.payload_root.clone(),
        runner,
        entries: entries.len(),
        archive_bytes: archive_len,
    })
}
