// Pack/unpack latency benchmark
// Measures in-process build of a self-extracting image and recovery of its payload
// Target: small payloads build and unpack well under a launch's perceptible delay

use parker::archive::builder::build;
use parker::archive::extract::{read_embedded_archive, unpack_archive};
use parker::config::types::ParkerConfig;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Benchmark configuration
const ITERATIONS: usize = 50;
const WARMUP_ITERATIONS: usize = 5;

/// Latency percentiles
struct LatencyStats {
    p50: Duration,
    p95: Duration,
    min: Duration,
    max: Duration,
    mean: Duration,
}

impl LatencyStats {
    fn from_samples(mut samples: Vec<Duration>) -> Self {
        samples.sort();
        let len = samples.len();

        let p50_idx = (len as f64 * 0.50) as usize;
        let p95_idx = ((len as f64 * 0.95) as usize).min(len - 1);

        let sum: Duration = samples.iter().sum();
        let mean = sum / len as u32;

        Self {
            p50: samples[p50_idx],
            p95: samples[p95_idx],
            min: samples[0],
            max: samples[len - 1],
            mean,
        }
    }

    fn print(&self, label: &str) {
        println!("\n{}", label);
        println!("  p50: {:?}", self.p50);
        println!("  p95: {:?}", self.p95);
        println!("  min: {:?}", self.min);
        println!("  max: {:?}", self.max);
        println!("  mean: {:?}", self.mean);
    }
}

/// Benchmark result
struct BenchmarkResult {
    scenario: String,
    stats: LatencyStats,
    budget: Duration,
}

impl BenchmarkResult {
    fn passed(&self) -> bool {
        self.stats.p50 < self.budget
    }

    fn print(&self) {
        println!("\n=== {} ===", self.scenario);
        self.stats.print("Latency");

        if self.passed() {
            println!("PASS");
        } else {
            println!("FAIL: p50={:?} (target <{:?})", self.stats.p50, self.budget);
        }
    }
}

/// Payload directory with `files` small files spread over a few subdirectories
struct Payload {
    _dir: tempfile::TempDir,
    target: PathBuf,
    config: ParkerConfig,
}

fn payload(files: usize) -> Payload {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = dir.path().join("runner");
    fs::write(&runner, vec![0u8; 64 * 1024]).expect("runner stub");

    let root = dir.path().join("app");
    for i in 0..files {
        let sub = root.join(format!("mod{}", i % 8));
        fs::create_dir_all(&sub).expect("subdir");
        fs::write(sub.join(format!("file{}.js", i)), format!("module.exports = {};\n", i))
            .expect("payload file");
    }
    let target = root.join("main");
    fs::write(&target, b"#!/bin/sh\n").expect("target");

    Payload {
        _dir: dir,
        target,
        config: ParkerConfig::default().with_runner_path(Some(runner)),
    }
}

fn measure<F: FnMut()>(mut op: F) -> LatencyStats {
    for _ in 0..WARMUP_ITERATIONS {
        op();
    }

    let mut samples = Vec::with_capacity(ITERATIONS);
    for _ in 0..ITERATIONS {
        let start = Instant::now();
        op();
        samples.push(start.elapsed());
    }
    LatencyStats::from_samples(samples)
}

fn benchmark_build(files: usize, budget: Duration) -> BenchmarkResult {
    let payload = payload(files);
    let stats = measure(|| {
        build(&payload.config, &payload.target).expect("build");
    });

    BenchmarkResult {
        scenario: format!("Build, {} files", files),
        stats,
        budget,
    }
}

fn benchmark_unpack(files: usize, budget: Duration) -> BenchmarkResult {
    let payload = payload(files);
    let report = build(&payload.config, &payload.target).expect("build");
    let output: &Path = &report.output;

    let stats = measure(|| {
        let workdir = tempfile::tempdir().expect("workdir");
        let archive = read_embedded_archive(output).expect("embedded archive");
        unpack_archive(Cursor::new(archive), workdir.path()).expect("unpack");
    });

    BenchmarkResult {
        scenario: format!("Extract + unpack, {} files", files),
        stats,
        budget,
    }
}

fn main() {
    println!("=== Parker Pack/Unpack Benchmark ===");
    println!("Iterations: {} (after {} warmup)", ITERATIONS, WARMUP_ITERATIONS);

    let results = vec![
        benchmark_build(10, Duration::from_millis(50)),
        benchmark_build(500, Duration::from_millis(250)),
        benchmark_unpack(10, Duration::from_millis(50)),
        benchmark_unpack(500, Duration::from_millis(250)),
    ];

    for result in &results {
        result.print();
    }

    let passed_count = results.iter().filter(|r| r.passed()).count();
    let total_count = results.len();

    println!("\n=== Summary ===");
    println!("{}/{} scenarios passed", passed_count, total_count);

    if passed_count == total_count {
        println!("All latency budgets met");
        std::process::exit(0);
    } else {
        println!("Some latency budgets exceeded");
        std::process::exit(1);
    }
}
