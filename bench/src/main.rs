use dlvm::config::{JitPolicyKind, MemoryPolicy, OptimizationPass, RunOptions};
use dlvm::runner::run_file;
use dlvm::vm::ScriptedReader;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Serialize)]
struct BenchmarkResult {
    name: String,
    policy: String,
    optimized: bool,
    result: String,
    run_secs: f64,
    interpreted_instructions: usize,
    compiled_instructions: usize,
}

#[derive(Serialize)]
struct BenchmarkOutput {
    results: Vec<BenchmarkResult>,
    rust_reference: Vec<RustReference>,
}

#[derive(Serialize)]
struct RustReference {
    name: String,
    secs: f64,
}

const PROGRAMS: [(&str, MemoryPolicy); 3] = [
    ("sum_loop", MemoryPolicy::Amortized),
    ("fibonacci", MemoryPolicy::Amortized),
    ("alloc_pairs", MemoryPolicy::MarkCompact),
];

const POLICIES: [JitPolicyKind; 5] = [
    JitPolicyKind::No,
    JitPolicyKind::Tracing,
    JitPolicyKind::Individual,
    JitPolicyKind::Block,
    JitPolicyKind::Function,
];

// Rust reference implementations

fn rust_sum_loop() -> i64 {
    let mut sum: i64 = 0;
    for i in 1..=1_000_000 {
        sum += i;
    }
    sum
}

fn rust_fibonacci(n: i64) -> i64 {
    if n < 2 {
        n
    } else {
        rust_fibonacci(n - 1) + rust_fibonacci(n - 2)
    }
}

fn time_rust<F>(f: F) -> f64
where
    F: FnOnce() -> i64,
{
    let start = Instant::now();
    eprintln!("{}", f());
    start.elapsed().as_secs_f64()
}

fn program_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("programs")
        .join(format!("{name}.dl"))
}

fn run_benchmark(name: &str, options: &RunOptions) -> Option<BenchmarkResult> {
    let start = Instant::now();
    let report = match run_file(&program_path(name), options, &mut ScriptedReader::default()) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("benchmark {} ({:?}) failed: {}", name, options.jit_policy, e);
            return None;
        }
    };
    let elapsed = start.elapsed().as_secs_f64();

    Some(BenchmarkResult {
        name: name.to_string(),
        policy: format!("{:?}", options.jit_policy).to_lowercase(),
        optimized: !options.optimizations.is_empty(),
        result: report.result,
        run_secs: elapsed,
        interpreted_instructions: report.statistics.interpreted_count,
        compiled_instructions: report.statistics.compiled_count,
    })
}

fn main() {
    let mut results = Vec::new();

    for (name, memory) in PROGRAMS {
        for jit_policy in POLICIES {
            for optimizations in [Vec::new(), OptimizationPass::ALL.to_vec()] {
                if jit_policy == JitPolicyKind::No && !optimizations.is_empty() {
                    continue;
                }
                let options = RunOptions {
                    jit_policy,
                    // Compile on the first landing
                    jit_threshold: 1,
                    memory,
                    optimizations,
                    ..RunOptions::default()
                };
                results.extend(run_benchmark(name, &options));
            }
        }
    }

    let rust_reference = vec![
        RustReference {
            name: "sum_loop".to_string(),
            secs: time_rust(rust_sum_loop),
        },
        RustReference {
            name: "fibonacci".to_string(),
            secs: time_rust(|| rust_fibonacci(25)),
        },
    ];

    let output = BenchmarkOutput {
        results,
        rust_reference,
    };
    match serde_json::to_string_pretty(&output) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("failed to serialize results: {}", e),
    }
}
