//! Every bytecode program under `tests/programs`, run under every tiering
//! policy, memory manager and optimization set, must agree with the
//! interpreter.

use std::path::PathBuf;

use dlvm::config::{JitPolicyKind, MemoryPolicy, OptimizationPass, RunOptions};
use dlvm::runner::{RunReport, run_file};
use dlvm::vm::{RuntimeError, ScriptedReader, Status};

struct Program {
    name: &'static str,
    input: &'static [i64],
    expected: &'static str,
}

const PROGRAMS: &[Program] = &[
    Program { name: "add", input: &[], expected: "7" },
    Program { name: "equal_bools", input: &[], expected: "false" },
    Program { name: "div_zero", input: &[], expected: "ERROR" },
    Program { name: "wrapping", input: &[], expected: "-9223372036854775808" },
    Program { name: "pair", input: &[], expected: "(5, ())" },
    Program { name: "closure", input: &[], expected: "5" },
    Program { name: "factorial", input: &[], expected: "3628800" },
    Program { name: "sum_loop", input: &[], expected: "5050" },
    Program { name: "case", input: &[], expected: "-7" },
    Program { name: "read", input: &[6, 7], expected: "42" },
    Program { name: "alloc_loop", input: &[], expected: "0" },
    Program { name: "gc_live", input: &[], expected: "3" },
    Program { name: "fib", input: &[], expected: "610" },
    Program { name: "fnloop", input: &[], expected: "465" },
    Program { name: "sums", input: &[], expected: "220" },
];

const POLICIES: [JitPolicyKind; 5] = [
    JitPolicyKind::No,
    JitPolicyKind::Tracing,
    JitPolicyKind::Individual,
    JitPolicyKind::Block,
    JitPolicyKind::Function,
];

const MEMORIES: [MemoryPolicy; 3] = [MemoryPolicy::None, MemoryPolicy::Amortized, MemoryPolicy::MarkCompact];

fn path_of(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("programs")
        .join(format!("{name}.dl"))
}

fn run(program: &Program, options: &RunOptions) -> RunReport {
    let mut input = ScriptedReader::new(program.input.iter().copied());
    run_file(&path_of(program.name), options, &mut input)
        .unwrap_or_else(|e| panic!("{}: {e}", program.name))
}

/// No passes, each pass alone, then all of them.
fn optimization_sets() -> Vec<Vec<OptimizationPass>> {
    let mut sets = vec![Vec::new()];
    sets.extend(OptimizationPass::ALL.iter().map(|&pass| vec![pass]));
    sets.push(OptimizationPass::ALL.to_vec());
    sets
}

fn interpreted(memory: MemoryPolicy) -> RunOptions {
    RunOptions {
        memory,
        ..RunOptions::default()
    }
}

#[test]
fn test_interpreter_results() {
    for program in PROGRAMS {
        let report = run(program, &interpreted(MemoryPolicy::Amortized));
        assert_eq!(report.result, program.expected, "{}", program.name);
    }
}

#[test]
fn test_every_configuration_matches_the_interpreter() {
    for program in PROGRAMS {
        for memory in MEMORIES {
            let baseline = run(program, &interpreted(memory));
            for policy in POLICIES {
                for optimizations in optimization_sets() {
                    for jit_threshold in [0, 3] {
                        let options = RunOptions {
                            jit_policy: policy,
                            jit_threshold,
                            memory,
                            optimizations: optimizations.clone(),
                            ..RunOptions::default()
                        };
                        let report = run(program, &options);
                        assert_eq!(
                            report.result, baseline.result,
                            "{} under {policy:?}, {memory:?}, {optimizations:?}, threshold {jit_threshold}",
                            program.name
                        );
                        assert_eq!(report.status, baseline.status, "{}", program.name);
                    }
                }
            }
        }
    }
}

#[test]
fn test_fixed_memory_rejects_growth() {
    let alloc_loop = PROGRAMS.iter().find(|p| p.name == "alloc_loop").unwrap();
    let report = run(alloc_loop, &interpreted(MemoryPolicy::None));
    assert!(report.is_error());
    assert!(matches!(report.fault, Some(RuntimeError::GrowthRejected { .. })));

    let report = run(alloc_loop, &interpreted(MemoryPolicy::MarkCompact));
    assert_eq!(report.result, "0");
}

#[test]
fn test_collection_keeps_live_pairs_under_compiled_code() {
    let gc_live = PROGRAMS.iter().find(|p| p.name == "gc_live").unwrap();
    for policy in POLICIES {
        let options = RunOptions {
            jit_policy: policy,
            jit_threshold: 1,
            memory: MemoryPolicy::MarkCompact,
            optimizations: OptimizationPass::ALL.to_vec(),
            ..RunOptions::default()
        };
        let report = run(gc_live, &options);
        assert_eq!(report.status, Status::Halted, "{policy:?}");
        assert_eq!(report.result, "3", "{policy:?}");
    }
}

#[test]
fn test_loops_inside_functions_run_compiled() {
    for name in ["fnloop", "sums"] {
        let program = PROGRAMS.iter().find(|p| p.name == name).unwrap();
        let options = RunOptions {
            jit_policy: JitPolicyKind::Function,
            jit_threshold: 2,
            memory: MemoryPolicy::Amortized,
            optimizations: OptimizationPass::ALL.to_vec(),
            ..RunOptions::default()
        };
        let report = run(program, &options);
        assert_eq!(report.result, program.expected, "{name}");
        if cfg!(all(feature = "jit", target_arch = "x86_64", unix)) {
            assert!(report.statistics.compiled_count > 0, "{name}");
        }
    }
}

#[test]
fn test_closure_leaves_caller_depth() {
    let closure = PROGRAMS.iter().find(|p| p.name == "closure").unwrap();
    for policy in [JitPolicyKind::No, JitPolicyKind::Function] {
        let options = RunOptions {
            jit_policy: policy,
            memory: MemoryPolicy::Amortized,
            ..RunOptions::default()
        };
        let report = run(closure, &options);
        assert_eq!(report.status, Status::Halted);
        assert_eq!(report.result, "5");
    }
}

#[test]
fn test_statistics_add_up() {
    let sum_loop = PROGRAMS.iter().find(|p| p.name == "sum_loop").unwrap();
    let interpreted = run(sum_loop, &interpreted(MemoryPolicy::Amortized));
    assert_eq!(interpreted.statistics.compiled_count, 0);
    assert!(interpreted.statistics.interpreted_count > 100);

    if cfg!(all(feature = "jit", target_arch = "x86_64", unix)) {
        let options = RunOptions {
            jit_policy: JitPolicyKind::Block,
            jit_threshold: 3,
            memory: MemoryPolicy::Amortized,
            ..RunOptions::default()
        };
        let compiled = run(sum_loop, &options);
        assert!(compiled.statistics.compiled_count > 0);
        assert!(compiled.statistics.interpreted_count < interpreted.statistics.interpreted_count);
    }
}
