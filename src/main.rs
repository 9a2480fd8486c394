use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use dlvm::config::{JitPolicyKind, MemoryPolicy, OptimizationPass, RunOptions, StatsFormat, Verbosity};
use dlvm::runner::{RunReport, run_file};
use dlvm::vm::StdinReader;

// Wrapper types for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VerbosityArg {
    Quiet,
    Output,
    Time,
    Statistics,
    Debug,
}

impl From<VerbosityArg> for Verbosity {
    fn from(arg: VerbosityArg) -> Self {
        match arg {
            VerbosityArg::Quiet => Verbosity::Quiet,
            VerbosityArg::Output => Verbosity::Output,
            VerbosityArg::Time => Verbosity::Time,
            VerbosityArg::Statistics => Verbosity::Statistics,
            VerbosityArg::Debug => Verbosity::Debug,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum JitPolicyArg {
    No,
    Tracing,
    Individual,
    Block,
    Function,
}

impl From<JitPolicyArg> for JitPolicyKind {
    fn from(arg: JitPolicyArg) -> Self {
        match arg {
            JitPolicyArg::No => JitPolicyKind::No,
            JitPolicyArg::Tracing => JitPolicyKind::Tracing,
            JitPolicyArg::Individual => JitPolicyKind::Individual,
            JitPolicyArg::Block => JitPolicyKind::Block,
            JitPolicyArg::Function => JitPolicyKind::Function,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum MemoryArg {
    None,
    Amortized,
    #[value(name = "mark-and-compact", alias = "mark-and-sweep")]
    MarkCompact,
}

impl From<MemoryArg> for MemoryPolicy {
    fn from(arg: MemoryArg) -> Self {
        match arg {
            MemoryArg::None => MemoryPolicy::None,
            MemoryArg::Amortized => MemoryPolicy::Amortized,
            MemoryArg::MarkCompact => MemoryPolicy::MarkCompact,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StatsFormatArg {
    Human,
    Json,
}

impl From<StatsFormatArg> for StatsFormat {
    fn from(arg: StatsFormatArg) -> Self {
        match arg {
            StatsFormatArg::Human => StatsFormat::Human,
            StatsFormatArg::Json => StatsFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "dlvm")]
#[command(about = "A tiered virtual machine for stack bytecode", long_about = None)]
struct Cli {
    /// The bytecode file to run (defaults to `file` in the config)
    file: Option<PathBuf>,

    /// How much to print (quiet, output, time, statistics, debug)
    #[arg(long, value_enum)]
    verbosity: Option<VerbosityArg>,

    /// Which code gets compiled (no, tracing, individual, block, function)
    #[arg(long, value_enum)]
    jit_policy: Option<JitPolicyArg>,

    /// Landings at a cp before it is compiled
    #[arg(long)]
    jit_threshold: Option<usize>,

    /// Memory manager (none, amortized, mark-and-compact)
    #[arg(long, value_enum)]
    memory: Option<MemoryArg>,

    /// Comma separated optimization passes, run in order
    #[arg(long, value_name = "LIST")]
    optimizations: Option<String>,

    /// Format of the statistics table
    #[arg(long, value_enum)]
    stats_format: Option<StatsFormatArg>,

    /// TOML file with default options
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    /// The config file, then flags on top of it.
    fn options(&self) -> Result<RunOptions, String> {
        let mut options = match &self.config {
            Some(path) => RunOptions::load_file(path).map_err(|e| e.to_string())?,
            None => RunOptions::default(),
        };
        if let Some(verbosity) = self.verbosity {
            options.verbosity = verbosity.into();
        }
        if let Some(policy) = self.jit_policy {
            options.jit_policy = policy.into();
        }
        if let Some(threshold) = self.jit_threshold {
            options.jit_threshold = threshold;
        }
        if let Some(memory) = self.memory {
            options.memory = memory.into();
        }
        if let Some(list) = &self.optimizations {
            options.optimizations = OptimizationPass::parse_list(list).map_err(|e| e.to_string())?;
        }
        if let Some(format) = self.stats_format {
            options.stats_format = format.into();
        }
        if let Some(file) = &self.file {
            options.file = Some(file.clone());
        }
        Ok(options)
    }
}

fn init_logging(verbosity: Verbosity) {
    let default = if verbosity >= Verbosity::Debug {
        "dlvm=debug"
    } else {
        "dlvm=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &RunReport, options: &RunOptions) {
    if options.verbosity >= Verbosity::Output {
        println!("{}", report.result);
    }
    if options.verbosity >= Verbosity::Time {
        eprintln!("{}", report.timer);
    }
    if options.verbosity >= Verbosity::Statistics {
        match options.stats_format {
            StatsFormat::Human => eprint!("{}", report.statistics),
            StatsFormat::Json => match report.statistics.to_json() {
                Ok(json) => eprintln!("{}", json),
                Err(e) => eprintln!("error: {}", e),
            },
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let options = match cli.options() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(options.verbosity);

    let Some(path) = options.file.clone() else {
        eprintln!("error: no file specified");
        eprintln!("usage: dlvm [OPTIONS] <file>");
        return ExitCode::FAILURE;
    };

    let mut input = StdinReader::new();
    match run_file(&path, &options, &mut input) {
        Ok(report) => {
            print_report(&report, &options);
            if report.is_error() {
                if let Some(fault) = &report.fault {
                    tracing::debug!(%fault, "program failed");
                }
                return ExitCode::FAILURE;
            }
        }
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    ExitCode::SUCCESS
}
