//! The main loop: interpret, watch for hot code, compile it, run it.

#[cfg(feature = "jit")]
use std::collections::{HashMap, HashSet};
use std::path::Path;
#[cfg(feature = "jit")]
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::bcode::{self, BInstr};
use crate::code::Code;
use crate::config::RunOptions;
use crate::error::Error;
#[cfg(feature = "jit")]
use crate::jit::{CompiledGroup, GroupShape, GroupSource, compile_group};
#[cfg(feature = "jit")]
use crate::opt::OptimizationPipeline;
use crate::policy::{JitPolicy, JitSequence, make_policy};
use crate::report::{ExecutionStatistics, Timer, render_result};
#[cfg(feature = "jit")]
use crate::ucode::{UInstr, render_positions};
use crate::vm::{IntReader, MachineState, RuntimeError, Status, shared_manager};

/// Outcome of one program run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub result: String,
    pub status: Status,
    pub fault: Option<RuntimeError>,
    pub statistics: ExecutionStatistics,
    pub timer: Timer,
}

impl RunReport {
    pub fn is_error(&self) -> bool {
        self.result == crate::report::ERROR
    }
}

/// Drives one program from cp 0 until it halts or fails.
pub struct Runner {
    code: Code<BInstr>,
    state: MachineState,
    policy: Box<dyn JitPolicy>,
    #[cfg(feature = "jit")]
    optimizer: OptimizationPipeline,
    statistics: ExecutionStatistics,
    /// Compiled groups by entry cp.
    #[cfg(feature = "jit")]
    compiled: HashMap<usize, Rc<CompiledGroup>>,
    /// Entry cps whose compilation failed.
    #[cfg(feature = "jit")]
    rejected: HashSet<usize>,
    /// Interpret the next instruction even if it is compiled.
    force_interpret: bool,
}

impl Runner {
    pub fn new(code: Code<BInstr>, options: &RunOptions) -> Self {
        let statistics = ExecutionStatistics::new(code.len());
        Self {
            code,
            state: MachineState::new(shared_manager(options.memory)),
            policy: make_policy(options.jit_policy, options.jit_threshold),
            #[cfg(feature = "jit")]
            optimizer: OptimizationPipeline::new(&options.optimizations),
            statistics,
            #[cfg(feature = "jit")]
            compiled: HashMap::new(),
            #[cfg(feature = "jit")]
            rejected: HashSet::new(),
            force_interpret: false,
        }
    }

    pub fn state(&self) -> &MachineState {
        &self.state
    }

    pub fn statistics(&self) -> &ExecutionStatistics {
        &self.statistics
    }

    pub fn run(&mut self, io: &mut dyn IntReader) {
        while self.state.is_running() {
            self.state.collect_garbage();
            let cp = self.state.cp;
            if cp >= self.code.len() {
                self.state.fail(RuntimeError::CodeOutOfRange { cp });
                break;
            }
            if !self.force_interpret && self.run_compiled(cp, io) {
                continue;
            }
            self.force_interpret = false;
            self.step(cp, io);
        }
    }

    /// Run the group compiled at `cp`, if there is one.
    #[cfg(feature = "jit")]
    fn run_compiled(&mut self, cp: usize, io: &mut dyn IntReader) -> bool {
        let Some(group) = self.compiled.get(&cp).cloned() else {
            return false;
        };
        self.force_interpret = group.run(&mut self.state, io);
        self.statistics.count_run_jit(cp);
        self.policy.notify_run_jit(cp);
        trace!(cp, next = self.state.cp, yielded = self.force_interpret, "compiled run");
        true
    }

    #[cfg(not(feature = "jit"))]
    fn run_compiled(&mut self, _cp: usize, _io: &mut dyn IntReader) -> bool {
        false
    }

    fn step(&mut self, cp: usize, io: &mut dyn IntReader) {
        let instr = self.code[cp];
        trace!(cp, %instr, sp = self.state.sp, "interpret");
        if let Err(err) = bcode::interpret(&instr, &mut self.state, io) {
            debug!(cp, %err, "runtime error");
            self.state.fail(err);
        }
        self.statistics.count_interpreted();
        self.policy.notify_landing(cp);
        if let Some(sequence) = self.policy.make_jit_sequence(&self.code, cp) {
            self.install(sequence);
        }
    }

    #[cfg(feature = "jit")]
    fn lower(&self, sequence: &JitSequence) -> Vec<Code<UInstr>> {
        let positions = sequence
            .cps
            .iter()
            .map(|&cp| bcode::lower(&self.code[cp], cp))
            .collect();
        self.optimizer
            .optimize(positions, &sequence.entry_points, sequence.is_function)
    }

    /// Entry cps the compiled sequence is cached under.
    fn cached_entries(sequence: &JitSequence) -> &[usize] {
        if sequence.is_trace {
            &sequence.cps[..sequence.cps.len().min(1)]
        } else {
            &sequence.entry_points
        }
    }

    #[cfg(feature = "jit")]
    fn install(&mut self, sequence: JitSequence) {
        let entries = Self::cached_entries(&sequence);
        if entries.is_empty()
            || entries.iter().any(|entry| self.rejected.contains(entry))
            || entries.iter().all(|entry| self.compiled.contains_key(entry))
        {
            return;
        }
        let positions = self.lower(&sequence);
        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(cp = entries[0], "U-code to compile:\n{}", render_positions(&positions));
        }
        let shape = if sequence.is_trace {
            GroupShape::Trace
        } else {
            GroupShape::Static {
                function: sequence.is_function,
            }
        };
        let source = GroupSource {
            positions: &positions,
            cps: &sequence.cps,
            entries,
            shape,
        };
        match compile_group(&source) {
            Ok(group) => {
                debug!(
                    cp = entries[0],
                    len = group.len(),
                    bytes = group.code_size(),
                    entries = ?entries,
                    "group compiled"
                );
                let group = Rc::new(group);
                for &entry in entries {
                    self.statistics.add_compiled(entry, group.len());
                    self.compiled.insert(entry, Rc::clone(&group));
                }
            }
            Err(err) => {
                warn!(cp = entries[0], %err, "JIT compilation failed");
                self.rejected.extend(entries.iter().copied());
            }
        }
    }

    #[cfg(not(feature = "jit"))]
    fn install(&mut self, sequence: JitSequence) {
        let entries = Self::cached_entries(&sequence);
        debug!(entries = ?entries, "built without the JIT, group stays interpreted");
    }

    pub fn into_report(self, timer: Timer) -> RunReport {
        RunReport {
            result: render_result(&self.state),
            status: self.state.status,
            fault: self.state.fault,
            statistics: self.statistics,
            timer,
        }
    }
}

/// Decode and run a program.
pub fn run_program(source: &str, options: &RunOptions, io: &mut dyn IntReader) -> Result<RunReport, Error> {
    let code = bcode::decode(source)?;
    debug!(len = code.len(), policy = ?options.jit_policy, memory = ?options.memory, "program decoded");
    let mut runner = Runner::new(code, options);
    let mut timer = Timer::new();
    timer.start();
    runner.run(io);
    timer.stop();
    Ok(runner.into_report(timer))
}

pub fn run_file(path: &Path, options: &RunOptions, io: &mut dyn IntReader) -> Result<RunReport, Error> {
    let source = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    run_program(&source, options, io)
}
