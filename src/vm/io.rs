use std::collections::VecDeque;
use std::io::BufRead;

use super::error::RuntimeError;

/// Source of integers for `UNARY READ`.
pub trait IntReader {
    fn read_int(&mut self) -> Result<i64, RuntimeError>;
}

/// Reads whitespace-delimited integers from a buffered input, stdin by default.
pub struct StdinReader<R = std::io::StdinLock<'static>> {
    input: R,
    pending: VecDeque<String>,
}

impl StdinReader {
    pub fn new() -> Self {
        Self::from_input(std::io::stdin().lock())
    }
}

impl Default for StdinReader {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: BufRead> StdinReader<R> {
    pub fn from_input(input: R) -> Self {
        Self {
            input,
            pending: VecDeque::new(),
        }
    }
}

impl<R: BufRead> IntReader for StdinReader<R> {
    fn read_int(&mut self) -> Result<i64, RuntimeError> {
        while self.pending.is_empty() {
            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .map_err(|_| RuntimeError::ReadFailed)?;
            if read == 0 {
                return Err(RuntimeError::ReadFailed);
            }
            self.pending
                .extend(line.split_whitespace().map(str::to_string));
        }
        let token = self.pending.pop_front().ok_or(RuntimeError::ReadFailed)?;
        token.parse().map_err(|_| RuntimeError::ReadFailed)
    }
}

/// Serves a fixed queue of integers.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReader {
    values: VecDeque<i64>,
}

impl ScriptedReader {
    pub fn new(values: impl IntoIterator<Item = i64>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl IntReader for ScriptedReader {
    fn read_int(&mut self) -> Result<i64, RuntimeError> {
        self.values.pop_front().ok_or(RuntimeError::ReadFailed)
    }
}
