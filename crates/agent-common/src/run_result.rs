// Conversion between a run's outcome and the process return code.

use crate::constants::return_code;

/// Terminal outcome of one action run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunResult {
    Succeeded,
    Failed,
}

impl RunResult {
    /// Translate to a process return code.
    pub fn return_code(self) -> i32 {
        match self {
            RunResult::Succeeded => return_code::SUCCESS,
            RunResult::Failed => return_code::FAILURE,
        }
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunResult::Succeeded => write!(f, "Succeeded"),
            RunResult::Failed => write!(f, "Failed"),
        }
    }
}
