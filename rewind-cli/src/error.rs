use rewind_engine::RewindError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Recorder error: {0}")]
    Engine(#[from] RewindError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{failed} of {total} missions did not complete")]
    Incomplete { failed: usize, total: usize },
}
