use thiserror::Error;

/// Typed calibration errors surfaced by the core. Callers get these wrapped
/// in `eyre::Report` with context attached at each layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalError {
    /// Front-end or latch-chain access failed.
    #[error("hardware fault: {0}")]
    Hardware(String),

    /// The front-end is in a state the operation cannot run from.
    #[error("invalid front-end state: {0}")]
    State(String),

    /// An epoch wait was released by the timeout guard before completing.
    #[error("calibration timed out waiting for a sampling epoch")]
    Timeout,

    /// Configuration rejected at run time.
    #[error("config error: {0}")]
    Config(String),
}

/// Crate-wide result alias carrying `eyre::Report`.
pub type Result<T> = eyre::Result<T>;
