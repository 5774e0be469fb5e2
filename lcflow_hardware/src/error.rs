use thiserror::Error;

/// Hardware-layer errors surfaced through the front-end traits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HwError {
    /// An epoch wait was issued while the sampling engine was off.
    #[error("sampling engine is disabled")]
    Disabled,

    /// Any other front-end fault (bus, register, peripheral).
    #[error("front-end fault: {0}")]
    Fault(String),
}
