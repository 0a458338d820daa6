//! Error types for the B-tree engine.

/// All errors the engine can surface to a caller.
///
/// The tree never recovers locally from any of these; they are always
/// propagated. A `StructuralCorruption` detected during audit leaves the
/// file in whatever state it was found in.
#[derive(thiserror::Error, Debug)]
pub enum BtreeError {
    #[error("format error: {detail}")]
    Format { detail: String },

    #[error("invalid argument: {detail}")]
    InvalidArgument { detail: String },

    #[error("invalid state: {detail}")]
    InvalidState { detail: String },

    #[error("structural corruption: {detail}")]
    StructuralCorruption { detail: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BtreeError {
    pub fn format<S: Into<String>>(detail: S) -> Self {
        BtreeError::Format { detail: detail.into() }
    }

    pub fn invalid_argument<S: Into<String>>(detail: S) -> Self {
        BtreeError::InvalidArgument { detail: detail.into() }
    }

    pub fn invalid_state<S: Into<String>>(detail: S) -> Self {
        BtreeError::InvalidState { detail: detail.into() }
    }

    pub fn corruption<S: Into<String>>(detail: S) -> Self {
        BtreeError::StructuralCorruption { detail: detail.into() }
    }
}

pub type Result<T> = std::result::Result<T, BtreeError>;
