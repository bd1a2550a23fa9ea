//! Error types emitted by attention construction and forward passes.

/// Attention-specific error category.
///
/// Construction-time and shape errors are surfaced synchronously and are
/// never retried or downgraded. The fused-to-reference backend substitution
/// is a logged degradation, not an error.
#[derive(Debug)]
pub enum AttentionError {
    /// The configuration named an attention variant that does not exist.
    UnknownVariant { tag: String },
    /// The configuration is internally inconsistent (head partitioning,
    /// dropout range, zero-sized dimensions).
    InvalidConfig { message: String },
    /// A tensor shape disagrees with the documented contract.
    ShapeMismatch { context: String },
    /// A backend failure propagated from the tensor engine.
    Backend { message: String },
}

impl std::fmt::Display for AttentionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttentionError::UnknownVariant { tag } => {
                write!(f, "unknown attention type: {tag}")
            }
            AttentionError::InvalidConfig { message } => {
                write!(f, "invalid attention configuration: {message}")
            }
            AttentionError::ShapeMismatch { context } => {
                write!(f, "shape mismatch: {context}")
            }
            AttentionError::Backend { message } => f.write_str(message),
        }
    }
}

impl std::error::Error for AttentionError {}

impl From<candle_core::Error> for AttentionError {
    fn from(err: candle_core::Error) -> Self {
        AttentionError::Backend {
            message: err.to_string(),
        }
    }
}
