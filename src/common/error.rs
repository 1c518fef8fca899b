use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A required magic is missing, a declared size overruns its container,
    /// a checksum does not match, or an encoding invariant is violated.
    #[error("{format} corrupt: {reason}")]
    Corrupt { format: &'static str, reason: String },

    /// Well-formed data the library declines to interpret.
    #[error("{format} unsupported: {reason}")]
    Unsupported { format: &'static str, reason: String },

    #[error("{0} no header found")]
    NoHeader(&'static str),

    /// Raised by every write path while the file carries corruption reasons.
    #[error("cannot save, file is possibly corrupt: {}", .0.join("; "))]
    PossiblyCorrupt(Vec<String>),

    #[error("range {offset}+{length} exceeds {size} bytes")]
    OutOfRange {
        offset: usize,
        length: usize,
        size: usize,
    },

    #[error("file is not open for {0}")]
    AccessMode(&'static str),

    #[error("Value error: {0}")]
    ValueError(String),
}

impl MetaError {
    pub fn corrupt(format: &'static str, reason: impl Into<String>) -> Self {
        MetaError::Corrupt {
            format,
            reason: reason.into(),
        }
    }

    pub fn unsupported(format: &'static str, reason: impl Into<String>) -> Self {
        MetaError::Unsupported {
            format,
            reason: reason.into(),
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, MetaError::Corrupt { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, MetaError::Unsupported { .. })
    }
}

pub type Result<T> = std::result::Result<T, MetaError>;
