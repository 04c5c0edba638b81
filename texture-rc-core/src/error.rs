//! Error types for the texture compiler

use thiserror::Error;

/// Result type for texture compiler operations
pub type Result<T> = std::result::Result<T, TextureError>;

/// Errors that can occur while compiling a texture
#[derive(Error, Debug)]
pub enum TextureError {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No codec in the chain handles the requested format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Image dimensions violate a format constraint
    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// A codec accepted the format but failed to process it
    #[error("Codec failure: {0}")]
    CodecFailure(String),

    /// Mutually exclusive preset settings were both enabled
    #[error("Configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// Malformed pixel or container data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid container signature
    #[error("Invalid signature: expected {expected}, got {actual}")]
    InvalidSignature { expected: String, actual: String },

    /// The in-flight image was replaced by the invalid sentinel
    #[error("Image invalidated by a previous failed conversion")]
    InvalidImage,

    /// Cubemap filtering was cancelled through the abort flag
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic error with context
    #[error("Error: {0}")]
    Generic(String),
}

impl TextureError {
    /// Create a new unsupported format error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create a new invalid dimensions error
    pub fn invalid_dimensions<S: Into<String>>(msg: S) -> Self {
        Self::InvalidDimensions(msg.into())
    }

    /// Create a new codec failure error
    pub fn codec_failure<S: Into<String>>(msg: S) -> Self {
        Self::CodecFailure(msg.into())
    }

    /// Create a new configuration conflict error
    pub fn config_conflict<S: Into<String>>(msg: S) -> Self {
        Self::ConfigurationConflict(msg.into())
    }

    /// Create a new invalid data error
    pub fn invalid_data<S: Into<String>>(msg: S) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Create a new invalid signature error
    pub fn invalid_signature<S: Into<String>>(expected: S, actual: S) -> Self {
        Self::InvalidSignature {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(msg: S) -> Self {
        Self::Generic(msg.into())
    }

    /// Check if this error allows the converter to try another strategy
    ///
    /// Only unsupported-format and invalid-dimension errors are recoverable:
    /// the dispatcher may fall through to the next codec or to an
    /// uncompressed fallback format. Codec failures are terminal for the
    /// conversion, configuration conflicts and I/O errors for the job.
    pub fn is_recoverable(&self) -> bool {
        match self {
            TextureError::UnsupportedFormat(_) => true,
            TextureError::InvalidDimensions(_) => true,
            TextureError::Io(_) => false,
            TextureError::CodecFailure(_) => false,
            TextureError::ConfigurationConflict(_) => false,
            TextureError::InvalidData(_) => false,
            TextureError::InvalidSignature { .. } => false,
            TextureError::InvalidImage => false,
            TextureError::Cancelled => false,
            TextureError::Generic(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = TextureError::unsupported("BC2 has no codec");
        assert!(matches!(err, TextureError::UnsupportedFormat(_)));
        assert_eq!(err.to_string(), "Unsupported format: BC2 has no codec");
    }

    #[test]
    fn test_recoverability() {
        assert!(TextureError::unsupported("x").is_recoverable());
        assert!(TextureError::invalid_dimensions("x").is_recoverable());
        assert!(!TextureError::codec_failure("x").is_recoverable());
        assert!(!TextureError::config_conflict("x").is_recoverable());
    }

    #[test]
    fn test_invalid_signature_error() {
        let err = TextureError::invalid_signature("DDS ", "RIFF");
        assert_eq!(err.to_string(), "Invalid signature: expected DDS , got RIFF");
    }
}
