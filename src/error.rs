//! Error types for the render pipeline.
//!
//! [`Error`] covers infrastructure failures (store, renderer, I/O, network).
//! Expected conditions of the access gate are not errors in this sense; they
//! are reported as a [`Denial`](crate::gate::Denial).

use thiserror::Error;

/// Infrastructure errors raised while serving a device.
#[derive(Debug, Error)]
pub enum Error {
    /// Persistent store failed (connection, constraint, lock poisoning)
    #[error("Store error: {0}")]
    Store(String),

    /// File I/O failed
    #[error("I/O error: {0}")]
    Io(String),

    /// External renderer failed to produce an image
    #[error("Renderer failed: {0}")]
    Render(String),

    /// External renderer exceeded its time budget and was killed
    #[error("Renderer timed out after {secs}s")]
    RenderTimeout {
        /// Budget that was exceeded, in seconds
        secs: u64,
    },

    /// HTTP request failed (network error, bad status, etc.)
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Image decoding, conversion or encoding failed
    #[error("Image error: {0}")]
    Image(String),

    /// Settings could not be read or were invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Error::Store(message.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Request(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::RenderTimeout { secs: 30 };
        assert!(err.to_string().contains("30s"));

        let err = Error::store("row locked");
        assert_eq!(err.to_string(), "Store error: row locked");
    }

    #[test]
    fn test_from_serde_json() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
