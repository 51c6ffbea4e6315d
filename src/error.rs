//! Error types for the render service
//!
//! Validation verdicts are not errors: they live in
//! [`crate::validator::Rejection`] and are returned as data. Everything in
//! this module is an internal failure that surfaces as a server error.

use thiserror::Error;

/// Result type alias for renderer and pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while launching the renderer or rendering a document
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to launch the renderer
    #[error("Renderer initialization failed: {0}")]
    InitializationError(String),

    /// Failed to open or close a render session
    #[error("Session error: {0}")]
    SessionError(String),

    /// Failed to load the wrapper document into a session
    #[error("Failed to load content: {0}")]
    LoadError(String),

    /// Failed to measure the rendered content
    #[error("Layout evaluation failed: {0}")]
    LayoutError(String),

    /// Failed to capture the clipped image
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The pool no longer hands out sessions
    #[error("Session pool is shut down")]
    ShutDown,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Render the error together with its source chain.
    ///
    /// This is the diagnostic text returned to operators for failed renders.
    pub fn diagnostic(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out.push_str(&format!("\n{:?}", self));
        out
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Other(format!("Blocking task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_includes_message_and_debug_form() {
        let err = Error::LayoutError("container has no size".into());
        let text = err.diagnostic();
        assert!(text.starts_with("Layout evaluation failed: container has no size"));
        assert!(text.contains("LayoutError"));
    }

    #[test]
    fn timeout_message_mentions_millis() {
        assert_eq!(Error::Timeout(1500).to_string(), "Operation timed out after 1500ms");
    }
}
