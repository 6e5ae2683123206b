use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BootstrapError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("{message}")]
    Precondition { message: String },

    #[error("image verification failed: {message}")]
    Verification { message: String },

    #[error("{command} failed: {message}")]
    ExternalTool { command: String, message: String },

    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted")]
    Interrupted,
}

impl BootstrapError {
    /// Errors raised before any per-machine artifact exists. These exit
    /// directly without running the teardown sequence.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            BootstrapError::ConfigLoad { .. }
                | BootstrapError::ConfigParse { .. }
                | BootstrapError::Config { .. }
                | BootstrapError::Precondition { .. }
                | BootstrapError::Verification { .. }
        )
    }
}
