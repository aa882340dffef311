use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad command line: unknown operation or option, missing required option
    #[error("{0}")]
    Usage(String),

    /// Malformed rule file or invalid endpoint configuration
    #[error("{message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to authenticate to the Docker Hub API. Response code {status}. Response text: {body}")]
    Auth { status: u16, body: String },

    /// Network failure that aborts the current step
    #[error("{message}: {source}")]
    Transport {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to connect to local docker daemon at {endpoint}. Ensure docker is running and docker environment variables are valid")]
    EngineUnavailable {
        endpoint: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to delete tag {tag}. Response code {status}. Response text: {body}")]
    Delete { tag: String, status: u16, body: String },

    /// Engine-side failure for a single image operation
    #[error("{0}")]
    Engine(String),

    #[error("Invalid image reference {reference}: {message}")]
    Reference { reference: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn usage<S: Into<String>>(message: S) -> Self {
        Self::Usage(message.into())
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn transport<S: Into<String>>(message: S, source: reqwest::Error) -> Self {
        Self::Transport {
            message: message.into(),
            source,
        }
    }

    /// Whether the "run help" hint should accompany this error.
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }
}
