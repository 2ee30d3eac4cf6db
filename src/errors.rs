//! Error types for the site prober

use std::fmt;

pub type Result<T> = std::result::Result<T, ProberError>;

#[derive(Debug)]
pub enum ProberError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP client could not be built or a request failed
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// Configuration file could not be parsed
    Yaml(serde_yaml::Error),

    /// Configuration is missing fields or holds invalid values
    Config(String),

    /// Upstream API or webhook answered with something unusable
    Transport(String),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for ProberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProberError::Io(err) => write!(f, "IO error: {}", err),
            ProberError::Http(err) => write!(f, "HTTP error: {}", err),
            ProberError::Json(err) => write!(f, "JSON error: {}", err),
            ProberError::Yaml(err) => write!(f, "YAML error: {}", err),
            ProberError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ProberError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ProberError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for ProberError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProberError::Io(err) => Some(err),
            ProberError::Http(err) => Some(err),
            ProberError::Json(err) => Some(err),
            ProberError::Yaml(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProberError {
    fn from(err: std::io::Error) -> Self {
        ProberError::Io(err)
    }
}

impl From<reqwest::Error> for ProberError {
    fn from(err: reqwest::Error) -> Self {
        ProberError::Http(err)
    }
}

impl From<serde_json::Error> for ProberError {
    fn from(err: serde_json::Error) -> Self {
        ProberError::Json(err)
    }
}

impl From<serde_yaml::Error> for ProberError {
    fn from(err: serde_yaml::Error) -> Self {
        ProberError::Yaml(err)
    }
}
