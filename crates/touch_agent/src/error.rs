//! Error types for the automation surface, the model client and the agent

use thiserror::Error;

/// Why a screen capture did not produce an image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("Capture service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Automation surface is disconnected")]
    Disconnected,

    #[error("Capture request denied: {0}")]
    Denied(String),

    #[error("Capture interval too short")]
    IntervalTooShort,

    #[error("Screen capture is not supported on this device")]
    VersionUnsupported,

    #[error("Failed to decode captured image: {0}")]
    Decode(String),
}

/// Errors raised while driving the device surface
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Automation surface is disconnected")]
    Disconnected,

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Command timeout: {0}")]
    Timeout(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a chat-completion round trip
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ModelError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<async_openai::error::OpenAIError> for ModelError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Why an assistant reply could not be turned into an action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionParseError {
    #[error("Unrecognized action: {0}")]
    Unrecognized(String),

    #[error("Unknown action type: {0}")]
    UnknownAction(String),

    #[error("{action} is missing field `{field}`")]
    MissingField { action: String, field: &'static str },

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// Why a parsed action could not be carried out on the device
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0} was not accepted by the device")]
    Rejected(String),

    #[error("Failed to launch app: {0}")]
    LaunchFailed(String),

    #[error("No editable input field found")]
    InputFieldNotFound,

    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Umbrella error for library entry points
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display_embeds_status_and_body() {
        let err = ModelError::Http {
            status: 503,
            body: "upstream busy".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: upstream busy");
        assert_eq!(err.status(), Some(503));
        assert_eq!(ModelError::Timeout("60s".into()).status(), None);
    }
}
