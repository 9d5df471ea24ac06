use shared::error::ProtocolError;
use thiserror::Error;

pub const CONNECTION_FAILURE_MESSAGE: &str = "Unable to connect to server.";

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport failure calling '{url}': {reason}")]
    Transport { url: String, reason: String },
    #[error("server answered {status}")]
    Server { status: u16, body: String },
    #[error("server returned an empty body for '{url}'")]
    EmptyResponse { url: String },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl DispatchError {
    /// Text for the blocking alert, or `None` when the failure is only logged.
    pub fn user_message(&self) -> Option<String> {
        match self {
            DispatchError::Transport { url, reason } => Some(format!(
                "Unable to connect to '{url}', exception = {reason}"
            )),
            DispatchError::Server { body, .. } if !body.trim().is_empty() => Some(body.clone()),
            DispatchError::Server { .. } | DispatchError::EmptyResponse { .. } => {
                Some(CONNECTION_FAILURE_MESSAGE.to_string())
            }
            DispatchError::Protocol(_) => None,
        }
    }
}
