use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("response body is not a valid envelope: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("response operation at index {index} has no handler name")]
    MissingHandler { index: usize },
    #[error("unknown response handler '{0}'")]
    UnknownHandler(String),
    #[error("malformed '{handler}' operation: {source}")]
    MalformedOperation {
        handler: String,
        #[source]
        source: serde_json::Error,
    },
}
