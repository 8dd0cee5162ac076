use std::time::Duration;

/// Caller errors, detected before anything is sent
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("whitelist is empty")]
    EmptyWhitelist,
    #[error("device group is empty")]
    EmptyGroup,
    #[error("device {0} has no local address")]
    MissingAddress(String),
    #[error("device {mac} is at {found}, group requires {expected}")]
    AddressMismatch {
        expected: String,
        found: String,
        mac: String,
    },
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The request was sent, or attempted, and got no usable HTTP response
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("failed to connect: {0}")]
    Connect(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] hyper::Error),
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] hyper::http::Error),
}
