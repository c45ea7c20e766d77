use thiserror::Error;

/// Errors produced by the gateway.
///
/// The REST layer maps these to HTTP statuses; the RPC layer folds every
/// failure into an embedded `error: true` envelope. The variants themselves
/// carry no transport types.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid or expired session: {0}")]
    SessionNotFound(String),

    #[error("upstream authentication failed: {0}")]
    UpstreamAuth(String),

    #[error("upstream call failed: {0}")]
    Upstream(String),

    #[error("timeout")]
    Timeout,

    #[error("codec error: {0}")]
    Codec(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
