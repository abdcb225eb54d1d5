use resilience::Transience;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Connect failures and timeouts; the request may not have reached the
    /// gateway at all.
    #[error("gateway unreachable: {0}")]
    Network(String),
    #[error("gateway returned {status}: {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("unexpected gateway response: {0}")]
    BadResponse(String),
}

impl GatewayError {
    pub fn code(&self) -> &str {
        match self {
            GatewayError::Network(_) => "NETWORK",
            GatewayError::Api { code, .. } => code,
            GatewayError::BadResponse(_) => "BAD_RESPONSE",
        }
    }
}

impl Transience for GatewayError {
    fn is_transient(&self) -> bool {
        match self {
            GatewayError::Network(_) => true,
            GatewayError::Api { status, .. } => *status >= 500 || *status == 429,
            GatewayError::BadResponse(_) => false,
        }
    }
}
