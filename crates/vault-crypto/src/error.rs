use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The KMS could not be reached or answered with a server error. Writes
    /// must be aborted and retried by the caller.
    #[error("KMS unavailable: {0}")]
    KmsUnavailable(String),
    /// The KMS rejected the ciphertext; either it was tampered with or it
    /// was produced under a different key.
    #[error("decryption failed authentication")]
    DecryptAuthFail,
    #[error("malformed ciphertext: {0}")]
    InvalidCiphertext(String),
    #[error("unexpected KMS response: {0}")]
    BadResponse(String),
}

impl CryptoError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CryptoError::KmsUnavailable(_))
    }
}
