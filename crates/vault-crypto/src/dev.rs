use crate::Crypto;
use crate::CryptoError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::Hmac;
use hmac::Mac;
use sha2::Sha256;

const DEV_PREFIX: &str = "dev:v1:";

/// Development-only backend: base64-wraps plaintext and computes the search
/// HMAC locally. Offers no confidentiality; the wiring only accepts it when
/// `crypto.backend = "dev"` is set explicitly.
pub struct DevCrypto {
    hmac_key: Vec<u8>,
}

impl DevCrypto {
    pub fn new(hmac_key: impl Into<Vec<u8>>) -> Self {
        Self {
            hmac_key: hmac_key.into(),
        }
    }
}

#[async_trait]
impl Crypto for DevCrypto {
    async fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        Ok(format!("{DEV_PREFIX}{}", BASE64.encode(plaintext.as_bytes())))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let encoded = ciphertext
            .strip_prefix(DEV_PREFIX)
            .ok_or_else(|| CryptoError::InvalidCiphertext("missing dev prefix".to_string()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::DecryptAuthFail)?;
        String::from_utf8(bytes).map_err(|_| CryptoError::DecryptAuthFail)
    }

    async fn hmac_hex(&self, input: &str) -> Result<String, CryptoError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.hmac_key)
            .map_err(|e| CryptoError::BadResponse(format!("hmac key: {e}")))?;
        mac.update(input.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> DevCrypto {
        DevCrypto::new(b"test-hmac-key".to_vec())
    }

    #[tokio::test]
    async fn round_trips_printable_unicode() {
        let crypto = dev();
        for plaintext in ["P. Sharma", "+919876543210", "नमस्ते", "ärger ✓"] {
            let ciphertext = crypto.encrypt(plaintext).await.unwrap();
            assert!(ciphertext.starts_with("dev:v1:"));
            assert_eq!(crypto.decrypt(&ciphertext).await.unwrap(), plaintext);
        }
    }

    #[tokio::test]
    async fn rejects_foreign_ciphertext() {
        let err = dev().decrypt("vault:v1:abc").await.unwrap_err();
        assert!(matches!(err, CryptoError::InvalidCiphertext(_)));
    }

    #[tokio::test]
    async fn hmac_is_deterministic_over_normalized_input() {
        let crypto = dev();
        let a = crypto.email_hmac(" A@Example.com ").await.unwrap();
        let b = crypto.email_hmac("a@example.com").await.unwrap();
        let c = crypto.email_hmac("a@example.io").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn none_passes_through_option_helpers() {
        let crypto = dev();
        assert_eq!(crypto.encrypt_opt(None).await.unwrap(), None);
        assert_eq!(crypto.decrypt_opt(None).await.unwrap(), None);
    }
}
