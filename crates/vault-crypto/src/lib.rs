//! Envelope encryption and deterministic HMAC for PII columns.
//!
//! Ciphertext lives in the database, plaintext only in memory. Equality
//! lookups over encrypted columns go through a keyed HMAC over normalized
//! input, so `A@Example.com ` and `a@example.com` index identically.

mod dev;
mod error;
mod transit;

use async_trait::async_trait;

pub use dev::DevCrypto;
pub use error::CryptoError;
pub use transit::VaultTransit;

#[async_trait]
pub trait Crypto: Send + Sync {
    async fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError>;
    async fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError>;
    /// Deterministic keyed HMAC, hex encoded. The input is hashed as given;
    /// normalize lookup fields first.
    async fn hmac_hex(&self, input: &str) -> Result<String, CryptoError>;

    async fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>, CryptoError> {
        match plaintext {
            Some(plaintext) => Ok(Some(self.encrypt(plaintext).await?)),
            None => Ok(None),
        }
    }

    async fn decrypt_opt(&self, ciphertext: Option<&str>) -> Result<Option<String>, CryptoError> {
        match ciphertext {
            Some(ciphertext) => Ok(Some(self.decrypt(ciphertext).await?)),
            None => Ok(None),
        }
    }

    async fn email_hmac(&self, email: &str) -> Result<String, CryptoError> {
        self.hmac_hex(&normalize_email(email)).await
    }

    async fn phone_hmac(&self, phone: &str) -> Result<String, CryptoError> {
        self.hmac_hex(&normalize_phone(phone)).await
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalization_ignores_case_and_whitespace() {
        assert_eq!(normalize_email(" A@Example.COM "), "a@example.com");
        assert_eq!(normalize_email("a@example.com"), "a@example.com");
    }

    #[test]
    fn phone_normalization_keeps_digits_only() {
        assert_eq!(normalize_phone("+91 98765-43210"), "919876543210");
        assert_eq!(normalize_phone("919876543210"), "919876543210");
    }
}
