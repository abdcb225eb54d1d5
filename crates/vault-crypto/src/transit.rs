use crate::Crypto;
use crate::CryptoError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a transit-style KMS holding two named keys: one for PII
/// confidentiality, one for the deterministic search HMAC.
pub struct VaultTransit {
    client: reqwest::Client,
    base_url: String,
    token: String,
    pii_key: String,
    hmac_key: String,
}

#[derive(Serialize)]
struct EncryptRequest {
    plaintext: String,
}

#[derive(Serialize)]
struct DecryptRequest {
    ciphertext: String,
}

#[derive(Serialize)]
struct HmacRequest {
    input: String,
    algorithm: &'static str,
}

#[derive(Deserialize)]
struct TransitResponse {
    data: TransitData,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct TransitData {
    ciphertext: Option<String>,
    plaintext: Option<String>,
    hmac: Option<String>,
}

impl VaultTransit {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        pii_key: impl Into<String>,
        hmac_key: impl Into<String>,
    ) -> Result<Self, CryptoError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CryptoError::KmsUnavailable(format!("building client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            pii_key: pii_key.into(),
            hmac_key: hmac_key.into(),
        })
    }

    async fn post<B: Serialize>(
        &self,
        operation: &str,
        key: &str,
        body: &B,
    ) -> Result<TransitData, CryptoError> {
        let url = format!("{}/v1/transit/{operation}/{key}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-Vault-Token", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| CryptoError::KmsUnavailable(format!("{operation} request: {e}")))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN if operation == "decrypt" => {
                return Err(CryptoError::DecryptAuthFail);
            }
            status if status.is_server_error() => {
                return Err(CryptoError::KmsUnavailable(format!(
                    "{operation} returned {status}"
                )));
            }
            status => {
                return Err(CryptoError::BadResponse(format!(
                    "{operation} returned {status}"
                )));
            }
        }

        let parsed: TransitResponse = response
            .json()
            .await
            .map_err(|e| CryptoError::BadResponse(format!("{operation} body: {e}")))?;
        Ok(parsed.data)
    }
}

#[async_trait]
impl Crypto for VaultTransit {
    async fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let body = EncryptRequest {
            plaintext: BASE64.encode(plaintext.as_bytes()),
        };
        let data = self.post("encrypt", &self.pii_key, &body).await?;
        data.ciphertext
            .ok_or_else(|| CryptoError::BadResponse("encrypt response missing ciphertext".into()))
    }

    async fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let body = DecryptRequest {
            ciphertext: ciphertext.to_string(),
        };
        let data = self.post("decrypt", &self.pii_key, &body).await?;
        let encoded = data
            .plaintext
            .ok_or_else(|| CryptoError::BadResponse("decrypt response missing plaintext".into()))?;
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::BadResponse(format!("plaintext base64: {e}")))?;
        String::from_utf8(bytes)
            .map_err(|e| CryptoError::BadResponse(format!("plaintext utf-8: {e}")))
    }

    async fn hmac_hex(&self, input: &str) -> Result<String, CryptoError> {
        let body = HmacRequest {
            input: BASE64.encode(input.as_bytes()),
            algorithm: "sha2-256",
        };
        let data = self.post("hmac", &self.hmac_key, &body).await?;
        data.hmac
            .ok_or_else(|| CryptoError::BadResponse("hmac response missing digest".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encrypt_posts_base64_and_returns_ciphertext() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/transit/encrypt/user_pii")
            .match_header("x-vault-token", "token-1")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "plaintext": BASE64.encode("P. Sharma"),
            })))
            .with_status(200)
            .with_body(r#"{"data":{"ciphertext":"vault:v1:abc"}}"#)
            .create_async()
            .await;

        let kms =
            VaultTransit::new(server.url(), "token-1", "user_pii", "user_search_hmac").unwrap();
        let ciphertext = kms.encrypt("P. Sharma").await.unwrap();

        assert_eq!(ciphertext, "vault:v1:abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn decrypt_maps_bad_request_to_auth_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/transit/decrypt/user_pii")
            .with_status(400)
            .with_body(r#"{"errors":["invalid ciphertext"]}"#)
            .create_async()
            .await;

        let kms =
            VaultTransit::new(server.url(), "token-1", "user_pii", "user_search_hmac").unwrap();
        let err = kms.decrypt("vault:v1:tampered").await.unwrap_err();

        assert!(matches!(err, CryptoError::DecryptAuthFail));
    }

    #[tokio::test]
    async fn server_errors_surface_as_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/transit/hmac/user_search_hmac")
            .with_status(503)
            .create_async()
            .await;

        let kms =
            VaultTransit::new(server.url(), "token-1", "user_pii", "user_search_hmac").unwrap();
        let err = kms.hmac_hex("a@example.com").await.unwrap_err();

        assert!(err.is_unavailable());
    }
}
