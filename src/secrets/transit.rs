/// HTTP adapter to the external secret service.
///
/// Talks to three API families, all authenticated by the token from
/// `VaultConfig`:
/// - `/v1/{transit_mount}/...` for key provisioning and encrypt/decrypt
/// - `/v1/{kv_mount}/data/...` for versioned key/value secret storage
/// - `/v1/sys/...` for mount management and health
///
/// No call is retried here; retry policy belongs to the caller.
use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{DataKey, EncryptionContext, KeyAlgorithm, SecretsClient};
use crate::config::VaultConfig;
use crate::crypto::sensitive::SensitiveVec;
use crate::error::{KmsError, Result};

/// Secret-service client backed by the transit encryption API.
pub struct VaultTransitClient {
    config: VaultConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EncryptResponse {
    data: EncryptData,
}

#[derive(Debug, Deserialize)]
struct EncryptData {
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
struct DecryptResponse {
    data: DecryptData,
}

#[derive(Debug, Deserialize)]
struct DecryptData {
    plaintext: String,
}

#[derive(Debug, Deserialize)]
struct DataKeyResponse {
    data: DataKeyData,
}

#[derive(Debug, Deserialize)]
struct DataKeyData {
    plaintext: String,
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
struct SecretReadResponse {
    data: SecretReadData,
}

#[derive(Debug, Deserialize)]
struct SecretReadData {
    data: HashMap<String, String>,
}

impl VaultTransitClient {
    pub fn new(config: VaultConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                KmsError::ServiceUnavailable(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self { config, client })
    }

    fn transit_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/{}",
            self.config.address, self.config.transit_mount, path
        )
    }

    fn kv_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.config.address, self.config.kv_mount, path
        )
    }

    fn sys_url(&self, path: &str) -> String {
        format!("{}/v1/sys/{}", self.config.address, path)
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("X-Vault-Token", &self.config.token)
    }

    /// Map a transport-level failure. Anything that prevents the request
    /// from completing means the crypto service is unavailable.
    fn transport_err(op: &str, e: reqwest::Error) -> KmsError {
        KmsError::ServiceUnavailable(format!("{op}: {e}"))
    }

    /// Map a non-success status to a typed error.
    async fn status_err(op: &str, resp: Response) -> KmsError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => KmsError::NotFound(format!("{op}: {body}")),
            StatusCode::FORBIDDEN => {
                KmsError::ServiceUnavailable(format!("{op}: access denied: {body}"))
            }
            StatusCode::SERVICE_UNAVAILABLE => {
                KmsError::ServiceUnavailable(format!("{op}: service sealed or down: {body}"))
            }
            _ => KmsError::ServiceUnavailable(format!("{op}: service error ({status}): {body}")),
        }
    }

    fn context_field(context: &EncryptionContext) -> Option<String> {
        if context.is_empty() {
            None
        } else {
            Some(context.encode_base64())
        }
    }
}

#[async_trait]
impl SecretsClient for VaultTransitClient {
    fn name(&self) -> &str {
        "vault-transit"
    }

    async fn ensure_transit_ready(&self) -> Result<()> {
        let resp = self
            .request(Method::GET, self.sys_url("mounts"))
            .send()
            .await
            .map_err(|e| Self::transport_err("list mounts", e))?;

        if !resp.status().is_success() {
            return Err(Self::status_err("list mounts", resp).await);
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| KmsError::Serialization(format!("Mount list parse error: {e}")))?;

        let mount_key = format!("{}/", self.config.transit_mount);
        let mounted = body
            .get("data")
            .and_then(|d| d.as_object())
            .map(|obj| obj.contains_key(&mount_key))
            .unwrap_or(false)
            || body
                .as_object()
                .map(|obj| obj.contains_key(&mount_key))
                .unwrap_or(false);

        if mounted {
            debug!(mount = %self.config.transit_mount, "transit mount already present");
            return Ok(());
        }

        let resp = self
            .request(
                Method::POST,
                self.sys_url(&format!("mounts/{}", self.config.transit_mount)),
            )
            .json(&json!({
                "type": "transit",
                "config": {
                    "default_lease_ttl": self.config.default_lease_ttl,
                    "max_lease_ttl": self.config.max_lease_ttl,
                },
            }))
            .send()
            .await
            .map_err(|e| Self::transport_err("mount transit", e))?;

        if resp.status().is_success() {
            info!(mount = %self.config.transit_mount, "transit mount created");
            return Ok(());
        }

        // Another process may have mounted it between our check and create.
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::BAD_REQUEST && body.contains("already in use") {
            debug!(mount = %self.config.transit_mount, "transit mount raced; already in use");
            return Ok(());
        }

        Err(KmsError::ServiceUnavailable(format!(
            "mount transit: service error ({status}): {body}"
        )))
    }

    async fn create_key(&self, name: &str, algorithm: KeyAlgorithm) -> Result<()> {
        let resp = self
            .request(Method::POST, self.transit_url(&format!("keys/{name}")))
            .json(&json!({
                "type": algorithm.as_str(),
                "exportable": false,
                "derived": false,
            }))
            .send()
            .await
            .map_err(|e| Self::transport_err("create key", e))?;

        // The service treats re-creation of an existing key as a no-op.
        if !resp.status().is_success() {
            return Err(Self::status_err("create key", resp).await);
        }

        debug!(key = %name, algorithm = %algorithm.as_str(), "transit key ensured");
        Ok(())
    }

    async fn encrypt(
        &self,
        key_name: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<String> {
        let mut body = json!({
            "plaintext": base64::engine::general_purpose::STANDARD.encode(plaintext),
        });
        if let Some(ctx) = Self::context_field(context) {
            body["context"] = json!(ctx);
        }

        let resp = self
            .request(Method::POST, self.transit_url(&format!("encrypt/{key_name}")))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport_err("encrypt", e))?;

        if !resp.status().is_success() {
            return Err(Self::status_err("encrypt", resp).await);
        }

        let parsed: EncryptResponse = resp
            .json()
            .await
            .map_err(|e| KmsError::Serialization(format!("Encrypt response parse error: {e}")))?;

        Ok(parsed.data.ciphertext)
    }

    async fn decrypt(
        &self,
        key_name: &str,
        ciphertext: &str,
        context: &EncryptionContext,
    ) -> Result<SensitiveVec> {
        let mut body = json!({
            "ciphertext": ciphertext,
        });
        if let Some(ctx) = Self::context_field(context) {
            body["context"] = json!(ctx);
        }

        let resp = self
            .request(Method::POST, self.transit_url(&format!("decrypt/{key_name}")))
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::transport_err("decrypt", e))?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST {
            // The service rejects mismatched contexts and malformed tokens
            // with 400. Never retried with a different context.
            let body = resp.text().await.unwrap_or_default();
            return Err(KmsError::Decryption(format!(
                "service rejected ciphertext: {body}"
            )));
        }
        if !status.is_success() {
            return Err(Self::status_err("decrypt", resp).await);
        }

        let parsed: DecryptResponse = resp
            .json()
            .await
            .map_err(|e| KmsError::Serialization(format!("Decrypt response parse error: {e}")))?;

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&parsed.data.plaintext)
            .map_err(|e| KmsError::Serialization(format!("Plaintext decode error: {e}")))?;

        Ok(SensitiveVec::new(bytes))
    }

    async fn generate_data_key(&self, key_name: &str, bits: u32) -> Result<DataKey> {
        let resp = self
            .request(
                Method::POST,
                self.transit_url(&format!("datakey/plaintext/{key_name}")),
            )
            .json(&json!({ "bits": bits }))
            .send()
            .await
            .map_err(|e| Self::transport_err("generate data key", e))?;

        if !resp.status().is_success() {
            return Err(Self::status_err("generate data key", resp).await);
        }

        let parsed: DataKeyResponse = resp.json().await.map_err(|e| {
            KmsError::Serialization(format!("Data key response parse error: {e}"))
        })?;

        let plaintext = base64::engine::general_purpose::STANDARD
            .decode(&parsed.data.plaintext)
            .map_err(|e| KmsError::Serialization(format!("Data key decode error: {e}")))?;

        let expected = (bits / 8) as usize;
        if plaintext.len() != expected {
            return Err(KmsError::Encryption(format!(
                "Unexpected data key size: {} (expected {expected})",
                plaintext.len()
            )));
        }

        Ok(DataKey {
            plaintext: SensitiveVec::new(plaintext),
            ciphertext: parsed.data.ciphertext,
        })
    }

    async fn store_secret(&self, path: &str, data: &HashMap<String, String>) -> Result<()> {
        let resp = self
            .request(Method::POST, self.kv_url(path))
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(|e| Self::transport_err("store secret", e))?;

        if !resp.status().is_success() {
            return Err(Self::status_err("store secret", resp).await);
        }

        Ok(())
    }

    async fn get_secret(&self, path: &str) -> Result<HashMap<String, String>> {
        let resp = self
            .request(Method::GET, self.kv_url(path))
            .send()
            .await
            .map_err(|e| Self::transport_err("get secret", e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(KmsError::NotFound(format!("secret at '{path}'")));
        }
        if !resp.status().is_success() {
            return Err(Self::status_err("get secret", resp).await);
        }

        let parsed: SecretReadResponse = resp
            .json()
            .await
            .map_err(|e| KmsError::Serialization(format!("Secret response parse error: {e}")))?;

        Ok(parsed.data.data)
    }

    async fn health(&self) -> Result<()> {
        let resp = self
            .request(Method::GET, self.sys_url("health"))
            .query(&[("standbyok", "true")])
            .timeout(self.config.health_timeout)
            .send()
            .await
            .map_err(|e| Self::transport_err("health", e))?;

        match resp.status().as_u16() {
            200 | 429 => Ok(()),
            501 => Err(KmsError::ServiceUnavailable(
                "health: service not initialized".to_string(),
            )),
            503 => Err(KmsError::ServiceUnavailable(
                "health: service sealed".to_string(),
            )),
            code => Err(KmsError::ServiceUnavailable(format!(
                "health: unexpected status {code}"
            ))),
        }
    }
}
