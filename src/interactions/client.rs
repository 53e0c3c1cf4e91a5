// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Interactsh Client
 * Register/poll protocol against an interactsh-compatible server
 *
 * The server encrypts interaction payloads with a session AES key, itself
 * wrapped with our RSA public key from registration.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use url::Url;

use super::{random_id, Interaction, InteractionSource};

#[derive(Debug, Serialize)]
struct RegisterRequest {
    #[serde(rename = "public-key")]
    public_key: String,
    #[serde(rename = "secret-key")]
    secret_key: String,
    #[serde(rename = "correlation-id")]
    correlation_id: String,
}

#[derive(Debug, Deserialize)]
struct PollResponse {
    data: Option<Vec<String>>,
    aes_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InteractionData {
    protocol: String,
    #[serde(rename = "unique-id")]
    unique_id: String,
    #[serde(rename = "full-id")]
    full_id: String,
    #[serde(rename = "raw-request")]
    raw_request: Option<String>,
    #[serde(rename = "remote-address")]
    remote_address: String,
    timestamp: String,
}

/// Client side of the interactsh register/poll protocol.
pub struct InteractshClient {
    server_url: String,
    correlation_id: String,
    secret_key: String,
    private_key: RsaPrivateKey,
    base_domain: String,
    http_client: reqwest::Client,
}

impl InteractshClient {
    /// Generate a key pair, register with the server and derive the base
    /// callback domain.
    pub async fn register(server_url: &str) -> Result<Self> {
        let server_url = server_url.trim_end_matches('/').to_string();

        let mut rng = rand::thread_rng();
        let private_key =
            RsaPrivateKey::new(&mut rng, 2048).context("rsa key generation failed")?;
        let public_key = RsaPublicKey::from(&private_key);

        let correlation_id = random_id(20);
        let secret_key = random_id(32);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("http client construction failed")?;

        let public_key_b64 = {
            use rsa::pkcs8::EncodePublicKey;
            let der = public_key
                .to_public_key_der()
                .context("public key encoding failed")?;
            BASE64.encode(der.as_bytes())
        };

        let response = http_client
            .post(format!("{}/register", server_url))
            .json(&RegisterRequest {
                public_key: public_key_b64,
                secret_key: secret_key.clone(),
                correlation_id: correlation_id.clone(),
            })
            .send()
            .await
            .context("interaction server registration failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "interaction server registration rejected: {}",
                response.status()
            ));
        }

        let server_host = Url::parse(&server_url)
            .context("invalid interaction server url")?
            .host_str()
            .unwrap_or_default()
            .to_string();
        let base_domain = format!("{}.{}", correlation_id, server_host);
        info!(domain = base_domain.as_str(), "registered with interaction server");

        Ok(Self {
            server_url,
            correlation_id,
            secret_key,
            private_key,
            base_domain,
            http_client,
        })
    }

    fn decrypt(&self, encrypted: &str, aes_key_b64: &str) -> Result<InteractionData> {
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
        type Aes256CfbDec = cfb_mode::Decryptor<aes::Aes256>;

        let wrapped_key = BASE64.decode(aes_key_b64).context("bad aes key encoding")?;
        let aes_key = self
            .private_key
            .decrypt(Pkcs1v15Encrypt, &wrapped_key)
            .context("aes key unwrap failed")?;

        let payload = BASE64.decode(encrypted).context("bad payload encoding")?;
        if payload.len() < 16 || aes_key.len() < 16 {
            return Err(anyhow!("interaction payload too short"));
        }
        let mut key = [0u8; 32];
        let copy = aes_key.len().min(32);
        key[..copy].copy_from_slice(&aes_key[..copy]);
        let (iv, ciphertext) = payload.split_at(16);

        let mut plaintext = ciphertext.to_vec();
        Aes256CfbDec::new((&key).into(), iv.into()).decrypt(&mut plaintext);

        let json = String::from_utf8(plaintext).context("interaction is not utf-8")?;
        serde_json::from_str(&json).context("interaction json decode failed")
    }
}

#[async_trait]
impl InteractionSource for InteractshClient {
    fn generate(&self) -> (String, String) {
        let label = format!("{}{}", random_id(8), random_id(4));
        let hostname = format!("{}.{}", label, self.base_domain);
        (format!("http://{}", hostname), label)
    }

    async fn poll(&self) -> Result<Vec<Interaction>> {
        let response = self
            .http_client
            .get(format!(
                "{}/poll?id={}&secret={}",
                self.server_url, self.correlation_id, self.secret_key
            ))
            .send()
            .await
            .context("interaction poll request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!("interaction poll rejected: {}", response.status()));
        }

        let poll: PollResponse = response
            .json()
            .await
            .context("interaction poll decode failed")?;

        let mut interactions = Vec::new();
        if let (Some(data), Some(aes_key)) = (poll.data, poll.aes_key) {
            for encrypted in data {
                match self.decrypt(&encrypted, &aes_key) {
                    Ok(data) => interactions.push(Interaction {
                        protocol: data.protocol,
                        unique_id: data.unique_id,
                        full_id: data.full_id,
                        remote_address: data.remote_address,
                        raw_request: data.raw_request,
                        timestamp: data.timestamp,
                    }),
                    Err(e) => tracing::warn!("could not decrypt interaction: {}", e),
                }
            }
        }
        Ok(interactions)
    }
}
