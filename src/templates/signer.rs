// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Template Signing
 * ECDSA P-256 / RSA signatures over canonical template bytes
 *
 * The signature line `# signature: <algo>:<base64>` covers the template
 * bytes with line endings normalized and the signature line itself
 * excluded. Code-bearing templates must verify against the trust store or
 * they are skipped.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use once_cell::sync::Lazy;
use p256::ecdsa::signature::{Signer as _, Verifier as _};
use regex::Regex;
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::errors::SignatureError;

/// Environment variables referencing key files. The legacy names are
/// honored as fallbacks for catalogs signed by other tooling.
pub const PRIVATE_KEY_ENV: &str = "SEITTI_SIGNATURE_PRIVATE_KEY";
pub const PUBLIC_KEY_ENV: &str = "SEITTI_SIGNATURE_PUBLIC_KEY";
pub const ALGORITHM_ENV: &str = "SEITTI_SIGNATURE_ALGORITHM";
const LEGACY_PRIVATE_KEY_ENV: &str = "NUCLEI_SIGNATURE_PRIVATE_KEY";
const LEGACY_PUBLIC_KEY_ENV: &str = "NUCLEI_SIGNATURE_PUBLIC_KEY";
const LEGACY_ALGORITHM_ENV: &str = "NUCLEI_SIGNATURE_ALGORITHM";

/// Compiled-in default verifier key. Empty in source builds; release
/// packaging injects the catalog key here.
const DEFAULT_PUBLIC_KEY_PEM: &str = "";

static SIGNATURE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#\s*signature:\s*([a-z0-9]+):([A-Za-z0-9+/=]+)\s*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    Ecdsa,
    Rsa,
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureAlgorithm::Ecdsa => f.write_str("ecdsa"),
            SignatureAlgorithm::Rsa => f.write_str("rsa"),
        }
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ecdsa" => Ok(SignatureAlgorithm::Ecdsa),
            "rsa" => Ok(SignatureAlgorithm::Rsa),
            other => Err(SignatureError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// A signature parsed from a template's trailing comment line.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSignature {
    pub algorithm: SignatureAlgorithm,
    pub signature: Vec<u8>,
}

impl TemplateSignature {
    /// Extract the signature line from raw template content, if present.
    pub fn parse(content: &str) -> Result<Option<Self>, SignatureError> {
        let Some(captures) = SIGNATURE_LINE_RE.captures(content) else {
            return Ok(None);
        };
        let algorithm: SignatureAlgorithm = captures[1].parse()?;
        let signature = BASE64
            .decode(&captures[2])
            .map_err(|_| SignatureError::Invalid)?;
        Ok(Some(Self {
            algorithm,
            signature,
        }))
    }
}

/// The bytes covered by a signature: CRLF normalized to LF, signature
/// lines stripped.
pub fn canonical_bytes(content: &str) -> Vec<u8> {
    let normalized = content.replace("\r\n", "\n");
    let stripped = SIGNATURE_LINE_RE.replace_all(&normalized, "");
    stripped.trim_end_matches('\n').as_bytes().to_vec()
}

enum SigningKey {
    Ecdsa(p256::ecdsa::SigningKey),
    Rsa(Box<RsaPrivateKey>),
}

/// Signs templates with a private key loaded from a PEM file.
pub struct TemplateSigner {
    key: SigningKey,
}

impl TemplateSigner {
    pub fn from_pem(algorithm: SignatureAlgorithm, pem: &str) -> Result<Self, SignatureError> {
        let key = match algorithm {
            SignatureAlgorithm::Ecdsa => {
                use p256::pkcs8::DecodePrivateKey;
                SigningKey::Ecdsa(
                    p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
                        .map_err(|e| SignatureError::Key(e.to_string()))?,
                )
            }
            SignatureAlgorithm::Rsa => {
                use rsa::pkcs8::DecodePrivateKey;
                SigningKey::Rsa(Box::new(
                    RsaPrivateKey::from_pkcs8_pem(pem)
                        .map_err(|e| SignatureError::Key(e.to_string()))?,
                ))
            }
        };
        Ok(Self { key })
    }

    /// Load the signer from the environment-referenced key file.
    pub fn from_env() -> Result<Self, SignatureError> {
        let key_path = std::env::var(PRIVATE_KEY_ENV)
            .or_else(|_| std::env::var(LEGACY_PRIVATE_KEY_ENV))
            .map_err(|_| SignatureError::Key(format!("{} not set", PRIVATE_KEY_ENV)))?;
        let algorithm = std::env::var(ALGORITHM_ENV)
            .or_else(|_| std::env::var(LEGACY_ALGORITHM_ENV))
            .unwrap_or_else(|_| "ecdsa".to_string())
            .parse()?;
        let pem = std::fs::read_to_string(Path::new(&key_path))
            .map_err(|e| SignatureError::Key(format!("cannot read {}: {}", key_path, e)))?;
        Self::from_pem(algorithm, &pem)
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self.key {
            SigningKey::Ecdsa(_) => SignatureAlgorithm::Ecdsa,
            SigningKey::Rsa(_) => SignatureAlgorithm::Rsa,
        }
    }

    fn sign_bytes(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        match &self.key {
            SigningKey::Ecdsa(key) => {
                let signature: p256::ecdsa::Signature = key.sign(data);
                Ok(signature.to_der().as_bytes().to_vec())
            }
            SigningKey::Rsa(key) => {
                let digest = Sha256::digest(data);
                key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
                    .map_err(|e| SignatureError::Key(e.to_string()))
            }
        }
    }

    /// Sign template content and return it with the signature line
    /// appended. Any previous signature line is replaced.
    pub fn sign(&self, content: &str) -> Result<String, SignatureError> {
        let canonical = canonical_bytes(content);
        let signature = self.sign_bytes(&canonical)?;
        let body = String::from_utf8_lossy(&canonical).to_string();
        Ok(format!(
            "{}\n# signature: {}:{}\n",
            body,
            self.algorithm(),
            BASE64.encode(signature)
        ))
    }
}

enum VerifyingKey {
    Ecdsa(p256::ecdsa::VerifyingKey),
    Rsa(Box<RsaPublicKey>),
}

/// Verifies template signatures against one public key.
pub struct TemplateVerifier {
    key: VerifyingKey,
}

impl TemplateVerifier {
    pub fn from_pem(algorithm: SignatureAlgorithm, pem: &str) -> Result<Self, SignatureError> {
        let key = match algorithm {
            SignatureAlgorithm::Ecdsa => {
                use p256::pkcs8::DecodePublicKey;
                VerifyingKey::Ecdsa(
                    p256::ecdsa::VerifyingKey::from_public_key_pem(pem)
                        .map_err(|e| SignatureError::Key(e.to_string()))?,
                )
            }
            SignatureAlgorithm::Rsa => {
                use rsa::pkcs8::DecodePublicKey;
                VerifyingKey::Rsa(Box::new(
                    RsaPublicKey::from_public_key_pem(pem)
                        .map_err(|e| SignatureError::Key(e.to_string()))?,
                ))
            }
        };
        Ok(Self { key })
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        match self.key {
            VerifyingKey::Ecdsa(_) => SignatureAlgorithm::Ecdsa,
            VerifyingKey::Rsa(_) => SignatureAlgorithm::Rsa,
        }
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match &self.key {
            VerifyingKey::Ecdsa(key) => {
                let Ok(signature) = p256::ecdsa::Signature::from_der(signature) else {
                    return false;
                };
                key.verify(data, &signature).is_ok()
            }
            VerifyingKey::Rsa(key) => {
                let digest = Sha256::digest(data);
                key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
                    .is_ok()
            }
        }
    }
}

/// The set of verifiers trusted for this run. Constructed once and handed
/// into the engine root; tests build independent stores.
#[derive(Default)]
pub struct TrustStore {
    verifiers: Vec<TemplateVerifier>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default trust set: the compiled-in key (when the build carries
    /// one) plus the environment-referenced public key file.
    pub fn from_defaults() -> Self {
        let mut store = Self::new();
        if !DEFAULT_PUBLIC_KEY_PEM.is_empty() {
            for algorithm in [SignatureAlgorithm::Ecdsa, SignatureAlgorithm::Rsa] {
                if let Ok(verifier) = TemplateVerifier::from_pem(algorithm, DEFAULT_PUBLIC_KEY_PEM) {
                    store.register(verifier);
                    break;
                }
            }
        }
        if let Ok(key_path) = std::env::var(PUBLIC_KEY_ENV)
            .or_else(|_| std::env::var(LEGACY_PUBLIC_KEY_ENV))
        {
            let algorithm: SignatureAlgorithm = std::env::var(ALGORITHM_ENV)
                .or_else(|_| std::env::var(LEGACY_ALGORITHM_ENV))
                .unwrap_or_else(|_| "ecdsa".to_string())
                .parse()
                .unwrap_or(SignatureAlgorithm::Ecdsa);
            match std::fs::read_to_string(&key_path)
                .map_err(|e| SignatureError::Key(e.to_string()))
                .and_then(|pem| TemplateVerifier::from_pem(algorithm, &pem))
            {
                Ok(verifier) => store.register(verifier),
                Err(e) => debug!("skipping environment verifier: {}", e),
            }
        }
        store
    }

    pub fn register(&mut self, verifier: TemplateVerifier) {
        self.verifiers.push(verifier);
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    /// Verify raw template content against the trust set.
    pub fn verify(&self, content: &str) -> Result<(), SignatureError> {
        let signature = TemplateSignature::parse(content)?.ok_or(SignatureError::Missing)?;
        let canonical = canonical_bytes(content);
        let mut algorithm_matched = false;
        for verifier in &self.verifiers {
            if verifier.algorithm() != signature.algorithm {
                continue;
            }
            algorithm_matched = true;
            if verifier.verify(&canonical, &signature.signature) {
                return Ok(());
            }
        }
        if algorithm_matched {
            Err(SignatureError::Invalid)
        } else {
            Err(SignatureError::Untrusted)
        }
    }
}
