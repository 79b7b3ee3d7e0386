//! Signing key capability
//!
//! The bot never touches raw key material outside this module. Signing is
//! expressed as a capability (`KeySigner`) so the in-process RSA key used in
//! development can be swapped for a remote key-management service.

use std::path::Path;

use axum::async_trait;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::AppError;

/// Signature algorithm announced in every `Signature` header
pub const SIGNATURE_ALGORITHM: &str = "rsa-sha256";

/// Asymmetric signing capability
///
/// `sign` receives the SHA-256 digest of the message, not the message itself,
/// and returns an RSA PKCS#1 v1.5 signature over it.
///
/// # Errors
/// - `KeyUnavailable` when the key or the service holding it cannot be reached
/// - `Signing` when the signing operation itself fails
#[async_trait]
pub trait KeySigner: Send + Sync {
    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, AppError>;

    async fn public_key_pem(&self) -> Result<String, AppError>;
}

/// Public half of the bot's signing key, as announced to peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// `keyId` placed in signatures
    pub key_id: String,
    /// Always `rsa-sha256`
    pub algorithm: String,
    pub public_key_pem: String,
}

impl KeyMaterial {
    /// Describe the key held by `signer` under `key_id`
    pub async fn from_signer(key_id: String, signer: &dyn KeySigner) -> Result<Self, AppError> {
        Ok(Self {
            key_id,
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            public_key_pem: signer.public_key_pem().await?,
        })
    }
}

/// In-process RSA signer
pub struct RsaKeySigner {
    private_key: RsaPrivateKey,
}

impl RsaKeySigner {
    pub fn new(private_key: RsaPrivateKey) -> Self {
        Self { private_key }
    }

    /// Parse a PKCS#8 or PKCS#1 PEM private key
    pub fn from_pem(pem: &str) -> Result<Self, AppError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| AppError::KeyUnavailable(format!("Invalid private key: {}", e)))?;

        Ok(Self::new(private_key))
    }

    /// Load the private key from a PEM file
    pub fn from_pem_file(path: &Path) -> Result<Self, AppError> {
        let pem = std::fs::read_to_string(path).map_err(|e| {
            AppError::KeyUnavailable(format!(
                "Failed to read private key {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_pem(&pem)
    }
}

#[async_trait]
impl KeySigner for RsaKeySigner {
    async fn sign(&self, digest: &[u8]) -> Result<Vec<u8>, AppError> {
        self.private_key
            .sign(Pkcs1v15Sign::new::<Sha256>(), digest)
            .map_err(|e| AppError::Signing(e.to_string()))
    }

    async fn public_key_pem(&self) -> Result<String, AppError> {
        RsaPublicKey::from(&self.private_key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| AppError::Signing(format!("Failed to encode public key: {}", e)))
    }
}
