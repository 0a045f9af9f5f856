//! Ed25519-signed registration tokens.
//!
//! Token format: base64(cluster_id:expiry:signature)
//!
//! Security properties:
//! - Tokens are bound to a single cluster ID
//! - Tokens expire (24 hours by default)
//! - Only the control plane holding the signing key can issue them

use anyhow::{Context, bail};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use std::time::{SystemTime, UNIX_EPOCH};

use control_common::ControlPlaneError;
use control_common::error::Result;

use super::TokenIssuer;
use crate::config::TokenConfig;

/// Decoded contents of a valid registration token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationClaims {
    /// Cluster the token was issued for
    pub cluster_id: String,
    /// Expiry timestamp (unix seconds)
    pub expiry: u64,
}

/// Signs and validates registration tokens
pub struct RegistrationTokenIssuer {
    ttl_secs: u64,
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl RegistrationTokenIssuer {
    /// Create a new issuer, loading the signing key if a path is configured
    pub fn new(config: &TokenConfig) -> anyhow::Result<Self> {
        let signing_key = if let Some(ref path) = config.signing_key_path {
            let key_bytes = std::fs::read(path).context("Failed to read signing key file")?;

            if key_bytes.len() != 32 {
                bail!("Invalid signing key length (expected 32 bytes)");
            }

            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(&key_bytes);
            SigningKey::from_bytes(&bytes)
        } else {
            // Generate ephemeral key using OsRng (compatible with ed25519-dalek)
            use rand_core::OsRng;
            tracing::warn!("Using ephemeral registration token key (tokens die on restart)");
            SigningKey::generate(&mut OsRng)
        };
        let verifying_key = signing_key.verifying_key();

        Ok(Self {
            ttl_secs: config.ttl_secs,
            signing_key,
            verifying_key,
        })
    }

    /// Our public key as base64
    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.verifying_key.as_bytes())
    }

    fn now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    fn mint(&self, cluster_id: &str, expiry: u64) -> String {
        let payload = format!("{}:{}", cluster_id, expiry);
        let signature = self.signing_key.sign(payload.as_bytes());
        let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        URL_SAFE_NO_PAD.encode(format!("{}:{}", payload, sig_b64).as_bytes())
    }
}

/// A presented token that does not check out is the caller's problem
fn invalid(reason: impl Into<String>) -> ControlPlaneError {
    ControlPlaneError::AuthMismatch(reason.into())
}

impl TokenIssuer for RegistrationTokenIssuer {
    fn issue_registration_token(&self, cluster_id: &str) -> Result<String> {
        if cluster_id.is_empty() || cluster_id.contains(':') {
            return Err(ControlPlaneError::IdentityIssue(format!(
                "cannot bind token to cluster id {:?}",
                cluster_id
            )));
        }

        let expiry = Self::now().saturating_add(self.ttl_secs);
        let token = self.mint(cluster_id, expiry);

        tracing::debug!(cluster_id = %cluster_id, expiry = expiry, "Issued registration token");

        Ok(token)
    }

    fn validate_registration_token(&self, token: &str) -> Result<RegistrationClaims> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| invalid("invalid token encoding"))?;
        let token_str = String::from_utf8(decoded).map_err(|_| invalid("invalid token UTF-8"))?;

        // Parse: cluster_id:expiry:signature
        let parts: Vec<&str> = token_str.split(':').collect();
        if parts.len() != 3 {
            return Err(invalid(format!(
                "invalid token format (expected 3 parts, got {})",
                parts.len()
            )));
        }

        let cluster_id = parts[0];
        let expiry: u64 = parts[1]
            .parse()
            .map_err(|_| invalid("invalid expiry timestamp"))?;

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|_| invalid("invalid signature encoding"))?;
        let sig_array: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| invalid("invalid signature length"))?;
        let signature = Signature::from_bytes(&sig_array);

        let payload = format!("{}:{}", cluster_id, expiry);
        self.verifying_key
            .verify(payload.as_bytes(), &signature)
            .map_err(|_| invalid("invalid signature"))?;

        let now = Self::now();
        if expiry < now {
            return Err(invalid(format!("token expired at {}", expiry)));
        }

        Ok(RegistrationClaims {
            cluster_id: cluster_id.to_string(),
            expiry,
        })
    }
}
