//! PKCE (RFC 7636) verifier and S256 challenge.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use oauth2::{PkceCodeChallenge, PkceCodeVerifier};
use ring::digest;
use ring::rand::{SecureRandom, SystemRandom};

use crate::errors::{Result, SyncError};

const VERIFIER_BYTES: usize = 32;

/// A fresh verifier and its challenge. Lives only for one consent flow.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    /// 32 random bytes, base64url without padding (43 characters).
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; VERIFIER_BYTES];
        SystemRandom::new()
            .fill(&mut bytes)
            .map_err(|_| SyncError::OAuth2("system randomness unavailable".into()))?;
        Ok(Self::from_verifier(URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = challenge_for(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    /// The challenge in the form the authorization URL builder takes.
    pub fn oauth2_challenge(&self) -> PkceCodeChallenge {
        PkceCodeChallenge::from_code_verifier_sha256(&PkceCodeVerifier::new(
            self.verifier.clone(),
        ))
    }
}

/// base64url(SHA-256(verifier)).
pub fn challenge_for(verifier: &str) -> String {
    let hash = digest::digest(&digest::SHA256, verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_ref())
}
