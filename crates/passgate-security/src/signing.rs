// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// HMAC-SHA256 signatures over Processing Passes.
//
// The signed message is a length-prefixed encoding of the pass fields, not
// its JSON, so field order and extra fields in stored JSON do not matter:
//
//   "passgate-pass-v1" | len(session_id) session_id | len(plan) plan
//                      | issued_at_ms (i64 BE, or i64::MIN when absent)
//                      | expires_at_ms (i64 BE)
//
// Lengths are u32 big-endian. Timestamps are reduced to milliseconds, the
// precision they are stored with.

use std::path::Path;

use passgate_core::error::{PassgateError, Result};
use passgate_core::types::{ProcessingPass, SignedPass};
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use tracing::{debug, info, instrument};

const DOMAIN_TAG: &[u8] = b"passgate-pass-v1";

/// Issues and checks pass signatures with a single secret key.
pub struct PassSigner {
    key: hmac::Key,
}

impl PassSigner {
    /// Length of generated keys, and the minimum accepted length.
    pub const KEY_LEN: usize = 32;

    /// Generate fresh key material from the OS CSPRNG.
    pub fn generate_key() -> Result<[u8; Self::KEY_LEN]> {
        let mut key = [0u8; Self::KEY_LEN];
        SystemRandom::new()
            .fill(&mut key)
            .map_err(|_| PassgateError::Signing("system RNG unavailable".into()))?;
        Ok(key)
    }

    pub fn from_key(key: &[u8]) -> Result<Self> {
        if key.len() < Self::KEY_LEN {
            return Err(PassgateError::Signing(format!(
                "key is {} bytes, need at least {}",
                key.len(),
                Self::KEY_LEN
            )));
        }
        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, key),
        })
    }

    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let key = hex::decode(key_hex.trim())
            .map_err(|e| PassgateError::Signing(format!("key is not hex: {e}")))?;
        Self::from_key(&key)
    }

    /// Load the hex key at `path`, generating and persisting one if absent.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let key_hex = std::fs::read_to_string(path)?;
            debug!("signing key loaded");
            return Self::from_hex(&key_hex);
        }

        let key = Self::generate_key()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_private(path, hex::encode(key).as_bytes())?;
        info!("generated new pass signing key");
        Self::from_key(&key)
    }

    /// Sign `pass`, producing the flat signed form clients persist.
    pub fn sign(&self, pass: ProcessingPass) -> SignedPass {
        let tag = hmac::sign(&self.key, &signing_message(&pass));
        SignedPass {
            pass,
            signature: hex::encode(tag.as_ref()),
        }
    }

    /// Check that `signed.signature` was produced by this key for these fields.
    pub fn verify(&self, signed: &SignedPass) -> Result<()> {
        let tag = hex::decode(signed.signature.trim()).map_err(|_| PassgateError::SignatureMismatch)?;
        hmac::verify(&self.key, &signing_message(&signed.pass), &tag)
            .map_err(|_| PassgateError::SignatureMismatch)
    }
}

fn signing_message(pass: &ProcessingPass) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DOMAIN_TAG.len() + pass.session_id.len() + pass.plan.len() + 24);
    msg.extend_from_slice(DOMAIN_TAG);
    for field in [pass.session_id.as_bytes(), pass.plan.as_bytes()] {
        msg.extend_from_slice(&(field.len() as u32).to_be_bytes());
        msg.extend_from_slice(field);
    }
    let issued = pass.issued_at.map_or(i64::MIN, |t| t.timestamp_millis());
    msg.extend_from_slice(&issued.to_be_bytes());
    msg.extend_from_slice(&pass.expires_at.timestamp_millis().to_be_bytes());
    msg
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
