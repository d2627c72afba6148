// Copyright (c) 2026 flowctl contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The secret-input envelope (spec §6.2): AES-256-GCM with a random
//! per-value nonce, keyed by a key the store is configured with out of band.
//! Values whose name is in the workflow's secret set (spec §6.3) are
//! encrypted before a run row is written and decrypted transparently on
//! load; everything else passes through untouched.

use flowctl_core::error::OrchestratorError;
use flowctl_core::value::JsonValue;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};

const MIN_KEY_LEN: usize = 16;

/// An envelope as it appears inside a stored `inputs` JSON document:
/// `{"encrypted": true, "data": "<hex nonce||ciphertext||tag>"}`.
fn envelope(data_hex: String) -> JsonValue {
    serde_json::json!({ "encrypted": true, "data": data_hex })
}

fn as_envelope(value: &JsonValue) -> Option<&str> {
    let obj = value.as_object()?;
    if obj.get("encrypted")?.as_bool()? {
        obj.get("data")?.as_str()
    } else {
        None
    }
}

/// Wraps a key derived from configured key material. Key material shorter
/// than `MIN_KEY_LEN` bytes is rejected outright (spec §6.2).
pub struct SecretCipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    pub fn new(key_material: &[u8]) -> Result<Self, OrchestratorError> {
        if key_material.len() < MIN_KEY_LEN {
            return Err(OrchestratorError::SecurityPolicyViolation(format!(
                "encryption key must be at least {MIN_KEY_LEN} bytes, got {}",
                key_material.len()
            )));
        }
        let digest = ring::digest::digest(&ring::digest::SHA256, key_material);
        let unbound = UnboundKey::new(&AES_256_GCM, digest.as_ref())
            .map_err(|_| OrchestratorError::SecurityPolicyViolation("invalid encryption key material".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    fn encrypt_bytes(&self, plaintext: &[u8]) -> Result<Vec<u8>, OrchestratorError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng
            .fill(&mut nonce_bytes)
            .map_err(|_| OrchestratorError::Other("failed to generate encryption nonce".to_string()))?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);
        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| OrchestratorError::Other("failed to encrypt secret input".to_string()))?;
        let mut out = nonce_bytes.to_vec();
        out.extend_from_slice(&in_out);
        Ok(out)
    }

    fn decrypt_bytes(&self, sealed: &[u8]) -> Result<Vec<u8>, OrchestratorError> {
        if sealed.len() < NONCE_LEN {
            return Err(OrchestratorError::Persistence("encrypted secret envelope is truncated".to_string()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let mut nonce_arr = [0u8; NONCE_LEN];
        nonce_arr.copy_from_slice(nonce_bytes);
        let nonce = Nonce::assume_unique_for_key(nonce_arr);
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| OrchestratorError::Persistence("failed to decrypt secret input: wrong key or corrupt data".to_string()))?;
        Ok(plaintext.to_vec())
    }

    /// Encrypts one `JsonValue` into its stored envelope form.
    pub fn encrypt_value(&self, value: &JsonValue) -> Result<JsonValue, OrchestratorError> {
        let plaintext = serde_json::to_vec(value)?;
        let sealed = self.encrypt_bytes(&plaintext)?;
        Ok(envelope(hex::encode(sealed)))
    }

    /// Decrypts a stored envelope back to its original `JsonValue`.
    pub fn decrypt_value(&self, value: &JsonValue) -> Result<JsonValue, OrchestratorError> {
        let hex_data = as_envelope(value)
            .ok_or_else(|| OrchestratorError::Persistence("expected an encrypted secret envelope".to_string()))?;
        let sealed = hex::decode(hex_data)
            .map_err(|e| OrchestratorError::Persistence(format!("malformed secret envelope: {e}")))?;
        let plaintext = self.decrypt_bytes(&sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Walks an `inputs` map, encrypting the values whose names are secret.
    pub fn seal_inputs(
        &self,
        inputs: &std::collections::HashMap<String, JsonValue>,
        secret_names: &std::collections::HashSet<String>,
    ) -> Result<std::collections::HashMap<String, JsonValue>, OrchestratorError> {
        inputs
            .iter()
            .map(|(name, value)| {
                if secret_names.contains(name) {
                    self.encrypt_value(value).map(|v| (name.clone(), v))
                } else {
                    Ok((name.clone(), value.clone()))
                }
            })
            .collect()
    }

    /// Inverse of [`Self::seal_inputs`]: decrypts any envelope-shaped values,
    /// leaving plain values untouched.
    pub fn unseal_inputs(
        &self,
        inputs: &std::collections::HashMap<String, JsonValue>,
    ) -> Result<std::collections::HashMap<String, JsonValue>, OrchestratorError> {
        inputs
            .iter()
            .map(|(name, value)| {
                if as_envelope(value).is_some() {
                    self.decrypt_value(value).map(|v| (name.clone(), v))
                } else {
                    Ok((name.clone(), value.clone()))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_keys() {
        let err = SecretCipher::new(b"short").unwrap_err();
        assert!(matches!(err, OrchestratorError::SecurityPolicyViolation(_)));
    }

    #[test]
    fn roundtrips_a_value() {
        let cipher = SecretCipher::new(b"0123456789abcdef").unwrap();
        let original = serde_json::json!({"token": "sk-test-123"});
        let sealed = cipher.encrypt_value(&original).unwrap();
        assert_eq!(sealed["encrypted"], serde_json::json!(true));
        let opened = cipher.decrypt_value(&sealed).unwrap();
        assert_eq!(opened, original);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let cipher_a = SecretCipher::new(b"0123456789abcdef").unwrap();
        let cipher_b = SecretCipher::new(b"fedcba9876543210").unwrap();
        let sealed = cipher_a.encrypt_value(&serde_json::json!("secret")).unwrap();
        let err = cipher_b.decrypt_value(&sealed).unwrap_err();
        assert!(matches!(err, OrchestratorError::Persistence(_)));
    }

    #[test]
    fn seal_and_unseal_only_touch_declared_secrets() {
        let cipher = SecretCipher::new(b"0123456789abcdef").unwrap();
        let mut inputs = std::collections::HashMap::new();
        inputs.insert("apiKey".to_string(), serde_json::json!("sk-live-xyz"));
        inputs.insert("count".to_string(), serde_json::json!(3));
        let mut secret_names = std::collections::HashSet::new();
        secret_names.insert("apiKey".to_string());

        let sealed = cipher.seal_inputs(&inputs, &secret_names).unwrap();
        assert_eq!(sealed["count"], serde_json::json!(3));
        assert_eq!(sealed["apiKey"]["encrypted"], serde_json::json!(true));

        let unsealed = cipher.unseal_inputs(&sealed).unwrap();
        assert_eq!(unsealed, inputs);
    }
}
