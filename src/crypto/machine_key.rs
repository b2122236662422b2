// ABOUTME: Machine-bound key derivation and AES-256-GCM encryption for local secrets
// ABOUTME: The key is derived from the host identity on every start and never persisted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Machine key
//!
//! Secrets at rest are encrypted with a 32-byte key derived from a hash of
//! the hostname and a fixed application salt through Argon2id. Moving the
//! vault file to another host yields a different key, and decryption then
//! fails on the authentication tag instead of returning garbage.

use crate::errors::{AppError, AppResult};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::debug;
use zeroize::Zeroizing;

/// Fixed application salt mixed into the key derivation
const APPLICATION_SALT: &[u8] = b"vmc-connector/vault/v1";

/// AES-GCM nonce length in bytes
const IV_LEN: usize = 12;

/// AES-GCM tag length in bytes
const TAG_LEN: usize = 16;

/// Argon2id memory cost in KiB
const KDF_MEMORY_KIB: u32 = 19 * 1024;

/// Argon2id iterations
const KDF_ITERATIONS: u32 = 2;

/// Ciphertext with its IV and authentication tag, all hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSecret {
    /// Encrypted bytes
    pub ciphertext: String,
    /// Per-call random nonce
    pub iv: String,
    /// GCM authentication tag
    pub tag: String,
}

/// Stable identifier of the current machine: SHA-256 of the hostname
///
/// # Errors
///
/// Returns an error if the hostname cannot be read
pub fn machine_identifier() -> AppResult<String> {
    let host = hostname::get()
        .map_err(|e| AppError::internal(format!("Failed to read hostname: {e}")))?;
    Ok(hash_identity(&host.to_string_lossy()))
}

fn hash_identity(host: &str) -> String {
    hex::encode(Sha256::digest(host.as_bytes()))
}

/// Symmetric key bound to a machine identity
pub struct MachineKey {
    key: Zeroizing<[u8; 32]>,
}

impl fmt::Debug for MachineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineKey").finish_non_exhaustive()
    }
}

impl MachineKey {
    /// Derive the key for the current host
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname is unavailable or the KDF fails
    pub fn for_this_machine() -> AppResult<Self> {
        Self::derive(&machine_identifier()?)
    }

    /// Derive the key for an explicit machine identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the KDF parameters are rejected
    pub fn derive(machine_id: &str) -> AppResult<Self> {
        let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, 1, Some(32))
            .map_err(|e| AppError::internal(format!("Invalid KDF parameters: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(machine_id.as_bytes(), APPLICATION_SALT, &mut key[..])
            .map_err(|e| AppError::internal(format!("Key derivation failed: {e}")))?;

        debug!("Derived machine-bound encryption key");
        Ok(Self { key })
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(GenericArray::from_slice(&self.key[..]))
    }

    /// Encrypt a UTF-8 string with a fresh random IV
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails
    pub fn encrypt(&self, plaintext: &str) -> AppResult<EncryptedSecret> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let mut buffer = plaintext.as_bytes().to_vec();
        let tag = self
            .cipher()
            .encrypt_in_place_detached(&nonce, b"", &mut buffer)
            .map_err(|e| AppError::internal(format!("Encryption failed: {e}")))?;

        Ok(EncryptedSecret {
            ciphertext: hex::encode(&buffer),
            iv: hex::encode(nonce),
            tag: hex::encode(tag),
        })
    }

    /// Decrypt a secret produced by [`MachineKey::encrypt`]
    ///
    /// # Errors
    ///
    /// Returns an error if any component is malformed or the tag does not
    /// authenticate (wrong machine, tampered data)
    pub fn decrypt(&self, secret: &EncryptedSecret) -> AppResult<String> {
        let iv = decode_component("iv", &secret.iv)?;
        let tag = decode_component("tag", &secret.tag)?;
        let mut buffer = decode_component("ciphertext", &secret.ciphertext)?;

        if iv.len() != IV_LEN {
            return Err(AppError::invalid_input(format!(
                "Invalid IV length: expected {IV_LEN} bytes, got {}",
                iv.len()
            )));
        }
        if tag.len() != TAG_LEN {
            return Err(AppError::invalid_input(format!(
                "Invalid authentication tag length: expected {TAG_LEN} bytes, got {}",
                tag.len()
            )));
        }

        self.cipher()
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| {
                AppError::internal(
                    "Decryption failed: authentication tag mismatch (data tampered or encrypted on another machine)",
                )
            })?;

        String::from_utf8(buffer)
            .map_err(|e| AppError::internal(format!("Decrypted data is not valid UTF-8: {e}")))
    }
}

fn decode_component(name: &str, value: &str) -> AppResult<Vec<u8>> {
    hex::decode(value).map_err(|e| AppError::invalid_input(format!("Invalid {name} encoding: {e}")))
}
