// ABOUTME: API key format, checksum validation and generation
// ABOUTME: Keys look like vmc_<tenant uuid>_<random hex>_<4 hex checksum>
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # API keys
//!
//! The checksum is the first four hex characters of
//! `SHA-256("vmc:<tenant>:<random>")`. It exists to catch transcription
//! errors before the key ever leaves the machine; it is not a secret.

use crate::constants::api_key::{
    CHECKSUM_HEX_LEN, GENERATED_RANDOM_BYTES, MIN_RANDOM_HEX_LEN, PREFIX,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Why a key failed local validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyRejection {
    /// Not four underscore separated segments starting with `vmc`
    MalformedShape,
    /// Tenant segment is not a hyphenated UUID
    InvalidTenantId,
    /// Random segment shorter than 16 hex characters or not hex
    RandomSegmentTooShort,
    /// Checksum segment is not four hex characters
    InvalidChecksumFormat,
    /// Checksum does not match the tenant and random segments
    ChecksumMismatch,
}

impl fmt::Display for ApiKeyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::MalformedShape => {
                "Invalid API key format - expected vmc_<tenant-id>_<random>_<checksum>"
            }
            Self::InvalidTenantId => "Invalid tenant ID in API key - expected a UUID",
            Self::RandomSegmentTooShort => {
                "Invalid random segment in API key - expected at least 16 hex characters"
            }
            Self::InvalidChecksumFormat => {
                "Invalid checksum segment in API key - expected 4 hex characters"
            }
            Self::ChecksumMismatch => {
                "Checksum mismatch - the API key appears to be mistyped or corrupted"
            }
        };
        f.write_str(reason)
    }
}

/// Detailed validation outcome for operator-facing flows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyValidation {
    /// Whether the key passed every local check
    pub valid: bool,
    /// Human readable reason when invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Machine readable rejection when invalid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<ApiKeyRejection>,
    /// Tenant embedded in the key when valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
}

impl ApiKeyValidation {
    fn rejected(rejection: ApiKeyRejection) -> Self {
        Self {
            valid: false,
            reason: Some(rejection.to_string()),
            rejection: Some(rejection),
            tenant_id: None,
        }
    }

    fn accepted(tenant_id: Uuid) -> Self {
        Self {
            valid: true,
            reason: None,
            rejection: None,
            tenant_id: Some(tenant_id),
        }
    }
}

/// Compute the four-character checksum for a tenant/random pair
#[must_use]
pub fn compute_checksum(tenant: &str, random: &str) -> String {
    let digest = Sha256::digest(format!("{PREFIX}:{tenant}:{random}").as_bytes());
    let mut checksum = hex::encode(digest);
    checksum.truncate(CHECKSUM_HEX_LEN);
    checksum
}

fn is_hex(segment: &str) -> bool {
    !segment.is_empty() && segment.chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_tenant(segment: &str) -> Option<Uuid> {
    // Only the canonical hyphenated form is accepted
    if segment.len() != 36 {
        return None;
    }
    Uuid::try_parse(segment).ok()
}

/// Validate a key and explain the first failing check
#[must_use]
pub fn validate_api_key_detailed(api_key: &str) -> ApiKeyValidation {
    let parts: Vec<&str> = api_key.trim().split('_').collect();
    let [prefix, tenant, random, checksum] = parts.as_slice() else {
        return ApiKeyValidation::rejected(ApiKeyRejection::MalformedShape);
    };
    if *prefix != PREFIX {
        return ApiKeyValidation::rejected(ApiKeyRejection::MalformedShape);
    }

    let Some(tenant_id) = parse_tenant(tenant) else {
        return ApiKeyValidation::rejected(ApiKeyRejection::InvalidTenantId);
    };

    if random.len() < MIN_RANDOM_HEX_LEN || !is_hex(random) {
        return ApiKeyValidation::rejected(ApiKeyRejection::RandomSegmentTooShort);
    }

    if checksum.len() != CHECKSUM_HEX_LEN || !is_hex(checksum) {
        return ApiKeyValidation::rejected(ApiKeyRejection::InvalidChecksumFormat);
    }

    if compute_checksum(tenant, random) != *checksum {
        return ApiKeyValidation::rejected(ApiKeyRejection::ChecksumMismatch);
    }

    ApiKeyValidation::accepted(tenant_id)
}

/// Boolean form of [`validate_api_key_detailed`]
#[must_use]
pub fn validate_api_key(api_key: &str) -> bool {
    validate_api_key_detailed(api_key).valid
}

/// Generate a fresh key for a tenant
#[must_use]
pub fn generate_api_key(tenant_id: Uuid) -> String {
    let mut bytes = [0u8; GENERATED_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let random = hex::encode(bytes);
    build_api_key(&tenant_id.to_string(), &random)
}

/// Assemble a key from explicit segments, computing the checksum
#[must_use]
pub fn build_api_key(tenant: &str, random: &str) -> String {
    let checksum = compute_checksum(tenant, random);
    format!("{PREFIX}_{tenant}_{random}_{checksum}")
}

/// Redact a key for logs, keeping only the prefix and the first tenant characters
#[must_use]
pub fn mask_api_key(api_key: &str) -> String {
    let visible: String = api_key.chars().take(PREFIX.len() + 9).collect();
    format!("{visible}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "11111111-1111-1111-1111-111111111111";
    const RANDOM: &str = "abcdefabcdefabcd";

    #[test]
    fn test_built_key_validates() {
        let key = build_api_key(TENANT, RANDOM);
        let result = validate_api_key_detailed(&key);
        assert!(result.valid, "{result:?}");
        assert_eq!(result.tenant_id.unwrap().to_string(), TENANT);
    }

    #[test]
    fn test_rejects_wrong_prefix() {
        let key = build_api_key(TENANT, RANDOM).replacen("vmc", "vmx", 1);
        assert_eq!(
            validate_api_key_detailed(&key).rejection,
            Some(ApiKeyRejection::MalformedShape)
        );
    }

    #[test]
    fn test_rejects_short_random_segment() {
        let key = build_api_key(TENANT, "abcdef");
        assert_eq!(
            validate_api_key_detailed(&key).rejection,
            Some(ApiKeyRejection::RandomSegmentTooShort)
        );
    }

    #[test]
    fn test_mask_hides_secret_segments() {
        let key = build_api_key(TENANT, RANDOM);
        let masked = mask_api_key(&key);
        assert!(!masked.contains(RANDOM));
        assert!(masked.starts_with("vmc_1111"));
    }
}
