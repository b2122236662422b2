// ABOUTME: Integration tests for API key validation, checksum and generation
// ABOUTME: Covers the detailed rejection reasons and single-character mutation detection
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use uuid::Uuid;
use vmc_connector::crypto::api_key::{build_api_key, compute_checksum};
use vmc_connector::crypto::{
    generate_api_key, validate_api_key, validate_api_key_detailed, ApiKeyRejection,
};

const TENANT: &str = "11111111-1111-1111-1111-111111111111";
const RANDOM: &str = "abcdefabcdefabcd";

fn mutate(c: char) -> char {
    const HEX: &str = "0123456789abcdef";
    HEX.find(c)
        .map_or('x', |i| HEX.chars().nth((i + 1) % 16).unwrap())
}

#[test]
fn test_correct_checksum_is_accepted() {
    let checksum = compute_checksum(TENANT, RANDOM);
    assert_eq!(checksum, "560f");

    let key = format!("vmc_{TENANT}_{RANDOM}_{checksum}");
    let result = validate_api_key_detailed(&key);
    assert!(result.valid);
    assert!(result.reason.is_none());
}

#[test]
fn test_flipped_checksum_digit_is_a_mismatch() {
    let key = format!("vmc_{TENANT}_{RANDOM}_560e");
    let result = validate_api_key_detailed(&key);
    assert!(!result.valid);
    assert_eq!(result.rejection, Some(ApiKeyRejection::ChecksumMismatch));
    assert!(result.reason.unwrap().starts_with("Checksum mismatch"));
}

#[test]
fn test_every_single_character_mutation_fails() {
    let key = build_api_key(TENANT, RANDOM);
    assert!(validate_api_key(&key));

    for (i, c) in key.char_indices() {
        let mut mutated = key.clone();
        mutated.replace_range(i..=i, &mutate(c).to_string());
        assert!(
            !validate_api_key(&mutated),
            "mutation at {i} ({c}) still validates: {mutated}"
        );
    }
}

#[test]
fn test_generated_keys_round_trip() {
    for _ in 0..20 {
        let tenant = Uuid::new_v4();
        let key = generate_api_key(tenant);
        let result = validate_api_key_detailed(&key);
        assert!(result.valid, "{key}: {result:?}");
        assert_eq!(result.tenant_id, Some(tenant));
    }
}

#[test]
fn test_rejection_reasons() {
    let cases = [
        ("not-a-key", ApiKeyRejection::MalformedShape),
        ("vmc_a_b_c_d", ApiKeyRejection::MalformedShape),
        ("vmc_not-a-uuid_abcdefabcdefabcd_0000", ApiKeyRejection::InvalidTenantId),
        (
            "vmc_11111111-1111-1111-1111-111111111111_abc_0000",
            ApiKeyRejection::RandomSegmentTooShort,
        ),
        (
            "vmc_11111111-1111-1111-1111-111111111111_zzzzzzzzzzzzzzzz_0000",
            ApiKeyRejection::RandomSegmentTooShort,
        ),
        (
            "vmc_11111111-1111-1111-1111-111111111111_abcdefabcdefabcd_12",
            ApiKeyRejection::InvalidChecksumFormat,
        ),
    ];
    for (key, expected) in cases {
        let result = validate_api_key_detailed(key);
        assert!(!result.valid, "{key}");
        assert_eq!(result.rejection, Some(expected), "{key}");
    }
}
