// ABOUTME: Key and crypto service for API keys and machine-bound secret encryption
// ABOUTME: Re-exports key validation and the AES-256-GCM machine key
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// API key format, checksum and generation
pub mod api_key;
/// Machine-bound key derivation and authenticated encryption
pub mod machine_key;

pub use api_key::{
    generate_api_key, mask_api_key, validate_api_key, validate_api_key_detailed,
    ApiKeyRejection, ApiKeyValidation,
};
pub use machine_key::{machine_identifier, EncryptedSecret, MachineKey};
