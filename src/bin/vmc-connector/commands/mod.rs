// ABOUTME: Subcommand implementations for the vmc-connector binary
// ABOUTME: Grouped by resource; each module prints its own operator-facing output
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub mod aggregator;
