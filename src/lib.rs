// Copyright 2026 Chequeflow Contributors
// SPDX-License-Identifier: Apache-2.0

//! Chequeflow library — capture, extract, and reconcile fiscal cheque records.
//!
//! The pipeline has four stages: the interceptor observes responses flowing
//! through pluggable transports, extractors turn recognized bodies into
//! canonical [`cheque::Cheque`] records, the store keeps them in named
//! SQLite-backed collections, and the reconciler diffs the two sources
//! against each other.

pub mod cheque;
pub mod cli;
pub mod events;
pub mod extract;
pub mod intercept;
pub mod reconcile;
pub mod relay;
pub mod store;
