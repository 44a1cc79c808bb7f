// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The netpolicy engine: per-UID firewall policy over shared maps, the
//! packet-side owner match, DSCP classification with a connection
//! affinity cache, traffic accounting snapshots and histories, and the
//! offload control bridge.
//!
//! The control plane mutates shared maps through
//! [`engine::policy::PolicyEngine`]; the packet path reads the same
//! maps through [`engine::verdict::owner_match`] and
//! [`engine::dscp::DscpClassifier`]. Nothing here owns a global:
//! callers inject the maps and the logger.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

pub mod engine;
pub mod map;
pub mod offload;
pub mod stats;
pub mod sync;

pub use netpolicy_api as api;

use netpolicy_api::NetPolicyError;

/// The common result type for fallible netpolicy operations.
pub type Result<T> = core::result::Result<T, NetPolicyError>;
