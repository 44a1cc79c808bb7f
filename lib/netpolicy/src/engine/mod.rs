// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The policy engine and the packet-side consumers of its maps.

pub mod checksum;
pub mod dscp;
pub mod packet;
pub mod policy;
pub mod verdict;
