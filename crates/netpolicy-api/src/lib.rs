// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The API vocabulary shared by the netpolicy control plane and the
//! packet-processing path: firewall chain identities, match bits,
//! verdicts, the error taxonomy, and the offload event vocabulary.
//!
//! Everything here crosses a component boundary of some kind; keep
//! these types small, serializable, and free of engine internals.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

pub mod chain;
pub mod error;
pub mod offload;

pub use chain::*;
pub use error::*;
pub use offload::*;

/// The direction of packet travel relative to the device.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    Ingress = 1,
    Egress = 2,
}

impl Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let dirstr = match self {
            Direction::Ingress => "IN",
            Direction::Egress => "OUT",
        };

        write!(f, "{}", dirstr)
    }
}
