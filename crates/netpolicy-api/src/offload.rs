// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! Event and result types crossing the offload management boundary.

use serde::Deserialize;
use serde::Serialize;

/// An asynchronous notification from the offload backend.
///
/// Events arrive on the control channel handed to the backend at init
/// time and are dispatched in arrival order on a single thread.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OffloadEvent {
    /// The backend stopped on its own and can be restarted.
    StoppedError,

    /// The backend stopped and cannot support the current
    /// configuration.
    StoppedUnsupported,

    /// Offload resumed after a transient interruption.
    SupportAvailable,

    /// The byte limit set on the upstream was reached.
    StoppedLimitReached,

    /// The backend observed a forwarded connection whose NAT timeout
    /// should be refreshed.
    NatTimeoutUpdate(NatTimeoutUpdate),
}

/// A NAT timeout refresh request for one forwarded connection.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NatTimeoutUpdate {
    pub proto: i32,
    pub src_addr: String,
    pub src_port: u16,
    pub dst_addr: String,
    pub dst_port: u16,
}

/// Bytes forwarded on an upstream, as reported by the backend.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
)]
pub struct ForwardedStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl ForwardedStats {
    pub fn add(&mut self, other: &ForwardedStats) {
        self.rx_bytes = self.rx_bytes.saturating_add(other.rx_bytes);
        self.tx_bytes = self.tx_bytes.saturating_add(other.tx_bytes);
    }
}

/// Translate a wire protocol number into the OS-level constant the
/// backend expects. Unsupported protocols map to a negative sentinel
/// that no conntrack entry will ever match.
pub fn os_proto(proto: i32) -> i32 {
    match proto {
        6 => libc::IPPROTO_TCP,
        17 => libc::IPPROTO_UDP,
        proto => -proto.abs(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn proto_mapping() {
        assert_eq!(os_proto(6), libc::IPPROTO_TCP);
        assert_eq!(os_proto(17), libc::IPPROTO_UDP);
        assert_eq!(os_proto(47), -47);
        assert_eq!(os_proto(-47), -47);
        assert_eq!(os_proto(0), 0);
    }

    #[test]
    fn forwarded_stats_add_saturates() {
        let mut total = ForwardedStats { rx_bytes: u64::MAX - 1, tx_bytes: 10 };
        total.add(&ForwardedStats { rx_bytes: 5, tx_bytes: 7 });
        assert_eq!(total.rx_bytes, u64::MAX);
        assert_eq!(total.tx_bytes, 17);
    }
}
