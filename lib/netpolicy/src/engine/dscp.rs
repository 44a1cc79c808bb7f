// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! DSCP remarking: a fixed-size policy table scored by best match,
//! fronted by a per-socket connection affinity cache.
//!
//! Remarking is a side effect, never a filtering decision; every path
//! through [`DscpClassifier::process_frame`] lets the packet continue.

use super::packet::AddressFamily;
use super::packet::PacketView;
use crate::map::KeyedMap;
use crate::map::CURRENT_STATS_MAP_CONFIGURATION_KEY;
use crate::map::STATS_SELECT_MAP_A;
use crate::sync::KRwLock;
use crate::Result;
use bitflags::bitflags;
use netpolicy_api::NetPolicyError;
use slog::debug;
use slog::Logger;
use std::sync::Arc;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Number of slots in each per-family policy table.
pub const MAX_POLICIES: usize = 16;

/// Packets not sourced by the local host are never considered.
pub const PACKET_HOST: u32 = 0;

bitflags! {
    /// Which fields of a [`DscpPolicy`] are significant for matching.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct PresentFields: u8 {
        const SRC_IP = 1;
        const DST_IP = 2;
        const SRC_PORT = 4;
        const DST_PORT = 8;
        const PROTO = 16;
    }
}

/// One slot of the policy table. A slot with `present_fields == 0` is
/// empty.
///
/// The layout is shared with the packet path and must stay free of
/// padding; addresses are v4-mapped for IPv4 policies.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
)]
#[repr(C)]
pub struct DscpPolicy {
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub ifindex: u32,
    pub src_port: u16,
    pub dst_port_start: u16,
    pub dst_port_end: u16,
    pub proto: u8,
    pub dscp_val: u8,
    pub present_fields: u8,
    pub _pad: [u8; 3],
}

impl DscpPolicy {
    pub const EMPTY: Self = Self {
        src_ip: [0; 16],
        dst_ip: [0; 16],
        ifindex: 0,
        src_port: 0,
        dst_port_start: 0,
        dst_port_end: 0,
        proto: 0,
        dscp_val: 0,
        present_fields: 0,
        _pad: [0; 3],
    };

    fn is_empty(&self) -> bool {
        self.present_fields == 0
    }
}

/// The last-applied policy for one socket, keyed by socket cookie.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    FromBytes,
    Immutable,
    IntoBytes,
    KnownLayout,
    PartialEq,
)]
#[repr(C)]
pub struct AffinityRecord {
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub ifindex: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: u8,
    pub dscp_val: u8,
    pub _pad: [u8; 2],
}

/// The four affinity cache tables, partitioned by address family and
/// A/B generation. The generation in use follows the global stats map
/// selector; a swap is a logical flush of the cache.
#[derive(Clone)]
pub struct DscpCaches {
    pub v4_a: Arc<dyn KeyedMap<u64, AffinityRecord>>,
    pub v4_b: Arc<dyn KeyedMap<u64, AffinityRecord>>,
    pub v6_a: Arc<dyn KeyedMap<u64, AffinityRecord>>,
    pub v6_b: Arc<dyn KeyedMap<u64, AffinityRecord>>,
}

impl DscpCaches {
    pub fn in_memory() -> Self {
        use crate::map::MemMap;
        use core::num::NonZeroU32;

        let limit = NonZeroU32::new(1024).unwrap();
        DscpCaches {
            v4_a: Arc::new(MemMap::new(limit)),
            v4_b: Arc::new(MemMap::new(limit)),
            v6_a: Arc::new(MemMap::new(limit)),
            v6_b: Arc::new(MemMap::new(limit)),
        }
    }
}

/// Per-socket metadata accompanying a packet, supplied by the caller's
/// receive/transmit context.
#[derive(Clone, Copy, Debug)]
pub struct PacketMeta {
    /// Opaque unique-per-socket identifier; 0 means the packet cannot
    /// be tied to a socket.
    pub cookie: u64,
    pub ifindex: u32,
    pub pkt_type: u32,
}

pub struct DscpClassifier {
    policies_v4: KRwLock<[DscpPolicy; MAX_POLICIES]>,
    policies_v6: KRwLock<[DscpPolicy; MAX_POLICIES]>,
    configuration: Arc<dyn KeyedMap<u32, u64>>,
    caches: DscpCaches,
    log: Logger,
}

impl DscpClassifier {
    pub fn new(
        configuration: Arc<dyn KeyedMap<u32, u64>>,
        caches: DscpCaches,
        log: Logger,
    ) -> Self {
        DscpClassifier {
            policies_v4: KRwLock::new([DscpPolicy::EMPTY; MAX_POLICIES]),
            policies_v6: KRwLock::new([DscpPolicy::EMPTY; MAX_POLICIES]),
            configuration,
            caches,
            log,
        }
    }

    /// Install `policy` in `slot` of the per-family table. A policy
    /// with no present fields clears the slot.
    pub fn set_policy(
        &self,
        family: AddressFamily,
        slot: usize,
        policy: DscpPolicy,
    ) -> Result<()> {
        if slot >= MAX_POLICIES {
            return Err(NetPolicyError::InvalidArgument(format!(
                "policy slot {} out of range",
                slot
            )));
        }
        if policy.dscp_val >= 64 {
            return Err(NetPolicyError::InvalidArgument(format!(
                "dscp value {} does not fit in 6 bits",
                policy.dscp_val
            )));
        }

        self.table(family).write()[slot] = policy;
        Ok(())
    }

    pub fn clear_policy(
        &self,
        family: AddressFamily,
        slot: usize,
    ) -> Result<()> {
        self.set_policy(family, slot, DscpPolicy::EMPTY)
    }

    pub fn clear_all(&self, family: AddressFamily) {
        *self.table(family).write() = [DscpPolicy::EMPTY; MAX_POLICIES];
    }

    fn table(
        &self,
        family: AddressFamily,
    ) -> &KRwLock<[DscpPolicy; MAX_POLICIES]> {
        match family {
            AddressFamily::V4 => &self.policies_v4,
            AddressFamily::V6 => &self.policies_v6,
        }
    }

    fn cache(
        &self,
        family: AddressFamily,
        selector: u64,
    ) -> &Arc<dyn KeyedMap<u64, AffinityRecord>> {
        match (family, selector == STATS_SELECT_MAP_A) {
            (AddressFamily::V4, true) => &self.caches.v4_a,
            (AddressFamily::V4, false) => &self.caches.v4_b,
            (AddressFamily::V6, true) => &self.caches.v6_a,
            (AddressFamily::V6, false) => &self.caches.v6_b,
        }
    }

    /// Classify and possibly remark an Ethernet-framed packet,
    /// returning the applied DSCP value. `None` means the packet
    /// passed unmodified.
    pub fn process_frame(
        &self,
        frame: &mut [u8],
        meta: &PacketMeta,
    ) -> Option<u8> {
        if meta.pkt_type != PACKET_HOST {
            return None;
        }
        let mut view = PacketView::parse_frame(frame)?;
        self.process_view(&mut view, meta)
    }

    /// As [`Self::process_frame`], for a bare IP packet.
    pub fn process_ip(
        &self,
        pkt: &mut [u8],
        meta: &PacketMeta,
    ) -> Option<u8> {
        if meta.pkt_type != PACKET_HOST {
            return None;
        }
        let mut view = PacketView::parse_ip(pkt)?;
        self.process_view(&mut view, meta)
    }

    fn process_view(
        &self,
        view: &mut PacketView,
        meta: &PacketMeta,
    ) -> Option<u8> {
        // A packet with no socket cookie cannot be tied to a policy.
        if meta.cookie == 0 {
            return None;
        }
        let (src_port, dst_port) = view.ports?;

        let selector =
            self.configuration.get(&CURRENT_STATS_MAP_CONFIGURATION_KEY)?;
        let cache = self.cache(view.family, selector);

        // Fast path: the socket already resolved a policy and its
        // tuple is unchanged.
        if let Some(rec) = cache.get(&meta.cookie) {
            if rec.src_ip == view.src_ip
                && rec.dst_ip == view.dst_ip
                && rec.ifindex == meta.ifindex
                && rec.src_port == src_port
                && rec.dst_port == dst_port
                && rec.proto == view.proto
            {
                if view.dscp() != rec.dscp_val {
                    view.set_dscp(rec.dscp_val);
                }
                return Some(rec.dscp_val);
            }
        }

        let winner = {
            let table = self.table(view.family).read();
            let mut best: Option<(usize, u32, DscpPolicy)> = None;

            for (slot, policy) in table.iter().enumerate() {
                if policy.is_empty() || policy.ifindex != meta.ifindex {
                    continue;
                }

                let present =
                    PresentFields::from_bits_truncate(policy.present_fields);
                let mut matched = PresentFields::empty();
                let mut score = 0u32;

                if present.contains(PresentFields::SRC_IP)
                    && policy.src_ip == view.src_ip
                {
                    matched |= PresentFields::SRC_IP;
                    score += 1;
                }
                if present.contains(PresentFields::DST_IP)
                    && policy.dst_ip == view.dst_ip
                {
                    matched |= PresentFields::DST_IP;
                    score += 1;
                }
                if present.contains(PresentFields::SRC_PORT)
                    && policy.src_port == src_port
                {
                    matched |= PresentFields::SRC_PORT;
                    score += 1;
                }
                if present.contains(PresentFields::DST_PORT)
                    && policy.dst_port_start <= dst_port
                    && dst_port <= policy.dst_port_end
                {
                    matched |= PresentFields::DST_PORT;
                    score += 1;
                }
                if present.contains(PresentFields::PROTO)
                    && policy.proto == view.proto
                {
                    matched |= PresentFields::PROTO;
                    score += 1;
                }

                // Every declared field must match; a strictly greater
                // score displaces the incumbent, so the first slot
                // wins a tie.
                if matched != present {
                    continue;
                }
                if best.map(|(_, s, _)| score > s).unwrap_or(true) {
                    best = Some((slot, score, *policy));
                }
            }

            best
        };

        let (_, _, policy) = winner?;
        if view.dscp() != policy.dscp_val {
            view.set_dscp(policy.dscp_val);
        }

        let rec = AffinityRecord {
            src_ip: view.src_ip,
            dst_ip: view.dst_ip,
            ifindex: meta.ifindex,
            src_port,
            dst_port,
            proto: view.proto,
            dscp_val: policy.dscp_val,
            _pad: [0; 2],
        };
        if let Err(e) = cache.update(meta.cookie, rec) {
            debug!(self.log, "affinity cache insert failed: {}", e);
        }

        Some(policy.dscp_val)
    }
}
