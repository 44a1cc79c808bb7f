// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The packet-side owner match: given a UID and direction, decide
//! whether the enabled firewall chains and the per-UID rule bitmask
//! let the packet through.

use crate::map::NetMaps;
use crate::map::UID_RULES_CONFIGURATION_KEY;
use netpolicy_api::chain::CHAINS;
use netpolicy_api::Direction;
use netpolicy_api::MatchFlags;

/// UIDs below this bound belong to the system and are never firewalled.
pub const SYSTEM_UID_BOUNDARY: u32 = 10000;

/// The loopback interface is exempt from ingress interface filtering.
pub const LOOPBACK_IFINDEX: u64 = 1;

/// The outcome of an owner match.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OwnerVerdict {
    /// Deliver the packet.
    Pass,

    /// Drop the packet.
    Drop,

    /// Drop the packet unless a higher layer has marked this socket as
    /// carrying DNS traffic.
    DropUnlessDns,
}

/// Evaluate the per-UID firewall for one packet.
///
/// A missing configuration word reads as zero (no chains enabled) and a
/// missing UID entry reads as an all-zero rule, so a packet is only
/// ever dropped by explicit state.
pub fn owner_match(
    maps: &NetMaps,
    uid: u32,
    dir: Direction,
    ifindex: u64,
) -> OwnerVerdict {
    if uid < SYSTEM_UID_BOUNDARY {
        return OwnerVerdict::Pass;
    }

    let enabled = maps
        .configuration
        .get(&UID_RULES_CONFIGURATION_KEY)
        .map(MatchFlags::from_bits_truncate)
        .unwrap_or(MatchFlags::empty());

    let entry = maps.uid_owner.get(&uid).unwrap_or_default();
    let rules = MatchFlags::from_bits_truncate(entry.rule);

    for desc in &CHAINS {
        if !enabled.contains(desc.bit) {
            continue;
        }

        let member = rules.contains(desc.bit);
        if desc.chain.is_allow_list() && !member {
            return OwnerVerdict::Drop;
        }
        if !desc.chain.is_allow_list() && member {
            return OwnerVerdict::Drop;
        }
    }

    if dir == Direction::Ingress && ifindex != LOOPBACK_IFINDEX {
        if rules.contains(MatchFlags::IIF) {
            // 0 means any interface is acceptable.
            if entry.iif != 0 && entry.iif != ifindex {
                return OwnerVerdict::DropUnlessDns;
            }
        } else if rules.contains(MatchFlags::LOCKDOWN_VPN) {
            return OwnerVerdict::DropUnlessDns;
        }
    }

    OwnerVerdict::Pass
}
