// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! Firewall chain identities and the per-UID match-bit vocabulary.
//!
//! The bit positions here are shared with the packet-processing code
//! that reads the UID owner table; they must never be renumbered.

use crate::error::NetPolicyError;
use bitflags::bitflags;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;

bitflags! {
    /// One bit per active policy condition in a UID's rule bitmask.
    ///
    /// `HAPPY_BOX` and `PENALTY_BOX` are special: they are consulted by
    /// the bandwidth accounting path directly and are not gated by the
    /// enabled-chains configuration word.
    #[derive(
        Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize,
    )]
    pub struct MatchFlags: u64 {
        const HAPPY_BOX = 1 << 0;
        const PENALTY_BOX = 1 << 1;
        const DOZABLE = 1 << 2;
        const STANDBY = 1 << 3;
        const POWERSAVE = 1 << 4;
        const RESTRICTED = 1 << 5;
        const LOW_POWER_STANDBY = 1 << 6;
        const IIF = 1 << 7;
        const LOCKDOWN_VPN = 1 << 8;
        const OEM_DENY_1 = 1 << 9;
        const OEM_DENY_2 = 1 << 10;
        const OEM_DENY_3 = 1 << 11;
    }
}

/// A UID-based firewall chain.
///
/// Each chain has a fixed match bit and a fixed allow-list/deny-list
/// policy, recorded in [`CHAINS`]. The two box matches (penalty/happy)
/// are not chains; they have no entry here.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FirewallChain {
    Dozable,
    Standby,
    Powersave,
    Restricted,
    LowPowerStandby,
    OemDeny1,
    OemDeny2,
    OemDeny3,
}

impl FirewallChain {
    /// Numeric chain id as used across the control-plane boundary.
    pub fn id(self) -> i32 {
        match self {
            Self::Dozable => 1,
            Self::Standby => 2,
            Self::Powersave => 3,
            Self::Restricted => 4,
            Self::LowPowerStandby => 5,
            Self::OemDeny1 => 7,
            Self::OemDeny2 => 8,
            Self::OemDeny3 => 9,
        }
    }

    /// The match bit carried in the UID owner table for this chain.
    pub fn match_bit(self) -> MatchFlags {
        CHAINS[self as usize].bit
    }

    /// Whether this chain is an allow list (default-deny, explicit
    /// allow) as opposed to a deny list (default-allow, explicit deny).
    pub fn is_allow_list(self) -> bool {
        matches!(CHAINS[self as usize].policy, ChainPolicy::AllowList)
    }
}

impl TryFrom<i32> for FirewallChain {
    type Error = NetPolicyError;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Self::Dozable),
            2 => Ok(Self::Standby),
            3 => Ok(Self::Powersave),
            4 => Ok(Self::Restricted),
            5 => Ok(Self::LowPowerStandby),
            7 => Ok(Self::OemDeny1),
            8 => Ok(Self::OemDeny2),
            9 => Ok(Self::OemDeny3),
            id => Err(NetPolicyError::InvalidArgument(format!(
                "invalid firewall chain: {}",
                id
            ))),
        }
    }
}

impl Display for FirewallChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Dozable => "dozable",
            Self::Standby => "standby",
            Self::Powersave => "powersave",
            Self::Restricted => "restricted",
            Self::LowPowerStandby => "low_power_standby",
            Self::OemDeny1 => "oem_deny_1",
            Self::OemDeny2 => "oem_deny_2",
            Self::OemDeny3 => "oem_deny_3",
        };

        write!(f, "{}", name)
    }
}

/// Default policy of a chain when its bit is enabled globally.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChainPolicy {
    /// Default-deny; a UID needs the chain's bit to pass.
    AllowList,
    /// Default-allow; a UID with the chain's bit is dropped.
    DenyList,
}

/// One row of the static chain table.
#[derive(Clone, Copy, Debug)]
pub struct ChainDesc {
    pub chain: FirewallChain,
    pub bit: MatchFlags,
    pub policy: ChainPolicy,
}

/// The chain table. This mapping is closed and static; indexed by the
/// [`FirewallChain`] discriminant.
pub static CHAINS: [ChainDesc; 8] = [
    ChainDesc {
        chain: FirewallChain::Dozable,
        bit: MatchFlags::DOZABLE,
        policy: ChainPolicy::AllowList,
    },
    ChainDesc {
        chain: FirewallChain::Standby,
        bit: MatchFlags::STANDBY,
        policy: ChainPolicy::DenyList,
    },
    ChainDesc {
        chain: FirewallChain::Powersave,
        bit: MatchFlags::POWERSAVE,
        policy: ChainPolicy::AllowList,
    },
    ChainDesc {
        chain: FirewallChain::Restricted,
        bit: MatchFlags::RESTRICTED,
        policy: ChainPolicy::AllowList,
    },
    ChainDesc {
        chain: FirewallChain::LowPowerStandby,
        bit: MatchFlags::LOW_POWER_STANDBY,
        policy: ChainPolicy::AllowList,
    },
    ChainDesc {
        chain: FirewallChain::OemDeny1,
        bit: MatchFlags::OEM_DENY_1,
        policy: ChainPolicy::DenyList,
    },
    ChainDesc {
        chain: FirewallChain::OemDeny2,
        bit: MatchFlags::OEM_DENY_2,
        policy: ChainPolicy::DenyList,
    },
    ChainDesc {
        chain: FirewallChain::OemDeny3,
        bit: MatchFlags::OEM_DENY_3,
        policy: ChainPolicy::DenyList,
    },
];

/// An allow/deny verdict for a single UID on a single chain.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum FirewallVerdict {
    Allow = 1,
    Deny = 2,
}

impl TryFrom<i32> for FirewallVerdict {
    type Error = NetPolicyError;

    fn try_from(val: i32) -> Result<Self, Self::Error> {
        match val {
            1 => Ok(Self::Allow),
            2 => Ok(Self::Deny),
            val => Err(NetPolicyError::InvalidArgument(format!(
                "invalid firewall verdict: {}",
                val
            ))),
        }
    }
}
