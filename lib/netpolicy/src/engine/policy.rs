// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The control-plane surface of the per-UID firewall: rule bitmask
//! maintenance, chain enablement, and the live stats map selector.

use crate::map::NetMaps;
use crate::map::UidOwnerValue;
use crate::map::CURRENT_STATS_MAP_CONFIGURATION_KEY;
use crate::map::STATS_SELECT_MAP_A;
use crate::map::STATS_SELECT_MAP_B;
use crate::map::UID_RULES_CONFIGURATION_KEY;
use crate::sync::KMutex;
use crate::Result;
use netpolicy_api::FirewallChain;
use netpolicy_api::FirewallVerdict;
use netpolicy_api::MatchFlags;
use netpolicy_api::NetPolicyError;
use slog::debug;
use slog::error;
use slog::info;
use slog::Logger;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// The control-plane view of the policy maps.
///
/// Every read-modify-write of the UID owner map happens under
/// `uid_owner_lock`; the two configuration words each have their own
/// lock so chain toggles and stats swaps never contend with rule
/// updates. The packet path reads the same maps without taking any of
/// these locks and may observe each single-entry update individually,
/// never a torn entry.
pub struct PolicyEngine {
    maps: NetMaps,
    uid_owner_lock: KMutex<()>,
    chain_config_lock: KMutex<()>,
    stats_select_lock: KMutex<()>,
    init: OnceLock<Result<()>>,
    log: Logger,
}

impl PolicyEngine {
    /// Create an engine over `maps` and run the one-time map setup.
    pub fn new(maps: NetMaps, log: Logger) -> Result<Self> {
        let engine = PolicyEngine {
            maps,
            uid_owner_lock: KMutex::new(()),
            chain_config_lock: KMutex::new(()),
            stats_select_lock: KMutex::new(()),
            init: OnceLock::new(),
            log,
        };
        engine.ensure_initialized()?;
        Ok(engine)
    }

    /// One-time setup gate: clear the UID table and write the default
    /// configuration words (no chains enabled, stats map A live). Runs
    /// at most once per engine; later callers get the recorded
    /// outcome.
    pub fn ensure_initialized(&self) -> Result<()> {
        self.init
            .get_or_init(|| {
                let unavailable = |what: &str, e: NetPolicyError| {
                    NetPolicyError::BackendUnavailable(format!(
                        "{}: {}",
                        what, e
                    ))
                };

                self.maps
                    .uid_owner
                    .clear()
                    .map_err(|e| unavailable("clear uid table", e))?;
                self.maps
                    .configuration
                    .update(UID_RULES_CONFIGURATION_KEY, 0)
                    .map_err(|e| unavailable("seed chain configuration", e))?;
                self.maps
                    .configuration
                    .update(
                        CURRENT_STATS_MAP_CONFIGURATION_KEY,
                        STATS_SELECT_MAP_A,
                    )
                    .map_err(|e| unavailable("seed stats map selector", e))?;

                info!(self.log, "policy maps initialized");
                Ok(())
            })
            .clone()
    }

    pub fn maps(&self) -> &NetMaps {
        &self.maps
    }

    /// Set `match_bit` in `uid`'s rule bitmask. `iif` is only
    /// meaningful for [`MatchFlags::IIF`] and must be zero otherwise;
    /// nothing is modified when the precondition fails.
    pub fn add_rule(
        &self,
        uid: u32,
        match_bit: MatchFlags,
        iif: u64,
    ) -> Result<()> {
        let _guard = self.uid_owner_lock.lock();
        self.add_rule_inner(uid, match_bit, iif)
    }

    /// Clear `match_bit` from `uid`'s rule bitmask, deleting the entry
    /// when no bits remain.
    pub fn remove_rule(&self, uid: u32, match_bit: MatchFlags) -> Result<()> {
        let _guard = self.uid_owner_lock.lock();
        self.remove_rule_inner(uid, match_bit)
    }

    // The unlocked halves, shared with the batch operations which hold
    // the UID owner lock across the whole batch.
    fn add_rule_inner(
        &self,
        uid: u32,
        match_bit: MatchFlags,
        iif: u64,
    ) -> Result<()> {
        if match_bit != MatchFlags::IIF && iif != 0 {
            return Err(NetPolicyError::InvalidArgument(format!(
                "match {:?} does not accept an interface index",
                match_bit
            )));
        }

        let old = self.maps.uid_owner.get(&uid).unwrap_or_default();
        let new = UidOwnerValue {
            iif: if match_bit == MatchFlags::IIF { iif } else { old.iif },
            rule: old.rule | match_bit.bits(),
        };
        self.maps.uid_owner.update(uid, new)
    }

    fn remove_rule_inner(
        &self,
        uid: u32,
        match_bit: MatchFlags,
    ) -> Result<()> {
        let old = match self.maps.uid_owner.get(&uid) {
            Some(old) => old,
            None => {
                return Err(NetPolicyError::NotFound(format!(
                    "uid {} has no rule entry",
                    uid
                )));
            }
        };

        let new_rule = old.rule & !match_bit.bits();
        if new_rule == 0 {
            self.maps.uid_owner.delete(&uid)?;
            return Ok(());
        }

        let new = UidOwnerValue {
            iif: if match_bit == MatchFlags::IIF { 0 } else { old.iif },
            rule: new_rule,
        };
        self.maps.uid_owner.update(uid, new)
    }

    /// Apply `verdict` for `uid` on `chain`. On an allow list, Allow
    /// adds the chain bit and Deny removes it; a deny list is the
    /// mirror image.
    pub fn set_uid_rule(
        &self,
        chain: FirewallChain,
        uid: u32,
        verdict: FirewallVerdict,
    ) -> Result<()> {
        let add = match (verdict, chain.is_allow_list()) {
            (FirewallVerdict::Allow, true) => true,
            (FirewallVerdict::Deny, false) => true,
            _ => false,
        };

        if add {
            self.add_rule(uid, chain.match_bit(), 0)
        } else {
            self.remove_rule(uid, chain.match_bit())
        }
    }

    /// Report the effective verdict for `uid` on `chain`. A UID with no
    /// entry has an all-zero rule bitmask.
    pub fn get_uid_rule(
        &self,
        chain: FirewallChain,
        uid: u32,
    ) -> FirewallVerdict {
        let entry = self.maps.uid_owner.get(&uid).unwrap_or_default();
        let member = entry.rule & chain.match_bit().bits() != 0;

        if member == chain.is_allow_list() {
            FirewallVerdict::Allow
        } else {
            FirewallVerdict::Deny
        }
    }

    /// Make `uids` the exact membership of `chain`: the chain bit is
    /// removed from every current member not listed and added for every
    /// listed UID. The whole pass holds the UID owner lock; a per-UID
    /// failure is logged and skipped rather than aborting the batch.
    pub fn replace_chain(
        &self,
        chain: FirewallChain,
        uids: &[u32],
    ) -> Result<()> {
        let match_bit = chain.match_bit();
        let wanted: BTreeSet<u32> = uids.iter().copied().collect();

        let _guard = self.uid_owner_lock.lock();

        let mut members = Vec::new();
        self.maps.uid_owner.for_each(&mut |uid, val| {
            if val.rule & match_bit.bits() != 0 {
                members.push(uid);
            }
        });

        for uid in members {
            if wanted.contains(&uid) {
                continue;
            }
            if let Err(e) = self.remove_rule_inner(uid, match_bit) {
                error!(
                    self.log,
                    "replace_chain({}): failed to remove uid {}: {}",
                    chain, uid, e
                );
            }
        }

        for uid in &wanted {
            if let Err(e) = self.add_rule_inner(*uid, match_bit, 0) {
                error!(
                    self.log,
                    "replace_chain({}): failed to add uid {}: {}",
                    chain, uid, e
                );
            }
        }

        Ok(())
    }

    pub fn add_penalty_box_rule(&self, uid: u32) -> Result<()> {
        self.add_rule(uid, MatchFlags::PENALTY_BOX, 0)
    }

    pub fn remove_penalty_box_rule(&self, uid: u32) -> Result<()> {
        self.remove_rule(uid, MatchFlags::PENALTY_BOX)
    }

    pub fn add_happy_box_rule(&self, uid: u32) -> Result<()> {
        self.add_rule(uid, MatchFlags::HAPPY_BOX, 0)
    }

    pub fn remove_happy_box_rule(&self, uid: u32) -> Result<()> {
        self.remove_rule(uid, MatchFlags::HAPPY_BOX)
    }

    /// Restrict ingress for each of `uids` to interface `iif` (0 means
    /// any interface). Per-UID failures are logged and skipped.
    pub fn add_uid_interface_rules(&self, iif: u64, uids: &[u32]) {
        let _guard = self.uid_owner_lock.lock();
        for uid in uids {
            if let Err(e) = self.add_rule_inner(*uid, MatchFlags::IIF, iif) {
                error!(
                    self.log,
                    "add_uid_interface_rules: uid {}: {}", uid, e
                );
            }
        }
    }

    /// Lift the ingress interface restriction for each of `uids`.
    pub fn remove_uid_interface_rules(&self, uids: &[u32]) {
        let _guard = self.uid_owner_lock.lock();
        for uid in uids {
            if let Err(e) = self.remove_rule_inner(*uid, MatchFlags::IIF) {
                error!(
                    self.log,
                    "remove_uid_interface_rules: uid {}: {}", uid, e
                );
            }
        }
    }

    /// Add or remove the VPN lockdown bit for `uid`. Removing an absent
    /// bit is a no-op; lockdown teardown races UID teardown and the
    /// entry may already be gone.
    pub fn update_uid_lockdown_rule(&self, uid: u32, add: bool) -> Result<()> {
        if add {
            return self.add_rule(uid, MatchFlags::LOCKDOWN_VPN, 0);
        }

        match self.remove_rule(uid, MatchFlags::LOCKDOWN_VPN) {
            Err(NetPolicyError::NotFound(_)) => {
                debug!(
                    self.log,
                    "lockdown removal for uid {} found no entry", uid
                );
                Ok(())
            }
            res => res,
        }
    }

    /// Enable or disable `chain` in the global configuration word.
    pub fn set_child_chain(
        &self,
        chain: FirewallChain,
        enable: bool,
    ) -> Result<()> {
        let _guard = self.chain_config_lock.lock();
        let word = self.read_config(UID_RULES_CONFIGURATION_KEY)?;

        let bit = chain.match_bit().bits();
        let new = if enable { word | bit } else { word & !bit };
        if new != word {
            self.maps.configuration.update(UID_RULES_CONFIGURATION_KEY, new)?;
        }
        Ok(())
    }

    pub fn is_chain_enabled(&self, chain: FirewallChain) -> Result<bool> {
        let word = self.read_config(UID_RULES_CONFIGURATION_KEY)?;
        Ok(word & chain.match_bit().bits() != 0)
    }

    /// Flip the live stats map selector and return the new selection.
    pub fn swap_active_stats_map(&self) -> Result<u64> {
        let _guard = self.stats_select_lock.lock();
        let cur = self.read_config(CURRENT_STATS_MAP_CONFIGURATION_KEY)?;

        let new = if cur == STATS_SELECT_MAP_A {
            STATS_SELECT_MAP_B
        } else {
            STATS_SELECT_MAP_A
        };
        self.maps
            .configuration
            .update(CURRENT_STATS_MAP_CONFIGURATION_KEY, new)?;
        Ok(new)
    }

    fn read_config(&self, key: u32) -> Result<u64> {
        self.maps.configuration.get(&key).ok_or_else(|| {
            NetPolicyError::BackendUnavailable(format!(
                "configuration word {} missing",
                key
            ))
        })
    }
}
