// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! The keyed-map substrate shared by the control plane and the packet
//! path, plus the fixed-layout values stored in those maps.

use crate::sync::KRwLock;
use crate::Result;
use core::num::NonZeroU32;
use netpolicy_api::NetPolicyError;
use std::collections::BTreeMap;
use std::sync::Arc;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Key of the global configuration word holding the enabled-chains
/// bitmask.
pub const UID_RULES_CONFIGURATION_KEY: u32 = 0;

/// Key of the global configuration word selecting the live stats map.
pub const CURRENT_STATS_MAP_CONFIGURATION_KEY: u32 = 1;

pub const STATS_SELECT_MAP_A: u64 = 0;
pub const STATS_SELECT_MAP_B: u64 = 1;

/// Maximum number of entries in the UID owner map.
pub const UID_OWNER_MAP_SIZE: u32 = 4000;

/// A bounded key/value map shared between the control plane and the
/// packet path.
///
/// `update` is insert-or-replace. `delete` reports whether the key was
/// present rather than erroring on absence; callers that need
/// absence-is-an-error semantics check `get` first under their own
/// lock. `for_each` takes a point-in-time pass over the entries; it
/// makes no snapshot guarantee against concurrent writers.
pub trait KeyedMap<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn update(&self, key: K, value: V) -> Result<()>;
    fn delete(&self, key: &K) -> Result<bool>;
    fn for_each(&self, f: &mut dyn FnMut(K, &V));
    fn clear(&self) -> Result<()>;
}

/// An in-memory [`KeyedMap`] with a fixed capacity.
///
/// Read-mostly; the packet path takes the read half, the control plane
/// the write half.
pub struct MemMap<K: Copy + Ord, V: Clone> {
    entries: KRwLock<BTreeMap<K, V>>,
    limit: NonZeroU32,
}

impl<K: Copy + Ord, V: Clone> MemMap<K, V> {
    pub fn new(limit: NonZeroU32) -> Self {
        MemMap { entries: KRwLock::new(BTreeMap::new()), limit }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<K, V> KeyedMap<K, V> for MemMap<K, V>
where
    K: Copy + Ord + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    fn update(&self, key: K, value: V) -> Result<()> {
        let mut entries = self.entries.write();

        // A replace of an existing key never counts against the limit.
        if !entries.contains_key(&key)
            && entries.len() >= self.limit.get() as usize
        {
            return Err(NetPolicyError::MaxCapacity(self.limit.get() as u64));
        }

        entries.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &K) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn for_each(&self, f: &mut dyn FnMut(K, &V)) {
        for (k, v) in self.entries.read().iter() {
            f(*k, v);
        }
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Value of the UID owner map: the allowed ingress interface (0 means
/// any) and the per-UID rule bitmask.
///
/// The layout is shared with the packet path and must stay free of
/// padding.
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
pub struct UidOwnerValue {
    pub iif: u64,
    pub rule: u64,
}

/// The maps backing policy decisions, injected into the engine rather
/// than reached through globals.
#[derive(Clone)]
pub struct NetMaps {
    /// Global configuration words, keyed by the `*_CONFIGURATION_KEY`
    /// constants.
    pub configuration: Arc<dyn KeyedMap<u32, u64>>,

    /// Per-UID rule bitmask and allowed ingress interface.
    pub uid_owner: Arc<dyn KeyedMap<u32, UidOwnerValue>>,
}

impl NetMaps {
    /// Build a fully in-memory map set sized like the production one.
    pub fn in_memory() -> Self {
        let uid_limit = NonZeroU32::new(UID_OWNER_MAP_SIZE).unwrap();
        let cfg_limit = NonZeroU32::new(2).unwrap();

        NetMaps {
            configuration: Arc::new(MemMap::new(cfg_limit)),
            uid_owner: Arc::new(MemMap::new(uid_limit)),
        }
    }
}
