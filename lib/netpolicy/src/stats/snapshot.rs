// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! A point-in-time snapshot of per-(iface, uid, tag) traffic counters.
//!
//! Storage is columnar: parallel arrays indexed by row, grown together.
//! Rows are identified by the (iface, uid, tag) triple; the storage
//! does not enforce uniqueness, but [`NetworkStats::combine_values`]
//! and [`NetworkStats::find_index`] treat the triple as a key.

use crate::Result;
use netpolicy_api::NetPolicyError;

/// One logical row of a [`NetworkStats`] snapshot.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Entry {
    pub iface: String,
    pub uid: u32,
    pub tag: u32,
    pub rx_bytes: i64,
    pub rx_packets: i64,
    pub tx_bytes: i64,
    pub tx_packets: i64,
}

/// A growable columnar snapshot taken at one `elapsed_realtime`
/// instant.
#[derive(Clone, Debug)]
pub struct NetworkStats {
    elapsed_realtime: i64,
    size: usize,
    iface: Vec<String>,
    uid: Vec<u32>,
    tag: Vec<u32>,
    rx_bytes: Vec<i64>,
    rx_packets: Vec<i64>,
    tx_bytes: Vec<i64>,
    tx_packets: Vec<i64>,
}

impl NetworkStats {
    pub fn new(elapsed_realtime: i64, initial_capacity: usize) -> Self {
        NetworkStats {
            elapsed_realtime,
            size: 0,
            iface: vec![String::new(); initial_capacity],
            uid: vec![0; initial_capacity],
            tag: vec![0; initial_capacity],
            rx_bytes: vec![0; initial_capacity],
            rx_packets: vec![0; initial_capacity],
            tx_bytes: vec![0; initial_capacity],
            tx_packets: vec![0; initial_capacity],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn elapsed_realtime(&self) -> i64 {
        self.elapsed_realtime
    }

    /// Append `entry` as a new row, growing the columns 1.5x when
    /// full.
    pub fn add_values(&mut self, entry: Entry) {
        if self.size >= self.iface.len() {
            let new_len = (self.size * 3) / 2 + 10;
            self.iface.resize(new_len, String::new());
            self.uid.resize(new_len, 0);
            self.tag.resize(new_len, 0);
            self.rx_bytes.resize(new_len, 0);
            self.rx_packets.resize(new_len, 0);
            self.tx_bytes.resize(new_len, 0);
            self.tx_packets.resize(new_len, 0);
        }

        let i = self.size;
        self.iface[i] = entry.iface;
        self.uid[i] = entry.uid;
        self.tag[i] = entry.tag;
        self.rx_bytes[i] = entry.rx_bytes;
        self.rx_packets[i] = entry.rx_packets;
        self.tx_bytes[i] = entry.tx_bytes;
        self.tx_packets[i] = entry.tx_packets;
        self.size += 1;
    }

    pub fn get_values(&self, i: usize) -> Entry {
        Entry {
            iface: self.iface[i].clone(),
            uid: self.uid[i],
            tag: self.tag[i],
            rx_bytes: self.rx_bytes[i],
            rx_packets: self.rx_packets[i],
            tx_bytes: self.tx_bytes[i],
            tx_packets: self.tx_packets[i],
        }
    }

    /// Accumulate `entry` into its existing row, or append a new one.
    /// This is an accumulator, not a set union: combining the same
    /// entry twice doubles the counters.
    pub fn combine_values(&mut self, entry: Entry) {
        match self.find_index(&entry.iface, entry.uid, entry.tag) {
            Some(i) => {
                self.rx_bytes[i] += entry.rx_bytes;
                self.rx_packets[i] += entry.rx_packets;
                self.tx_bytes[i] += entry.tx_bytes;
                self.tx_packets[i] += entry.tx_packets;
            }
            None => self.add_values(entry),
        }
    }

    pub fn find_index(
        &self,
        iface: &str,
        uid: u32,
        tag: u32,
    ) -> Option<usize> {
        (0..self.size).find(|&i| {
            self.uid[i] == uid && self.tag[i] == tag && self.iface[i] == iface
        })
    }

    pub fn unique_ifaces(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for i in 0..self.size {
            if !out.iter().any(|s| s == &self.iface[i]) {
                out.push(self.iface[i].clone());
            }
        }
        out
    }

    pub fn unique_uids(&self) -> Vec<u32> {
        let mut out: Vec<u32> = Vec::new();
        for i in 0..self.size {
            if !out.contains(&self.uid[i]) {
                out.push(self.uid[i]);
            }
        }
        out
    }

    /// Strict difference `self - other`. Counters are assumed
    /// monotonic within a session; a negative result or a negative
    /// realtime delta is a [`NetPolicyError::MonotonicityViolation`].
    pub fn subtract(&self, other: &NetworkStats) -> Result<NetworkStats> {
        let (result, violation) = self.diff_rows(other, false);
        match violation {
            Some(msg) => Err(NetPolicyError::MonotonicityViolation(msg)),
            None => Ok(result),
        }
    }

    /// As [`Self::subtract`], but negative results (from interface
    /// churn or counter resets) are floored at zero instead of raised.
    pub fn subtract_clamped(&self, other: &NetworkStats) -> NetworkStats {
        self.diff_rows(other, true).0
    }

    fn diff_rows(
        &self,
        other: &NetworkStats,
        clamp: bool,
    ) -> (NetworkStats, Option<String>) {
        let mut delta_realtime =
            self.elapsed_realtime - other.elapsed_realtime;
        let mut violation = None;
        if delta_realtime < 0 {
            if !clamp {
                violation = Some(format!(
                    "negative realtime delta: {}",
                    delta_realtime
                ));
            }
            delta_realtime = 0;
        }

        let mut result = NetworkStats::new(delta_realtime, self.size);
        for i in 0..self.size {
            let mut entry = self.get_values(i);

            // A row missing in `other` is a newly-appeared interface;
            // its full value is the delta.
            if let Some(j) =
                other.find_index(&entry.iface, entry.uid, entry.tag)
            {
                entry.rx_bytes -= other.rx_bytes[j];
                entry.rx_packets -= other.rx_packets[j];
                entry.tx_bytes -= other.tx_bytes[j];
                entry.tx_packets -= other.tx_packets[j];
            }

            let negative = entry.rx_bytes < 0
                || entry.rx_packets < 0
                || entry.tx_bytes < 0
                || entry.tx_packets < 0;
            if negative {
                if clamp {
                    entry.rx_bytes = entry.rx_bytes.max(0);
                    entry.rx_packets = entry.rx_packets.max(0);
                    entry.tx_bytes = entry.tx_bytes.max(0);
                    entry.tx_packets = entry.tx_packets.max(0);
                } else if violation.is_none() {
                    violation = Some(format!(
                        "counter went backwards for ({}, {}, {})",
                        entry.iface, entry.uid, entry.tag
                    ));
                }
            }

            result.add_values(entry);
        }

        (result, violation)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn entry(iface: &str, uid: u32, tag: u32, rx: i64, tx: i64) -> Entry {
        Entry {
            iface: iface.to_string(),
            uid,
            tag,
            rx_bytes: rx,
            rx_packets: rx / 100,
            tx_bytes: tx,
            tx_packets: tx / 100,
        }
    }

    #[test]
    fn combine_is_not_idempotent() {
        let mut stats = NetworkStats::new(0, 2);
        stats.combine_values(entry("wlan0", 10010, 0, 1000, 500));
        stats.combine_values(entry("wlan0", 10010, 0, 1000, 500));
        assert_eq!(stats.size(), 1);
        let row = stats.get_values(0);
        assert_eq!(row.rx_bytes, 2000);
        assert_eq!(row.tx_bytes, 1000);
    }

    #[test]
    fn combine_distinguishes_tags() {
        let mut stats = NetworkStats::new(0, 2);
        stats.combine_values(entry("wlan0", 10010, 0, 100, 0));
        stats.combine_values(entry("wlan0", 10010, 7, 200, 0));
        stats.combine_values(entry("rmnet0", 10010, 0, 300, 0));
        assert_eq!(stats.size(), 3);
        assert_eq!(stats.find_index("wlan0", 10010, 7), Some(1));
        assert_eq!(stats.find_index("wlan0", 10010, 9), None);
    }

    #[test]
    fn growth_preserves_rows() {
        let mut stats = NetworkStats::new(0, 1);
        for uid in 0..50u32 {
            stats.add_values(entry("wlan0", 10000 + uid, 0, uid.into(), 0));
        }
        assert_eq!(stats.size(), 50);
        assert_eq!(stats.get_values(49).rx_bytes, 49);
    }

    #[test]
    fn subtract_produces_delta() {
        let mut newer = NetworkStats::new(1000, 2);
        newer.add_values(entry("wlan0", 10010, 0, 1000, 800));
        newer.add_values(entry("rmnet0", 10020, 0, 50, 10));

        let mut older = NetworkStats::new(400, 2);
        older.add_values(entry("wlan0", 10010, 0, 600, 300));

        let delta = newer.subtract(&older).unwrap();
        assert_eq!(delta.elapsed_realtime(), 600);
        assert_eq!(delta.size(), 2);
        assert_eq!(delta.get_values(0).rx_bytes, 400);
        assert_eq!(delta.get_values(0).tx_bytes, 500);

        // Row missing in the older snapshot keeps its full value.
        assert_eq!(delta.get_values(1).rx_bytes, 50);
    }

    #[test]
    fn subtract_detects_backwards_counters() {
        let mut newer = NetworkStats::new(1000, 1);
        newer.add_values(entry("wlan0", 10010, 0, 100, 0));
        let mut older = NetworkStats::new(400, 1);
        older.add_values(entry("wlan0", 10010, 0, 300, 0));

        match newer.subtract(&older) {
            Err(NetPolicyError::MonotonicityViolation(_)) => (),
            res => panic!("expected MonotonicityViolation, got {:?}", res),
        }

        let clamped = newer.subtract_clamped(&older);
        assert_eq!(clamped.get_values(0).rx_bytes, 0);
    }

    #[test]
    fn subtract_detects_backwards_realtime() {
        let newer = NetworkStats::new(100, 0);
        let older = NetworkStats::new(400, 0);
        assert!(newer.subtract(&older).is_err());
        assert_eq!(newer.subtract_clamped(&older).elapsed_realtime(), 0);
    }

    #[test]
    fn unique_columns() {
        let mut stats = NetworkStats::new(0, 4);
        stats.add_values(entry("wlan0", 10010, 0, 0, 0));
        stats.add_values(entry("wlan0", 10020, 0, 0, 0));
        stats.add_values(entry("rmnet0", 10010, 0, 0, 0));
        assert_eq!(stats.unique_ifaces(), vec!["wlan0", "rmnet0"]);
        assert_eq!(stats.unique_uids(), vec![10010, 10020]);
    }
}
