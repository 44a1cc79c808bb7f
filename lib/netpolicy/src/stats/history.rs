// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! A bucketed time series of rx/tx byte counters.
//!
//! Buckets are created lazily where data lands, normalized to
//! `bucket_duration` boundaries, and kept strictly sorted by start
//! time; gaps between buckets are expected. Recording apportions bytes
//! linearly by time overlap, walking from the newest bucket backwards
//! so integer-division remainders accumulate into the oldest
//! overlapping bucket.

use crate::Result;
use netpolicy_api::NetPolicyError;
use serde::Deserialize;
use serde::Serialize;

const VERSION_INIT: u16 = 1;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct NetworkStatsHistory {
    bucket_duration: i64,
    bucket_start: Vec<i64>,
    rx_bytes: Vec<i64>,
    tx_bytes: Vec<i64>,
}

impl NetworkStatsHistory {
    pub fn new(bucket_duration: i64) -> Self {
        NetworkStatsHistory {
            bucket_duration,
            bucket_start: Vec::new(),
            rx_bytes: Vec::new(),
            tx_bytes: Vec::new(),
        }
    }

    pub fn bucket_duration(&self) -> i64 {
        self.bucket_duration
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_start.len()
    }

    pub fn bucket(&self, i: usize) -> (i64, i64, i64) {
        (self.bucket_start[i], self.rx_bytes[i], self.tx_bytes[i])
    }

    /// Start of the earliest bucket, or `i64::MAX` when empty.
    pub fn start(&self) -> i64 {
        self.bucket_start.first().copied().unwrap_or(i64::MAX)
    }

    /// End of the latest bucket, or `i64::MIN` when empty.
    pub fn end(&self) -> i64 {
        self.bucket_start
            .last()
            .map(|s| s + self.bucket_duration)
            .unwrap_or(i64::MIN)
    }

    /// Record `rx`/`tx` bytes over `[start, end)`, apportioned
    /// linearly by overlap across the covered buckets.
    pub fn record_data(
        &mut self,
        start: i64,
        end: i64,
        rx: i64,
        tx: i64,
    ) -> Result<()> {
        if rx < 0 || tx < 0 {
            return Err(NetPolicyError::InvalidArgument(format!(
                "negative byte counts: rx {} tx {}",
                rx, tx
            )));
        }

        self.ensure_buckets(start, end);

        let mut rx_left = rx;
        let mut tx_left = tx;
        let mut duration = end - start;
        for i in (0..self.bucket_start.len()).rev() {
            let cur_start = self.bucket_start[i];
            let cur_end = cur_start + self.bucket_duration;

            if cur_end < start {
                break;
            }
            if cur_start > end {
                continue;
            }

            let overlap = cur_end.min(end) - cur_start.max(start);
            if overlap <= 0 {
                continue;
            }

            let frac_rx = rx_left * overlap / duration;
            let frac_tx = tx_left * overlap / duration;
            self.rx_bytes[i] += frac_rx;
            self.tx_bytes[i] += frac_tx;
            rx_left -= frac_rx;
            tx_left -= frac_tx;
            duration -= overlap;
        }

        Ok(())
    }

    /// Record every bucket of `other` into this history.
    pub fn record_entire_history(
        &mut self,
        other: &NetworkStatsHistory,
    ) -> Result<()> {
        for i in 0..other.bucket_count() {
            let (start, rx, tx) = other.bucket(i);
            self.record_data(start, start + other.bucket_duration, rx, tx)?;
        }
        Ok(())
    }

    // Create any buckets needed to cover [start, end), normalized to
    // bucket_duration boundaries.
    fn ensure_buckets(&mut self, start: i64, end: i64) {
        let start = start - start.rem_euclid(self.bucket_duration);
        let end = end
            + (self.bucket_duration - end.rem_euclid(self.bucket_duration))
                % self.bucket_duration;

        let mut now = start;
        while now < end {
            if let Err(idx) = self.bucket_start.binary_search(&now) {
                self.insert_bucket(idx, now);
            }
            now += self.bucket_duration;
        }
    }

    fn insert_bucket(&mut self, idx: usize, start: i64) {
        // Grow 1.5x rather than letting the Vec double.
        if self.bucket_start.len() == self.bucket_start.capacity() {
            let want = (self.bucket_start.len() * 3) / 2 + 10;
            let extra = want - self.bucket_start.len();
            self.bucket_start.reserve_exact(extra);
            self.rx_bytes.reserve_exact(extra);
            self.tx_bytes.reserve_exact(extra);
        }

        self.bucket_start.insert(idx, start);
        self.rx_bytes.insert(idx, 0);
        self.tx_bytes.insert(idx, 0);
    }

    /// Drop every bucket lying entirely before `cutoff`.
    pub fn remove_buckets_before(&mut self, cutoff: i64) {
        let keep = self
            .bucket_start
            .iter()
            .position(|&s| s + self.bucket_duration > cutoff)
            .unwrap_or(self.bucket_start.len());

        self.bucket_start.drain(..keep);
        self.rx_bytes.drain(..keep);
        self.tx_bytes.drain(..keep);
    }

    /// Sum the rx/tx bytes attributable to `[start, end)` as of `now`.
    ///
    /// A bucket straddling `now` is still filling and contributes its
    /// full value; closed buckets contribute proportionally to their
    /// overlap with the queried range.
    pub fn get_values(&self, start: i64, end: i64, now: i64) -> (i64, i64) {
        let mut rx = 0i64;
        let mut tx = 0i64;

        for i in (0..self.bucket_start.len()).rev() {
            let cur_start = self.bucket_start[i];
            let cur_end = cur_start + self.bucket_duration;

            if cur_end <= start {
                break;
            }
            if cur_start >= end {
                continue;
            }

            let active = cur_start < now && cur_end > now;
            let overlap = if active {
                self.bucket_duration
            } else {
                cur_end.min(end) - cur_start.max(start)
            };
            if overlap <= 0 {
                continue;
            }

            if overlap == self.bucket_duration {
                rx += self.rx_bytes[i];
                tx += self.tx_bytes[i];
            } else {
                rx += self.rx_bytes[i] * overlap / self.bucket_duration;
                tx += self.tx_bytes[i] * overlap / self.bucket_duration;
            }
        }

        (rx, tx)
    }

    /// Serialize with a leading version tag.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        postcard::to_stdvec(&(VERSION_INIT, self)).map_err(|e| {
            NetPolicyError::InvalidArgument(format!(
                "history serialization failed: {}",
                e
            ))
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (version, history): (u16, NetworkStatsHistory) =
            postcard::from_bytes(bytes).map_err(|e| {
                NetPolicyError::InvalidArgument(format!(
                    "history deserialization failed: {}",
                    e
                ))
            })?;

        if version != VERSION_INIT {
            return Err(NetPolicyError::InvalidArgument(format!(
                "unknown history version: {}",
                version
            )));
        }

        Ok(history)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_splits_across_buckets() {
        let mut h = NetworkStatsHistory::new(1000);
        h.record_data(0, 2000, 1000, 2000).unwrap();

        assert_eq!(h.bucket_count(), 2);
        assert_eq!(h.bucket(0), (0, 500, 1000));
        assert_eq!(h.bucket(1), (1000, 500, 1000));
    }

    #[test]
    fn record_normalizes_unaligned_ranges() {
        let mut h = NetworkStatsHistory::new(1000);
        h.record_data(500, 1500, 1000, 0).unwrap();

        assert_eq!(h.bucket_count(), 2);
        assert_eq!(h.bucket(0), (0, 500, 0));
        assert_eq!(h.bucket(1), (1000, 500, 0));
    }

    #[test]
    fn rounding_remainder_lands_in_oldest_bucket() {
        let mut h = NetworkStatsHistory::new(1000);
        // 100 bytes over three buckets: 33 each, remainder to the
        // first.
        h.record_data(0, 3000, 100, 0).unwrap();
        let total: i64 = (0..3).map(|i| h.bucket(i).1).sum();
        assert_eq!(total, 100);
        assert_eq!(h.bucket(2).1, 33);
        assert_eq!(h.bucket(1).1, 33);
        assert_eq!(h.bucket(0).1, 34);
    }

    #[test]
    fn buckets_stay_sorted_with_gaps() {
        let mut h = NetworkStatsHistory::new(1000);
        h.record_data(5000, 6000, 10, 0).unwrap();
        h.record_data(1000, 2000, 20, 0).unwrap();

        assert_eq!(h.bucket_count(), 2);
        assert_eq!(h.bucket(0).0, 1000);
        assert_eq!(h.bucket(1).0, 5000);
        assert_eq!(h.start(), 1000);
        assert_eq!(h.end(), 6000);
    }

    #[test]
    fn negative_input_rejected() {
        let mut h = NetworkStatsHistory::new(1000);
        match h.record_data(0, 1000, -1, 0) {
            Err(NetPolicyError::InvalidArgument(_)) => (),
            res => panic!("expected InvalidArgument, got {:?}", res),
        }
        assert_eq!(h.bucket_count(), 0);
    }

    #[test]
    fn get_values_counts_active_bucket_fully() {
        let mut h = NetworkStatsHistory::new(1000);
        h.record_data(0, 2000, 1000, 0).unwrap();

        // With now inside the second bucket, it contributes its full
        // value even though the query only grazes it.
        let (rx, _) = h.get_values(0, 1100, 1500);
        assert_eq!(rx, 1000);

        // With now past the end, the second bucket is closed and
        // contributes proportionally.
        let (rx, _) = h.get_values(0, 1100, 5000);
        assert_eq!(rx, 550);
    }

    #[test]
    fn remove_buckets_before_prunes_closed_buckets() {
        let mut h = NetworkStatsHistory::new(1000);
        h.record_data(0, 3000, 300, 0).unwrap();

        // 1500 lies inside the second bucket, which survives.
        h.remove_buckets_before(1500);
        assert_eq!(h.bucket_count(), 2);
        assert_eq!(h.bucket(0).0, 1000);

        h.remove_buckets_before(10_000);
        assert_eq!(h.bucket_count(), 0);
        assert_eq!(h.start(), i64::MAX);
        assert_eq!(h.end(), i64::MIN);
    }

    #[test]
    fn entire_history_round_trip() {
        let mut a = NetworkStatsHistory::new(1000);
        a.record_data(0, 2000, 1000, 600).unwrap();

        let mut b = NetworkStatsHistory::new(1000);
        b.record_entire_history(&a).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn persistence_round_trip() {
        let mut h = NetworkStatsHistory::new(3600_000);
        h.record_data(0, 7200_000, 123_456, 654_321).unwrap();

        let bytes = h.to_bytes().unwrap();
        let back = NetworkStatsHistory::from_bytes(&bytes).unwrap();
        assert_eq!(h, back);
    }

    #[test]
    fn unknown_version_rejected() {
        let h = NetworkStatsHistory::new(1000);
        let mut bytes = h.to_bytes().unwrap();
        // Corrupt the leading version tag.
        bytes[0] = 0x7f;
        assert!(NetworkStatsHistory::from_bytes(&bytes).is_err());
    }
}
