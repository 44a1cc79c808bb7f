// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! Types for calculating the internet checksum.
//!
//! The [`Checksum`] type provides a rolling one's complement checksum,
//! allowing one to incrementally update a sum before finalizing it into
//! a [`HeaderChecksum`], which is the value stored in the actual header
//! bytes. The TOS rewrite path uses the incremental form so it never
//! has to re-sum the whole header.
//!
//! A note on endianness: the checksum field is a pair of bytes, not a
//! logical integer, so no byte-order conversion is ever performed on
//! it. Each pair of bytes summed (and the checksum itself) is treated
//! as a native 16-bit integer via `{to,from}_ne_bytes()`; since the
//! summed bytes are in network order, the stored sum lands in network
//! order too. See RFC 1071 and RFC 1624.

/// The checksum value as it is contained in a network header.
///
/// This holds the bytes as they are stored in the header itself,
/// notably with one's complement already applied.
pub struct HeaderChecksum {
    inner: [u8; 2],
}

impl HeaderChecksum {
    /// Return the bytes of this header checksum.
    pub fn bytes(&self) -> [u8; 2] {
        self.inner
    }

    /// Wrap a pair of header bytes which represent a header checksum,
    /// i.e. the one's complement of a one's complement sum.
    pub fn wrap(hc: [u8; 2]) -> Self {
        Self { inner: hc }
    }
}

impl From<Checksum> for HeaderChecksum {
    /// Finalize the rolling checksum and put it into header form by
    /// performing one's complement.
    fn from(mut csum: Checksum) -> HeaderChecksum {
        // Native-endian on purpose; see the module-level comment.
        Self { inner: (!csum.finalize()).to_ne_bytes() }
    }
}

/// A rolling one's complement checksum calculation.
///
/// Carries are only folded in when the finalized sum is needed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Creates a new checksum counter.
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Update the sum by adding the contents of `bytes`.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by subtracting the contents of `bytes`.
    ///
    /// This is useful for incrementally updating an existing checksum
    /// where only a portion of the bytes are being rewritten.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Finalize the sum by adding up all the accumulated carries and
    /// returning the resulting value as a `u16`.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }
}

impl From<HeaderChecksum> for Checksum {
    // Convert a header's checksum bytes into a rolling checksum.
    fn from(hc: HeaderChecksum) -> Self {
        // Native-endian on purpose; see the module-level comment.
        Self { inner: (!u16::from_ne_bytes(hc.bytes())) as u32 }
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut len = bytes.len();
    let mut pos = 0;

    while len > 1 {
        csum += (u16::from_ne_bytes([bytes[pos], bytes[pos + 1]])) as u32;
        pos += 2;
        len -= 2;
    }

    if len == 1 {
        csum += bytes[pos] as u32;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut len = bytes.len();
    let mut pos = 0;

    while len > 1 {
        let sub = (!u16::from_ne_bytes([bytes[pos], bytes[pos + 1]])) as u32;
        csum += sub;
        pos += 2;
        len -= 2;
    }

    if len == 1 {
        csum += (!bytes[pos]) as u32;
    }

    csum
}
