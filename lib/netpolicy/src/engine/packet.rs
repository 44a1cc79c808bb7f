// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! A bounds-checked view over the headers the classifier cares about.
//!
//! This is deliberately not a general protocol stack: it walks exactly
//! the fields the DSCP path reads and rewrites, with fixed offsets and
//! explicit byte indexing, and refuses anything else (IPv4 options,
//! fragments of unknown shape, protocols without ports).

use super::checksum::Checksum;
use super::checksum::HeaderChecksum;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const ETHERNET_HDR_LEN: usize = 14;
pub const IPV4_HDR_LEN: usize = 20;
pub const IPV6_HDR_LEN: usize = 40;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_UDPLITE: u8 = 136;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AddressFamily {
    V4,
    V6,
}

/// A parsed view over one packet, holding the mutable buffer alongside
/// the fields the classifier matches on.
///
/// Addresses are normalized to 16 bytes; IPv4 addresses are stored
/// v4-mapped (`::ffff:a.b.c.d`) so the match logic is family-blind.
pub struct PacketView<'a> {
    buf: &'a mut [u8],
    l3_off: usize,
    pub family: AddressFamily,
    pub src_ip: [u8; 16],
    pub dst_ip: [u8; 16],
    pub proto: u8,
    /// Source and destination ports, present only for TCP, UDP and
    /// UDP-Lite.
    pub ports: Option<(u16, u16)>,
}

impl<'a> PacketView<'a> {
    /// Parse an Ethernet-framed packet.
    pub fn parse_frame(buf: &'a mut [u8]) -> Option<Self> {
        if buf.len() < ETHERNET_HDR_LEN {
            return None;
        }

        let ethertype = u16::from_be_bytes([buf[12], buf[13]]);
        let family = match ethertype {
            ETHERTYPE_IPV4 => AddressFamily::V4,
            ETHERTYPE_IPV6 => AddressFamily::V6,
            _ => return None,
        };

        Self::parse_at(buf, ETHERNET_HDR_LEN, family)
    }

    /// Parse a bare IP packet, sniffing the family from the version
    /// nibble.
    pub fn parse_ip(buf: &'a mut [u8]) -> Option<Self> {
        let family = match buf.first()? >> 4 {
            4 => AddressFamily::V4,
            6 => AddressFamily::V6,
            _ => return None,
        };

        Self::parse_at(buf, 0, family)
    }

    fn parse_at(
        buf: &'a mut [u8],
        l3_off: usize,
        family: AddressFamily,
    ) -> Option<Self> {
        match family {
            AddressFamily::V4 => Self::parse_v4(buf, l3_off),
            AddressFamily::V6 => Self::parse_v6(buf, l3_off),
        }
    }

    fn parse_v4(buf: &'a mut [u8], l3: usize) -> Option<Self> {
        if buf.len() < l3 + IPV4_HDR_LEN {
            return None;
        }

        if buf[l3] >> 4 != 4 {
            return None;
        }

        // Headers with options shift the L4 offset; refuse them rather
        // than walk an options list.
        if buf[l3] & 0x0f != 5 {
            return None;
        }

        let proto = buf[l3 + 9];
        let mut src_ip = [0u8; 16];
        let mut dst_ip = [0u8; 16];
        src_ip[10] = 0xff;
        src_ip[11] = 0xff;
        dst_ip[10] = 0xff;
        dst_ip[11] = 0xff;
        src_ip[12..16].copy_from_slice(&buf[l3 + 12..l3 + 16]);
        dst_ip[12..16].copy_from_slice(&buf[l3 + 16..l3 + 20]);

        let ports = Self::parse_ports(buf, l3 + IPV4_HDR_LEN, proto)?;

        Some(PacketView {
            buf,
            l3_off: l3,
            family: AddressFamily::V4,
            src_ip,
            dst_ip,
            proto,
            ports,
        })
    }

    fn parse_v6(buf: &'a mut [u8], l3: usize) -> Option<Self> {
        if buf.len() < l3 + IPV6_HDR_LEN {
            return None;
        }

        if buf[l3] >> 4 != 6 {
            return None;
        }

        let proto = buf[l3 + 6];
        let mut src_ip = [0u8; 16];
        let mut dst_ip = [0u8; 16];
        src_ip.copy_from_slice(&buf[l3 + 8..l3 + 24]);
        dst_ip.copy_from_slice(&buf[l3 + 24..l3 + 40]);

        let ports = Self::parse_ports(buf, l3 + IPV6_HDR_LEN, proto)?;

        Some(PacketView {
            buf,
            l3_off: l3,
            family: AddressFamily::V6,
            src_ip,
            dst_ip,
            proto,
            ports,
        })
    }

    // Ports occupy the first four L4 bytes for every protocol we
    // support. `None` propagated from here means an unparseable
    // packet; `Some(None)` a portless protocol.
    #[allow(clippy::type_complexity)]
    fn parse_ports(
        buf: &[u8],
        l4: usize,
        proto: u8,
    ) -> Option<Option<(u16, u16)>> {
        match proto {
            PROTO_TCP | PROTO_UDP | PROTO_UDPLITE => {
                if buf.len() < l4 + 4 {
                    return None;
                }
                let src = u16::from_be_bytes([buf[l4], buf[l4 + 1]]);
                let dst = u16::from_be_bytes([buf[l4 + 2], buf[l4 + 3]]);
                Some(Some((src, dst)))
            }
            _ => Some(None),
        }
    }

    /// The packet's current DSCP value.
    pub fn dscp(&self) -> u8 {
        let l3 = self.l3_off;
        match self.family {
            AddressFamily::V4 => self.buf[l3 + 1] >> 2,
            AddressFamily::V6 => {
                ((self.buf[l3] & 0x0f) << 2) + (self.buf[l3 + 1] >> 6)
            }
        }
    }

    /// Rewrite the packet's DSCP value in place, patching the IPv4
    /// header checksum incrementally.
    pub fn set_dscp(&mut self, dscp: u8) {
        let l3 = self.l3_off;
        match self.family {
            AddressFamily::V4 => {
                let old_tos = self.buf[l3 + 1];
                let new_tos = (dscp << 2) | (old_tos & 3);
                if new_tos == old_tos {
                    return;
                }

                let stored = HeaderChecksum::wrap([
                    self.buf[l3 + 10],
                    self.buf[l3 + 11],
                ]);
                let mut csum = Checksum::from(stored);
                csum.sub_bytes(&[self.buf[l3], old_tos]);
                csum.add_bytes(&[self.buf[l3], new_tos]);

                self.buf[l3 + 1] = new_tos;
                let hc = HeaderChecksum::from(csum);
                self.buf[l3 + 10..l3 + 12].copy_from_slice(&hc.bytes());
            }
            AddressFamily::V6 => {
                self.buf[l3] = (dscp >> 2) + 0x60;
                self.buf[l3 + 1] =
                    ((dscp & 0xf) << 6) + (self.buf[l3 + 1] >> 6);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn v4_udp_packet(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
    ) -> Vec<u8> {
        let mut pkt = vec![0u8; IPV4_HDR_LEN + 8];
        pkt[0] = 0x45;
        pkt[8] = 64;
        pkt[9] = PROTO_UDP;
        pkt[12..16].copy_from_slice(&src);
        pkt[16..20].copy_from_slice(&dst);
        pkt[20..22].copy_from_slice(&sport.to_be_bytes());
        pkt[22..24].copy_from_slice(&dport.to_be_bytes());

        let mut body = [0u8; IPV4_HDR_LEN];
        body.copy_from_slice(&pkt[..IPV4_HDR_LEN]);
        body[10] = 0;
        body[11] = 0;
        let hc = HeaderChecksum::from(Checksum::compute(&body));
        pkt[10..12].copy_from_slice(&hc.bytes());
        pkt
    }

    #[test]
    fn v4_parse_and_map() {
        let mut pkt = v4_udp_packet([10, 0, 0, 1], [10, 0, 0, 2], 5000, 53);
        let view = PacketView::parse_ip(&mut pkt).unwrap();
        assert_eq!(view.family, AddressFamily::V4);
        assert_eq!(view.proto, PROTO_UDP);
        assert_eq!(view.ports, Some((5000, 53)));
        assert_eq!(&view.src_ip[10..12], &[0xff, 0xff]);
        assert_eq!(&view.src_ip[12..16], &[10, 0, 0, 1]);
        assert_eq!(&view.dst_ip[12..16], &[10, 0, 0, 2]);
    }

    #[test]
    fn v4_options_rejected() {
        let mut pkt = v4_udp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 2);
        pkt[0] = 0x46;
        assert!(PacketView::parse_ip(&mut pkt).is_none());
    }

    #[test]
    fn v4_tos_rewrite_checksum() {
        let mut pkt = v4_udp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 2);
        pkt[1] = 0x03; // ECN bits set
        let mut body = [0u8; IPV4_HDR_LEN];
        body.copy_from_slice(&pkt[..IPV4_HDR_LEN]);
        body[10] = 0;
        body[11] = 0;
        let hc = HeaderChecksum::from(Checksum::compute(&body));
        pkt[10..12].copy_from_slice(&hc.bytes());

        let mut view = PacketView::parse_ip(&mut pkt).unwrap();
        view.set_dscp(0x2e);

        // EF (0x2e) shifted up, ECN preserved.
        assert_eq!(pkt[1], 0xbb);
        let mut body = [0u8; IPV4_HDR_LEN];
        body.copy_from_slice(&pkt[..IPV4_HDR_LEN]);
        body[10] = 0;
        body[11] = 0;
        let hc = HeaderChecksum::from(Checksum::compute(&body));
        assert_eq!(&pkt[10..12], &hc.bytes());
    }

    fn v6_tcp_packet(sport: u16, dport: u16) -> Vec<u8> {
        let mut pkt = vec![0u8; IPV6_HDR_LEN + 20];
        pkt[0] = 0x60;
        pkt[6] = PROTO_TCP;
        pkt[7] = 64;
        pkt[8..24].copy_from_slice(&[
            0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1,
        ]);
        pkt[24..40].copy_from_slice(&[
            0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2,
        ]);
        pkt[40..42].copy_from_slice(&sport.to_be_bytes());
        pkt[42..44].copy_from_slice(&dport.to_be_bytes());
        pkt
    }

    #[test]
    fn v6_dscp_round_trip() {
        let mut pkt = v6_tcp_packet(443, 50000);
        let mut view = PacketView::parse_ip(&mut pkt).unwrap();
        assert_eq!(view.dscp(), 0);

        view.set_dscp(0x2e);
        assert_eq!(pkt[0], 0x60 + (0x2e >> 2));

        let view = PacketView::parse_ip(&mut pkt).unwrap();
        assert_eq!(view.dscp(), 0x2e);
    }

    #[test]
    fn ethernet_framing() {
        let inner = v4_udp_packet([10, 0, 0, 1], [10, 0, 0, 2], 7, 8);
        let mut frame = vec![0u8; ETHERNET_HDR_LEN];
        frame[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame.extend_from_slice(&inner);

        let view = PacketView::parse_frame(&mut frame).unwrap();
        assert_eq!(view.ports, Some((7, 8)));

        frame[12] = 0x08;
        frame[13] = 0x06; // ARP
        assert!(PacketView::parse_frame(&mut frame).is_none());
    }

    #[test]
    fn portless_protocol_parses_without_ports() {
        let mut pkt = v4_udp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 2);
        pkt[9] = 1; // ICMP
        let view = PacketView::parse_ip(&mut pkt).unwrap();
        assert_eq!(view.ports, None);
    }
}
