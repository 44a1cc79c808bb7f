// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Netpolicy Contributors

//! End-to-end exercises of the policy engine, the packet-side owner
//! match, and DSCP classification over the same shared maps.

use netpolicy::api::Direction;
use netpolicy::api::FirewallChain;
use netpolicy::api::FirewallVerdict;
use netpolicy::engine::dscp::DscpCaches;
use netpolicy::engine::dscp::DscpClassifier;
use netpolicy::engine::dscp::DscpPolicy;
use netpolicy::engine::dscp::PacketMeta;
use netpolicy::engine::dscp::PresentFields;
use netpolicy::engine::dscp::PACKET_HOST;
use netpolicy::engine::packet::AddressFamily;
use netpolicy::engine::packet::PROTO_UDP;
use netpolicy::engine::policy::PolicyEngine;
use netpolicy::engine::verdict::owner_match;
use netpolicy::engine::verdict::OwnerVerdict;
use netpolicy::map::NetMaps;
use slog::o;
use slog::Drain;
use slog::Logger;

fn test_logger() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!())
}

fn v4_udp_packet(
    src: [u8; 4],
    dst: [u8; 4],
    sport: u16,
    dport: u16,
) -> Vec<u8> {
    let mut pkt = vec![0u8; 28];
    pkt[0] = 0x45;
    pkt[8] = 64;
    pkt[9] = PROTO_UDP;
    pkt[12..16].copy_from_slice(&src);
    pkt[16..20].copy_from_slice(&dst);
    pkt[20..22].copy_from_slice(&sport.to_be_bytes());
    pkt[22..24].copy_from_slice(&dport.to_be_bytes());
    pkt
}

fn v4_mapped(addr: [u8; 4]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[10] = 0xff;
    out[11] = 0xff;
    out[12..16].copy_from_slice(&addr);
    out
}

#[test]
fn control_plane_changes_reach_the_packet_path() {
    let maps = NetMaps::in_memory();
    let engine = PolicyEngine::new(maps.clone(), test_logger()).unwrap();
    let uid = 10010;

    // Nothing enabled: everything passes.
    let v = owner_match(&maps, uid, Direction::Egress, 2);
    assert_eq!(v, OwnerVerdict::Pass);

    // Enabling dozable with no allow entry drops app traffic but not
    // system traffic.
    engine.set_child_chain(FirewallChain::Dozable, true).unwrap();
    let v = owner_match(&maps, uid, Direction::Egress, 2);
    assert_eq!(v, OwnerVerdict::Drop);
    let v = owner_match(&maps, 1000, Direction::Egress, 2);
    assert_eq!(v, OwnerVerdict::Pass);

    // Allowing the UID restores it.
    engine
        .set_uid_rule(FirewallChain::Dozable, uid, FirewallVerdict::Allow)
        .unwrap();
    let v = owner_match(&maps, uid, Direction::Egress, 2);
    assert_eq!(v, OwnerVerdict::Pass);

    // A declarative replace that leaves the UID out drops it again.
    engine.replace_chain(FirewallChain::Dozable, &[10020]).unwrap();
    let v = owner_match(&maps, uid, Direction::Egress, 2);
    assert_eq!(v, OwnerVerdict::Drop);
    let v = owner_match(&maps, 10020, Direction::Egress, 2);
    assert_eq!(v, OwnerVerdict::Pass);
}

#[test]
fn interface_restrictions_compose_with_chains() {
    let maps = NetMaps::in_memory();
    let engine = PolicyEngine::new(maps.clone(), test_logger()).unwrap();
    let uid = 10010;

    engine.add_uid_interface_rules(7, &[uid]);
    let v = owner_match(&maps, uid, Direction::Ingress, 7);
    assert_eq!(v, OwnerVerdict::Pass);
    let v = owner_match(&maps, uid, Direction::Ingress, 9);
    assert_eq!(v, OwnerVerdict::DropUnlessDns);

    engine.remove_uid_interface_rules(&[uid]);
    let v = owner_match(&maps, uid, Direction::Ingress, 9);
    assert_eq!(v, OwnerVerdict::Pass);

    engine.update_uid_lockdown_rule(uid, true).unwrap();
    let v = owner_match(&maps, uid, Direction::Ingress, 9);
    assert_eq!(v, OwnerVerdict::DropUnlessDns);
    let v = owner_match(&maps, uid, Direction::Egress, 9);
    assert_eq!(v, OwnerVerdict::Pass);
}

#[test]
fn dscp_remarking_tracks_stats_map_swaps() {
    let maps = NetMaps::in_memory();
    let engine = PolicyEngine::new(maps.clone(), test_logger()).unwrap();
    let classifier = DscpClassifier::new(
        maps.configuration.clone(),
        DscpCaches::in_memory(),
        test_logger(),
    );

    classifier
        .set_policy(
            AddressFamily::V4,
            0,
            DscpPolicy {
                src_ip: v4_mapped([10, 0, 0, 1]),
                ifindex: 3,
                dscp_val: 0x2e,
                present_fields: PresentFields::SRC_IP.bits(),
                ..DscpPolicy::EMPTY
            },
        )
        .unwrap();

    let meta = PacketMeta { cookie: 77, ifindex: 3, pkt_type: PACKET_HOST };
    let mut pkt = v4_udp_packet([10, 0, 0, 1], [8, 8, 8, 8], 5000, 53);
    assert_eq!(classifier.process_ip(&mut pkt, &meta), Some(0x2e));
    assert_eq!(pkt[1], 0x2e << 2);

    // The affinity record lives in the generation selected when it was
    // written; swapping the live map logically flushes it.
    classifier.clear_all(AddressFamily::V4);
    let mut pkt = v4_udp_packet([10, 0, 0, 1], [8, 8, 8, 8], 5000, 53);
    assert_eq!(classifier.process_ip(&mut pkt, &meta), Some(0x2e));

    engine.swap_active_stats_map().unwrap();
    let mut pkt = v4_udp_packet([10, 0, 0, 1], [8, 8, 8, 8], 5000, 53);
    assert_eq!(classifier.process_ip(&mut pkt, &meta), None);
}
