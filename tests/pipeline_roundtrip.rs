//! End-to-end tests driving a synthetic MRT-style file through the public
//! API: container records in, filtered/rebuilt `UpdateCodec`s out.

use bgpcap::filter_vm::opcode::{make_word, Opcode};
use bgpcap::filter_vm::{Image, TrieBank};
use bgpcap::pipeline::{Pipeline, PipelineEvent};
use bgpcap::trie::{key_from_ipv4, Family, PatriciaTrie};
use std::net::{IpAddr, Ipv4Addr};

fn trivial_pass_image() -> Image {
    Image::new(vec![make_word(Opcode::Load, 1)], vec![], vec![])
}

fn always_fail_image() -> Image {
    Image::new(vec![make_word(Opcode::Load, 0)], vec![], vec![])
}

/// ORIGIN (IGP) + AS_PATH(65000), the minimal attribute set `rebuild_from_dump`
/// needs to produce a well-formed UPDATE.
fn sample_attrs() -> Vec<u8> {
    let mut out = Vec::new();
    out.push(0x40);
    out.push(1); // ORIGIN
    out.push(1);
    out.push(0); // IGP
    out.push(0x40);
    out.push(2); // AS_PATH
    out.push(6);
    out.push(2); // AS_SEQUENCE
    out.push(1);
    out.extend_from_slice(&65000u32.to_be_bytes());
    out
}

fn sample_peer_index_table() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&[192, 0, 2, 1]); // collector bgp id
    buf.extend_from_slice(&0u16.to_be_bytes()); // view name length 0
    buf.extend_from_slice(&1u16.to_be_bytes()); // peer count

    buf.push(0); // peer type: ipv4, 16-bit asn
    buf.extend_from_slice(&[10, 0, 0, 1]); // peer bgp id
    buf.extend_from_slice(&[10, 0, 0, 2]); // peer ip
    buf.extend_from_slice(&64500u16.to_be_bytes()); // peer asn
    buf
}

fn sample_rib_v2_entry() -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&1u32.to_be_bytes()); // sequence number
    buf.push(24); // prefix bitlen
    buf.extend_from_slice(&[203, 0, 113]); // 203.0.113.0/24
    buf.extend_from_slice(&1u16.to_be_bytes()); // entry count

    buf.extend_from_slice(&0u16.to_be_bytes()); // peer index
    buf.extend_from_slice(&0u32.to_be_bytes()); // originated time
    let attrs = sample_attrs();
    buf.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
    buf.extend_from_slice(&attrs);
    buf
}

fn container_record(entry_type: u16, subtype: u16, payload: &[u8]) -> Vec<u8> {
    let mut rec = Vec::new();
    rec.extend_from_slice(&0u32.to_be_bytes()); // timestamp
    rec.extend_from_slice(&entry_type.to_be_bytes());
    rec.extend_from_slice(&subtype.to_be_bytes());
    rec.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    rec.extend_from_slice(payload);
    rec
}

fn sample_file() -> Vec<u8> {
    let mut file = Vec::new();
    file.extend_from_slice(&container_record(13, 1, &sample_peer_index_table())); // TABLE_DUMP_V2 / PEER_INDEX_TABLE
    file.extend_from_slice(&container_record(13, 2, &sample_rib_v2_entry())); // TABLE_DUMP_V2 / RIB_IPV4_UNICAST
    file
}

#[test]
fn pipeline_passes_rib_entry_and_dumps_referenced_peer() {
    let image = trivial_pass_image();
    let pipeline = Pipeline::new(&image, TrieBank::default());

    let mut cursor = std::io::Cursor::new(sample_file());
    let mut updates = Vec::new();
    let mut peer_dumps = Vec::new();
    pipeline
        .run_file(&mut cursor, &mut |event| {
            match event {
                PipelineEvent::Update { peer_asn, peer_ip, .. } => updates.push((peer_asn, peer_ip)),
                PipelineEvent::PeerDump { peer_index, peer } => peer_dumps.push((peer_index, peer)),
                PipelineEvent::StateChange { .. } => panic!("no live records in this file"),
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(updates.len(), 1);
    let (peer_asn, peer_ip) = updates[0];
    assert_eq!(peer_asn.map(|a| a.to_u32()), Some(64500));
    assert_eq!(peer_ip, Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))));

    // only the peer actually referenced by an emitted entry gets dumped.
    assert_eq!(peer_dumps.len(), 1);
    assert_eq!(peer_dumps[0].0, 0);
    assert_eq!(peer_dumps[0].1.peer_asn.to_u32(), 64500);
}

#[test]
fn pipeline_emits_nothing_under_an_always_fail_filter() {
    let image = always_fail_image();
    let pipeline = Pipeline::new(&image, TrieBank::default());

    let mut cursor = std::io::Cursor::new(sample_file());
    let mut emitted = 0;
    pipeline
        .run_file(&mut cursor, &mut |event| {
            if let PipelineEvent::Update { .. } = event {
                emitted += 1;
            }
            Ok(())
        })
        .unwrap();

    // the rejected entry's peer is never referenced, so no peer dump either.
    assert_eq!(emitted, 0);
}

#[test]
fn patricia_trie_answers_containment_queries_over_rebuilt_prefixes() {
    let mut trie: PatriciaTrie<u32> = PatriciaTrie::init(Family::V4);
    trie.insert(key_from_ipv4(Ipv4Addr::new(203, 0, 113, 0)), 24, 1);

    assert!(trie.is_supernet_of(key_from_ipv4(Ipv4Addr::new(203, 0, 113, 200)), 32));
    assert!(!trie.is_supernet_of(key_from_ipv4(Ipv4Addr::new(198, 51, 100, 0)), 32));

    let handle = trie
        .search_exact(key_from_ipv4(Ipv4Addr::new(203, 0, 113, 0)), 24)
        .unwrap();
    assert_eq!(*trie.payload(handle), 1);
}
