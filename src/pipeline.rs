//! Processing pipeline (SPEC_FULL §4.7): per-file driver tying the container
//! record codec, the update message codec, and the filter VM together.
//!
//! Grounded on `parser/mrt/mrt_record.rs`'s read-record-dispatch-by-type loop
//! and `parser/mrt/messages/{table_dump_message,table_dump_v2_message,bgp4mp}.rs`'s
//! wire layouts, ported from "parse everything into one big enum" to "decode
//! just enough to run the filter VM and hand the rest to the caller's sink."

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

use crate::codec::message::{OpenFlags, RebuildFlags, UpdateCodec};
use crate::codec::record::{ContainerRecord, PeerIndexPayload, PeerView, RecordFlags};
use crate::error::{CodecError, CodecErrorKind};
use crate::filter_vm::{Image, Interp, MessageView, TrieBank, VmResult};
use crate::io::IoHandle;
use crate::models::{Asn, EntryType};
use crate::primitives::{read_u16_be, read_u32_be};
use crate::trie::{Family, TrieKey};

/// A 16384-bit set, one bit per peer index, tracking which peers in the
/// current peer-index table were actually referenced by an emitted RIB
/// message (§4.7 step 1/4).
struct PeerRefBitset([u32; 512]);

impl PeerRefBitset {
    fn new() -> Self {
        PeerRefBitset([0u32; 512])
    }

    fn set(&mut self, idx: u16) {
        let idx = idx as usize;
        if idx < 16384 {
            self.0[idx / 32] |= 1 << (idx % 32);
        }
    }

    fn get(&self, idx: u16) -> bool {
        let idx = idx as usize;
        if idx >= 16384 {
            return false;
        }
        self.0[idx / 32] & (1 << (idx % 32)) != 0
    }
}

/// Per-file pipeline state, reset at the start of each file (§4.7 step 1).
struct FileState {
    seen_peer_index: bool,
    peer_index: Option<Rc<PeerIndexPayload>>,
    package_sequence: u32,
    peer_ref: PeerRefBitset,
}

impl FileState {
    fn new() -> Self {
        FileState {
            seen_peer_index: false,
            peer_index: None,
            package_sequence: 0,
            peer_ref: PeerRefBitset::new(),
        }
    }
}

/// What the pipeline hands the caller for each message that survives the
/// filter. Output formatting (the textual dump writer) is an external
/// collaborator, not part of this crate.
pub enum PipelineEvent {
    /// a passed update (RIB entry rebuilt into an UPDATE, or a live BGP4MP/
    /// Zebra-BGP UPDATE), ready for the caller to iterate via `UpdateCodec`.
    Update {
        timestamp: u32,
        peer_asn: Option<Asn>,
        peer_ip: Option<IpAddr>,
        codec: UpdateCodec,
    },
    /// a BGP state transition from a live-format collector stream.
    StateChange {
        timestamp: u32,
        peer_asn: Asn,
        peer_ip: IpAddr,
        old_state: u16,
        new_state: u16,
    },
    /// one entry of the end-of-file peer dump (§4.7 step 4): a peer that was
    /// actually referenced by at least one emitted message.
    PeerDump { peer_index: u16, peer: PeerView },
}

/// Ties an [`Image`] and its [`TrieBank`] to the per-file driving loop.
pub struct Pipeline<'a> {
    image: &'a Image,
    tries: TrieBank<'a>,
}

impl<'a> Pipeline<'a> {
    pub fn new(image: &'a Image, tries: TrieBank<'a>) -> Self {
        Pipeline { image, tries }
    }

    /// Drive one file to completion. `sink` receives every message that
    /// passes the filter, in file order (§5's ordering guarantee).
    pub fn run_file(
        &self,
        handle: &mut dyn IoHandle,
        sink: &mut dyn FnMut(PipelineEvent) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let mut state = FileState::new();

        loop {
            let record = match ContainerRecord::read(handle) {
                Ok(r) => r,
                Err(e) if e.kind == CodecErrorKind::CodecIo => break,
                Err(e) => {
                    log::warn!("skipping corrupt container record: {e}");
                    continue;
                }
            };

            match self.dispatch(record, &mut state, sink) {
                Ok(()) => {}
                Err(e) if e.kind.is_recoverable() => {
                    log::warn!("skipping record: {e}");
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(peer_index) = state.peer_index.clone() {
            self.emit_peer_dump(&peer_index, &state.peer_ref, sink)?;
        }
        Ok(())
    }

    fn dispatch(
        &self,
        mut record: ContainerRecord,
        state: &mut FileState,
        sink: &mut dyn FnMut(PipelineEvent) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let flags = record.flags();
        let header = record.header;

        if flags.contains(RecordFlags::IS_PEER_INDEX) {
            if state.seen_peer_index {
                return Err(CodecError::new(
                    CodecErrorKind::ContainerDuplicatePeerIndex,
                    "duplicate peer-index table in one file",
                ));
            }
            state.seen_peer_index = true;
            state.peer_index = Some(record.into_peer_index()?);
            return Ok(());
        }

        if flags.contains(RecordFlags::WRAPS_BGP) && !flags.contains(RecordFlags::HAS_STATE) {
            if EntryType::try_from(header.entry_type).ok() == Some(EntryType::TABLE_DUMP_V2) {
                if flags.contains(RecordFlags::NEEDS_PEER_INDEX) {
                    let peer_index = state.peer_index.clone().ok_or_else(|| {
                        CodecError::new(
                            CodecErrorKind::ContainerNeedsPeerIndex,
                            "RIB record seen before any peer-index table",
                        )
                    })?;
                    record.attach_peer_index(peer_index);
                }
                return self.dispatch_rib_v2(&record, state, sink);
            }
            if EntryType::try_from(header.entry_type).ok() == Some(EntryType::TABLE_DUMP) {
                return self.dispatch_legacy_table_dump(&record, state, sink);
            }
            // live-format UPDATE (BGP4MP[_ET] or deprecated Zebra-BGP)
            return self.dispatch_live_update(&record, state, sink);
        }

        if flags.contains(RecordFlags::HAS_STATE) {
            return self.dispatch_live_state_change(&record, sink);
        }

        Ok(())
    }

    /// Run the filter VM (or the trivial-pass fast path) against an already
    /// opened update message, in place.
    fn run_filter(&self, codec: &mut UpdateCodec) -> Result<bool, CodecError> {
        if self.image.is_trivial_pass() {
            return Ok(true);
        }
        let view = MessageView::build(codec)?;
        let bank = TrieBank {
            v4_tries: self.tries.v4_tries,
            v6_tries: self.tries.v6_tries,
        };
        let interp = Interp::with_tries(self.image, &view, bank);
        match interp.run() {
            Ok(VmResult::Pass) => Ok(true),
            Ok(VmResult::Fail) => Ok(false),
            Err(e) if e.kind == CodecErrorKind::FilterBadPacket => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn dispatch_rib_v2(
        &self,
        record: &ContainerRecord,
        state: &mut FileState,
        sink: &mut dyn FnMut(PipelineEvent) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let header = record.header;
        let add_path = record.flags().contains(RecordFlags::HAS_ADD_PATH);
        let (prefix, entries) = decode_rib_v2(record.payload(), header.entry_subtype, add_path)?;

        let peer_index = record.peer_index().cloned();
        for entry in entries {
            state.package_sequence += 1;
            let rebuilt = UpdateCodec::rebuild_from_dump(
                &prefix,
                entry.attributes,
                entry.path_id,
                RebuildFlags::empty(),
            );
            let mut codec = match rebuilt {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("skipping RIB entry {}: {e}", entry.peer_index);
                    continue;
                }
            };
            if self.run_filter(&mut codec)? {
                state.peer_ref.set(entry.peer_index);
                let (peer_asn, peer_ip) = peer_index
                    .as_ref()
                    .and_then(|pi| pi.peer_at(entry.peer_index).ok())
                    .map(|p| (Some(p.peer_asn), Some(p.peer_ip)))
                    .unwrap_or((None, None));
                sink(PipelineEvent::Update {
                    timestamp: header.timestamp,
                    peer_asn,
                    peer_ip,
                    codec,
                })?;
            }
        }
        Ok(())
    }

    fn dispatch_legacy_table_dump(
        &self,
        record: &ContainerRecord,
        state: &mut FileState,
        sink: &mut dyn FnMut(PipelineEvent) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let header = record.header;
        let entry = decode_legacy_table_dump(record.payload(), header.entry_subtype)?;
        state.package_sequence += 1;
        let mut codec = UpdateCodec::rebuild_from_dump(
            &entry.prefix,
            entry.attributes,
            None,
            RebuildFlags::LEGACY_MRT,
        )?;
        if self.run_filter(&mut codec)? {
            sink(PipelineEvent::Update {
                timestamp: header.timestamp,
                peer_asn: Some(entry.peer_asn),
                peer_ip: Some(entry.peer_ip),
                codec,
            })?;
        }
        Ok(())
    }

    fn dispatch_live_update(
        &self,
        record: &ContainerRecord,
        _state: &mut FileState,
        sink: &mut dyn FnMut(PipelineEvent) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let header = record.header;
        let as32 = record.flags().contains(RecordFlags::AS32);
        let add_path = record.flags().contains(RecordFlags::HAS_ADD_PATH);
        let sub = decode_live_subheader(record.payload(), as32)?;

        let mut open_flags = OpenFlags::empty();
        if as32 {
            open_flags |= OpenFlags::ASN32;
        }
        if add_path {
            open_flags |= OpenFlags::ADD_PATH;
        }
        let mut codec = UpdateCodec::open_read(sub.rest.to_vec(), open_flags)?;
        if self.run_filter(&mut codec)? {
            sink(PipelineEvent::Update {
                timestamp: header.timestamp,
                peer_asn: Some(sub.peer_asn),
                peer_ip: Some(sub.peer_ip),
                codec,
            })?;
        }
        Ok(())
    }

    fn dispatch_live_state_change(
        &self,
        record: &ContainerRecord,
        sink: &mut dyn FnMut(PipelineEvent) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let header = record.header;
        let as32 = record.flags().contains(RecordFlags::AS32);
        let sub = decode_live_subheader(record.payload(), as32)?;
        if sub.rest.len() < 4 {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadHeader,
                "truncated state-change old/new state fields",
            ));
        }
        let old_state = read_u16_be(&sub.rest[0..2]);
        let new_state = read_u16_be(&sub.rest[2..4]);
        sink(PipelineEvent::StateChange {
            timestamp: header.timestamp,
            peer_asn: sub.peer_asn,
            peer_ip: sub.peer_ip,
            old_state,
            new_state,
        })
    }

    fn emit_peer_dump(
        &self,
        peer_index: &Rc<PeerIndexPayload>,
        peer_ref: &PeerRefBitset,
        sink: &mut dyn FnMut(PipelineEvent) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let count = peer_index.peer_count()?;
        for idx in 0..count {
            if !peer_ref.get(idx) {
                continue;
            }
            let peer = peer_index.peer_at(idx)?;
            sink(PipelineEvent::PeerDump { peer_index: idx, peer })?;
        }
        Ok(())
    }
}

struct RibV2Entry<'a> {
    peer_index: u16,
    path_id: Option<u32>,
    attributes: &'a [u8],
}

/// Decode a table-dump-v2 RIB record (subtypes 2-6, 8-12): a prefix (or
/// AFI/SAFI-tagged NLRI for RIB_GENERIC) followed by an entry count and that
/// many `(peer-index, originated-time, [path-id], attribute-length,
/// attributes)` tuples.
fn decode_rib_v2(
    payload: &[u8],
    subtype: u16,
    add_path: bool,
) -> Result<(TrieKey, Vec<RibV2Entry<'_>>), CodecError> {
    let mut pos = 4usize; // sequence number, unused by the codec
    if payload.len() < pos {
        return Err(CodecError::new(
            CodecErrorKind::ContainerRibNotSupported,
            "RIB record shorter than its sequence-number field",
        ));
    }

    let family = match subtype {
        2 | 3 | 8 | 9 => Family::V4,
        4 | 5 | 10 | 11 => Family::V6,
        6 | 12 => {
            if payload.len() < pos + 3 {
                return Err(CodecError::new(
                    CodecErrorKind::ContainerRibNotSupported,
                    "RIB_GENERIC record shorter than its AFI/SAFI fields",
                ));
            }
            let afi = read_u16_be(&payload[pos..pos + 2]);
            pos += 3; // AFI (2) + SAFI (1)
            match afi {
                1 => Family::V4,
                2 => Family::V6,
                other => {
                    return Err(CodecError::new(
                        CodecErrorKind::ContainerAfiNotSupported,
                        format!("RIB_GENERIC AFI {other} is not supported"),
                    ))
                }
            }
        }
        other => {
            return Err(CodecError::new(
                CodecErrorKind::ContainerRibNotSupported,
                format!("unsupported RIB subtype {other}"),
            ))
        }
    };

    let prefix = read_nlri_prefix(payload, &mut pos, family)?;

    if payload.len() < pos + 2 {
        return Err(CodecError::new(
            CodecErrorKind::ContainerRibNotSupported,
            "RIB record shorter than its entry-count field",
        ));
    }
    let entry_count = read_u16_be(&payload[pos..pos + 2]);
    pos += 2;

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let fixed_len = if add_path { 2 + 4 + 4 + 2 } else { 2 + 4 + 2 };
        if payload.len() < pos + fixed_len {
            return Err(CodecError::new(
                CodecErrorKind::ContainerRibNotSupported,
                "RIB record truncated mid-entry",
            ));
        }
        let peer_index = read_u16_be(&payload[pos..pos + 2]);
        pos += 2 + 4; // peer index, originated time (unused by the codec)
        let path_id = if add_path {
            let id = read_u32_be(&payload[pos..pos + 4]);
            pos += 4;
            Some(id)
        } else {
            None
        };
        let attr_len = read_u16_be(&payload[pos..pos + 2]) as usize;
        pos += 2;
        if payload.len() < pos + attr_len {
            return Err(CodecError::new(
                CodecErrorKind::ContainerRibNotSupported,
                "RIB entry attribute section runs past the record",
            ));
        }
        let attributes = &payload[pos..pos + attr_len];
        pos += attr_len;
        entries.push(RibV2Entry { peer_index, path_id, attributes });
    }

    Ok((prefix, entries))
}

fn read_nlri_prefix(payload: &[u8], pos: &mut usize, family: Family) -> Result<TrieKey, CodecError> {
    if payload.len() <= *pos {
        return Err(CodecError::new(
            CodecErrorKind::ContainerRibNotSupported,
            "RIB record truncated before its prefix bit-length",
        ));
    }
    let bitlen = payload[*pos];
    *pos += 1;
    let nbytes = (bitlen as usize).div_ceil(8);
    if payload.len() < *pos + nbytes {
        return Err(CodecError::new(
            CodecErrorKind::ContainerRibNotSupported,
            "RIB record truncated mid-prefix",
        ));
    }
    let mut key = [0u8; 16];
    key[..nbytes].copy_from_slice(&payload[*pos..*pos + nbytes]);
    *pos += nbytes;
    Ok(TrieKey { family, key, bitlen })
}

struct LegacyTableDumpEntry<'a> {
    prefix: TrieKey,
    peer_ip: IpAddr,
    peer_asn: Asn,
    attributes: &'a [u8],
}

/// Decode a legacy TABLE_DUMP record (one RIB entry per record, subtype
/// 1 = IPv4, 2 = IPv6).
fn decode_legacy_table_dump(payload: &[u8], subtype: u16) -> Result<LegacyTableDumpEntry<'_>, CodecError> {
    let (family, addr_len) = match subtype {
        1 => (Family::V4, 4),
        2 => (Family::V6, 16),
        other => {
            return Err(CodecError::new(
                CodecErrorKind::ContainerAfiNotSupported,
                format!("unsupported TABLE_DUMP subtype {other}"),
            ))
        }
    };

    // view number (2) + sequence number (2), both unused by the codec.
    let mut pos = 4usize;
    let fixed_after_prefix = 1 + 1 + 4 + addr_len + 2 + 2;
    if payload.len() < pos + addr_len + fixed_after_prefix {
        return Err(CodecError::new(
            CodecErrorKind::ContainerRibNotSupported,
            "TABLE_DUMP record shorter than its fixed fields",
        ));
    }

    let prefix_addr = read_fixed_addr(&payload[pos..pos + addr_len], family);
    pos += addr_len;
    let bitlen = payload[pos];
    pos += 1;
    // status byte, unused by the codec.
    pos += 1;
    // originated time, unused by the codec.
    pos += 4;
    let peer_ip = read_fixed_addr(&payload[pos..pos + addr_len], family);
    pos += addr_len;
    let peer_asn = Asn::new_16bit(read_u16_be(&payload[pos..pos + 2]));
    pos += 2;
    let attr_len = read_u16_be(&payload[pos..pos + 2]) as usize;
    pos += 2;
    if payload.len() < pos + attr_len {
        return Err(CodecError::new(
            CodecErrorKind::ContainerRibNotSupported,
            "TABLE_DUMP attribute section runs past the record",
        ));
    }

    Ok(LegacyTableDumpEntry {
        prefix: TrieKey::from_addr(prefix_addr, bitlen),
        peer_ip,
        peer_asn,
        attributes: &payload[pos..pos + attr_len],
    })
}

fn read_fixed_addr(bytes: &[u8], family: Family) -> IpAddr {
    match family {
        Family::V4 => IpAddr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])),
        Family::V6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[..16]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    }
}

struct LiveSubheader<'a> {
    peer_asn: Asn,
    peer_ip: IpAddr,
    rest: &'a [u8],
}

/// Decode the BGP4MP/deprecated-Zebra-BGP sub-header shared by update and
/// state-change live-format records: peer/local ASN, interface index,
/// address family, peer/local IP, then the rest of the payload (the BGP
/// message itself, or the old/new state fields).
fn decode_live_subheader(payload: &[u8], as32: bool) -> Result<LiveSubheader<'_>, CodecError> {
    let asn_len = if as32 { 4 } else { 2 };
    let mut pos = 0usize;
    if payload.len() < pos + asn_len * 2 + 2 + 2 {
        return Err(CodecError::new(
            CodecErrorKind::CodecBadHeader,
            "live-format sub-header shorter than its fixed fields",
        ));
    }
    let peer_asn = read_asn(&payload[pos..pos + asn_len], as32);
    pos += asn_len * 2; // peer asn + local asn (unused by the codec)
    pos += 2; // interface index, unused by the codec
    let afi = read_u16_be(&payload[pos..pos + 2]);
    pos += 2;
    let addr_len = match afi {
        1 => 4,
        2 => 16,
        other => {
            return Err(CodecError::new(
                CodecErrorKind::ContainerAfiNotSupported,
                format!("live-format address family {other} is not supported"),
            ))
        }
    };
    if payload.len() < pos + addr_len * 2 {
        return Err(CodecError::new(
            CodecErrorKind::CodecBadHeader,
            "live-format sub-header truncated mid-address",
        ));
    }
    let family = if addr_len == 4 { Family::V4 } else { Family::V6 };
    let peer_ip = read_fixed_addr(&payload[pos..pos + addr_len], family);
    pos += addr_len * 2; // peer ip + local ip

    Ok(LiveSubheader { peer_asn, peer_ip, rest: &payload[pos..] })
}

fn read_asn(bytes: &[u8], as32: bool) -> Asn {
    if as32 {
        Asn::new_32bit(read_u32_be(bytes))
    } else {
        Asn::new_16bit(read_u16_be(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter_vm::opcode::{make_word, Opcode};

    fn trivial_image() -> Image {
        Image::new(vec![make_word(Opcode::Load, 1)], vec![], vec![])
    }

    fn sample_rib_v2_payload() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&1u32.to_be_bytes()); // sequence number
        buf.push(24); // prefix bitlen
        buf.extend_from_slice(&[10, 0, 0]); // 10.0.0.0/24
        buf.extend_from_slice(&1u16.to_be_bytes()); // entry count

        buf.extend_from_slice(&0u16.to_be_bytes()); // peer index
        buf.extend_from_slice(&0u32.to_be_bytes()); // originated time
        let attrs = sample_attrs();
        buf.extend_from_slice(&(attrs.len() as u16).to_be_bytes());
        buf.extend_from_slice(&attrs);
        buf
    }

    fn sample_attrs() -> Vec<u8> {
        // ORIGIN (type 1), value IGP (0)
        let mut out = Vec::new();
        out.push(0x40); // well-known, transitive
        out.push(1); // type code: ORIGIN
        out.push(1); // length
        out.push(0); // IGP
        // AS_PATH (type 2), one AS_SEQUENCE segment containing ASN 65000
        out.push(0x40);
        out.push(2);
        out.push(6); // seg type (1) + seg len (1) + 4-byte asn
        out.push(2); // AS_SEQUENCE
        out.push(1); // one ASN
        out.extend_from_slice(&65000u32.to_be_bytes());
        out
    }

    #[test]
    fn decode_rib_v2_extracts_prefix_and_entries() {
        let payload = sample_rib_v2_payload();
        let (prefix, entries) = decode_rib_v2(&payload, 2, false).unwrap();
        assert_eq!(prefix.bitlen, 24);
        assert_eq!(prefix.family, Family::V4);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].peer_index, 0);
        assert!(entries[0].path_id.is_none());
    }

    #[test]
    fn peer_ref_bitset_tracks_set_bits() {
        let mut bits = PeerRefBitset::new();
        assert!(!bits.get(42));
        bits.set(42);
        assert!(bits.get(42));
        assert!(!bits.get(43));
    }

    #[test]
    fn pipeline_emits_rebuilt_rib_entry_under_trivial_filter() {
        let image = trivial_image();
        let pipeline = Pipeline::new(&image, TrieBank::default());

        let mut file = Vec::new();
        file.extend_from_slice(&0u32.to_be_bytes()); // timestamp
        file.extend_from_slice(&13u16.to_be_bytes()); // TABLE_DUMP_V2
        file.extend_from_slice(&2u16.to_be_bytes()); // RIB_IPV4_UNICAST
        let payload = sample_rib_v2_payload();
        file.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        file.extend_from_slice(&payload);

        let mut cursor = std::io::Cursor::new(file);
        let mut emitted = 0;
        pipeline
            .run_file(&mut cursor, &mut |ev| {
                if let PipelineEvent::Update { .. } = ev {
                    emitted += 1;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(emitted, 1);
    }
}
