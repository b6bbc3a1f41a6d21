//! Container record codec: the MRT-style envelope (timestamp, type, subtype,
//! length, payload) that wraps update messages and RIB dumps.
//!
//! Grounded on `models/mrt/mod.rs` (`CommonHeader`, `EntryType`) and
//! `models/mrt/table_dump_v2.rs` (`PeerIndexTable`/`RibEntry`/`PeerType`) for
//! the wire shapes, generalized into a validate-then-classify step (a static
//! `(type, subtype)` flag table) and a lazily-indexed, reference-counted
//! peer-index payload, both named explicitly in the spec's design notes as
//! additive over the teacher's fully-eager `PeerIndexTable` parse.

use crate::error::{CodecError, CodecErrorKind};
use crate::io::IoHandle;
use crate::models::mrt::table_dump_v2::PeerType;
use crate::models::{Asn, EntryType};
use crate::primitives::{read_u16_be, read_u32_be};
use bitflags::bitflags;
use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::rc::Rc;

const FIXED_HEADER_LEN: usize = 12;
/// payloads at or under this size are stored inline, avoiding a heap
/// allocation for the very common small RIB-entry and state-change records.
const INLINE_CAP: usize = 32;

bitflags! {
    /// Per-`(type, subtype)` classification, looked up once at header-parse
    /// time via [`classify`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u16 {
        /// the combination is recognized and supported.
        const VALID = 0b0000_0001;
        /// payload is (or contains) a BGP message the message codec can open.
        const WRAPS_BGP = 0b0000_0010;
        /// AS numbers in the wrapped BGP message are 4-byte.
        const AS32 = 0b0000_0100;
        /// payload is a BGP state-change notification, not a message.
        const HAS_STATE = 0b0000_1000;
        /// record carries an extended (microsecond) timestamp field.
        const IS_EXTENDED = 0b0001_0000;
        /// record's RIB entries reference a peer-index record.
        const NEEDS_PEER_INDEX = 0b0010_0000;
        /// record itself is a peer-index table.
        const IS_PEER_INDEX = 0b0100_0000;
        /// NLRI in the wrapped message may carry add-path identifiers.
        const HAS_ADD_PATH = 0b1000_0000;
    }
}

/// Classify a `(type, subtype)` pair, the static table the spec calls for.
/// Anything not matched here is outside this codec's supported subset.
fn classify(entry_type: u16, subtype: u16) -> Result<RecordFlags, CodecError> {
    use RecordFlags as F;
    let et = EntryType::try_from(entry_type).map_err(|_| {
        CodecError::new(
            CodecErrorKind::ContainerTypeNotSupported,
            format!("unrecognized MRT entry type {entry_type}"),
        )
    })?;
    match et {
        EntryType::TABLE_DUMP_V2 => match subtype {
            1 => Ok(F::VALID | F::IS_PEER_INDEX),
            2..=5 => Ok(F::VALID | F::WRAPS_BGP | F::AS32 | F::NEEDS_PEER_INDEX),
            6 => Ok(F::VALID | F::WRAPS_BGP | F::AS32 | F::NEEDS_PEER_INDEX),
            7 => Ok(F::VALID | F::IS_PEER_INDEX),
            8..=12 => Ok(F::VALID | F::WRAPS_BGP | F::AS32 | F::NEEDS_PEER_INDEX | F::HAS_ADD_PATH),
            _ => Err(CodecError::new(
                CodecErrorKind::ContainerRibNotSupported,
                format!("unrecognized TABLE_DUMP_V2 subtype {subtype}"),
            )),
        },
        EntryType::TABLE_DUMP => match subtype {
            1 | 2 => Ok(F::VALID | F::WRAPS_BGP),
            _ => Err(CodecError::new(
                CodecErrorKind::ContainerAfiNotSupported,
                format!("unrecognized TABLE_DUMP AFI subtype {subtype}"),
            )),
        },
        EntryType::BGP4MP | EntryType::BGP4MP_ET => {
            let extended = et == EntryType::BGP4MP_ET;
            let base = match subtype {
                0 => F::VALID | F::HAS_STATE,
                1 => F::VALID | F::WRAPS_BGP,
                4 => F::VALID | F::WRAPS_BGP | F::AS32,
                5 => F::VALID | F::HAS_STATE | F::AS32,
                6 => F::VALID | F::WRAPS_BGP,
                7 => F::VALID | F::WRAPS_BGP | F::AS32,
                8 => F::VALID | F::WRAPS_BGP | F::HAS_ADD_PATH,
                9 => F::VALID | F::WRAPS_BGP | F::AS32 | F::HAS_ADD_PATH,
                10 => F::VALID | F::WRAPS_BGP | F::HAS_ADD_PATH,
                11 => F::VALID | F::WRAPS_BGP | F::AS32 | F::HAS_ADD_PATH,
                _ => {
                    return Err(CodecError::new(
                        CodecErrorKind::ContainerTypeNotSupported,
                        format!("unrecognized BGP4MP subtype {subtype}"),
                    ))
                }
            };
            Ok(if extended { base | F::IS_EXTENDED } else { base })
        }
        EntryType::BGP => match subtype {
            1 => Ok(F::VALID | F::WRAPS_BGP),
            3 => Ok(F::VALID | F::HAS_STATE),
            _ => Err(CodecError::new(
                CodecErrorKind::ContainerTypeNotSupported,
                format!("unsupported deprecated Zebra-BGP subtype {subtype}"),
            )),
        },
        _ => Err(CodecError::new(
            CodecErrorKind::ContainerTypeNotSupported,
            format!("entry type {entry_type} is outside the codec's supported subset"),
        )),
    }
}

/// A parsed, validated container-record header.
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub timestamp: u32,
    pub microsecond_timestamp: Option<u32>,
    pub entry_type: u16,
    pub entry_subtype: u16,
    pub length: u32,
    pub flags: RecordFlags,
}

impl RecordHeader {
    /// Read the fixed fields and, if applicable, the extended-timestamp
    /// field, without classifying `(type, subtype)` yet. Classification is
    /// deferred to [`ContainerRecord::read`] so that a bad `(type, subtype)`
    /// combination doesn't leave the stream desynchronized: the record's
    /// `length`-byte payload still needs to be consumed either way.
    fn read(handle: &mut dyn IoHandle) -> Result<(Self, bool), CodecError> {
        let mut fixed = [0u8; FIXED_HEADER_LEN];
        crate::io::read_exact(handle, &mut fixed)?;
        let timestamp = read_u32_be(&fixed[0..4]);
        let entry_type = read_u16_be(&fixed[4..6]);
        let entry_subtype = read_u16_be(&fixed[6..8]);
        let length = read_u32_be(&fixed[8..12]);

        let extended = EntryType::try_from(entry_type).ok() == Some(EntryType::BGP4MP_ET);
        let microsecond_timestamp = if extended {
            let mut micro = [0u8; 4];
            crate::io::read_exact(handle, &mut micro)?;
            Some(read_u32_be(&micro))
        } else {
            None
        };

        Ok((
            RecordHeader {
                timestamp,
                microsecond_timestamp,
                entry_type,
                entry_subtype,
                length,
                flags: RecordFlags::empty(),
            },
            extended,
        ))
    }
}

enum PayloadBuf {
    Inline { buf: [u8; INLINE_CAP], len: u8 },
    Heap(Vec<u8>),
}

impl PayloadBuf {
    fn from_vec(v: Vec<u8>) -> Self {
        if v.len() <= INLINE_CAP {
            let mut buf = [0u8; INLINE_CAP];
            buf[..v.len()].copy_from_slice(&v);
            PayloadBuf::Inline { buf, len: v.len() as u8 }
        } else {
            PayloadBuf::Heap(v)
        }
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            PayloadBuf::Inline { buf, len } => &buf[..*len as usize],
            PayloadBuf::Heap(v) => v,
        }
    }
}

/// One container record: header plus payload, with an optional link to the
/// peer-index record its RIB entries are indexed against.
pub struct ContainerRecord {
    pub header: RecordHeader,
    payload: PayloadBuf,
    peer_index: Option<Rc<PeerIndexPayload>>,
}

impl ContainerRecord {
    /// Read one record's header and payload from `handle`. An unsupported
    /// `(type, subtype)` combination is reported only after the payload has
    /// been consumed, so the stream stays positioned at the next record
    /// regardless of whether this one was recognized.
    pub fn read(handle: &mut dyn IoHandle) -> Result<Self, CodecError> {
        let (mut header, _extended) = RecordHeader::read(handle)?;
        let mut payload = vec![0u8; header.length as usize];
        crate::io::read_exact(handle, &mut payload)?;

        header.flags = classify(header.entry_type, header.entry_subtype)?;

        Ok(ContainerRecord {
            header,
            payload: PayloadBuf::from_vec(payload),
            peer_index: None,
        })
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_slice()
    }

    pub fn flags(&self) -> RecordFlags {
        self.header.flags
    }

    /// Bind the peer-index record a RIB record's entries are indexed
    /// against. The pipeline calls this once, right after reading a RIB
    /// record that has `NEEDS_PEER_INDEX` set.
    pub fn attach_peer_index(&mut self, peer_index: Rc<PeerIndexPayload>) {
        self.peer_index = Some(peer_index);
    }

    pub fn peer_index(&self) -> Option<&Rc<PeerIndexPayload>> {
        self.peer_index.as_ref()
    }

    /// Build a fresh, independently owned peer-index payload from this
    /// record's own bytes. Only valid when `IS_PEER_INDEX` is set.
    pub fn into_peer_index(self) -> Result<Rc<PeerIndexPayload>, CodecError> {
        if !self.header.flags.contains(RecordFlags::IS_PEER_INDEX) {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndexHeader,
                "record is not a peer-index table",
            ));
        }
        Ok(Rc::new(PeerIndexPayload::new(self.payload.as_slice().to_vec())))
    }
}

/// A decoded peer entry, valid as long as the [`PeerIndexPayload`] it came
/// from is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerView {
    pub peer_type: PeerType,
    pub peer_bgp_id: Ipv4Addr,
    pub peer_ip: IpAddr,
    pub peer_asn: Asn,
}

/// A peer-index table's raw bytes, reference-counted across every RIB record
/// that needs it and freed only once the last one drops its handle.
pub struct PeerIndexPayload {
    raw: Vec<u8>,
    /// lazily built on first [`PeerIndexPayload::peer_at`] call: byte offset
    /// of each peer entry's `Peer Type` field, indexed by its 16-bit
    /// peer-index.
    peer_offsets: RefCell<Option<Vec<usize>>>,
}

impl PeerIndexPayload {
    fn new(raw: Vec<u8>) -> Self {
        PeerIndexPayload {
            raw,
            peer_offsets: RefCell::new(None),
        }
    }

    pub fn collector_bgp_id(&self) -> Result<Ipv4Addr, CodecError> {
        if self.raw.len() < 4 {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndexHeader,
                "peer-index table shorter than its fixed collector-id field",
            ));
        }
        Ok(Ipv4Addr::new(self.raw[0], self.raw[1], self.raw[2], self.raw[3]))
    }

    pub fn view_name(&self) -> Result<&str, CodecError> {
        if self.raw.len() < 6 {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndexHeader,
                "peer-index table shorter than its view-name length field",
            ));
        }
        let name_len = read_u16_be(&self.raw[4..6]) as usize;
        let end = 6 + name_len;
        if end > self.raw.len() {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndex,
                "view-name length runs past the peer-index table",
            ));
        }
        std::str::from_utf8(&self.raw[6..end]).map_err(|_| {
            CodecError::new(CodecErrorKind::ContainerBadPeerIndex, "view name is not valid UTF-8")
        })
    }

    fn peer_count_pos(&self) -> Result<usize, CodecError> {
        if self.raw.len() < 6 {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndexHeader,
                "peer-index table shorter than its view-name length field",
            ));
        }
        let name_len = read_u16_be(&self.raw[4..6]) as usize;
        Ok(6 + name_len)
    }

    pub fn peer_count(&self) -> Result<u16, CodecError> {
        let pos = self.peer_count_pos()?;
        if pos + 2 > self.raw.len() {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndex,
                "peer-index table shorter than its peer-count field",
            ));
        }
        Ok(read_u16_be(&self.raw[pos..pos + 2]))
    }

    /// One-shot scan over every peer entry, recording each one's starting
    /// offset. Cached on `self` so a second `peer_at` call is O(1).
    fn ensure_index(&self) -> Result<(), CodecError> {
        if self.peer_offsets.borrow().is_some() {
            return Ok(());
        }
        let count = self.peer_count()?;
        let mut pos = self.peer_count_pos()? + 2;
        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            offsets.push(pos);
            if pos >= self.raw.len() {
                return Err(CodecError::new(
                    CodecErrorKind::ContainerBadPeerIndex,
                    "peer-index table truncated mid-entry",
                ));
            }
            let peer_type = PeerType::from_bits_truncate(self.raw[pos]);
            let ip_len = if peer_type.contains(PeerType::ADDRESS_FAMILY_IPV6) { 16 } else { 4 };
            let as_len = if peer_type.contains(PeerType::AS_SIZE_32BIT) { 4 } else { 2 };
            pos += 1 + 4 + ip_len + as_len;
        }
        *self.peer_offsets.borrow_mut() = Some(offsets);
        Ok(())
    }

    pub fn peer_at(&self, peer_index: u16) -> Result<PeerView, CodecError> {
        self.ensure_index()?;
        let offsets = self.peer_offsets.borrow();
        let offsets = offsets.as_ref().expect("ensure_index always populates this");
        let pos = *offsets.get(peer_index as usize).ok_or_else(|| {
            CodecError::new(
                CodecErrorKind::ContainerBadPeerIndex,
                format!("peer index {peer_index} is out of range"),
            )
        })?;
        if pos >= self.raw.len() {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndex,
                "peer entry offset runs past the peer-index table",
            ));
        }
        let peer_type = PeerType::from_bits_truncate(self.raw[pos]);
        let bgp_id_start = pos + 1;
        let ip_len = if peer_type.contains(PeerType::ADDRESS_FAMILY_IPV6) { 16 } else { 4 };
        let as_len = if peer_type.contains(PeerType::AS_SIZE_32BIT) { 4 } else { 2 };
        let ip_start = bgp_id_start + 4;
        let as_start = ip_start + ip_len;
        let entry_end = as_start + as_len;
        if entry_end > self.raw.len() {
            return Err(CodecError::new(
                CodecErrorKind::ContainerBadPeerIndex,
                "peer entry runs past the peer-index table",
            ));
        }
        let peer_bgp_id = Ipv4Addr::new(
            self.raw[bgp_id_start],
            self.raw[bgp_id_start + 1],
            self.raw[bgp_id_start + 2],
            self.raw[bgp_id_start + 3],
        );
        let peer_ip = if ip_len == 16 {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&self.raw[ip_start..ip_start + 16]);
            IpAddr::V6(Ipv6Addr::from(octets))
        } else {
            IpAddr::V4(Ipv4Addr::new(
                self.raw[ip_start],
                self.raw[ip_start + 1],
                self.raw[ip_start + 2],
                self.raw[ip_start + 3],
            ))
        };
        let peer_asn = if as_len == 4 {
            Asn::new_32bit(read_u32_be(&self.raw[as_start..as_start + 4]))
        } else {
            Asn::new_16bit(read_u16_be(&self.raw[as_start..as_start + 2]))
        };
        Ok(PeerView {
            peer_type,
            peer_bgp_id,
            peer_ip,
            peer_asn,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mrt::table_dump_v2::PeerType;

    fn sample_peer_index_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&[10, 0, 0, 1]); // collector bgp id
        let view = b"test-view";
        buf.extend_from_slice(&(view.len() as u16).to_be_bytes());
        buf.extend_from_slice(view);
        buf.extend_from_slice(&2u16.to_be_bytes()); // peer count

        // peer 0: ipv4, 16-bit asn
        buf.push(PeerType::empty().bits());
        buf.extend_from_slice(&[192, 0, 2, 1]); // bgp id
        buf.extend_from_slice(&[192, 0, 2, 2]); // peer ip
        buf.extend_from_slice(&100u16.to_be_bytes());

        // peer 1: ipv6, 32-bit asn
        buf.push((PeerType::ADDRESS_FAMILY_IPV6 | PeerType::AS_SIZE_32BIT).bits());
        buf.extend_from_slice(&[192, 0, 2, 3]);
        buf.extend_from_slice(&[0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        buf.extend_from_slice(&65550u32.to_be_bytes());

        buf
    }

    #[test]
    fn classify_recognizes_table_dump_v2_pairs() {
        let f = classify(13, 1).unwrap();
        assert!(f.contains(RecordFlags::IS_PEER_INDEX));
        let f = classify(13, 2).unwrap();
        assert!(f.contains(RecordFlags::WRAPS_BGP | RecordFlags::NEEDS_PEER_INDEX));
    }

    #[test]
    fn classify_rejects_unknown_type() {
        let err = classify(9999, 1).unwrap_err();
        assert_eq!(err.kind, CodecErrorKind::ContainerTypeNotSupported);
    }

    #[test]
    fn peer_index_scan_resolves_both_peers() {
        let payload = PeerIndexPayload::new(sample_peer_index_bytes());
        assert_eq!(payload.peer_count().unwrap(), 2);
        assert_eq!(payload.view_name().unwrap(), "test-view");

        let p0 = payload.peer_at(0).unwrap();
        assert_eq!(p0.peer_ip, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)));
        assert_eq!(p0.peer_asn, Asn::new_16bit(100));

        let p1 = payload.peer_at(1).unwrap();
        assert!(p1.peer_type.contains(PeerType::ADDRESS_FAMILY_IPV6));
        assert_eq!(p1.peer_asn, Asn::new_32bit(65550));

        assert!(payload.peer_offsets.borrow().is_some());
    }

    #[test]
    fn payload_buf_inlines_small_records() {
        let rec = PayloadBuf::from_vec(vec![1, 2, 3]);
        matches!(rec, PayloadBuf::Inline { .. });
        assert_eq!(rec.as_slice(), &[1, 2, 3]);

        let big = vec![0u8; INLINE_CAP + 1];
        let rec = PayloadBuf::from_vec(big.clone());
        matches!(rec, PayloadBuf::Heap(_));
        assert_eq!(rec.as_slice(), big.as_slice());
    }
}
