//! BGP-4 UPDATE (and sibling) message codec.
//!
//! A single growable buffer plays both roles: in read mode it holds a
//! complete wire-format message and every accessor below computes offsets
//! into it on demand; in write mode the same buffer is built up
//! incrementally, with length prefixes back-filled as regions close. At most
//! one sub-iterator is open at a time — starting a new one silently closes
//! whatever was open, mirroring the read side's single-cursor discipline.
//!
//! Grounded on `models/bgp/attributes/aspath.rs` (`AsPath`/`AsPathSegment`,
//! including the real `merge_aspath_as4path` implementing RFC 6793 §4.2.3)
//! and `models/bgp/community.rs` (`Community`/`ExtendedCommunity`/
//! `LargeCommunity`) for value types, and `models/network/asn.rs` (`Asn`) for
//! transparent 16/32-bit AS-number widening. The teacher's own wire parser
//! at `parser/bgp/attributes/attr_02_17_as_path.rs` is a `todo!()` stub, so
//! the AS_PATH bytes are parsed fresh here rather than reusing that file.

use crate::error::{CodecError, CodecErrorKind};
use crate::models::{AsPath, AsPathSegment, Asn};
use crate::models::bgp::community::{
    Community, ExtendedCommunity, FourOctetAsExtCommunity, Ipv4AddrExtCommunity, LargeCommunity,
    OpaqueExtCommunity, TwoOctetAsExtCommunity,
};
use crate::primitives::{read_u16_be, read_u32_be};
use crate::trie::{Family, TrieKey};
use bitflags::bitflags;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// 16-byte all-ones BGP marker (RFC 4271 §4.1). Kept all-ones rather than
/// authenticated per that RFC's note that the field predates BGP
/// authentication and is no longer checked for contents besides length.
const MARKER: [u8; 16] = [0xff; 16];
/// marker(16) + total length(2) + type(1), the minimum any BGP message has.
const MIN_MESSAGE_LEN: usize = 19;
/// additional 2 bytes of withdrawn-routes length for an UPDATE header.
const UPDATE_HEADER_LEN: usize = MIN_MESSAGE_LEN + 2;

/// Attribute type codes (RFC 4271 §5, RFC 4760, RFC 6793, RFC 4360, RFC 8092).
pub mod attr_code {
    pub const ORIGIN: u8 = 1;
    pub const AS_PATH: u8 = 2;
    pub const NEXT_HOP: u8 = 3;
    pub const MED: u8 = 4;
    pub const LOCAL_PREF: u8 = 5;
    pub const ATOMIC_AGGREGATE: u8 = 6;
    pub const AGGREGATOR: u8 = 7;
    pub const COMMUNITY: u8 = 8;
    pub const ORIGINATOR_ID: u8 = 9;
    pub const CLUSTER_LIST: u8 = 10;
    pub const MP_REACH_NLRI: u8 = 14;
    pub const MP_UNREACH_NLRI: u8 = 15;
    pub const EXTENDED_COMMUNITY: u8 = 16;
    pub const AS4_PATH: u8 = 17;
    pub const AS4_AGGREGATOR: u8 = 18;
    pub const LARGE_COMMUNITY: u8 = 32;
}

/// BGP message types (RFC 4271 §4, with the extensions this codec supports).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BgpMessageType {
    Open = 1,
    Update = 2,
    Notification = 3,
    Keepalive = 4,
    RouteRefresh = 5,
    Close = 255,
}

impl TryFrom<u8> for BgpMessageType {
    type Error = CodecError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(BgpMessageType::Open),
            2 => Ok(BgpMessageType::Update),
            3 => Ok(BgpMessageType::Notification),
            4 => Ok(BgpMessageType::Keepalive),
            5 => Ok(BgpMessageType::RouteRefresh),
            255 => Ok(BgpMessageType::Close),
            other => Err(CodecError::new(
                CodecErrorKind::CodecBadType,
                format!("unrecognized BGP message type {other}"),
            )),
        }
    }
}

bitflags! {
    /// Flags passed to [`UpdateCodec::open_read`]/[`UpdateCodec::open_write`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        /// peers exchanged RFC 7911 add-path-qualified NLRI.
        const ADD_PATH = 0b0000_0001;
        /// AS_PATH/AGGREGATOR carry 4-byte ASNs (RFC 6793).
        const ASN32 = 0b0000_0010;
        /// caller promises the input buffer outlives the codec and is never
        /// mutated elsewhere; accepted for bitmask-compatibility with the
        /// source format's open-parameters vocabulary. Rust ownership makes
        /// the copy/no-copy distinction moot here: `open_read` always takes
        /// ownership of the `Vec<u8>` it's handed, so this flag has no
        /// observable effect on this port.
        const NO_COPY = 0b0000_0100;
        /// same rationale as `NO_COPY`: accepted, not observable.
        const SHARED_BUFFER = 0b0000_1000;
        /// keep the notable-attribute offset cache across `finish()`/`close()`
        /// instead of zeroing it; set internally by `rebuild_from_dump`.
        const PRESERVE_OFFSETS = 0b0001_0000;
    }
}

bitflags! {
    /// Flags controlling [`UpdateCodec::rebuild_from_dump`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RebuildFlags: u8 {
        /// force the "already std MP_REACH wire form" interpretation instead
        /// of guessing.
        const STD_MRT = 0b0000_0001;
        /// force the "full MP_REACH including NLRI" interpretation.
        const FULL_MP_REACH = 0b0000_0010;
        /// drop MP_UNREACH_NLRI instead of copying it through.
        const STRIP_UNREACH = 0b0000_0100;
        /// rebuild a pre-RFC6793, 2-byte-ASN, non-add-path message.
        const LEGACY_MRT = 0b0000_1000;
    }
}

/// The 16 attributes the codec caches offsets for, so that a second lookup
/// of the same attribute after `next_attribute`/`locate_attr` is O(1) instead
/// of re-scanning the attribute section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum NotableAttr {
    Origin = 0,
    AsPath = 1,
    NextHop = 2,
    Med = 3,
    LocalPref = 4,
    AtomicAggregate = 5,
    Aggregator = 6,
    Community = 7,
    OriginatorId = 8,
    ClusterList = 9,
    MpReach = 10,
    MpUnreach = 11,
    ExtendedCommunity = 12,
    As4Path = 13,
    As4Aggregator = 14,
    LargeCommunity = 15,
}

const NOTABLE_COUNT: usize = 16;

impl NotableAttr {
    fn index(self) -> usize {
        self as usize
    }

    fn from_code(code: u8) -> Option<Self> {
        use attr_code::*;
        Some(match code {
            ORIGIN => NotableAttr::Origin,
            AS_PATH => NotableAttr::AsPath,
            NEXT_HOP => NotableAttr::NextHop,
            MED => NotableAttr::Med,
            LOCAL_PREF => NotableAttr::LocalPref,
            ATOMIC_AGGREGATE => NotableAttr::AtomicAggregate,
            AGGREGATOR => NotableAttr::Aggregator,
            COMMUNITY => NotableAttr::Community,
            ORIGINATOR_ID => NotableAttr::OriginatorId,
            CLUSTER_LIST => NotableAttr::ClusterList,
            MP_REACH_NLRI => NotableAttr::MpReach,
            MP_UNREACH_NLRI => NotableAttr::MpUnreach,
            EXTENDED_COMMUNITY => NotableAttr::ExtendedCommunity,
            AS4_PATH => NotableAttr::As4Path,
            AS4_AGGREGATOR => NotableAttr::As4Aggregator,
            LARGE_COMMUNITY => NotableAttr::LargeCommunity,
            _ => return None,
        })
    }
}

/// Where a notable attribute's value currently lives, relative to the
/// codec's own buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrOffset {
    /// not looked up yet.
    Unknown,
    /// looked up once and confirmed absent.
    Missing,
    /// value starts at this byte offset into the codec's buffer.
    At(u16),
}

/// A prefix paired with its RFC 7911 add-path identifier, when add-path is
/// in effect. Callers that don't care about add-path can destructure just
/// `.prefix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddPathPrefix {
    pub prefix: TrieKey,
    pub path_id: Option<u32>,
}

/// One decoded AS-path hop: which kind of segment it came from, that
/// segment's index within the path, and the (transparently widened) ASN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsPathSegKind {
    Sequence,
    Set,
    ConfedSequence,
    ConfedSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsPathEntry {
    pub kind: AsPathSegKind,
    pub segment_index: usize,
    pub asn: u32,
}

/// A single decoded community value, tagged by which of the three wire
/// encodings it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityValue {
    Regular(Community),
    Extended(ExtendedCommunity),
    Large(LargeCommunity),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunityKind {
    Regular,
    Extended,
    Large,
}

/// A decoded attribute header plus the byte range of its value; fetch the
/// bytes with [`UpdateCodec::attr_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrView {
    pub flags: u8,
    pub type_code: u8,
    value_start: usize,
    value_end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
struct PrefixCursor {
    pos: usize,
    local_end: usize,
    mp: Option<MpCursor>,
    stage: Stage,
}

#[derive(Debug, Clone, Copy)]
struct MpCursor {
    pos: usize,
    end: usize,
    family: Family,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Local,
    Mp,
}

/// Whatever sub-iterator is presently open, if any. Starting a new one
/// replaces whatever was here; only one is ever live.
enum OpenIterator {
    None,
    Prefix(PrefixCursor),
    Attributes(usize, usize),
    AsPath(Vec<AsPathEntry>, usize),
    NextHop(Vec<IpAddr>, usize),
    Community(Vec<CommunityValue>, usize),
    WithdrawnWrite,
    AttributesWrite,
}

/// Byte ranges of an UPDATE message's three variable-length regions,
/// recomputed from the header on each call rather than cached — cheap, and
/// avoids an invalidation story for the write side.
struct Regions {
    withdrawn_start: usize,
    withdrawn_end: usize,
    attr_start: usize,
    attr_end: usize,
    nlri_start: usize,
    nlri_end: usize,
}

fn write_u16_be_at(buf: &mut [u8], pos: usize, v: u16) {
    buf[pos..pos + 2].copy_from_slice(&v.to_be_bytes());
}

fn write_u16_be(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u32_be(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_prefix(buf: &mut Vec<u8>, key: &TrieKey) {
    buf.push(key.bitlen);
    let nbytes = (key.bitlen as usize).div_ceil(8);
    buf.extend_from_slice(&key.key[..nbytes]);
}

fn afi_low_for(family: Family) -> u8 {
    match family {
        Family::V4 => 1,
        Family::V6 => 2,
    }
}

fn max_bits_for(family: Family) -> u8 {
    match family {
        Family::V4 => 32,
        Family::V6 => 128,
    }
}

/// A single BGP-4 message (almost always an UPDATE) over an in-memory
/// buffer, in either read or write mode.
pub struct UpdateCodec {
    buf: Vec<u8>,
    flags: OpenFlags,
    mode: Mode,
    msg_type: BgpMessageType,
    error: Option<CodecError>,
    open_iter: OpenIterator,
    notable: [AttrOffset; NOTABLE_COUNT],
}

impl UpdateCodec {
    /// Wrap an already-complete wire-format message for reading.
    pub fn open_read(buf: Vec<u8>, flags: OpenFlags) -> Result<Self, CodecError> {
        if buf.len() < MIN_MESSAGE_LEN {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadHeader,
                format!("message shorter than the {MIN_MESSAGE_LEN}-byte minimum"),
            ));
        }
        if buf[..16] != MARKER {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadHeader,
                "marker is not all-ones",
            ));
        }
        let total_len = read_u16_be(&buf[16..18]) as usize;
        if total_len != buf.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadHeader,
                format!("header length {total_len} does not match buffer length {}", buf.len()),
            ));
        }
        let msg_type = BgpMessageType::try_from(buf[18])?;
        if msg_type == BgpMessageType::Update && buf.len() < UPDATE_HEADER_LEN {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadHeader,
                "UPDATE message shorter than its own fixed header",
            ));
        }
        Ok(UpdateCodec {
            buf,
            flags,
            mode: Mode::Read,
            msg_type,
            error: None,
            open_iter: OpenIterator::None,
            notable: [AttrOffset::Unknown; NOTABLE_COUNT],
        })
    }

    /// Read exactly one message's worth of bytes from `handle`, then behave
    /// as [`open_read`](Self::open_read).
    pub fn open_read_from(
        handle: &mut dyn crate::io::IoHandle,
        flags: OpenFlags,
    ) -> Result<Self, CodecError> {
        let mut header = [0u8; MIN_MESSAGE_LEN];
        crate::io::read_exact(handle, &mut header)?;
        if header[..16] != MARKER {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadHeader,
                "marker is not all-ones",
            ));
        }
        let total_len = read_u16_be(&header[16..18]) as usize;
        if total_len < MIN_MESSAGE_LEN {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadHeader,
                format!("header length {total_len} below the {MIN_MESSAGE_LEN}-byte minimum"),
            ));
        }
        let mut buf = Vec::with_capacity(total_len);
        buf.extend_from_slice(&header);
        let mut rest = vec![0u8; total_len - MIN_MESSAGE_LEN];
        crate::io::read_exact(handle, &mut rest)?;
        buf.extend_from_slice(&rest);
        Self::open_read(buf, flags)
    }

    /// Start building a fresh message of `msg_type` from scratch.
    pub fn open_write(msg_type: BgpMessageType, flags: OpenFlags) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&MARKER);
        buf.extend_from_slice(&[0, 0]); // total length, back-filled by finish()
        buf.push(msg_type as u8);
        if msg_type == BgpMessageType::Update {
            buf.extend_from_slice(&[0, 0]); // withdrawn-routes length
            buf.extend_from_slice(&[0, 0]); // attributes length
        }
        UpdateCodec {
            buf,
            flags,
            mode: Mode::Write,
            msg_type,
            error: None,
            open_iter: OpenIterator::None,
            notable: [AttrOffset::Unknown; NOTABLE_COUNT],
        }
    }

    pub fn msg_type(&self) -> BgpMessageType {
        self.msg_type
    }

    pub fn length(&self) -> usize {
        self.buf.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Clear whatever sub-iterator is open and, unless
    /// [`OpenFlags::PRESERVE_OFFSETS`] is set, the notable-attribute cache
    /// and latched error.
    pub fn close(&mut self) {
        self.open_iter = OpenIterator::None;
        if !self.flags.contains(OpenFlags::PRESERVE_OFFSETS) {
            self.notable = [AttrOffset::Unknown; NOTABLE_COUNT];
        }
        self.error = None;
    }

    fn require_read(&self) -> Result<(), CodecError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if self.mode != Mode::Read {
            return Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "operation requires read mode",
            ));
        }
        Ok(())
    }

    fn require_write(&self) -> Result<(), CodecError> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        if self.mode != Mode::Write {
            return Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "operation requires write mode",
            ));
        }
        Ok(())
    }

    fn latch<T>(&mut self, r: Result<T, CodecError>) -> Result<T, CodecError> {
        if let Err(e) = &r {
            if self.error.is_none() {
                self.error = Some(e.clone());
            }
        }
        r
    }

    fn regions(&self) -> Result<Regions, CodecError> {
        if self.msg_type != BgpMessageType::Update {
            return Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "withdrawn/attribute/NLRI regions only exist on UPDATE messages",
            ));
        }
        let withdrawn_len = read_u16_be(&self.buf[19..21]) as usize;
        let withdrawn_start = 21;
        let withdrawn_end = withdrawn_start + withdrawn_len;
        if withdrawn_end + 2 > self.buf.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadWithdrawn,
                "withdrawn-routes length runs past the message",
            ));
        }
        let attr_len_pos = withdrawn_end;
        let attr_len = read_u16_be(&self.buf[attr_len_pos..attr_len_pos + 2]) as usize;
        let attr_start = attr_len_pos + 2;
        let attr_end = attr_start + attr_len;
        if attr_end > self.buf.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "attribute section length runs past the message",
            ));
        }
        Ok(Regions {
            withdrawn_start,
            withdrawn_end,
            attr_start,
            attr_end,
            nlri_start: attr_end,
            nlri_end: self.buf.len(),
        })
    }

    // ---- attribute lookup (shared by several iterators) ----

    fn locate_attr(&self, code: u8) -> Result<Option<(usize, usize)>, CodecError> {
        let r = self.regions()?;
        let mut pos = r.attr_start;
        while pos < r.attr_end {
            let (type_code, value_start, value_end) = self.read_attr_header(pos, r.attr_end)?;
            if type_code == code {
                return Ok(Some((value_start, value_end)));
            }
            pos = value_end;
        }
        Ok(None)
    }

    fn read_attr_header(&self, pos: usize, end: usize) -> Result<(u8, usize, usize), CodecError> {
        if pos + 2 > end {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "truncated attribute header",
            ));
        }
        let flags = self.buf[pos];
        let type_code = self.buf[pos + 1];
        let extended = flags & 0x10 != 0;
        let (len, hdr_len) = if extended {
            if pos + 4 > end {
                return Err(CodecError::new(
                    CodecErrorKind::CodecBadAttr,
                    "truncated extended attribute length",
                ));
            }
            (read_u16_be(&self.buf[pos + 2..pos + 4]) as usize, 4)
        } else {
            if pos + 3 > end {
                return Err(CodecError::new(
                    CodecErrorKind::CodecBadAttr,
                    "truncated attribute length",
                ));
            }
            (self.buf[pos + 2] as usize, 3)
        };
        let value_start = pos + hdr_len;
        let value_end = value_start + len;
        if value_end > end {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "attribute value overruns the attribute section",
            )
            .with_bytes(&self.buf[pos..end]));
        }
        Ok((type_code, value_start, value_end))
    }

    fn locate_mp_unreach(&self) -> Result<Option<MpCursor>, CodecError> {
        let Some((val_start, val_end)) = self.locate_attr(attr_code::MP_UNREACH_NLRI)? else {
            return Ok(None);
        };
        if val_end - val_start < 3 {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadWithdrawn,
                "MP_UNREACH_NLRI shorter than its fixed AFI/SAFI header",
            ));
        }
        let afi = read_u16_be(&self.buf[val_start..val_start + 2]);
        let family = match afi {
            1 => Family::V4,
            2 => Family::V6,
            other => {
                return Err(CodecError::new(
                    CodecErrorKind::CodecBadWithdrawn,
                    format!("unsupported AFI {other} in MP_UNREACH_NLRI"),
                ))
            }
        };
        Ok(Some(MpCursor {
            pos: val_start + 3,
            end: val_end,
            family,
        }))
    }

    fn locate_mp_reach(&self) -> Result<Option<MpCursor>, CodecError> {
        let Some((val_start, val_end)) = self.locate_attr(attr_code::MP_REACH_NLRI)? else {
            return Ok(None);
        };
        if val_end - val_start < 4 {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadNlri,
                "MP_REACH_NLRI shorter than its fixed AFI/SAFI/next-hop-length header",
            ));
        }
        let afi = read_u16_be(&self.buf[val_start..val_start + 2]);
        let family = match afi {
            1 => Family::V4,
            2 => Family::V6,
            other => {
                return Err(CodecError::new(
                    CodecErrorKind::CodecBadNlri,
                    format!("unsupported AFI {other} in MP_REACH_NLRI"),
                ))
            }
        };
        let nh_len = self.buf[val_start + 3] as usize;
        let nh_end = val_start + 4 + nh_len;
        if nh_end + 1 > val_end {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadNlri,
                "MP_REACH_NLRI next-hop/reserved field runs past the attribute",
            ));
        }
        Ok(Some(MpCursor {
            pos: nh_end + 1,
            end: val_end,
            family,
        }))
    }

    // ---- withdrawn / NLRI iteration ----

    pub fn start_withdrawn(&mut self) -> Result<(), CodecError> {
        let r = self.require_read().and_then(|_| self.regions());
        match r {
            Ok(r) => {
                self.open_iter = OpenIterator::Prefix(PrefixCursor {
                    pos: r.withdrawn_start,
                    local_end: r.withdrawn_end,
                    mp: None,
                    stage: Stage::Local,
                });
                Ok(())
            }
            Err(e) => self.latch(Err(e)),
        }
    }

    pub fn start_all_withdrawn(&mut self) -> Result<(), CodecError> {
        self.require_read()?;
        let r = self.regions();
        let mp = self.locate_mp_unreach();
        let result = r.and_then(|r| mp.map(|mp| (r, mp)));
        let result = self.latch(result);
        let (r, mp) = result?;
        self.open_iter = OpenIterator::Prefix(PrefixCursor {
            pos: r.withdrawn_start,
            local_end: r.withdrawn_end,
            mp,
            stage: Stage::Local,
        });
        Ok(())
    }

    pub fn start_mp_unreach(&mut self) -> Result<(), CodecError> {
        self.require_read()?;
        let mp = self.latch(self.locate_mp_unreach())?;
        match mp {
            Some(m) => {
                self.open_iter = OpenIterator::Prefix(PrefixCursor {
                    pos: m.pos,
                    local_end: m.pos,
                    mp: Some(m),
                    stage: Stage::Mp,
                });
            }
            None => {
                self.open_iter = OpenIterator::Prefix(PrefixCursor {
                    pos: 0,
                    local_end: 0,
                    mp: None,
                    stage: Stage::Local,
                });
            }
        }
        Ok(())
    }

    pub fn start_nlri(&mut self) -> Result<(), CodecError> {
        self.require_read()?;
        let r = self.latch(self.regions())?;
        self.open_iter = OpenIterator::Prefix(PrefixCursor {
            pos: r.nlri_start,
            local_end: r.nlri_end,
            mp: None,
            stage: Stage::Local,
        });
        Ok(())
    }

    pub fn start_all_nlri(&mut self) -> Result<(), CodecError> {
        self.require_read()?;
        let r = self.regions();
        let mp = self.locate_mp_reach();
        let result = r.and_then(|r| mp.map(|mp| (r, mp)));
        let (r, mp) = self.latch(result)?;
        self.open_iter = OpenIterator::Prefix(PrefixCursor {
            pos: r.nlri_start,
            local_end: r.nlri_end,
            mp,
            stage: Stage::Local,
        });
        Ok(())
    }

    pub fn start_mp_reach(&mut self) -> Result<(), CodecError> {
        self.require_read()?;
        let mp = self.latch(self.locate_mp_reach())?;
        match mp {
            Some(m) => {
                self.open_iter = OpenIterator::Prefix(PrefixCursor {
                    pos: m.pos,
                    local_end: m.pos,
                    mp: Some(m),
                    stage: Stage::Mp,
                });
            }
            None => {
                self.open_iter = OpenIterator::Prefix(PrefixCursor {
                    pos: 0,
                    local_end: 0,
                    mp: None,
                    stage: Stage::Local,
                });
            }
        }
        Ok(())
    }

    pub fn next_withdrawn(&mut self) -> Result<Option<AddPathPrefix>, CodecError> {
        self.next_prefix()
    }

    pub fn next_nlri(&mut self) -> Result<Option<AddPathPrefix>, CodecError> {
        self.next_prefix()
    }

    fn next_prefix(&mut self) -> Result<Option<AddPathPrefix>, CodecError> {
        self.require_read()?;
        let mut cursor = match &self.open_iter {
            OpenIterator::Prefix(c) => *c,
            _ => {
                return self.latch(Err(CodecError::new(
                    CodecErrorKind::CodecInvOp,
                    "no prefix iterator open",
                )))
            }
        };
        let add_path = self.flags.contains(OpenFlags::ADD_PATH);
        loop {
            let (end, family) = match cursor.stage {
                Stage::Local => (cursor.local_end, Family::V4),
                Stage::Mp => {
                    let mp = cursor.mp.expect("mp stage always carries an mp cursor");
                    (mp.end, mp.family)
                }
            };
            if cursor.pos < end {
                let result = self.decode_one_prefix(&mut cursor, end, family, add_path);
                self.open_iter = OpenIterator::Prefix(cursor);
                return self.latch(result);
            }
            match (cursor.stage, cursor.mp) {
                (Stage::Local, Some(mp)) => {
                    cursor.stage = Stage::Mp;
                    cursor.pos = mp.pos;
                }
                _ => {
                    self.open_iter = OpenIterator::Prefix(cursor);
                    return Ok(None);
                }
            }
        }
    }

    fn decode_one_prefix(
        &self,
        cursor: &mut PrefixCursor,
        end: usize,
        family: Family,
        add_path: bool,
    ) -> Result<Option<AddPathPrefix>, CodecError> {
        let path_id = if add_path {
            if cursor.pos + 4 > end {
                return Err(CodecError::new(
                    CodecErrorKind::CodecBadWithdrawn,
                    "truncated add-path identifier",
                ));
            }
            let id = read_u32_be(&self.buf[cursor.pos..cursor.pos + 4]);
            cursor.pos += 4;
            Some(id)
        } else {
            None
        };
        if cursor.pos >= end {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadWithdrawn,
                "truncated prefix bit-length",
            ));
        }
        let bitlen = self.buf[cursor.pos];
        cursor.pos += 1;
        if bitlen > max_bits_for(family) {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadWithdrawn,
                format!("bit-length {bitlen} exceeds the address family's width"),
            ));
        }
        let nbytes = (bitlen as usize).div_ceil(8);
        if cursor.pos + nbytes > end {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadWithdrawn,
                "truncated prefix bytes",
            ));
        }
        let mut key = [0u8; 16];
        key[..nbytes].copy_from_slice(&self.buf[cursor.pos..cursor.pos + nbytes]);
        cursor.pos += nbytes;
        Ok(Some(AddPathPrefix {
            prefix: TrieKey { family, key, bitlen },
            path_id,
        }))
    }

    // ---- attributes ----

    pub fn start_attributes(&mut self) -> Result<(), CodecError> {
        self.require_read()?;
        let r = self.latch(self.regions())?;
        self.open_iter = OpenIterator::Attributes(r.attr_start, r.attr_end);
        Ok(())
    }

    pub fn next_attribute(&mut self) -> Result<Option<AttrView>, CodecError> {
        self.require_read()?;
        let (pos, end) = match &self.open_iter {
            OpenIterator::Attributes(pos, end) => (*pos, *end),
            _ => {
                return self.latch(Err(CodecError::new(
                    CodecErrorKind::CodecInvOp,
                    "no attribute iterator open",
                )))
            }
        };
        if pos >= end {
            return Ok(None);
        }
        let header = self.read_attr_header(pos, end);
        let (type_code, value_start, value_end) = self.latch(header)?;
        if let Some(notable) = NotableAttr::from_code(type_code) {
            self.notable[notable.index()] = AttrOffset::At(value_start as u16);
        }
        self.open_iter = OpenIterator::Attributes(value_end, end);
        Ok(Some(AttrView {
            flags: self.buf[pos],
            type_code,
            value_start,
            value_end,
        }))
    }

    pub fn attr_value<'a>(&'a self, view: &AttrView) -> &'a [u8] {
        &self.buf[view.value_start..view.value_end]
    }

    fn resolve_notable(&mut self, which: NotableAttr, code: u8) -> Result<Option<u16>, CodecError> {
        match self.notable[which.index()] {
            AttrOffset::At(o) => Ok(Some(o)),
            AttrOffset::Missing => Ok(None),
            AttrOffset::Unknown => {
                let found = self.latch(self.locate_attr(code))?;
                match found {
                    Some((s, _)) => {
                        self.notable[which.index()] = AttrOffset::At(s as u16);
                        Ok(Some(s as u16))
                    }
                    None => {
                        self.notable[which.index()] = AttrOffset::Missing;
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Offset of a notable attribute's value, without touching its bytes.
    pub fn notable_offset(&self, which: NotableAttr) -> AttrOffset {
        self.notable[which.index()]
    }

    pub fn get_bgp_origin(&mut self) -> Result<Option<u8>, CodecError> {
        self.require_read()?;
        let off = self.resolve_notable(NotableAttr::Origin, attr_code::ORIGIN)?;
        Ok(off.map(|o| self.buf[o as usize]))
    }

    pub fn get_bgp_med(&mut self) -> Result<Option<u32>, CodecError> {
        self.require_read()?;
        let off = self.resolve_notable(NotableAttr::Med, attr_code::MED)?;
        Ok(off.map(|o| read_u32_be(&self.buf[o as usize..o as usize + 4])))
    }

    pub fn get_bgp_local_pref(&mut self) -> Result<Option<u32>, CodecError> {
        self.require_read()?;
        let off = self.resolve_notable(NotableAttr::LocalPref, attr_code::LOCAL_PREF)?;
        Ok(off.map(|o| read_u32_be(&self.buf[o as usize..o as usize + 4])))
    }

    pub fn get_bgp_next_hop(&mut self) -> Result<Option<Ipv4Addr>, CodecError> {
        self.require_read()?;
        let off = self.resolve_notable(NotableAttr::NextHop, attr_code::NEXT_HOP)?;
        Ok(off.map(|o| {
            let o = o as usize;
            Ipv4Addr::new(self.buf[o], self.buf[o + 1], self.buf[o + 2], self.buf[o + 3])
        }))
    }

    // ---- AS-path ----

    pub fn start_as_path(&mut self) -> Result<(), CodecError> {
        self.start_as_path_kind(AsPathSource::Plain)
    }

    pub fn start_as4_path(&mut self) -> Result<(), CodecError> {
        self.start_as_path_kind(AsPathSource::As4)
    }

    /// The "real" AS path per RFC 6793 §4.2.3: AS_PATH merged with AS4_PATH
    /// when the update was sent by an old-BGP speaker carrying AS_TRANS in
    /// AGGREGATOR (or carrying no AGGREGATOR at all) alongside AS4_PATH.
    pub fn start_real_as_path(&mut self) -> Result<(), CodecError> {
        self.start_as_path_kind(AsPathSource::Real)
    }

    fn start_as_path_kind(&mut self, source: AsPathSource) -> Result<(), CodecError> {
        self.require_read()?;
        let path = self.latch(self.build_as_path(source));
        let path = path?;
        self.open_iter = OpenIterator::AsPath(flatten_as_path(&path), 0);
        Ok(())
    }

    fn build_as_path(&self, source: AsPathSource) -> Result<AsPath, CodecError> {
        let four_byte = self.flags.contains(OpenFlags::ASN32);
        match source {
            AsPathSource::Plain => self.parse_attr_as_path(attr_code::AS_PATH, four_byte),
            AsPathSource::As4 => self.parse_attr_as_path(attr_code::AS4_PATH, true),
            AsPathSource::Real => {
                let as_path = self.parse_attr_as_path(attr_code::AS_PATH, four_byte)?;
                let as4_path = match self.locate_attr(attr_code::AS4_PATH)? {
                    Some((s, e)) => Some(parse_as_path_bytes(&self.buf[s..e], true)?),
                    None => None,
                };
                let aggregator_is_trans = self.aggregator_uses_as_trans()?;
                match as4_path {
                    Some(as4) if aggregator_is_trans || self.locate_attr(attr_code::AGGREGATOR)?.is_none() => {
                        Ok(AsPath::merge_aspath_as4path(&as_path, &as4).unwrap_or(as_path))
                    }
                    _ => Ok(as_path),
                }
            }
        }
    }

    fn parse_attr_as_path(&self, code: u8, four_byte: bool) -> Result<AsPath, CodecError> {
        match self.locate_attr(code)? {
            Some((s, e)) => parse_as_path_bytes(&self.buf[s..e], four_byte),
            None => Ok(AsPath { segments: vec![] }),
        }
    }

    fn aggregator_uses_as_trans(&self) -> Result<bool, CodecError> {
        match self.locate_attr(attr_code::AGGREGATOR)? {
            None => Ok(false),
            Some((s, e)) => {
                let four_byte = self.flags.contains(OpenFlags::ASN32);
                let asn = if four_byte {
                    if e - s < 4 {
                        return Err(CodecError::new(CodecErrorKind::CodecBadAttr, "AGGREGATOR too short"));
                    }
                    read_u32_be(&self.buf[s..s + 4])
                } else {
                    if e - s < 2 {
                        return Err(CodecError::new(CodecErrorKind::CodecBadAttr, "AGGREGATOR too short"));
                    }
                    read_u16_be(&self.buf[s..s + 2]) as u32
                };
                Ok(asn == Asn::TRANSITION.to_u32())
            }
        }
    }

    pub fn next_as_path(&mut self) -> Result<Option<AsPathEntry>, CodecError> {
        self.require_read()?;
        match &mut self.open_iter {
            OpenIterator::AsPath(entries, idx) => {
                if *idx >= entries.len() {
                    return Ok(None);
                }
                let e = entries[*idx];
                *idx += 1;
                Ok(Some(e))
            }
            _ => self.latch(Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "no as-path iterator open",
            ))),
        }
    }

    // ---- next-hop ----

    pub fn start_next_hop(&mut self) -> Result<(), CodecError> {
        self.require_read()?;
        let hops = self.latch(self.collect_next_hops());
        let hops = hops?;
        self.open_iter = OpenIterator::NextHop(hops, 0);
        Ok(())
    }

    fn collect_next_hops(&self) -> Result<Vec<IpAddr>, CodecError> {
        let mut hops = Vec::new();
        if let Some((s, e)) = self.locate_attr(attr_code::NEXT_HOP)? {
            if e - s != 4 {
                return Err(CodecError::new(CodecErrorKind::CodecBadAttr, "NEXT_HOP must be 4 bytes"));
            }
            hops.push(IpAddr::V4(Ipv4Addr::new(
                self.buf[s],
                self.buf[s + 1],
                self.buf[s + 2],
                self.buf[s + 3],
            )));
        }
        if let Some((s, e)) = self.locate_attr(attr_code::MP_REACH_NLRI)? {
            if e - s >= 4 {
                let family = match read_u16_be(&self.buf[s..s + 2]) {
                    1 => Family::V4,
                    2 => Family::V6,
                    _ => return Ok(hops),
                };
                let nh_len = self.buf[s + 3] as usize;
                let nh_start = s + 4;
                let nh_end = nh_start + nh_len;
                if nh_end > e {
                    return Err(CodecError::new(
                        CodecErrorKind::CodecBadNlri,
                        "MP_REACH_NLRI next-hop length runs past the attribute",
                    ));
                }
                match family {
                    Family::V4 if nh_len >= 4 => {
                        hops.push(IpAddr::V4(Ipv4Addr::new(
                            self.buf[nh_start],
                            self.buf[nh_start + 1],
                            self.buf[nh_start + 2],
                            self.buf[nh_start + 3],
                        )));
                    }
                    Family::V6 if nh_len >= 16 => {
                        let mut octets = [0u8; 16];
                        octets.copy_from_slice(&self.buf[nh_start..nh_start + 16]);
                        hops.push(IpAddr::V6(Ipv6Addr::from(octets)));
                        if nh_len >= 32 {
                            let mut link_local = [0u8; 16];
                            link_local.copy_from_slice(&self.buf[nh_start + 16..nh_start + 32]);
                            hops.push(IpAddr::V6(Ipv6Addr::from(link_local)));
                        }
                    }
                    _ => {
                        return Err(CodecError::new(
                            CodecErrorKind::CodecBadNlri,
                            "next-hop length inconsistent with the attribute's AFI",
                        ))
                    }
                }
            }
        }
        Ok(hops)
    }

    pub fn next_next_hop(&mut self) -> Result<Option<IpAddr>, CodecError> {
        self.require_read()?;
        match &mut self.open_iter {
            OpenIterator::NextHop(v, idx) => {
                if *idx >= v.len() {
                    return Ok(None);
                }
                let r = v[*idx];
                *idx += 1;
                Ok(Some(r))
            }
            _ => self.latch(Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "no next-hop iterator open",
            ))),
        }
    }

    // ---- communities ----

    pub fn start_communities(&mut self, kind: CommunityKind) -> Result<(), CodecError> {
        self.require_read()?;
        let values = self.latch(self.collect_communities(kind));
        let values = values?;
        self.open_iter = OpenIterator::Community(values, 0);
        Ok(())
    }

    fn collect_communities(&self, kind: CommunityKind) -> Result<Vec<CommunityValue>, CodecError> {
        let (code, width): (u8, usize) = match kind {
            CommunityKind::Regular => (attr_code::COMMUNITY, 4),
            CommunityKind::Extended => (attr_code::EXTENDED_COMMUNITY, 8),
            CommunityKind::Large => (attr_code::LARGE_COMMUNITY, 12),
        };
        let Some((s, e)) = self.locate_attr(code)? else {
            return Ok(vec![]);
        };
        if (e - s) % width != 0 {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                format!("community attribute length is not a multiple of {width}"),
            ));
        }
        let mut out = Vec::with_capacity((e - s) / width);
        let mut pos = s;
        while pos < e {
            let chunk = &self.buf[pos..pos + width];
            out.push(match kind {
                CommunityKind::Regular => CommunityValue::Regular(parse_regular_community(chunk)),
                CommunityKind::Extended => CommunityValue::Extended(parse_extended_community(chunk)),
                CommunityKind::Large => CommunityValue::Large(parse_large_community(chunk)),
            });
            pos += width;
        }
        Ok(out)
    }

    pub fn next_community(&mut self) -> Result<Option<CommunityValue>, CodecError> {
        self.require_read()?;
        match &mut self.open_iter {
            OpenIterator::Community(v, idx) => {
                if *idx >= v.len() {
                    return Ok(None);
                }
                let r = v[*idx];
                *idx += 1;
                Ok(Some(r))
            }
            _ => self.latch(Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "no community iterator open",
            ))),
        }
    }

    // ---- writing ----

    fn withdrawn_len_pos(&self) -> usize {
        19
    }

    fn attr_len_pos(&self) -> usize {
        21 + read_u16_be(&self.buf[19..21]) as usize
    }

    /// Grow the length-prefixed region starting at `len_pos` by splicing
    /// `bytes` in just past its current content, then back-filling the new
    /// length. `Vec::splice` shifts everything after the insertion point —
    /// including any regions written after this one — which is exactly the
    /// tail-preserved-in-place behavior a region reopen needs.
    fn insert_into_region(&mut self, len_pos: usize, bytes: &[u8]) -> Result<(), CodecError> {
        let cur_len = read_u16_be(&self.buf[len_pos..len_pos + 2]) as usize;
        let new_len = cur_len + bytes.len();
        if new_len > u16::MAX as usize {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadParams,
                "region would exceed the 65535-byte wire limit",
            ));
        }
        let insert_at = len_pos + 2 + cur_len;
        self.buf.splice(insert_at..insert_at, bytes.iter().copied());
        write_u16_be_at(&mut self.buf, len_pos, new_len as u16);
        Ok(())
    }

    pub fn start_withdrawn_write(&mut self) -> Result<(), CodecError> {
        self.require_write()?;
        self.open_iter = OpenIterator::WithdrawnWrite;
        Ok(())
    }

    pub fn write_withdrawn_prefix(&mut self, key: &TrieKey, path_id: Option<u32>) -> Result<(), CodecError> {
        self.require_write()?;
        if !matches!(self.open_iter, OpenIterator::WithdrawnWrite) {
            return self.latch(Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "no withdrawn-routes writer open",
            )));
        }
        if self.flags.contains(OpenFlags::ADD_PATH) && path_id.is_none() {
            return self.latch(Err(CodecError::new(
                CodecErrorKind::CodecBadParams,
                "add-path is enabled but no path-id was supplied",
            )));
        }
        let mut item = Vec::with_capacity(9);
        if let Some(id) = path_id {
            if self.flags.contains(OpenFlags::ADD_PATH) {
                write_u32_be(&mut item, id);
            }
        }
        write_prefix(&mut item, key);
        let pos = self.withdrawn_len_pos();
        let r = self.insert_into_region(pos, &item);
        self.latch(r)
    }

    pub fn close_withdrawn_write(&mut self) -> Result<(), CodecError> {
        self.require_write()?;
        self.open_iter = OpenIterator::None;
        Ok(())
    }

    pub fn start_attributes_write(&mut self) -> Result<(), CodecError> {
        self.require_write()?;
        self.open_iter = OpenIterator::AttributesWrite;
        Ok(())
    }

    /// Append one fully-formed attribute (flags/type/value); the
    /// extended-length bit is set automatically when `value` needs it, and
    /// the notable-attribute cache is updated for the types it tracks.
    /// Returns the offset of the attribute's value within the buffer.
    pub fn write_attribute(&mut self, flags: u8, type_code: u8, value: &[u8]) -> Result<usize, CodecError> {
        self.require_write()?;
        if !matches!(self.open_iter, OpenIterator::AttributesWrite) {
            return self.latch(Err(CodecError::new(
                CodecErrorKind::CodecInvOp,
                "no attribute writer open",
            )));
        }
        let r = self.write_attribute_inner(flags, type_code, value);
        self.latch(r)
    }

    fn write_attribute_inner(&mut self, flags: u8, type_code: u8, value: &[u8]) -> Result<usize, CodecError> {
        let mut flags = flags & !0x10;
        if value.len() > 255 {
            flags |= 0x10;
        }
        if value.len() > u16::MAX as usize {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadParams,
                "attribute value exceeds the 65535-byte wire limit",
            ));
        }
        let extended = flags & 0x10 != 0;
        let mut item = Vec::with_capacity(value.len() + 4);
        item.push(flags);
        item.push(type_code);
        if extended {
            write_u16_be(&mut item, value.len() as u16);
        } else {
            item.push(value.len() as u8);
        }
        let hdr_len = item.len();
        item.extend_from_slice(value);

        let region_pos = self.attr_len_pos();
        let cur_attr_len = read_u16_be(&self.buf[region_pos..region_pos + 2]) as usize;
        let insert_at = region_pos + 2 + cur_attr_len;
        self.insert_into_region(region_pos, &item)?;
        let value_offset = insert_at + hdr_len;
        if let Some(notable) = NotableAttr::from_code(type_code) {
            self.notable[notable.index()] = AttrOffset::At(value_offset as u16);
        }
        Ok(value_offset)
    }

    fn write_raw_attribute(&mut self, flags: u8, type_code: u8, value: &[u8]) -> Result<usize, CodecError> {
        self.write_attribute_inner(flags, type_code, value)
    }

    pub fn close_attributes_write(&mut self) -> Result<(), CodecError> {
        self.require_write()?;
        self.open_iter = OpenIterator::None;
        Ok(())
    }

    /// Append one NLRI prefix past the end of the attribute section (no
    /// length prefix of its own — NLRI runs to the end of the message).
    pub fn write_nlri_prefix(&mut self, key: &TrieKey, path_id: Option<u32>) -> Result<(), CodecError> {
        self.require_write()?;
        if self.flags.contains(OpenFlags::ADD_PATH) {
            let Some(id) = path_id else {
                return self.latch(Err(CodecError::new(
                    CodecErrorKind::CodecBadParams,
                    "add-path is enabled but no path-id was supplied",
                )));
            };
            write_u32_be(&mut self.buf, id);
        }
        write_prefix(&mut self.buf, key);
        Ok(())
    }

    /// Back-fill the total-length field and drop into read mode. The
    /// withdrawn-routes and attribute length prefixes are already correct —
    /// they're maintained incrementally by every write above.
    pub fn finish(&mut self) -> Result<(), CodecError> {
        self.require_write()?;
        let total_len = self.buf.len();
        if total_len > u16::MAX as usize {
            return self.latch(Err(CodecError::new(
                CodecErrorKind::CodecBadParams,
                "message exceeds the 65535-byte wire limit",
            )));
        }
        write_u16_be_at(&mut self.buf, 16, total_len as u16);
        self.mode = Mode::Read;
        self.open_iter = OpenIterator::None;
        if !self.flags.contains(OpenFlags::PRESERVE_OFFSETS) {
            self.notable = [AttrOffset::Unknown; NOTABLE_COUNT];
        }
        Ok(())
    }

    /// Rebuild a live UPDATE message for `nlri` from a flat list of
    /// MRT-dump attribute bytes (as stored alongside a TABLE_DUMP_V2 RIB
    /// entry), per the 4-step procedure this codec follows:
    ///
    /// 1. withdrawn-routes is forced empty.
    /// 2. each source attribute is copied through, except MP_REACH_NLRI
    ///    (reconstructed against `nlri`, truncated-vs-full per `flags`),
    ///    MP_UNREACH_NLRI (copied unless `STRIP_UNREACH`), and AS_PATH
    ///    (downgraded from 4- to 2-byte ASNs unless `ASN32`/`LEGACY_MRT`).
    /// 3. `nlri` is appended directly for a v4 prefix; a v6 prefix must
    ///    already have produced an MP_REACH_NLRI in step 2, or this fails.
    /// 4. [`finish`](Self::finish) is called with the offset table preserved.
    pub fn rebuild_from_dump(
        nlri: &TrieKey,
        attribute_bytes: &[u8],
        path_id: Option<u32>,
        flags: RebuildFlags,
    ) -> Result<Self, CodecError> {
        let legacy = flags.contains(RebuildFlags::LEGACY_MRT);
        let full_mp_reach_forced = flags.contains(RebuildFlags::FULL_MP_REACH) || legacy;
        let std_mrt = flags.contains(RebuildFlags::STD_MRT) && !full_mp_reach_forced;
        let strip_unreach = flags.contains(RebuildFlags::STRIP_UNREACH);
        let asn32 = !legacy;
        let add_path = !legacy && path_id.is_some();

        let mut open_flags = OpenFlags::PRESERVE_OFFSETS;
        if asn32 {
            open_flags |= OpenFlags::ASN32;
        }
        if add_path {
            open_flags |= OpenFlags::ADD_PATH;
        }

        let mut codec = Self::open_write(BgpMessageType::Update, open_flags);
        codec.start_withdrawn_write()?;
        codec.close_withdrawn_write()?;
        codec.start_attributes_write()?;

        let mut pos = 0usize;
        let mut seen_mp_reach = false;
        while pos < attribute_bytes.len() {
            let (type_code, value_start, value_end) =
                read_dump_attr_header(attribute_bytes, pos)?;
            let src_flags = attribute_bytes[pos];
            let value = &attribute_bytes[value_start..value_end];

            match type_code {
                attr_code::MP_REACH_NLRI => {
                    seen_mp_reach = true;
                    let new_val = rebuild_mp_reach(
                        value,
                        nlri,
                        path_id,
                        add_path,
                        std_mrt,
                        full_mp_reach_forced,
                    )?;
                    codec.write_raw_attribute(src_flags, type_code, &new_val)?;
                }
                attr_code::MP_UNREACH_NLRI => {
                    if strip_unreach {
                        codec.notable[NotableAttr::MpUnreach.index()] = AttrOffset::Missing;
                    } else {
                        codec.write_raw_attribute(src_flags, type_code, value)?;
                    }
                }
                attr_code::AS_PATH if !asn32 => {
                    let downgraded = downgrade_as_path_to_16bit(value)?;
                    codec.write_raw_attribute(src_flags, type_code, &downgraded)?;
                }
                _ => {
                    codec.write_raw_attribute(src_flags, type_code, value)?;
                }
            }
            pos = value_end;
        }

        codec.close_attributes_write()?;

        if nlri.family == Family::V4 {
            codec.write_nlri_prefix(nlri, path_id)?;
        } else if !seen_mp_reach {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "IPv6 NLRI requires an MP_REACH_NLRI among the source attributes",
            ));
        }

        codec.finish()?;
        Ok(codec)
    }
}

enum AsPathSource {
    Plain,
    As4,
    Real,
}

fn flatten_as_path(path: &AsPath) -> Vec<AsPathEntry> {
    let mut out = Vec::new();
    for (idx, seg) in path.segments.iter().enumerate() {
        let (kind, asns): (AsPathSegKind, &[Asn]) = match seg {
            AsPathSegment::AsSequence(v) => (AsPathSegKind::Sequence, v.as_slice()),
            AsPathSegment::AsSet(v) => (AsPathSegKind::Set, v.as_slice()),
            AsPathSegment::ConfedSequence(v) => (AsPathSegKind::ConfedSequence, v.as_slice()),
            AsPathSegment::ConfedSet(v) => (AsPathSegKind::ConfedSet, v.as_slice()),
        };
        for asn in asns {
            out.push(AsPathEntry {
                kind,
                segment_index: idx,
                asn: asn.to_u32(),
            });
        }
    }
    out
}

fn parse_as_path_bytes(value: &[u8], four_byte: bool) -> Result<AsPath, CodecError> {
    let width = if four_byte { 4 } else { 2 };
    let mut segments = Vec::new();
    let mut pos = 0;
    while pos < value.len() {
        if pos + 2 > value.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "truncated AS_PATH segment header",
            )
            .with_bytes(value));
        }
        let seg_type = value[pos];
        let count = value[pos + 1] as usize;
        let seg_len = count * width;
        if pos + 2 + seg_len > value.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "truncated AS_PATH segment",
            )
            .with_bytes(value));
        }
        let mut asns = Vec::with_capacity(count);
        for i in 0..count {
            let off = pos + 2 + i * width;
            let asn = if four_byte {
                Asn::new_32bit(read_u32_be(&value[off..off + 4]))
            } else {
                Asn::new_16bit(read_u16_be(&value[off..off + 2]))
            };
            asns.push(asn);
        }
        segments.push(match seg_type {
            1 => AsPathSegment::AsSet(asns),
            2 => AsPathSegment::AsSequence(asns),
            3 => AsPathSegment::ConfedSequence(asns),
            4 => AsPathSegment::ConfedSet(asns),
            other => {
                return Err(CodecError::new(
                    CodecErrorKind::CodecBadAttr,
                    format!("unknown AS_PATH segment type {other}"),
                )
                .with_bytes(value))
            }
        });
        pos += 2 + seg_len;
    }
    Ok(AsPath { segments })
}

fn downgrade_as_path_to_16bit(value: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut new_val = Vec::with_capacity(value.len());
    let mut pos = 0;
    while pos < value.len() {
        if pos + 2 > value.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "truncated AS_PATH segment header during downgrade",
            ));
        }
        let seg_type = value[pos];
        let count = value[pos + 1] as usize;
        let seg_len = count * 4;
        if pos + 2 + seg_len > value.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "truncated AS_PATH segment during downgrade",
            ));
        }
        new_val.push(seg_type);
        new_val.push(count as u8);
        for i in 0..count {
            let off = pos + 2 + i * 4;
            let as32 = read_u32_be(&value[off..off + 4]);
            if as32 > u16::MAX as u32 {
                return Err(CodecError::new(
                    CodecErrorKind::CodecBadAttr,
                    format!("AS_PATH entry {as32} does not fit in 16 bits"),
                )
                .with_bytes(value));
            }
            write_u16_be(&mut new_val, as32 as u16);
        }
        pos += 2 + seg_len;
    }
    Ok(new_val)
}

fn read_dump_attr_header(bytes: &[u8], pos: usize) -> Result<(u8, usize, usize), CodecError> {
    if pos + 2 > bytes.len() {
        return Err(CodecError::new(
            CodecErrorKind::CodecBadAttr,
            "truncated source attribute header",
        ));
    }
    let flags = bytes[pos];
    let type_code = bytes[pos + 1];
    let extended = flags & 0x10 != 0;
    let (len, hdr_len) = if extended {
        if pos + 4 > bytes.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "truncated source extended attribute length",
            ));
        }
        (read_u16_be(&bytes[pos + 2..pos + 4]) as usize, 4)
    } else {
        if pos + 3 > bytes.len() {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "truncated source attribute length",
            ));
        }
        (bytes[pos + 2] as usize, 3)
    };
    let value_start = pos + hdr_len;
    let value_end = value_start + len;
    if value_end > bytes.len() {
        return Err(CodecError::new(
            CodecErrorKind::CodecBadAttr,
            "source attribute value overruns the source buffer",
        )
        .with_bytes(&bytes[pos..bytes.len()]));
    }
    Ok((type_code, value_start, value_end))
}

/// Reconstruct an MP_REACH_NLRI value for `nlri` from a source attribute
/// that may be the truncated form MRT dumps normally carry (AFI/SAFI/
/// next-hop only) or, rarely, a full wire-format one (AFI/SAFI/next-hop/
/// reserved/NLRI). `std_mrt` and `full_mp_reach_forced` short-circuit the
/// decision; otherwise it's guessed from the source's own leading bytes —
/// see S7 in the design notes for the heuristic's exact numbers.
fn rebuild_mp_reach(
    value: &[u8],
    nlri: &TrieKey,
    path_id: Option<u32>,
    add_path: bool,
    std_mrt: bool,
    full_mp_reach_forced: bool,
) -> Result<Vec<u8>, CodecError> {
    if value.len() < 4 {
        return Err(CodecError::new(
            CodecErrorKind::CodecBadAttr,
            "source MP_REACH_NLRI shorter than its fixed header",
        ));
    }
    let afi = read_u16_be(&value[0..2]);
    let safi = value[2];
    let nh_len = value[3] as usize;
    if 4 + nh_len > value.len() {
        return Err(CodecError::new(
            CodecErrorKind::CodecBadAttr,
            "source MP_REACH_NLRI next-hop length runs past the attribute",
        ));
    }
    let nh_bytes = &value[4..4 + nh_len];

    let truncated = if full_mp_reach_forced {
        false
    } else if std_mrt {
        true
    } else {
        let expected_afi_lo = afi_low_for(nlri.family);
        value.first() == Some(&0) && value.get(1) == Some(&expected_afi_lo) && safi == 1
    };

    let reserved_byte = if truncated {
        0u8
    } else {
        if value.len() < 4 + nh_len + 1 {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadAttr,
                "full-form source MP_REACH_NLRI missing its reserved byte",
            ));
        }
        value[4 + nh_len]
    };

    let mut new_val = Vec::with_capacity(value.len() + 8);
    write_u16_be(&mut new_val, afi);
    new_val.push(safi);
    new_val.push(nh_len as u8);
    new_val.extend_from_slice(nh_bytes);
    new_val.push(reserved_byte);
    if add_path {
        let Some(id) = path_id else {
            return Err(CodecError::new(
                CodecErrorKind::CodecBadParams,
                "add-path is enabled but no path-id was supplied",
            ));
        };
        write_u32_be(&mut new_val, id);
    }
    new_val.push(nlri.bitlen);
    let nbytes = (nlri.bitlen as usize).div_ceil(8);
    new_val.extend_from_slice(&nlri.key[..nbytes]);
    Ok(new_val)
}

fn parse_regular_community(b: &[u8]) -> Community {
    let v = read_u32_be(b);
    match v {
        0xFFFFFF01 => Community::NoExport,
        0xFFFFFF02 => Community::NoAdvertise,
        0xFFFFFF03 => Community::NoExportSubConfed,
        _ => Community::Custom(Asn::new_16bit((v >> 16) as u16), (v & 0xFFFF) as u16),
    }
}

fn parse_extended_community(b: &[u8]) -> ExtendedCommunity {
    let subtype = b[1];
    match b[0] {
        0x00 => ExtendedCommunity::TransitiveTwoOctetAs(TwoOctetAsExtCommunity {
            subtype,
            global_admin: Asn::new_16bit(read_u16_be(&b[2..4])),
            local_admin: [b[4], b[5], b[6], b[7]],
        }),
        0x40 => ExtendedCommunity::NonTransitiveTwoOctetAs(TwoOctetAsExtCommunity {
            subtype,
            global_admin: Asn::new_16bit(read_u16_be(&b[2..4])),
            local_admin: [b[4], b[5], b[6], b[7]],
        }),
        0x01 => ExtendedCommunity::TransitiveIpv4Addr(Ipv4AddrExtCommunity {
            subtype,
            global_admin: Ipv4Addr::new(b[2], b[3], b[4], b[5]),
            local_admin: [b[6], b[7]],
        }),
        0x41 => ExtendedCommunity::NonTransitiveIpv4Addr(Ipv4AddrExtCommunity {
            subtype,
            global_admin: Ipv4Addr::new(b[2], b[3], b[4], b[5]),
            local_admin: [b[6], b[7]],
        }),
        0x02 => ExtendedCommunity::TransitiveFourOctetAs(FourOctetAsExtCommunity {
            subtype,
            global_admin: Asn::new_32bit(read_u32_be(&b[2..6])),
            local_admin: [b[6], b[7]],
        }),
        0x42 => ExtendedCommunity::NonTransitiveFourOctetAs(FourOctetAsExtCommunity {
            subtype,
            global_admin: Asn::new_32bit(read_u32_be(&b[2..6])),
            local_admin: [b[6], b[7]],
        }),
        0x03 => ExtendedCommunity::TransitiveOpaque(OpaqueExtCommunity {
            subtype,
            value: [b[2], b[3], b[4], b[5], b[6], b[7]],
        }),
        0x43 => ExtendedCommunity::NonTransitiveOpaque(OpaqueExtCommunity {
            subtype,
            value: [b[2], b[3], b[4], b[5], b[6], b[7]],
        }),
        _ => ExtendedCommunity::Raw([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
    }
}

fn parse_large_community(b: &[u8]) -> LargeCommunity {
    LargeCommunity::new(read_u32_be(&b[0..4]), [read_u32_be(&b[4..8]), read_u32_be(&b[8..12])])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_v4_update() -> Vec<u8> {
        let mut codec = UpdateCodec::open_write(BgpMessageType::Update, OpenFlags::empty());
        codec.start_withdrawn_write().unwrap();
        codec.close_withdrawn_write().unwrap();
        codec.start_attributes_write().unwrap();
        codec.write_attribute(0x40, attr_code::ORIGIN, &[0]).unwrap();
        let mut as_path_val = Vec::new();
        as_path_val.push(2u8); // AS_SEQUENCE
        as_path_val.push(2u8); // two ASNs
        as_path_val.extend_from_slice(&100u16.to_be_bytes());
        as_path_val.extend_from_slice(&200u16.to_be_bytes());
        codec.write_attribute(0x40, attr_code::AS_PATH, &as_path_val).unwrap();
        codec.write_attribute(0x40, attr_code::NEXT_HOP, &[10, 0, 0, 1]).unwrap();
        codec.close_attributes_write().unwrap();
        let nlri = TrieKey::from_ipnet("8.2.0.0/16".parse().unwrap());
        codec.write_nlri_prefix(&nlri, None).unwrap();
        codec.finish().unwrap();
        codec.data().to_vec()
    }

    #[test]
    fn s4_write_then_read_round_trip() {
        let bytes = sample_v4_update();
        let mut codec = UpdateCodec::open_read(bytes, OpenFlags::empty()).unwrap();
        assert_eq!(codec.msg_type(), BgpMessageType::Update);

        codec.start_as_path().unwrap();
        let mut hops = vec![];
        while let Some(e) = codec.next_as_path().unwrap() {
            hops.push(e.asn);
        }
        assert_eq!(hops, vec![100, 200]);

        assert_eq!(codec.get_bgp_origin().unwrap(), Some(0));
        assert_eq!(codec.get_bgp_next_hop().unwrap(), Some(Ipv4Addr::new(10, 0, 0, 1)));

        codec.start_nlri().unwrap();
        let p = codec.next_nlri().unwrap().unwrap();
        assert_eq!(p.prefix.bitlen, 16);
        assert!(codec.next_nlri().unwrap().is_none());
    }

    #[test]
    fn as_path_real_merges_as4_path_when_aggregator_uses_as_trans() {
        let mut codec = UpdateCodec::open_write(
            BgpMessageType::Update,
            OpenFlags::ASN32,
        );
        codec.start_withdrawn_write().unwrap();
        codec.close_withdrawn_write().unwrap();
        codec.start_attributes_write().unwrap();

        let mut as_path_val = vec![2u8, 2u8];
        as_path_val.extend_from_slice(&1u32.to_be_bytes());
        as_path_val.extend_from_slice(&Asn::TRANSITION.to_u32().to_be_bytes());
        codec.write_attribute(0x40, attr_code::AS_PATH, &as_path_val).unwrap();

        let mut agg_val = Vec::new();
        agg_val.extend_from_slice(&Asn::TRANSITION.to_u32().to_be_bytes());
        agg_val.extend_from_slice(&[10, 0, 0, 1]);
        codec.write_attribute(0xc0, attr_code::AGGREGATOR, &agg_val).unwrap();

        let mut as4_path_val = vec![2u8, 3u8];
        as4_path_val.extend_from_slice(&1u32.to_be_bytes());
        as4_path_val.extend_from_slice(&65550u32.to_be_bytes());
        as4_path_val.extend_from_slice(&65551u32.to_be_bytes());
        codec.write_attribute(0xc0, attr_code::AS4_PATH, &as4_path_val).unwrap();

        codec.close_attributes_write().unwrap();
        let nlri = TrieKey::from_ipnet("1.2.3.0/24".parse().unwrap());
        codec.write_nlri_prefix(&nlri, None).unwrap();
        codec.finish().unwrap();

        let mut reader = UpdateCodec::open_read(codec.data().to_vec(), OpenFlags::ASN32).unwrap();
        reader.start_real_as_path().unwrap();
        let mut asns = vec![];
        while let Some(e) = reader.next_as_path().unwrap() {
            asns.push(e.asn);
        }
        assert_eq!(asns, vec![1, 65550, 65551]);
    }

    #[test]
    fn rebuild_from_dump_v4_plain() {
        let mut attrs = Vec::new();
        attrs.extend_from_slice(&[0x40, attr_code::ORIGIN, 1, 0]);
        attrs.extend_from_slice(&[0x40, attr_code::NEXT_HOP, 4, 10, 0, 0, 1]);

        let nlri = TrieKey::from_ipnet("192.0.2.0/24".parse().unwrap());
        let codec =
            UpdateCodec::rebuild_from_dump(&nlri, &attrs, None, RebuildFlags::empty()).unwrap();

        let mut reader = UpdateCodec::open_read(codec.data().to_vec(), OpenFlags::ASN32).unwrap();
        assert_eq!(reader.get_bgp_origin().unwrap(), Some(0));
        reader.start_nlri().unwrap();
        let p = reader.next_nlri().unwrap().unwrap();
        assert_eq!(p.prefix.bitlen, 24);
    }

    #[test]
    fn rebuild_from_dump_downgrades_as_path_when_not_asn32() {
        let mut attrs = Vec::new();
        let mut as_path_val = vec![2u8, 1u8];
        as_path_val.extend_from_slice(&100u32.to_be_bytes());
        attrs.push(0x40);
        attrs.push(attr_code::AS_PATH);
        attrs.push(as_path_val.len() as u8);
        attrs.extend_from_slice(&as_path_val);

        let nlri = TrieKey::from_ipnet("192.0.2.0/24".parse().unwrap());
        let codec = UpdateCodec::rebuild_from_dump(
            &nlri,
            &attrs,
            None,
            RebuildFlags::LEGACY_MRT,
        )
        .unwrap();

        let mut reader = UpdateCodec::open_read(codec.data().to_vec(), OpenFlags::empty()).unwrap();
        reader.start_as_path().unwrap();
        let e = reader.next_as_path().unwrap().unwrap();
        assert_eq!(e.asn, 100);
        assert!(reader.next_as_path().unwrap().is_none());
    }

    #[test]
    fn rebuild_from_dump_rejects_v6_without_mp_reach() {
        let nlri = TrieKey::from_ipnet("2001:db8::/32".parse().unwrap());
        let err = UpdateCodec::rebuild_from_dump(&nlri, &[], None, RebuildFlags::empty())
            .unwrap_err();
        assert_eq!(err.kind, CodecErrorKind::CodecBadAttr);
    }

    #[test]
    fn communities_decode_regular_and_large() {
        let mut codec = UpdateCodec::open_write(BgpMessageType::Update, OpenFlags::empty());
        codec.start_withdrawn_write().unwrap();
        codec.close_withdrawn_write().unwrap();
        codec.start_attributes_write().unwrap();
        codec
            .write_attribute(0xc0, attr_code::COMMUNITY, &0xFFFFFF01u32.to_be_bytes())
            .unwrap();
        let mut large = Vec::new();
        large.extend_from_slice(&1u32.to_be_bytes());
        large.extend_from_slice(&2u32.to_be_bytes());
        large.extend_from_slice(&3u32.to_be_bytes());
        codec.write_attribute(0xc0, attr_code::LARGE_COMMUNITY, &large).unwrap();
        codec.close_attributes_write().unwrap();
        let nlri = TrieKey::from_ipnet("10.0.0.0/8".parse().unwrap());
        codec.write_nlri_prefix(&nlri, None).unwrap();
        codec.finish().unwrap();

        let mut reader = UpdateCodec::open_read(codec.data().to_vec(), OpenFlags::empty()).unwrap();
        reader.start_communities(CommunityKind::Regular).unwrap();
        match reader.next_community().unwrap().unwrap() {
            CommunityValue::Regular(Community::NoExport) => {}
            other => panic!("unexpected {other:?}"),
        }

        reader.start_communities(CommunityKind::Large).unwrap();
        match reader.next_community().unwrap().unwrap() {
            CommunityValue::Large(lc) => {
                assert_eq!(lc.global_admin, 1);
                assert_eq!(lc.local_data, [2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
