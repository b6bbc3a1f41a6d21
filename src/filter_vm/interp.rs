//! The filter VM interpreter: a one-step, dense-`match`-dispatched loop over
//! an [`Image`] and a materialized view of one update message.
//!
//! The source keeps all sub-iterator state (withdrawn/NLRI/AS-path/next-hop/
//! community) inside one union on the message value (§9's "sub-iterator
//! state inside a union" note). Rather than borrow the live `UpdateCodec`
//! across the whole run — which would mean juggling its single shared
//! `open_iter` slot against the VM's own need to revisit NLRI, withdrawn, and
//! AS-path data in arbitrary order — this port eagerly materializes
//! everything the opcode table can reference into a [`MessageView`] once,
//! up front, and lets the interpreter borrow that immutably for the whole
//! run. It costs one extra pass over the message per filter invocation in
//! exchange for never needing to interleave with the codec's own iterator
//! state.

use crate::codec::message::{AsPathEntry, AsPathSegKind, CommunityKind, CommunityValue, UpdateCodec};
use crate::error::{CodecError, CodecErrorKind};
use crate::trie::key::TrieKey;
use crate::trie::{Family, PatriciaTrie};
use std::collections::HashSet;
use std::net::IpAddr;

use super::image::{AccessFn, Constant, Image};
use super::opcode::{split_word, AccessMask, Opcode};

/// Everything the filter VM's opcode table can reference, collected once per
/// message rather than interleaved with the codec's own sub-iterator state.
pub struct MessageView {
    pub nlri: Vec<TrieKey>,
    pub every_nlri: Vec<TrieKey>,
    pub withdrawn: Vec<TrieKey>,
    pub every_withdrawn: Vec<TrieKey>,
    pub as_path: Vec<AsPathEntry>,
    pub as4_path: Vec<AsPathEntry>,
    pub real_as_path: Vec<AsPathEntry>,
    pub communities: Vec<CommunityValue>,
    pub extended_communities: Vec<CommunityValue>,
    pub large_communities: Vec<CommunityValue>,
    pub attr_codes: HashSet<u8>,
}

impl MessageView {
    /// Drain every opcode-visible facet of `codec` into one owned snapshot.
    /// `codec` must already be open for read on an update message.
    pub fn build(codec: &mut UpdateCodec) -> Result<Self, CodecError> {
        let nlri = collect_prefixes(codec, false)?;
        let every_nlri = collect_prefixes(codec, true)?;
        let withdrawn = collect_withdrawn(codec, false)?;
        let every_withdrawn = collect_withdrawn(codec, true)?;

        codec.start_as_path()?;
        let as_path = drain_as_path(codec)?;
        codec.start_as4_path()?;
        let as4_path = drain_as_path(codec)?;
        codec.start_real_as_path()?;
        let real_as_path = drain_as_path(codec)?;

        codec.start_communities(CommunityKind::Regular)?;
        let communities = drain_communities(codec)?;
        codec.start_communities(CommunityKind::Extended)?;
        let extended_communities = drain_communities(codec)?;
        codec.start_communities(CommunityKind::Large)?;
        let large_communities = drain_communities(codec)?;

        codec.start_attributes()?;
        let mut attr_codes = HashSet::new();
        while let Some(view) = codec.next_attribute()? {
            attr_codes.insert(view.type_code);
        }

        Ok(MessageView {
            nlri,
            every_nlri,
            withdrawn,
            every_withdrawn,
            as_path,
            as4_path,
            real_as_path,
            communities,
            extended_communities,
            large_communities,
            attr_codes,
        })
    }

    fn prefixes(&self, mask: AccessMask) -> &[TrieKey] {
        match (mask.contains(AccessMask::WITHDRAWN), mask.contains(AccessMask::ALL)) {
            (false, false) => &self.nlri,
            (false, true) => &self.every_nlri,
            (true, false) => &self.withdrawn,
            (true, true) => &self.every_withdrawn,
        }
    }

    fn path_entries(&self, mask: AccessMask) -> &[AsPathEntry] {
        if mask.contains(AccessMask::REAL_AS_PATH) {
            &self.real_as_path
        } else if mask.contains(AccessMask::AS4_PATH) {
            &self.as4_path
        } else {
            &self.as_path
        }
    }
}

fn collect_prefixes(codec: &mut UpdateCodec, all: bool) -> Result<Vec<TrieKey>, CodecError> {
    if all {
        codec.start_all_nlri()?;
    } else {
        codec.start_nlri()?;
    }
    let mut out = Vec::new();
    while let Some(p) = codec.next_nlri()? {
        out.push(p.prefix);
    }
    Ok(out)
}

fn collect_withdrawn(codec: &mut UpdateCodec, all: bool) -> Result<Vec<TrieKey>, CodecError> {
    if all {
        codec.start_all_withdrawn()?;
    } else {
        codec.start_withdrawn()?;
    }
    let mut out = Vec::new();
    while let Some(p) = codec.next_withdrawn()? {
        out.push(p.prefix);
    }
    Ok(out)
}

fn drain_as_path(codec: &mut UpdateCodec) -> Result<Vec<AsPathEntry>, CodecError> {
    let mut out = Vec::new();
    while let Some(e) = codec.next_as_path()? {
        out.push(e);
    }
    Ok(out)
}

fn drain_communities(codec: &mut UpdateCodec) -> Result<Vec<CommunityValue>, CodecError> {
    let mut out = Vec::new();
    while let Some(c) = codec.next_community()? {
        out.push(c);
    }
    Ok(out)
}

/// One accumulator slot: a tagged value produced by `CALL`, a prefix/path
/// match op, or `LOAD`/`LOADK`.
#[derive(Debug, Clone)]
enum Value {
    Bool(bool),
    Prefix(TrieKey),
    Addr(IpAddr),
    Asn(u32),
    Community(CommunityValue),
}

/// The candidate tries `SETTRIE i` / `SETTRIE6 i` can bind by slot index,
/// supplied by the caller alongside the image (external collaborators, not
/// part of the VM image itself).
#[derive(Default)]
pub struct TrieBank<'a> {
    pub v4_tries: &'a [&'a PatriciaTrie<()>],
    pub v6_tries: &'a [&'a PatriciaTrie<()>],
}

/// Outcome of one interpreter run: positive is pass, zero is fail, matching
/// the outer driver contract of §4.5 ("`>0` pass, `0` fail, `<0` error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmResult {
    Pass,
    Fail,
}

/// One-step interpreter over an [`Image`] and a [`MessageView`].
pub struct Interp<'m> {
    image: &'m Image,
    view: &'m MessageView,
    bank: TrieBank<'m>,
    bound_v4: Option<usize>,
    bound_v6: Option<usize>,
    pc: usize,
    ext: u32,
    stack: Vec<Value>,
    settled: Option<bool>,
}

impl<'m> Interp<'m> {
    pub fn new(image: &'m Image, view: &'m MessageView) -> Self {
        Self::with_tries(image, view, TrieBank::default())
    }

    pub fn with_tries(image: &'m Image, view: &'m MessageView, bank: TrieBank<'m>) -> Self {
        Interp {
            image,
            view,
            bank,
            bound_v4: None,
            bound_v6: None,
            pc: 0,
            ext: 0,
            stack: Vec::new(),
            settled: None,
        }
    }

    fn effective_imm(&mut self, raw: u8) -> u32 {
        let v = (self.ext << 8) | raw as u32;
        self.ext = 0;
        v
    }

    fn bad_packet(msg: impl Into<String>) -> CodecError {
        CodecError::new(CodecErrorKind::FilterBadPacket, msg)
    }

    fn illegal_opcode(msg: impl Into<String>) -> CodecError {
        CodecError::new(CodecErrorKind::FilterIllegalOpcode, msg)
    }

    fn constant(&self, idx: u32) -> Result<&'m Constant, CodecError> {
        self.image
            .constants
            .get(idx as usize)
            .ok_or_else(|| Self::illegal_opcode(format!("constant index {idx} out of range")))
    }

    /// Fold every pending `Bool` on the stack into `self.settled` via
    /// logical OR (the prefix/path lists are probed existentially: any hit
    /// settles the clause true) and clear the stack, the "materialize
    /// accumulators so next op sees aggregated state" behaviour of `SETTLE`.
    fn settle(&mut self) {
        let mut any = self.settled.unwrap_or(false);
        for v in self.stack.drain(..) {
            if let Value::Bool(b) = v {
                any |= b;
            }
        }
        self.settled = Some(any);
    }

    fn maybe_settle_first(&mut self, mask: AccessMask) {
        if mask.contains(AccessMask::SETTLE) {
            self.settle();
        }
    }

    /// Run to completion, returning pass/fail or the first recoverable
    /// `vm-bad-packet` / fatal `vm-illegal-opcode` error.
    pub fn run(mut self) -> Result<VmResult, CodecError> {
        loop {
            if self.pc >= self.image.code.len() {
                break;
            }
            let word = self.image.code[self.pc];
            let (op_byte, imm_byte) = split_word(word);
            let opcode = Opcode::decode(op_byte);
            self.pc += 1;

            match opcode {
                Opcode::Nop => {}
                Opcode::Blk => {
                    let pass_so_far = self.settled.unwrap_or(true);
                    if !pass_so_far {
                        self.pc += imm_byte as usize;
                    }
                }
                Opcode::Endblk => {}
                Opcode::Cpass => return Ok(VmResult::Pass),
                Opcode::Cfail => return Ok(VmResult::Fail),
                Opcode::Not => {
                    if let Some(top) = self.stack.pop() {
                        if let Value::Bool(b) = top {
                            self.stack.push(Value::Bool(!b));
                        } else {
                            self.stack.push(top);
                        }
                    } else if let Some(s) = self.settled {
                        self.settled = Some(!s);
                    }
                }
                Opcode::Settle => self.settle(),
                Opcode::Exarg => {
                    self.ext = (self.ext << 8) | imm_byte as u32;
                    continue;
                }

                Opcode::Load => self.stack.push(Value::Bool(imm_byte != 0)),
                Opcode::Loadk => {
                    let idx = self.effective_imm(imm_byte);
                    match self.constant(idx)? {
                        Constant::Asn(a) => self.stack.push(Value::Asn(*a)),
                        Constant::Addr(a) => self.stack.push(Value::Addr(*a)),
                        Constant::Prefix(p) => self.stack.push(Value::Prefix(*p)),
                        Constant::AsnVec(_) | Constant::Communities(_) => {
                            return Err(Self::illegal_opcode(
                                "LOADK cannot push a composite constant directly, use UNPACK",
                            ))
                        }
                    }
                }
                Opcode::Store => {
                    self.stack.pop();
                }
                Opcode::Discard => self.stack.clear(),
                Opcode::Unpack => {
                    let idx = self.effective_imm(imm_byte);
                    match self.constant(idx)? {
                        Constant::AsnVec(v) => {
                            for a in v {
                                self.stack.push(Value::Asn(*a));
                            }
                        }
                        Constant::Communities(v) => {
                            for c in v {
                                self.stack.push(Value::Community(*c));
                            }
                        }
                        _ => return Err(Self::illegal_opcode("UNPACK target is not composite")),
                    }
                }

                Opcode::Hasattr => {
                    let present = self.view.attr_codes.contains(&imm_byte);
                    self.stack.push(Value::Bool(present));
                }

                Opcode::Exact | Opcode::Subnet | Opcode::Supernet | Opcode::Related => {
                    let mask = AccessMask::from_bits_truncate(imm_byte);
                    self.maybe_settle_first(mask);
                    let result = self.probe_prefixes(opcode, mask)?;
                    self.stack.push(Value::Bool(result));
                }
                Opcode::Pfxcontains => {
                    let idx = self.effective_imm(imm_byte);
                    let needle = match self.constant(idx)? {
                        Constant::Prefix(p) => *p,
                        _ => return Err(Self::illegal_opcode("PFXCONTAINS constant is not a prefix")),
                    };
                    let found = self.stack.iter().any(|v| matches!(v, Value::Prefix(p) if *p == needle));
                    self.stack.push(Value::Bool(found));
                }
                Opcode::Addrcontains => {
                    let idx = self.effective_imm(imm_byte);
                    let needle = match self.constant(idx)? {
                        Constant::Addr(a) => *a,
                        _ => return Err(Self::illegal_opcode("ADDRCONTAINS constant is not an address")),
                    };
                    let found = self.stack.iter().any(|v| matches!(v, Value::Addr(a) if *a == needle));
                    self.stack.push(Value::Bool(found));
                }
                Opcode::Ascontains => {
                    let idx = self.effective_imm(imm_byte);
                    let needle = match self.constant(idx)? {
                        Constant::Asn(a) => *a,
                        _ => return Err(Self::illegal_opcode("ASCONTAINS constant is not an ASN")),
                    };
                    let found = self.view.real_as_path.iter().any(|e| e.asn == needle);
                    self.stack.push(Value::Bool(found));
                }

                Opcode::Aspmatch | Opcode::Aspstarts | Opcode::Aspends | Opcode::Aspexact => {
                    // the AS vector to compare against is whatever ASNs a
                    // prior LOADK+UNPACK left on the accumulator; the
                    // immediate here carries only the access mask.
                    let mask = AccessMask::from_bits_truncate(imm_byte);
                    self.maybe_settle_first(mask);
                    let needle: Vec<u32> = self
                        .stack
                        .drain(..)
                        .filter_map(|v| if let Value::Asn(a) = v { Some(a) } else { None })
                        .collect();
                    let result = self.match_as_path(opcode, mask, &needle)?;
                    self.stack.push(Value::Bool(result));
                }

                Opcode::Commexact | Opcode::CommexactExt | Opcode::CommexactLarge => {
                    // same pattern: the wanted community set comes from a
                    // prior LOADK+UNPACK, this opcode takes no immediate.
                    let wanted: Vec<CommunityValue> = self
                        .stack
                        .drain(..)
                        .filter_map(|v| if let Value::Community(c) = v { Some(c) } else { None })
                        .collect();
                    let present = match opcode {
                        Opcode::Commexact => &self.view.communities,
                        Opcode::CommexactExt => &self.view.extended_communities,
                        Opcode::CommexactLarge => &self.view.large_communities,
                        _ => unreachable!(),
                    };
                    let result = sets_equal(present, &wanted);
                    self.stack.push(Value::Bool(result));
                }

                Opcode::Call => {
                    let idx = self.effective_imm(imm_byte);
                    let f = self
                        .image
                        .functions
                        .get(idx as usize)
                        .copied()
                        .ok_or_else(|| Self::illegal_opcode(format!("function index {idx} out of range")))?;
                    self.call_access_fn(f);
                }

                Opcode::Settrie => {
                    let idx = self.effective_imm(imm_byte) as usize;
                    if idx >= self.bank.v4_tries.len() {
                        return Err(Self::illegal_opcode(format!("v4 trie slot {idx} out of range")));
                    }
                    self.bound_v4 = Some(idx);
                }
                Opcode::Settrie6 => {
                    let idx = self.effective_imm(imm_byte) as usize;
                    if idx >= self.bank.v6_tries.len() {
                        return Err(Self::illegal_opcode(format!("v6 trie slot {idx} out of range")));
                    }
                    self.bound_v6 = Some(idx);
                }
                Opcode::Clrtrie => self.bound_v4 = None,
                Opcode::Clrtrie6 => self.bound_v6 = None,

                Opcode::Ascmp => {
                    let idx = self.effective_imm(imm_byte);
                    let wanted = match self.constant(idx)? {
                        Constant::Asn(a) => *a,
                        _ => return Err(Self::illegal_opcode("ASCMP constant is not an ASN")),
                    };
                    let top = self.pop_scalar()?;
                    let result = matches!(top, Value::Asn(a) if a == wanted);
                    self.stack.push(Value::Bool(result));
                }
                Opcode::Addrcmp => {
                    let idx = self.effective_imm(imm_byte);
                    let wanted = match self.constant(idx)? {
                        Constant::Addr(a) => *a,
                        _ => return Err(Self::illegal_opcode("ADDRCMP constant is not an address")),
                    };
                    let top = self.pop_scalar()?;
                    let result = matches!(top, Value::Addr(a) if a == wanted);
                    self.stack.push(Value::Bool(result));
                }
                Opcode::Pfxcmp => {
                    let idx = self.effective_imm(imm_byte);
                    let wanted = match self.constant(idx)? {
                        Constant::Prefix(p) => *p,
                        _ => return Err(Self::illegal_opcode("PFXCMP constant is not a prefix")),
                    };
                    let top = self.pop_scalar()?;
                    let result = matches!(top, Value::Prefix(p) if p == wanted);
                    self.stack.push(Value::Bool(result));
                }

                Opcode::Illegal => {
                    return Err(Self::illegal_opcode(format!("unrecognized opcode byte 0x{op_byte:02x}")));
                }
            }
        }

        let pass = self.settled.unwrap_or_else(|| {
            self.stack.iter().any(|v| matches!(v, Value::Bool(true)))
        });
        Ok(if pass { VmResult::Pass } else { VmResult::Fail })
    }

    fn pop_scalar(&mut self) -> Result<Value, CodecError> {
        self.stack
            .pop()
            .ok_or_else(|| Self::bad_packet("comparator opcode ran with an empty accumulator"))
    }

    fn probe_prefixes(&self, opcode: Opcode, mask: AccessMask) -> Result<bool, CodecError> {
        let prefixes = self.view.prefixes(mask);
        for p in prefixes {
            let trie = match p.family {
                Family::V4 => self.bound_v4.and_then(|i| self.bank.v4_tries.get(i)).copied(),
                Family::V6 => self.bound_v6.and_then(|i| self.bank.v6_tries.get(i)).copied(),
            };
            let Some(trie) = trie else { continue };
            let hit = match opcode {
                Opcode::Exact => trie.search_exact(p.key, p.bitlen).is_some(),
                Opcode::Subnet => trie.is_subnet_of(p.key, p.bitlen),
                Opcode::Supernet => trie.is_supernet_of(p.key, p.bitlen),
                Opcode::Related => trie.is_related_of(p.key, p.bitlen),
                _ => unreachable!(),
            };
            if hit {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn match_as_path(&self, opcode: Opcode, mask: AccessMask, needle: &[u32]) -> Result<bool, CodecError> {
        let entries = self.view.path_entries(mask);
        let hops: Vec<u32> = entries
            .iter()
            .filter(|e| e.kind == AsPathSegKind::Sequence || e.kind == AsPathSegKind::ConfedSequence)
            .map(|e| e.asn)
            .collect();
        if needle.is_empty() {
            return Ok(hops.is_empty());
        }
        Ok(match opcode {
            Opcode::Aspmatch => contains_subsequence(&hops, needle),
            Opcode::Aspstarts => hops.starts_with(needle),
            Opcode::Aspends => hops.ends_with(needle),
            Opcode::Aspexact => hops == needle,
            _ => unreachable!(),
        })
    }

    fn call_access_fn(&mut self, f: AccessFn) {
        let prefixes: &[TrieKey] = match (f.is_withdrawn(), f.is_every()) {
            (false, false) => &self.view.nlri,
            (false, true) => &self.view.every_nlri,
            (true, false) => &self.view.withdrawn,
            (true, true) => &self.view.every_withdrawn,
        };
        if !f.is_accumulate() {
            self.stack.clear();
        }
        for p in prefixes {
            self.stack.push(Value::Prefix(*p));
        }
    }
}

fn sets_equal(a: &[CommunityValue], b: &[CommunityValue]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|x| b.contains(x)) && b.iter().all(|x| a.contains(x))
}

fn contains_subsequence(haystack: &[u32], needle: &[u32]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::opcode::make_word;
    use std::collections::HashSet;

    fn empty_view() -> MessageView {
        MessageView {
            nlri: vec![],
            every_nlri: vec![],
            withdrawn: vec![],
            every_withdrawn: vec![],
            as_path: vec![],
            as4_path: vec![],
            real_as_path: vec![
                AsPathEntry { kind: AsPathSegKind::Sequence, segment_index: 0, asn: 65000 },
                AsPathEntry { kind: AsPathSegKind::Sequence, segment_index: 0, asn: 65001 },
            ],
            communities: vec![],
            extended_communities: vec![],
            large_communities: vec![],
            attr_codes: HashSet::new(),
        }
    }

    #[test]
    fn trivial_pass_image_runs_to_pass() {
        let img = Image::new(vec![make_word(Opcode::Load, 1)], vec![], vec![]);
        let view = empty_view();
        let result = Interp::new(&img, &view).run().unwrap();
        assert_eq!(result, VmResult::Pass);
    }

    #[test]
    fn ascontains_matches_real_as_path() {
        let img = Image::new(
            vec![make_word(Opcode::Ascontains, 0)],
            vec![Constant::Asn(65001)],
            vec![],
        );
        let view = empty_view();
        let result = Interp::new(&img, &view).run().unwrap();
        assert_eq!(result, VmResult::Pass);
    }

    #[test]
    fn ascontains_miss_fails() {
        let img = Image::new(
            vec![make_word(Opcode::Ascontains, 0)],
            vec![Constant::Asn(999)],
            vec![],
        );
        let view = empty_view();
        let result = Interp::new(&img, &view).run().unwrap();
        assert_eq!(result, VmResult::Fail);
    }

    #[test]
    fn unknown_opcode_is_fatal() {
        let img = Image::new(vec![0xfeff], vec![], vec![]);
        let view = empty_view();
        let err = Interp::new(&img, &view).run().unwrap_err();
        assert_eq!(err.kind, CodecErrorKind::FilterIllegalOpcode);
    }

    #[test]
    fn cfail_short_circuits_to_fail() {
        let img = Image::new(
            vec![make_word(Opcode::Load, 1), make_word(Opcode::Cfail, 0)],
            vec![],
            vec![],
        );
        let view = empty_view();
        let result = Interp::new(&img, &view).run().unwrap();
        assert_eq!(result, VmResult::Fail);
    }
}
