//! Bytecode word layout: a 16-bit instruction is an 8-bit opcode in the high
//! byte and an 8-bit immediate in the low byte. `EXARG` latches its immediate
//! as a high-order extension for the next non-`EXARG` op; chained `EXARG`s
//! shift-left-accumulate.

use bitflags::bitflags;

bitflags! {
    /// Selects which region(s) a prefix-match or path-match opcode probes,
    /// and whether to fold pending accumulator state first. Reused across
    /// both opcode families; path-match ops read the `AS4_PATH`/`REAL_AS_PATH`
    /// bits, prefix-match ops read `WITHDRAWN`/`ALL`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMask: u8 {
        /// settle pending accumulator contents before this op runs.
        const SETTLE = 0b0000_0001;
        /// probe withdrawn routes instead of NLRI.
        const WITHDRAWN = 0b0000_0010;
        /// extend the probed region into MP_REACH/MP_UNREACH as well.
        const ALL = 0b0000_0100;
        /// path-match: compare against AS4_PATH instead of plain AS_PATH.
        const AS4_PATH = 0b0000_1000;
        /// path-match: compare against the merged real AS path.
        const REAL_AS_PATH = 0b0001_0000;
    }
}

/// One filter-VM opcode, the high byte of an instruction word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0x00,
    Blk = 0x01,
    Endblk = 0x02,
    Cpass = 0x03,
    Cfail = 0x04,
    Not = 0x05,
    Settle = 0x06,
    Exarg = 0x07,

    Load = 0x10,
    Loadk = 0x11,
    Store = 0x12,
    Discard = 0x13,
    Unpack = 0x14,

    Hasattr = 0x20,

    Exact = 0x30,
    Subnet = 0x31,
    Supernet = 0x32,
    Related = 0x33,
    Pfxcontains = 0x34,
    Addrcontains = 0x35,
    Ascontains = 0x36,

    Aspmatch = 0x40,
    Aspstarts = 0x41,
    Aspends = 0x42,
    Aspexact = 0x43,

    Commexact = 0x50,
    CommexactExt = 0x51,
    CommexactLarge = 0x52,

    Call = 0x60,

    Settrie = 0x70,
    Settrie6 = 0x71,
    Clrtrie = 0x72,
    Clrtrie6 = 0x73,

    Ascmp = 0x80,
    Addrcmp = 0x81,
    Pfxcmp = 0x82,

    /// the dedicated illegal-opcode dispatch slot; never produced by
    /// [`Opcode::decode`] from a byte matching a real mnemonic above.
    Illegal = 0xff,
}

impl Opcode {
    /// Decode a byte into its opcode, mapping anything unrecognized to the
    /// illegal-opcode slot rather than failing — the interpreter is the one
    /// that turns `Illegal` into a `vm-illegal-opcode` error, keeping
    /// dispatch a single dense `match` with no separate validation pass.
    pub fn decode(byte: u8) -> Opcode {
        match byte {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Blk,
            0x02 => Opcode::Endblk,
            0x03 => Opcode::Cpass,
            0x04 => Opcode::Cfail,
            0x05 => Opcode::Not,
            0x06 => Opcode::Settle,
            0x07 => Opcode::Exarg,
            0x10 => Opcode::Load,
            0x11 => Opcode::Loadk,
            0x12 => Opcode::Store,
            0x13 => Opcode::Discard,
            0x14 => Opcode::Unpack,
            0x20 => Opcode::Hasattr,
            0x30 => Opcode::Exact,
            0x31 => Opcode::Subnet,
            0x32 => Opcode::Supernet,
            0x33 => Opcode::Related,
            0x34 => Opcode::Pfxcontains,
            0x35 => Opcode::Addrcontains,
            0x36 => Opcode::Ascontains,
            0x40 => Opcode::Aspmatch,
            0x41 => Opcode::Aspstarts,
            0x42 => Opcode::Aspends,
            0x43 => Opcode::Aspexact,
            0x50 => Opcode::Commexact,
            0x51 => Opcode::CommexactExt,
            0x52 => Opcode::CommexactLarge,
            0x60 => Opcode::Call,
            0x70 => Opcode::Settrie,
            0x71 => Opcode::Settrie6,
            0x72 => Opcode::Clrtrie,
            0x73 => Opcode::Clrtrie6,
            0x80 => Opcode::Ascmp,
            0x81 => Opcode::Addrcmp,
            0x82 => Opcode::Pfxcmp,
            _ => Opcode::Illegal,
        }
    }
}

/// Split a 16-bit instruction word into its raw `(opcode_byte, imm_byte)`.
pub fn split_word(word: u16) -> (u8, u8) {
    ((word >> 8) as u8, (word & 0xff) as u8)
}

/// Assemble an instruction word, used by tests building small images inline.
pub fn make_word(opcode: Opcode, imm: u8) -> u16 {
    ((opcode as u16) << 8) | imm as u16
}
