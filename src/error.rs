/*!
error module defines the error types used by this crate's codec.
*/
use std::fmt::{Display, Formatter};
use std::{error::Error, fmt};

/// Error kinds produced by the message/container/filter codecs (§7 of the
/// design). These latch onto codec state instead of propagating through `?`
/// at the call site — see [`CodecError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecErrorKind {
    /// read/write failure surfaced from the I/O handle.
    CodecIo,
    /// operation forbidden in the current mode or sub-iterator state.
    CodecInvOp,
    /// allocation failure (slab growth, buffer growth).
    CodecNoMem,
    /// malformed container header, bad marker, or length below minimum.
    CodecBadHeader,
    /// unrecognized message/record type.
    CodecBadType,
    /// open parameters field inconsistent.
    CodecBadParams,
    /// withdrawn-routes region bounds or content violated.
    CodecBadWithdrawn,
    /// attribute region bounds or content violated.
    CodecBadAttr,
    /// NLRI region bounds or content violated.
    CodecBadNlri,
    /// peer-index record header malformed.
    ContainerBadPeerIndexHeader,
    /// peer-index record content malformed.
    ContainerBadPeerIndex,
    /// a second peer-index record was seen in one file.
    ContainerDuplicatePeerIndex,
    /// a RIB record was seen before any peer-index record.
    ContainerNeedsPeerIndex,
    /// RIB record type recognized but not supported by this codec.
    ContainerRibNotSupported,
    /// AFI/SAFI combination recognized but not supported.
    ContainerAfiNotSupported,
    /// (type, subtype) combination recognized but not supported.
    ContainerTypeNotSupported,
    /// filter VM: malformed message (recoverable, message is discarded).
    FilterBadPacket,
    /// filter VM: corrupt bytecode image (fatal for the image).
    FilterIllegalOpcode,
}

impl CodecErrorKind {
    /// Whether the pipeline may continue to the next record after this
    /// error, as opposed to ending the file.
    pub fn is_recoverable(self) -> bool {
        !matches!(
            self,
            CodecErrorKind::CodecIo
                | CodecErrorKind::ContainerNeedsPeerIndex
                | CodecErrorKind::ContainerDuplicatePeerIndex
                | CodecErrorKind::FilterIllegalOpcode
        )
    }
}

impl Display for CodecErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            CodecErrorKind::CodecIo => "codec.io",
            CodecErrorKind::CodecInvOp => "codec.invop",
            CodecErrorKind::CodecNoMem => "codec.nomem",
            CodecErrorKind::CodecBadHeader => "codec.bad-header",
            CodecErrorKind::CodecBadType => "codec.bad-type",
            CodecErrorKind::CodecBadParams => "codec.bad-params",
            CodecErrorKind::CodecBadWithdrawn => "codec.bad-withdrawn",
            CodecErrorKind::CodecBadAttr => "codec.bad-attr",
            CodecErrorKind::CodecBadNlri => "codec.bad-nlri",
            CodecErrorKind::ContainerBadPeerIndexHeader => "container.bad-peer-index-header",
            CodecErrorKind::ContainerBadPeerIndex => "container.bad-peer-index",
            CodecErrorKind::ContainerDuplicatePeerIndex => "container.duplicate-peer-index",
            CodecErrorKind::ContainerNeedsPeerIndex => "container.needs-peer-index",
            CodecErrorKind::ContainerRibNotSupported => "container.rib-not-supported",
            CodecErrorKind::ContainerAfiNotSupported => "container.afi-not-supported",
            CodecErrorKind::ContainerTypeNotSupported => "container.type-not-supported",
            CodecErrorKind::FilterBadPacket => "filter.bad-packet",
            CodecErrorKind::FilterIllegalOpcode => "filter.illegal-opcode",
        };
        write!(f, "{s}")
    }
}

/// A latching codec error: kind plus a human-readable message, and an
/// optional attribute's raw bytes for hex-dump reporting (§7: "dumps the
/// offending attribute's bytes in hex when an attribute-level error
/// occurs").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub kind: CodecErrorKind,
    pub message: String,
    pub offending_bytes: Option<Vec<u8>>,
}

impl CodecError {
    pub fn new(kind: CodecErrorKind, message: impl Into<String>) -> Self {
        CodecError {
            kind,
            message: message.into(),
            offending_bytes: None,
        }
    }

    pub fn with_bytes(mut self, bytes: &[u8]) -> Self {
        self.offending_bytes = Some(bytes.to_vec());
        self
    }
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(bytes) = &self.offending_bytes {
            write!(f, " ({})", crate::primitives::hex_c_array(bytes))?;
        }
        Ok(())
    }
}

impl Error for CodecError {}
