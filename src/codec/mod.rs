//! Wire-format codecs: the update message codec and the container record
//! codec that wraps it.

pub mod message;
pub mod record;

pub use message::{
    attr_code, AddPathPrefix, AsPathEntry, AsPathSegKind, AttrOffset, AttrView, BgpMessageType,
    CommunityKind, CommunityValue, NotableAttr, OpenFlags, RebuildFlags, UpdateCodec,
};
pub use record::{ContainerRecord, PeerIndexPayload, PeerView, RecordFlags, RecordHeader};
