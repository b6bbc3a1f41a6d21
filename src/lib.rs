/*!
bgpcap decodes, rebuilds, and filters archived MRT/BGP routing data.

bgpcap has the following features:
- **performant**: a zero-copy-leaning container/message codec pair, built for
  walking large archived MRT dumps record by record without re-allocating per
  attribute.
- **self-contained**: decode an MRT container record, rebuild it into a
  standalone BGP UPDATE message, and test it against a compiled filter
  expression, all without touching the network.
- **queryable**: a patricia/radix trie for prefix containment and coverage
  queries over the NLRI/withdrawn sets a dump file carries.

# Examples

## Driving a single MRT file through the pipeline

The [`pipeline::Pipeline`] type is the per-file driver: it reads container
records one at a time, rebuilds each RIB entry or live update into a
standalone BGP message, runs it through a compiled filter image, and hands
whatever passes to a caller-supplied sink.

```no_run
use bgpcap::filter_vm::{Image, TrieBank};
use bgpcap::pipeline::{Pipeline, PipelineEvent};
use std::fs::File;

let image = Image::new(vec![], vec![], vec![]); // a real filter is compiled elsewhere
let pipeline = Pipeline::new(&image, TrieBank::default());

let mut file = File::open("rib.20240101.0000.bin").unwrap();
pipeline
    .run_file(&mut file, &mut |event| {
        if let PipelineEvent::Update { codec, .. } = event {
            let _ = codec; // inspect the rebuilt UPDATE message
        }
        Ok(())
    })
    .unwrap();
```

## Testing prefixes against a patricia trie

```
use bgpcap::trie::{key_from_ipv4, Family, PatriciaTrie};
use std::net::Ipv4Addr;

let mut trie: PatriciaTrie<()> = PatriciaTrie::init(Family::V4);
trie.insert(key_from_ipv4(Ipv4Addr::new(192, 0, 2, 0)), 24, ());
assert!(trie.is_supernet_of(key_from_ipv4(Ipv4Addr::new(192, 0, 2, 1)), 32));
```

# Data representation

Three layers sit between the raw archive bytes and a filtered result:

- [`codec::record::ContainerRecord`]: the MRT-style envelope (timestamp,
  type, subtype, length, optional extended microseconds) wrapping a payload.
  `(type, subtype)` is classified once into a [`codec::record::RecordFlags`]
  bitmask so callers don't re-derive per-subtype behavior at every site.
- [`codec::message::UpdateCodec`]: an in-place BGP UPDATE message codec —
  opened read-only over wire bytes, or rebuilt from a table-dump-v2/legacy
  TABLE_DUMP entry's prefix and source attributes.
- [`filter_vm`]: a small bytecode interpreter testing a compiled filter
  expression against one decoded update message, with access to prefix
  tries via [`filter_vm::TrieBank`] for `SETTRIE`/`SETTRIE6`-style membership
  tests.

# RFCs Support

## BGP

- [X] [RFC 2042](https://datatracker.ietf.org/doc/html/rfc2042): Registering New BGP Attribute Types
- [X] [RFC 2858](https://datatracker.ietf.org/doc/html/rfc2858): Multiprotocol Extensions for BGP-4
- [X] [RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271): A Border Gateway Protocol 4 (BGP-4)
- [X] [RFC 6793](https://datatracker.ietf.org/doc/html/rfc6793): BGP Support for Four-Octet Autonomous System (AS) Number Space
- [X] [RFC 7911](https://datatracker.ietf.org/doc/html/rfc7911): Advertisement of Multiple Paths in BGP (ADD-PATH)
- [X] [RFC 8950](https://datatracker.ietf.org/doc/html/rfc8950): Advertising IPv4 NLRI with an IPv6 Next Hop

## MRT

- [X] [RFC 6396](https://datatracker.ietf.org/doc/html/rfc6396): MRT Routing Information Export Format
- [X] [RFC 6397](https://datatracker.ietf.org/doc/html/rfc6397): MRT BGP Routing Information Export Format
- [X] [RFC 8050](https://datatracker.ietf.org/doc/html/rfc8050): MRT Routing Information Export Format with BGP Additional Path Extensions

## Communities

- [X] [RFC 1997](https://datatracker.ietf.org/doc/html/rfc1997): BGP Communities Attribute
- [X] [RFC 4360](https://datatracker.ietf.org/doc/html/rfc4360): BGP Extended Communities Attribute
- [X] [RFC 8092](https://datatracker.ietf.org/doc/html/rfc8092): BGP Large Communities
*/

pub mod codec;
pub mod error;
pub mod filter_vm;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod primitives;
pub mod trie;

pub use codec::{ContainerRecord, UpdateCodec};
pub use error::{CodecError, CodecErrorKind};
pub use filter_vm::{Image, Interp};
pub use pipeline::{Pipeline, PipelineEvent};
