//! This library handles reading and rewriting the **package** files used by the *Mass Effect* trilogy.
//!
//! # Package Container Format Documentation
//!
//! This crate provides utilities to open, inspect and rewrite the binary asset containers
//! (`.pcc`, `.upk`, `.sfm` and friends) shipped by the three *Mass Effect* games. A package holds
//! four interlinked metadata tables — names, imports, exports and depends (plus a guid table on
//! the newest variant) — followed by the raw per-object payload blobs, with the whole region
//! after the header optionally chunk-compressed.
//!
//! ## File Structure
//!
//! | Offset (bytes) | Field               | Description                                                |
//! |----------------|---------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number        | 4 bytes: 0x9E2A83C1                                        |
//! | 0x0004         | Version             | 2 bytes: 491, 512 or 684, selecting the format variant     |
//! | 0x0008         | End of tables       | 4 bytes: lowest export payload offset                      |
//! | 0x000C         | Folder name         | i32 length (negative = wide) + string + 4-byte flags       |
//! | ...            | Table directory     | counts and offsets of the names/exports/imports/depends (and, on 684, guids) tables |
//! | header size    | Compression tag     | 4 bytes: 0 = none, 1 = Zlib, 2 = LZ4                       |
//! | +4             | Chunk count         | 4 bytes; a chunk table of count × 16 bytes follows when the tag is nonzero |
//! | ...            | Package source      | 4 bytes (variant 512 adds a constant zero field)           |
//! | ...            | Extra names         | u32 count + (i32 length, bytes) pairs                      |
//! | ...            | Tables and payload  | addressed in uncompressed space, chunk-compressed on disk when the tag is nonzero |
//!
//! The fixed header is 121 bytes for version 491, 117 for 512 and 126 for 684. It is owned
//! verbatim by the open package: only the table directory fields are ever patched, everything
//! else round-trips bit-for-bit.
//!
//! ### Chunks and blocks
//!
//! When the compression tag is nonzero the region starting at the data offset is stored as a
//! sequence of chunks, each at most 1 MiB of uncompressed data, split into independently
//! compressed blocks of at most 128 KiB. Each chunk is materialized on disk as:
//!
//! | Field             | Description                                     |
//! |-------------------|-------------------------------------------------|
//! | Tag               | 4 bytes: the package magic                      |
//! | Max block size    | 4 bytes: always 0x20000                         |
//! | Compressed size   | 4 bytes: sum of all block compressed sizes      |
//! | Uncompressed size | 4 bytes: must match the chunk-table entry       |
//! | Block table       | per block: compressed size, uncompressed size   |
//! | Block data        | the compressed blocks, in table order           |
//!
//! Chunks tile the payload region in ascending order with no gaps. Any structural mismatch
//! (wrong tag, wrong block size, decompressed length mismatch) means the container is corrupt
//! and the operation is aborted.
//!
//! ### Tables
//!
//! Names are `(i32 length, bytes)` pairs — a negative length denotes a wide string — with a
//! trailing flags field on the two older variants. Import records are a fixed 28-byte layout;
//! export records are variable length with the payload `(size, offset)` pair at a fixed position
//! inside the record. Import and export entries retain their verbatim encoded bytes so that
//! unmodified tables are written back without re-encoding. The depends table is one i32 per
//! export and tolerates truncation; the guid table (variant 684 only) is count × 20 bytes.
//!
//! ## Rewriting
//!
//! [`Package::save`] rebuilds the whole container in memory and atomically replaces the file.
//! Payloads that grew are relocated to the end of the payload region; metadata tables that no
//! longer fit in front of the payload reclaim space by relocating leading exports when that is
//! safe, and are appended after the payload otherwise — in which case the output is always
//! written uncompressed.
//!
//! ## Example
//!
//! ```no_run
//! use me_pcc::{Package, SaveOptions};
//!
//! fn grow_first_export() -> me_pcc::error::Result<()> {
//!     let mut package = Package::open("BioGame/CookedPC/Startup.pcc")?;
//!
//!     let mut payload = package.export_data(0)?;
//!     payload.extend_from_slice(b"patched");
//!     package.set_export_data(0, payload)?;
//!
//!     package.save(SaveOptions::builder().append_marker(true).build())?;
//!     Ok(())
//! }
//! ```

pub mod compression;
pub mod error;
pub mod read;
pub mod types;
pub mod write;

pub use compression::CompressionType;
pub use read::Package;
pub use types::{ObjectRef, PackageVersion};
pub use write::{SaveOptions, SaveStatus};
