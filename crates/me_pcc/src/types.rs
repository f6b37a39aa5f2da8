//! Base types for the structure of package files.

use binrw::{BinRead, BinWrite};
use byteorder::{ByteOrder, LittleEndian};

/// Magic tag at the start of every package file, reused as the per-chunk
/// block header magic.
pub const PACKAGE_TAG: u32 = 0x9E2A_83C1;

/// Maximum uncompressed size of a single compression block.
pub const MAX_BLOCK_SIZE: u32 = 0x2_0000;

/// Maximum uncompressed size of a chunk. The writer starts a new chunk when
/// appending the next export span would exceed this bound; a single span
/// larger than the bound still becomes one chunk.
pub const MAX_CHUNK_SIZE: u32 = 0x10_0000;

/// On-disk size of one chunk-table entry and of the chunk block header.
pub(crate) const CHUNK_HEADER_SIZE: u32 = 16;

/// On-disk size of one block-table entry.
pub(crate) const BLOCK_ENTRY_SIZE: u32 = 8;

/// Marker appended after all package data by modding tools.
pub const FILE_MARKER: &[u8] = b"ThisIsMEMEndOfFileMarker";

/// The three wire-format variants of the package format, one per game.
///
/// The variant is fixed at open time and never changes for the lifetime of
/// the package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageVersion {
    /// Version 491
    Me1,
    /// Version 512
    Me2,
    /// Version 684
    Me3,
}

impl PackageVersion {
    /// Map the on-disk version field to a variant.
    pub fn from_wire(version: u16) -> Option<Self> {
        match version {
            491 => Some(PackageVersion::Me1),
            512 => Some(PackageVersion::Me2),
            684 => Some(PackageVersion::Me3),
            _ => None,
        }
    }

    /// The on-disk version field value.
    pub fn wire(self) -> u16 {
        match self {
            PackageVersion::Me1 => 491,
            PackageVersion::Me2 => 512,
            PackageVersion::Me3 => 684,
        }
    }

    /// Size of the fixed header for this variant.
    pub fn header_size(self) -> usize {
        match self {
            PackageVersion::Me1 => 121,
            PackageVersion::Me2 => 117,
            PackageVersion::Me3 => 126,
        }
    }

    /// Whether name strings use 16-bit code units when written wide.
    pub fn wide_names(self) -> bool {
        self == PackageVersion::Me3
    }

    /// Whether the format carries a guid table.
    pub fn has_guids(self) -> bool {
        self == PackageVersion::Me3
    }
}

/// One entry of the chunk table.
///
/// Chunks are laid out in ascending uncompressed-offset order and tile the
/// payload region with no gaps.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct ChunkEntry {
    /// Start of the chunk in uncompressed-payload address space
    pub uncompressed_offset: u32,

    /// Length of the chunk when decompressed
    pub uncompressed_size: u32,

    /// Start of the chunk's block header in the file
    pub compressed_offset: u32,

    /// Total size in the file: block header + block table + block data
    pub compressed_size: u32,
}

impl ChunkEntry {
    /// End of the chunk in uncompressed-payload address space.
    pub fn uncompressed_end(&self) -> u32 {
        self.uncompressed_offset + self.uncompressed_size
    }
}

/// Header in front of every chunk's block table.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct ChunkHeader {
    /// Must equal [`PACKAGE_TAG`]
    pub tag: u32,

    /// Must equal [`MAX_BLOCK_SIZE`]
    pub block_size: u32,

    /// Sum of the compressed sizes of all blocks in the chunk
    pub compressed_size: u32,

    /// Uncompressed size of the chunk, must match the chunk-table entry
    pub uncompressed_size: u32,
}

/// One entry of a chunk's block table.
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct BlockEntry {
    /// Size of the block as stored
    pub compressed_size: u32,

    /// Size of the block when decompressed
    pub uncompressed_size: u32,
}

/// One entry of the guid table (ME3 only).
#[derive(BinRead, BinWrite, Debug, Default, Copy, Clone, PartialEq)]
#[brw(little)]
pub struct GuidEntry {
    /// 16-byte object identifier
    pub guid: [u8; 16],

    /// Index into the export table
    pub export_id: i32,
}

/// A decoded signed object reference.
///
/// Imports and exports share one signed id space: positive ids index the
/// export table (`id - 1`), negative ids the import table (`-id - 1`), zero
/// refers to nothing. Decoded once at parse time instead of re-interpreting
/// the sign at every use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectRef {
    /// No referenced object
    #[default]
    None,
    /// Entry of the export table
    Export(usize),
    /// Entry of the import table
    Import(usize),
}

impl ObjectRef {
    /// Decode a signed on-disk reference.
    pub fn decode(id: i32) -> Self {
        match id {
            0 => ObjectRef::None,
            id if id > 0 => ObjectRef::Export(id as usize - 1),
            id => ObjectRef::Import(-(id as i64) as usize - 1),
        }
    }

    /// Encode back to the signed on-disk convention.
    pub fn encode(self) -> i32 {
        match self {
            ObjectRef::None => 0,
            ObjectRef::Export(index) => index as i32 + 1,
            ObjectRef::Import(index) => -(index as i32) - 1,
        }
    }
}

/// One entry of the name table.
#[derive(Debug, Clone)]
pub struct NameEntry {
    /// The decoded string, without its terminator
    pub name: Box<str>,

    /// Trailing flags field; 8 bytes on ME1, 4 on ME2, absent on ME3
    pub flags: u64,
}

/// Flags assigned to names appended on an ME1 package.
pub(crate) const NEW_NAME_FLAGS_ME1: u64 = 0x0007_0010_0000_0000;

/// Flags assigned to names appended on an ME2 package.
pub(crate) const NEW_NAME_FLAGS_ME2: u64 = 0xFFFF_FFF2;

/// One entry of the extra-names region, kept verbatim for round-trip.
#[derive(Debug, Clone)]
pub struct ExtraNameEntry {
    /// Raw encoded bytes, excluding the length prefix
    pub raw: Box<[u8]>,
}

/// One entry of the import table.
///
/// The verbatim encoded bytes are retained so an entry that is never
/// mutated is written back bit-for-bit.
#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub(crate) raw: Box<[u8]>,

    /// Reference to the class of the imported object
    pub class: ObjectRef,

    /// Reference to the parent container
    pub link: ObjectRef,

    /// Index into the name table
    pub object_name_id: usize,

    /// The resolved object name
    pub object_name: Box<str>,
}

/// One entry of the export table.
///
/// The fixed prefix of the raw record encodes the fields below; the data
/// size and offset are patched in place when the payload is replaced.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    pub(crate) id: u32,
    pub(crate) raw: Box<[u8]>,
    pub(crate) new_data: Option<Vec<u8>>,

    /// The resolved object name
    pub object_name: Box<str>,
}

impl ExportEntry {
    const CLASS_ID_OFFSET: usize = 0;
    const LINK_ID_OFFSET: usize = 8;
    const OBJECT_NAME_ID_OFFSET: usize = 12;
    const DATA_SIZE_OFFSET: usize = 32;
    pub(crate) const DATA_OFFSET_OFFSET: usize = 36;

    /// Signed id of the class of this object.
    pub fn class_id(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[Self::CLASS_ID_OFFSET..])
    }

    /// Reference to the class of this object.
    pub fn class(&self) -> ObjectRef {
        ObjectRef::decode(self.class_id())
    }

    /// Reference to the parent container.
    pub fn link(&self) -> ObjectRef {
        ObjectRef::decode(LittleEndian::read_i32(&self.raw[Self::LINK_ID_OFFSET..]))
    }

    /// Index into the name table.
    pub fn object_name_id(&self) -> usize {
        LittleEndian::read_i32(&self.raw[Self::OBJECT_NAME_ID_OFFSET..]) as usize
    }

    /// Declared size of the payload blob.
    pub fn data_size(&self) -> u32 {
        LittleEndian::read_u32(&self.raw[Self::DATA_SIZE_OFFSET..])
    }

    /// Declared offset of the payload blob in uncompressed address space.
    pub fn data_offset(&self) -> u32 {
        LittleEndian::read_u32(&self.raw[Self::DATA_OFFSET_OFFSET..])
    }

    /// Whether the payload has been replaced in memory.
    pub fn is_replaced(&self) -> bool {
        self.new_data.is_some()
    }

    pub(crate) fn set_data_size(&mut self, size: u32) {
        LittleEndian::write_u32(&mut self.raw[Self::DATA_SIZE_OFFSET..], size);
    }

    pub(crate) fn set_data_offset(&mut self, offset: u32) {
        LittleEndian::write_u32(&mut self.raw[Self::DATA_OFFSET_OFFSET..], offset);
    }
}
