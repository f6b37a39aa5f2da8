//! Block compression, decompression and the chunk cache.

use std::io::{Read, Seek, SeekFrom, Write};

use binrw::{BinRead, BinWrite};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use rayon::prelude::*;
use tracing::instrument;

use crate::{
    error::{Error, Result},
    types::{
        BlockEntry, ChunkEntry, ChunkHeader, BLOCK_ENTRY_SIZE, CHUNK_HEADER_SIZE, MAX_BLOCK_SIZE,
        PACKAGE_TAG,
    },
};

/// Identifies the algorithm used for the blocks of a compressed package.
///
/// The tag is stored as a u32 right after the fixed header. A zero tag means
/// the payload region is stored raw and no chunk table is present.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, Default, PartialEq, Eq)]
#[brw(repr = u32)]
pub enum CompressionType {
    /// Stores the payload region as it is
    #[default]
    None = 0,

    /// Compress blocks using Zlib
    Zlib = 1,

    /// Compress blocks using LZ4
    Lz4 = 2,
}

impl TryFrom<u32> for CompressionType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(CompressionType::None),
            1 => Ok(CompressionType::Zlib),
            2 => Ok(CompressionType::Lz4),
            other => Err(Error::UnknownCompression(other)),
        }
    }
}

/// Compress one block with the requested algorithm.
pub(crate) fn compress_block(data: &[u8], method: CompressionType) -> Result<Vec<u8>> {
    match method {
        CompressionType::None => Err(Error::Corrupt("compression type not expected")),
        CompressionType::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            Ok(encoder.finish()?)
        }
        CompressionType::Lz4 => Ok(lz4_flex::block::compress(data)),
    }
}

/// Decompress one block and verify its declared uncompressed length.
pub(crate) fn decompress_block(
    data: &[u8],
    uncompressed_size: usize,
    method: CompressionType,
) -> Result<Vec<u8>> {
    let output = match method {
        CompressionType::None => return Err(Error::Corrupt("compression type not expected")),
        CompressionType::Zlib => {
            let mut output = Vec::with_capacity(uncompressed_size);
            ZlibDecoder::new(data).read_to_end(&mut output)?;
            output
        }
        CompressionType::Lz4 => lz4_flex::block::decompress(data, uncompressed_size)
            .map_err(|_| Error::Corrupt("block failed to decompress"))?,
    };

    if output.len() != uncompressed_size {
        return Err(Error::Corrupt("decompressed data size not expected"));
    }
    Ok(output)
}

/// Split `data` into maximum-size blocks and compress them concurrently.
///
/// Output order is the input order regardless of completion order.
pub(crate) fn compress_blocks(data: &[u8], method: CompressionType) -> Result<Vec<Vec<u8>>> {
    data.par_chunks(MAX_BLOCK_SIZE as usize)
        .map(|block| compress_block(block, method))
        .collect()
}

/// Holds at most one materialized chunk of the payload region.
///
/// Replaced wholesale whenever a read lands in a different chunk.
#[derive(Debug, Default)]
pub(crate) struct ChunkCache {
    index: Option<usize>,
    buffer: Vec<u8>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.index = None;
        self.buffer.clear();
    }

    /// Deliver the decompressed bytes of chunk `index`, reading and
    /// decompressing it from `reader` unless it is already cached.
    ///
    /// Any structural mismatch is a fatal corruption error: the package no
    /// longer matches the format's assumptions and the operation aborts.
    #[instrument(skip(self, reader, chunk))]
    pub fn materialize<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        index: usize,
        chunk: &ChunkEntry,
        method: CompressionType,
    ) -> Result<&[u8]> {
        if self.index == Some(index) {
            return Ok(&self.buffer);
        }
        self.invalidate();

        reader.seek(SeekFrom::Start(chunk.compressed_offset as u64))?;
        let header = ChunkHeader::read(reader)?;
        if header.tag != PACKAGE_TAG {
            return Err(Error::Corrupt("wrong chunk block tag"));
        }
        if header.block_size != MAX_BLOCK_SIZE {
            return Err(Error::Corrupt("wrong chunk block size"));
        }
        if header.uncompressed_size != chunk.uncompressed_size {
            return Err(Error::Corrupt("chunk uncompressed size mismatch"));
        }

        let block_count = header.uncompressed_size.div_ceil(MAX_BLOCK_SIZE);
        let table_size = CHUNK_HEADER_SIZE + BLOCK_ENTRY_SIZE * block_count;
        if header.compressed_size + table_size != chunk.compressed_size {
            return Err(Error::Corrupt("chunk compressed size mismatch"));
        }

        let mut blocks = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            blocks.push(BlockEntry::read(reader)?);
        }

        let mut compressed = Vec::with_capacity(blocks.len());
        for block in &blocks {
            let mut data = vec![0u8; block.compressed_size as usize];
            reader.read_exact(&mut data)?;
            compressed.push(data);
        }

        // Blocks are independent; processing order is unconstrained but the
        // concatenation order stays the on-disk block table order.
        let decompressed: Vec<Vec<u8>> = blocks
            .par_iter()
            .zip(&compressed)
            .map(|(block, data)| decompress_block(data, block.uncompressed_size as usize, method))
            .collect::<Result<_>>()?;

        self.buffer = decompressed.concat();
        self.index = Some(index);
        Ok(&self.buffer)
    }
}
