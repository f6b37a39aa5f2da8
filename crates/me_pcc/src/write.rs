//! Types for committing package files
//!

use binrw::BinWrite;
use bon::Builder;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::{
    compression::{compress_blocks, CompressionType},
    error::{Error, Result},
    read::Package,
    types::{
        BlockEntry, ChunkEntry, ChunkHeader, PackageVersion, BLOCK_ENTRY_SIZE, CHUNK_HEADER_SIZE,
        FILE_MARKER, MAX_BLOCK_SIZE, MAX_CHUNK_SIZE, PACKAGE_TAG,
    },
};

/// Options for how the package should be committed
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct SaveOptions {
    /// Recompress the payload region even when the package was opened
    /// uncompressed. Ignored on ME1 packages, and overridden when the
    /// metadata tables cannot be placed before the payload.
    #[builder(default)]
    pub force_compress: bool,

    /// Write the payload region uncompressed even when the package was
    /// opened compressed.
    #[builder(default)]
    pub force_decompress: bool,

    /// Append the trailer marker after all package data. A marker already
    /// present on the original file is preserved regardless.
    #[builder(default)]
    pub append_marker: bool,
}

/// Result of a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveStatus {
    /// A new file image was built and the original file was replaced
    Changed,
    /// Nothing was modified and no forced recompression was requested; the
    /// file on disk is untouched
    Unchanged,
}

impl Package {
    /// Rebuild the container and atomically replace the file on disk.
    ///
    /// The whole image is constructed in memory first; the original file is
    /// only replaced once the new image is complete. Tables that no longer
    /// fit in front of the payload are placed there by relocating leading
    /// exports when possible, otherwise appended after the payload — in
    /// which case the output is always written uncompressed.
    #[instrument(skip(self), err)]
    pub fn save(mut self, options: SaveOptions) -> Result<SaveStatus> {
        let mut force_compress = options.force_compress;
        if self.version == PackageVersion::Me1 {
            force_compress = false;
        }

        if !self.modified && !options.force_decompress && !force_compress {
            return Ok(SaveStatus::Unchanged);
        }
        if force_compress && options.force_decompress {
            return Err(Error::ConflictingSaveOptions);
        }

        let target_compression = if force_compress {
            CompressionType::Zlib
        } else {
            self.compression
        };

        let mut append_marker = options.append_marker;
        if !append_marker {
            self.stream
                .seek(SeekFrom::End(-(FILE_MARKER.len() as i64)))?;
            let mut marker = vec![0u8; FILE_MARKER.len()];
            self.stream.read_exact(&mut marker)?;
            if marker == FILE_MARKER {
                append_marker = true;
            }
        }

        let mut image = Cursor::new(Vec::new());
        image.write_all(self.header.bytes())?;
        image.write_u32::<LittleEndian>(target_compression as u32)?;
        image.write_u32::<LittleEndian>(0)?; // chunk count, only nonzero on disk
        image.write_u32::<LittleEndian>(self.package_source)?;
        if self.version == PackageVersion::Me2 {
            image.write_u32::<LittleEndian>(0)?; // const 0
        }
        self.save_extra_names(&mut image)?;
        let data_offset = image.position();

        let mut sorted = self.exports_sorted_by_offset();
        let mut first_offset = sorted
            .first()
            .map(|&(_, offset, _)| offset as u64)
            .unwrap_or(u64::MAX);

        self.header.set_depends_offset(image.position() as u32);
        self.save_depends(&mut image)?;
        if image.position() > first_offset {
            return Err(Error::Corrupt("depends table overruns the payload region"));
        }

        if self.version.has_guids() {
            self.header.set_guids_offset(image.position() as u32);
            self.save_guids(&mut image)?;
            if image.position() > first_offset {
                return Err(Error::Corrupt("guid table overruns the payload region"));
            }
        }

        let mut names_in_place = true;
        let mut imports_in_place = true;
        let mut exports_in_place = true;

        self.header.set_end_of_tables(image.position() as u32);
        let names_offset = image.position();
        self.save_names(&mut image)?;
        if image.position() > first_offset {
            let needed = image.position() - self.header.end_of_tables() as u64;
            if self.reserve_space_before_exports(needed as u32)? {
                image.set_position(names_offset);
                self.save_names(&mut image)?;
                sorted = self.exports_sorted_by_offset();
                first_offset = sorted[0].1 as u64;
            } else {
                names_in_place = false;
            }
        }
        if names_in_place {
            self.header.set_names_offset(names_offset as u32);

            self.header.set_end_of_tables(image.position() as u32);
            let imports_offset = image.position();
            self.save_imports(&mut image)?;
            if image.position() > first_offset {
                let needed = image.position() - self.header.end_of_tables() as u64;
                if self.reserve_space_before_exports(needed as u32)? {
                    image.set_position(imports_offset);
                    self.save_imports(&mut image)?;
                    sorted = self.exports_sorted_by_offset();
                    first_offset = sorted[0].1 as u64;
                } else {
                    imports_in_place = false;
                }
            }
            if imports_in_place {
                self.header.set_imports_offset(imports_offset as u32);

                self.header.set_end_of_tables(image.position() as u32);
                let exports_offset = image.position();
                self.save_exports(&mut image)?;
                if image.position() > first_offset {
                    let needed = image.position() - self.header.end_of_tables() as u64;
                    if self.reserve_space_before_exports(needed as u32)? {
                        // relocation patched the export records, rewrite them
                        image.set_position(exports_offset);
                        self.save_exports(&mut image)?;
                    } else {
                        exports_in_place = false;
                    }
                }
                if exports_in_place {
                    self.header.set_exports_offset(exports_offset as u32);
                }
            }
        }

        sorted = self.exports_sorted_by_offset();
        let payload_start = sorted
            .first()
            .map(|&(_, offset, _)| offset)
            .unwrap_or(image.position() as u32);
        self.header.set_end_of_tables(payload_start);

        let exports_end = if sorted.is_empty() {
            payload_start
        } else {
            self.exports_end_offset
        };

        // Stream every payload in offset order; slack left behind by shrunk
        // payloads is zero filled.
        for (i, &(id, offset, size)) in sorted.iter().enumerate() {
            image.set_position(offset as u64);
            let next = if i + 1 == sorted.len() {
                exports_end
            } else {
                sorted[i + 1].1
            };
            let slack = next
                .checked_sub(offset + size)
                .ok_or(Error::Corrupt("export payloads overlap"))?;

            let data = match self.exports[id].new_data.take() {
                Some(data) => data,
                None => self.read_data(offset as u64, size as u64)?,
            };
            image.write_all(&data)?;
            image.write_all(&vec![0u8; slack as usize])?;
        }

        image.set_position(exports_end as u64);

        if !names_in_place {
            let position = image.position();
            self.save_names(&mut image)?;
            self.header.set_names_offset(position as u32);
        }
        if !imports_in_place {
            let position = image.position();
            self.save_imports(&mut image)?;
            self.header.set_imports_offset(position as u32);
        }
        if !exports_in_place {
            self.header.set_exports_offset(image.position() as u32);
            self.save_exports(&mut image)?;
        }

        let mut compressed = self.compression != CompressionType::None;
        if (options.force_decompress && compressed)
            || !names_in_place
            || !imports_in_place
            || !exports_in_place
        {
            // appended tables and compression are mutually exclusive
            compressed = false;
        }
        if force_compress && !compressed {
            if names_in_place && imports_in_place && exports_in_place {
                compressed = true;
            } else if !self.modified {
                return Ok(SaveStatus::Unchanged);
            }
        }

        // Patch the final header and, for uncompressed output, the
        // compression tag into the image.
        image.set_position(0);
        image.write_all(self.header.bytes())?;
        if !compressed {
            image.write_u32::<LittleEndian>(CompressionType::None as u32)?;
        }

        debug!(
            compressed,
            names_in_place, imports_in_place, exports_in_place, "built package image"
        );

        let directory = self.path.parent().unwrap_or(std::path::Path::new("."));
        let mut output = NamedTempFile::new_in(directory)?;

        if !compressed {
            output.write_all(image.get_ref())?;
        } else {
            let spans: Vec<u32> = sorted
                .iter()
                .enumerate()
                .map(|(i, &(_, offset, _))| {
                    if i + 1 == sorted.len() {
                        exports_end - offset
                    } else {
                        sorted[i + 1].1 - offset
                    }
                })
                .collect();
            let mut chunks = layout_chunks(data_offset as u32, payload_start, &spans);

            output.write_all(self.header.bytes())?;
            output.write_u32::<LittleEndian>(target_compression as u32)?;
            output.write_u32::<LittleEndian>(chunks.len() as u32)?;
            let chunks_table_offset = output.stream_position()?;
            output.seek(SeekFrom::Current(
                (CHUNK_HEADER_SIZE as u64 * chunks.len() as u64) as i64,
            ))?;
            output.write_u32::<LittleEndian>(self.package_source)?;
            if self.version == PackageVersion::Me2 {
                output.write_u32::<LittleEndian>(0)?;
            }
            self.save_extra_names(&mut output)?;

            for chunk in &mut chunks {
                chunk.compressed_offset = output.stream_position()? as u32;
                let block_count = chunk.uncompressed_size.div_ceil(MAX_BLOCK_SIZE);
                output.seek(SeekFrom::Current(
                    (CHUNK_HEADER_SIZE + BLOCK_ENTRY_SIZE * block_count) as i64,
                ))?;

                let start = chunk.uncompressed_offset as usize;
                let end = start + chunk.uncompressed_size as usize;
                let raw = &image.get_ref()[start..end];
                let compressed_blocks = compress_blocks(raw, target_compression)?;

                let mut block_entries = Vec::with_capacity(compressed_blocks.len());
                let mut compressed_size = 0u32;
                for (block, data) in raw
                    .chunks(MAX_BLOCK_SIZE as usize)
                    .zip(&compressed_blocks)
                {
                    output.write_all(data)?;
                    block_entries.push(BlockEntry {
                        compressed_size: data.len() as u32,
                        uncompressed_size: block.len() as u32,
                    });
                    compressed_size += data.len() as u32;
                }

                let position = output.stream_position()?;
                output.seek(SeekFrom::Start(chunk.compressed_offset as u64))?;
                ChunkHeader {
                    tag: PACKAGE_TAG,
                    block_size: MAX_BLOCK_SIZE,
                    compressed_size,
                    uncompressed_size: chunk.uncompressed_size,
                }
                .write(&mut output)?;
                for entry in &block_entries {
                    entry.write(&mut output)?;
                }
                output.seek(SeekFrom::Start(position))?;

                chunk.compressed_size =
                    compressed_size + CHUNK_HEADER_SIZE + BLOCK_ENTRY_SIZE * block_count;
            }

            let end = output.stream_position()?;
            output.seek(SeekFrom::Start(chunks_table_offset))?;
            for chunk in &chunks {
                chunk.write(&mut output)?;
            }
            output.seek(SeekFrom::Start(end))?;
        }

        if append_marker {
            output.seek(SeekFrom::End(0))?;
            output.write_all(FILE_MARKER)?;
        }
        output.flush()?;

        let path = self.path.clone();
        drop(self); // release the original file before replacing it
        output
            .persist(&path)
            .map_err(|persist| Error::IOError(persist.error))?;

        Ok(SaveStatus::Changed)
    }

    fn save_extra_names<W: Write>(&self, output: &mut W) -> Result<()> {
        output.write_u32::<LittleEndian>(self.extra_names.len() as u32)?;
        for entry in &self.extra_names {
            if self.version.wide_names() {
                output.write_i32::<LittleEndian>(-((entry.raw.len() / 2) as i32))?;
            } else {
                output.write_i32::<LittleEndian>(entry.raw.len() as i32)?;
            }
            output.write_all(&entry.raw)?;
        }
        Ok(())
    }

    fn save_names<W: Write>(&mut self, output: &mut W) -> Result<()> {
        if !self.names_modified {
            let offset = self.header.names_offset() as u64;
            let bytes = self.table_bytes(offset, self.names_end - offset)?;
            output.write_all(&bytes)?;
            return Ok(());
        }

        for entry in &self.names {
            if self.version.wide_names() {
                let units: Vec<u16> = entry.name.encode_utf16().collect();
                output.write_i32::<LittleEndian>(-(units.len() as i32 + 1))?;
                for unit in units {
                    output.write_u16::<LittleEndian>(unit)?;
                }
                output.write_u16::<LittleEndian>(0)?;
            } else {
                output.write_i32::<LittleEndian>(entry.name.len() as i32 + 1)?;
                output.write_all(entry.name.as_bytes())?;
                output.write_u8(0)?;
            }
            match self.version {
                PackageVersion::Me1 => output.write_u64::<LittleEndian>(entry.flags)?,
                PackageVersion::Me2 => output.write_u32::<LittleEndian>(entry.flags as u32)?,
                PackageVersion::Me3 => {}
            }
        }
        Ok(())
    }

    fn save_imports<W: Write>(&mut self, output: &mut W) -> Result<()> {
        if !self.imports_modified {
            let offset = self.header.imports_offset() as u64;
            let bytes = self.table_bytes(offset, self.imports_end - offset)?;
            output.write_all(&bytes)?;
            return Ok(());
        }

        for entry in &self.imports {
            output.write_all(&entry.raw)?;
        }
        Ok(())
    }

    fn save_exports<W: Write>(&self, output: &mut W) -> Result<()> {
        for entry in &self.exports {
            output.write_all(&entry.raw)?;
        }
        Ok(())
    }

    fn save_depends<W: Write>(&self, output: &mut W) -> Result<()> {
        for entry in &self.depends {
            output.write_i32::<LittleEndian>(*entry)?;
        }
        Ok(())
    }

    fn save_guids<W: Write>(&self, output: &mut W) -> Result<()> {
        for entry in &self.guids {
            output.write_all(&entry.guid)?;
            output.write_i32::<LittleEndian>(entry.export_id)?;
        }
        Ok(())
    }
}

/// Partition the payload region into chunks.
///
/// The first chunk starts with the metadata region `[data_offset,
/// first payload offset)`; every export span is appended to the current
/// chunk unless that would exceed [`MAX_CHUNK_SIZE`], which starts a new
/// chunk. The result tiles `[data_offset, data_offset + total)` with no
/// gaps.
pub(crate) fn layout_chunks(data_offset: u32, payload_start: u32, spans: &[u32]) -> Vec<ChunkEntry> {
    let mut chunks = Vec::new();
    let mut chunk = ChunkEntry {
        uncompressed_offset: data_offset,
        uncompressed_size: payload_start - data_offset,
        ..Default::default()
    };
    for &span in spans {
        if chunk.uncompressed_size + span > MAX_CHUNK_SIZE {
            let offset = chunk.uncompressed_end();
            chunks.push(chunk);
            chunk = ChunkEntry {
                uncompressed_offset: offset,
                uncompressed_size: span,
                ..Default::default()
            };
        } else {
            chunk.uncompressed_size += span;
        }
    }
    chunks.push(chunk);
    chunks
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::layout_chunks;
    use crate::types::MAX_CHUNK_SIZE;

    #[test]
    fn single_chunk_holds_small_payloads() {
        let chunks = layout_chunks(100, 300, &[50, 70]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].uncompressed_offset, 100);
        assert_eq!(chunks[0].uncompressed_size, 320);
    }

    #[test]
    fn chunks_split_at_the_size_bound() {
        let spans = [MAX_CHUNK_SIZE - 500, 600, 700];
        let chunks = layout_chunks(0, 100, &spans);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].uncompressed_size, 100 + MAX_CHUNK_SIZE - 500);
        assert_eq!(chunks[1].uncompressed_offset, chunks[0].uncompressed_end());
        assert_eq!(chunks[1].uncompressed_size, 1300);
    }

    #[test]
    fn oversized_span_becomes_its_own_chunk() {
        let spans = [200, MAX_CHUNK_SIZE * 2, 10];
        let chunks = layout_chunks(0, 64, &spans);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].uncompressed_size, MAX_CHUNK_SIZE * 2);
    }

    #[test]
    fn chunks_tile_without_gaps() {
        let spans = [MAX_CHUNK_SIZE / 2, MAX_CHUNK_SIZE / 2, MAX_CHUNK_SIZE / 2, 33];
        let chunks = layout_chunks(1000, 2000, &spans);

        let total: u32 = 1000 + chunks.iter().map(|c| c.uncompressed_size).sum::<u32>();
        assert_eq!(total, 2000 + spans.iter().sum::<u32>());
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].uncompressed_end(), pair[1].uncompressed_offset);
        }
    }
}
