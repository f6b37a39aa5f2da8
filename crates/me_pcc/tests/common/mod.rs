//! Synthetic package fixtures for the integration tests.

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::{write::ZlibEncoder, Compression};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const PACKAGE_TAG: u32 = 0x9E2A_83C1;
pub const MAX_BLOCK_SIZE: u32 = 0x2_0000;
pub const FILE_MARKER: &[u8] = b"ThisIsMEMEndOfFileMarker";

/// One export to place in the fixture, in payload order.
pub struct ExportSpec {
    pub name_id: usize,
    pub class_id: i32,
    pub link_id: i32,
    pub payload: Vec<u8>,
}

impl ExportSpec {
    pub fn new(name_id: usize, payload: Vec<u8>) -> Self {
        ExportSpec {
            name_id,
            class_id: 0,
            link_id: 0,
            payload,
        }
    }
}

/// Builds well-formed package images the way the games lay them out:
/// depends, (guids), names, imports, exports, then the payload blobs.
pub struct PackageBuilder {
    pub version: u16,
    pub names: Vec<String>,
    /// (class_id, link_id, name_id) triples
    pub imports: Vec<(i32, i32, usize)>,
    pub exports: Vec<ExportSpec>,
    /// Zero padding between the end of the tables and the first payload
    pub slack: u32,
}

impl PackageBuilder {
    pub fn new(version: u16) -> Self {
        PackageBuilder {
            version,
            names: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            slack: 0,
        }
    }

    pub fn me3() -> Self {
        Self::new(684)
    }

    pub fn name(mut self, name: &str) -> Self {
        self.names.push(name.to_owned());
        self
    }

    pub fn import(mut self, class_id: i32, link_id: i32, name_id: usize) -> Self {
        self.imports.push((class_id, link_id, name_id));
        self
    }

    pub fn export(mut self, spec: ExportSpec) -> Self {
        self.exports.push(spec);
        self
    }

    pub fn slack(mut self, slack: u32) -> Self {
        self.slack = slack;
        self
    }

    fn header_size(&self) -> usize {
        match self.version {
            491 => 121,
            512 => 117,
            684 => 126,
            _ => panic!("unknown version"),
        }
    }

    fn name_entry_size(&self, name: &str) -> u32 {
        let flags = match self.version {
            491 => 8,
            512 => 4,
            _ => 0,
        };
        4 + name.len() as u32 + 1 + flags
    }

    fn export_record_size(&self) -> u32 {
        if self.version == 684 {
            68
        } else {
            72
        }
    }

    /// Offset of the first byte of the payload address space: right after
    /// the compression tag, chunk count, package source and extra names.
    pub fn data_offset(&self) -> u32 {
        let me2_extra = if self.version == 512 { 4 } else { 0 };
        self.header_size() as u32 + 4 + 4 + 4 + me2_extra + 4
    }

    /// Build the uncompressed on-disk image.
    pub fn build(&self) -> Vec<u8> {
        let data_offset = self.data_offset();
        let depends_offset = data_offset;
        let depends_size = 4 * self.exports.len() as u32;
        let guids_offset = depends_offset + depends_size;
        let names_offset = guids_offset; // empty guid table
        let names_size: u32 = self.names.iter().map(|n| self.name_entry_size(n)).sum();
        let imports_offset = names_offset + names_size;
        let imports_size = 28 * self.imports.len() as u32;
        let exports_offset = imports_offset + imports_size;
        let exports_size = self.export_record_size() * self.exports.len() as u32;
        let end_of_tables = exports_offset + exports_size + self.slack;

        let mut payload_offsets = Vec::new();
        let mut cursor = end_of_tables;
        for export in &self.exports {
            payload_offsets.push(cursor);
            cursor += export.payload.len() as u32;
        }

        let mut image = Vec::new();

        // fixed header
        image.write_u32::<LittleEndian>(PACKAGE_TAG).unwrap();
        image.write_u16::<LittleEndian>(self.version).unwrap();
        image.write_u16::<LittleEndian>(0).unwrap();
        image.write_u32::<LittleEndian>(end_of_tables).unwrap();
        image.write_i32::<LittleEndian>(5).unwrap();
        image.extend_from_slice(b"None\0");
        image.write_u32::<LittleEndian>(0).unwrap();
        image
            .write_u32::<LittleEndian>(self.names.len() as u32)
            .unwrap();
        image.write_u32::<LittleEndian>(names_offset).unwrap();
        image
            .write_u32::<LittleEndian>(self.exports.len() as u32)
            .unwrap();
        image.write_u32::<LittleEndian>(exports_offset).unwrap();
        image
            .write_u32::<LittleEndian>(self.imports.len() as u32)
            .unwrap();
        image.write_u32::<LittleEndian>(imports_offset).unwrap();
        image.write_u32::<LittleEndian>(depends_offset).unwrap();
        if self.version == 684 {
            image.write_u32::<LittleEndian>(guids_offset).unwrap();
            image.write_u32::<LittleEndian>(0).unwrap();
            image.write_u32::<LittleEndian>(0).unwrap(); // guid count
        }
        image.resize(self.header_size(), 0);

        // compression tag, chunk count, package source, extra names
        image.write_u32::<LittleEndian>(0).unwrap();
        image.write_u32::<LittleEndian>(0).unwrap();
        image.write_u32::<LittleEndian>(0).unwrap();
        if self.version == 512 {
            image.write_u32::<LittleEndian>(0).unwrap();
        }
        image.write_u32::<LittleEndian>(0).unwrap();
        assert_eq!(image.len() as u32, data_offset);

        // depends
        for _ in &self.exports {
            image.write_i32::<LittleEndian>(0).unwrap();
        }

        // names, single byte encoding with terminator
        for name in &self.names {
            image
                .write_i32::<LittleEndian>(name.len() as i32 + 1)
                .unwrap();
            image.extend_from_slice(name.as_bytes());
            image.push(0);
            match self.version {
                491 => image.write_u64::<LittleEndian>(0).unwrap(),
                512 => image.write_u32::<LittleEndian>(0).unwrap(),
                _ => {}
            }
        }
        assert_eq!(image.len() as u32, imports_offset);

        // imports
        for &(class_id, link_id, name_id) in &self.imports {
            image.write_i32::<LittleEndian>(0).unwrap(); // package file id
            image.write_i32::<LittleEndian>(0).unwrap();
            image.write_i32::<LittleEndian>(class_id).unwrap();
            image.write_i32::<LittleEndian>(0).unwrap();
            image.write_i32::<LittleEndian>(link_id).unwrap();
            image.write_i32::<LittleEndian>(name_id as i32).unwrap();
            image.write_i32::<LittleEndian>(0).unwrap();
        }

        // exports
        for (export, &offset) in self.exports.iter().zip(&payload_offsets) {
            image.write_i32::<LittleEndian>(export.class_id).unwrap();
            image.write_i32::<LittleEndian>(0).unwrap();
            image.write_i32::<LittleEndian>(export.link_id).unwrap();
            image
                .write_i32::<LittleEndian>(export.name_id as i32)
                .unwrap();
            image.write_i32::<LittleEndian>(0).unwrap();
            image.write_i32::<LittleEndian>(0).unwrap();
            image.write_u64::<LittleEndian>(0).unwrap();
            image
                .write_u32::<LittleEndian>(export.payload.len() as u32)
                .unwrap();
            image.write_u32::<LittleEndian>(offset).unwrap();
            if self.version != 684 {
                image.write_u32::<LittleEndian>(0).unwrap(); // component map count
            }
            image.write_i32::<LittleEndian>(0).unwrap();
            image.write_u32::<LittleEndian>(0).unwrap(); // net object count
            image.extend_from_slice(&[0u8; 16]); // guid
            image.write_u32::<LittleEndian>(0).unwrap();
        }
        assert_eq!(image.len() as u32, end_of_tables - self.slack);
        image.resize(end_of_tables as usize, 0);

        // payloads
        for export in &self.exports {
            image.extend_from_slice(&export.payload);
        }

        image
    }

    /// Build a chunk-compressed (zlib) image. `splits` are absolute
    /// uncompressed offsets where additional chunks start; the first chunk
    /// always starts at the data offset and the last ends at the payload end.
    pub fn build_compressed(&self, splits: &[u32]) -> Vec<u8> {
        let uncompressed = self.build();
        let data_offset = self.data_offset();
        let payload_end = uncompressed.len() as u32;

        let mut bounds = vec![data_offset];
        bounds.extend_from_slice(splits);
        bounds.push(payload_end);

        let mut image = Vec::new();
        image.extend_from_slice(&uncompressed[..self.header_size()]);
        image.write_u32::<LittleEndian>(1).unwrap(); // zlib
        image
            .write_u32::<LittleEndian>(bounds.len() as u32 - 1)
            .unwrap();
        let chunk_table_offset = image.len();
        image.resize(image.len() + 16 * (bounds.len() - 1), 0);
        image.write_u32::<LittleEndian>(0).unwrap(); // package source
        if self.version == 512 {
            image.write_u32::<LittleEndian>(0).unwrap();
        }
        image.write_u32::<LittleEndian>(0).unwrap(); // extra names

        for (i, window) in bounds.windows(2).enumerate() {
            let (start, end) = (window[0], window[1]);
            let chunk_data = &uncompressed[start as usize..end as usize];
            let compressed_offset = image.len() as u32;

            let blocks: Vec<&[u8]> = chunk_data.chunks(MAX_BLOCK_SIZE as usize).collect();
            let mut compressed_blocks = Vec::new();
            for block in &blocks {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(block).unwrap();
                compressed_blocks.push(encoder.finish().unwrap());
            }
            let raw_size: u32 = compressed_blocks.iter().map(|b| b.len() as u32).sum();

            image.write_u32::<LittleEndian>(PACKAGE_TAG).unwrap();
            image.write_u32::<LittleEndian>(MAX_BLOCK_SIZE).unwrap();
            image.write_u32::<LittleEndian>(raw_size).unwrap();
            image
                .write_u32::<LittleEndian>(chunk_data.len() as u32)
                .unwrap();
            for (block, raw) in blocks.iter().zip(&compressed_blocks) {
                image.write_u32::<LittleEndian>(raw.len() as u32).unwrap();
                image.write_u32::<LittleEndian>(block.len() as u32).unwrap();
            }
            for raw in &compressed_blocks {
                image.extend_from_slice(raw);
            }

            let total = raw_size + 16 + 8 * blocks.len() as u32;
            let entry = chunk_table_offset + 16 * i;
            image[entry..entry + 4].copy_from_slice(&start.to_le_bytes());
            image[entry + 4..entry + 8].copy_from_slice(&(end - start).to_le_bytes());
            image[entry + 8..entry + 12].copy_from_slice(&compressed_offset.to_le_bytes());
            image[entry + 12..entry + 16].copy_from_slice(&total.to_le_bytes());
        }

        image
    }
}

/// Write an image into `dir` and return its path.
pub fn write_package(dir: &Path, name: &str, image: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, image).unwrap();
    path
}
