//! Types for opening and reading package files
//!

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use indexmap::IndexMap;
use std::{
    fs::File,
    io::{Cursor, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};
use tracing::{debug, instrument};

use crate::{
    compression::{ChunkCache, CompressionType},
    error::{EntryNotFoundError, Error, Result},
    types::{
        ChunkEntry, ExportEntry, ExtraNameEntry, GuidEntry, ImportEntry, NameEntry, ObjectRef,
        PackageVersion, NEW_NAME_FLAGS_ME1, NEW_NAME_FLAGS_ME2, PACKAGE_TAG,
    },
};

use binrw::BinRead;

/// The raw fixed header, owned verbatim.
///
/// The header is opaque except for a handful of u32 fields at known
/// positions which are read and patched in place; everything else is
/// written back bit-for-bit.
#[derive(Debug, Clone)]
pub(crate) struct Header {
    bytes: Vec<u8>,
    tables_offset: usize,
}

impl Header {
    /// End-of-tables field: the lowest export payload offset.
    const END_OF_TABLES: usize = 8;

    /// i32 length of the folder-name string; negative means wide.
    const FOLDER_NAME_LEN: usize = 12;

    const NAMES_COUNT: usize = 0;
    const NAMES_OFFSET: usize = 4;
    const EXPORTS_COUNT: usize = 8;
    const EXPORTS_OFFSET: usize = 12;
    const IMPORTS_COUNT: usize = 16;
    const IMPORTS_OFFSET: usize = 20;
    const DEPENDS_OFFSET: usize = 24;
    const GUIDS_OFFSET: usize = 28;
    const GUIDS_COUNT: usize = 36;

    pub fn parse(bytes: Vec<u8>, version: PackageVersion) -> Result<Self> {
        if bytes.len() < Self::FOLDER_NAME_LEN + 4 {
            return Err(Error::Corrupt("header too small for the folder name"));
        }
        let len = LittleEndian::read_i32(&bytes[Self::FOLDER_NAME_LEN..]);
        let folder_len = if len < 0 {
            (-(len as i64) * 2) as usize
        } else {
            len as usize
        };
        let tables_offset = Self::FOLDER_NAME_LEN + 4 + folder_len + 4;

        let table_fields = if version.has_guids() {
            Self::GUIDS_COUNT + 4
        } else {
            Self::DEPENDS_OFFSET + 4
        };
        if tables_offset + table_fields > bytes.len() {
            return Err(Error::Corrupt("header too small for its table fields"));
        }

        Ok(Header {
            bytes,
            tables_offset,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn u32_at(&self, offset: usize) -> u32 {
        LittleEndian::read_u32(&self.bytes[offset..])
    }

    fn set_u32_at(&mut self, offset: usize, value: u32) {
        LittleEndian::write_u32(&mut self.bytes[offset..], value);
    }

    pub fn end_of_tables(&self) -> u32 {
        self.u32_at(Self::END_OF_TABLES)
    }

    pub fn set_end_of_tables(&mut self, value: u32) {
        self.set_u32_at(Self::END_OF_TABLES, value);
    }

    pub fn names_count(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::NAMES_COUNT)
    }

    pub fn set_names_count(&mut self, value: u32) {
        self.set_u32_at(self.tables_offset + Self::NAMES_COUNT, value);
    }

    pub fn names_offset(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::NAMES_OFFSET)
    }

    pub fn set_names_offset(&mut self, value: u32) {
        self.set_u32_at(self.tables_offset + Self::NAMES_OFFSET, value);
    }

    pub fn exports_count(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::EXPORTS_COUNT)
    }

    pub fn exports_offset(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::EXPORTS_OFFSET)
    }

    pub fn set_exports_offset(&mut self, value: u32) {
        self.set_u32_at(self.tables_offset + Self::EXPORTS_OFFSET, value);
    }

    pub fn imports_count(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::IMPORTS_COUNT)
    }

    pub fn imports_offset(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::IMPORTS_OFFSET)
    }

    pub fn set_imports_offset(&mut self, value: u32) {
        self.set_u32_at(self.tables_offset + Self::IMPORTS_OFFSET, value);
    }

    pub fn depends_offset(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::DEPENDS_OFFSET)
    }

    pub fn set_depends_offset(&mut self, value: u32) {
        self.set_u32_at(self.tables_offset + Self::DEPENDS_OFFSET, value);
    }

    pub fn guids_offset(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::GUIDS_OFFSET)
    }

    pub fn set_guids_offset(&mut self, value: u32) {
        self.set_u32_at(self.tables_offset + Self::GUIDS_OFFSET, value);
    }

    pub fn guids_count(&self) -> u32 {
        self.u32_at(self.tables_offset + Self::GUIDS_COUNT)
    }
}

/// Name-table indices of the texture-family classes, cached while scanning
/// names. First occurrence wins; later duplicates are ignored.
#[derive(Debug, Default)]
pub(crate) struct TextureClassIds {
    texture2d: Option<usize>,
    lightmap_texture2d: Option<usize>,
    shadowmap_texture2d: Option<usize>,
    texture_flipbook: Option<usize>,
}

impl TextureClassIds {
    fn scan(names: &[NameEntry]) -> Self {
        let mut ids = TextureClassIds::default();
        for (i, entry) in names.iter().enumerate() {
            match &*entry.name {
                "Texture2D" if ids.texture2d.is_none() => ids.texture2d = Some(i),
                "LightMapTexture2D" if ids.lightmap_texture2d.is_none() => {
                    ids.lightmap_texture2d = Some(i)
                }
                "ShadowMapTexture2D" if ids.shadowmap_texture2d.is_none() => {
                    ids.shadowmap_texture2d = Some(i)
                }
                "TextureFlipBook" if ids.texture_flipbook.is_none() => {
                    ids.texture_flipbook = Some(i)
                }
                _ => {}
            }
        }
        ids
    }

    fn contains(&self, name_id: usize) -> bool {
        [
            self.texture2d,
            self.lightmap_texture2d,
            self.shadowmap_texture2d,
            self.texture_flipbook,
        ]
        .contains(&Some(name_id))
    }
}

/// An open package file.
///
/// Constructed by [`Package::open`], mutated in memory through the payload
/// and name operations, and committed with [`Package::save`], which
/// consumes the package and atomically replaces the file on disk.
pub struct Package {
    pub(crate) path: PathBuf,
    pub(crate) stream: File,
    pub(crate) header: Header,
    pub(crate) version: PackageVersion,
    pub(crate) compression: CompressionType,
    pub(crate) package_source: u32,
    pub(crate) chunks: Vec<ChunkEntry>,
    /// Decompressed `[0, end_of_tables)` image for compressed packages;
    /// positions below `data_offset` are zero filler so the cursor can be
    /// addressed with absolute offsets.
    pub(crate) table_data: Option<Cursor<Vec<u8>>>,
    pub(crate) cache: ChunkCache,
    pub(crate) names: Vec<NameEntry>,
    pub(crate) name_ids: IndexMap<Box<str>, usize>,
    pub(crate) extra_names: Vec<ExtraNameEntry>,
    pub(crate) imports: Vec<ImportEntry>,
    pub(crate) exports: Vec<ExportEntry>,
    pub(crate) depends: Vec<i32>,
    pub(crate) guids: Vec<GuidEntry>,
    pub(crate) names_end: u64,
    pub(crate) imports_end: u64,
    pub(crate) exports_end_offset: u32,
    pub(crate) class_ids: TextureClassIds,
    pub(crate) names_modified: bool,
    pub(crate) imports_modified: bool,
    pub(crate) modified: bool,
}

impl Package {
    /// Open a package file and parse all of its tables.
    ///
    /// Validation failures (missing file, zero length, truncated header,
    /// wrong magic, unknown version) are reported as distinct errors and
    /// leave no partial state behind.
    #[instrument(err)]
    pub fn open(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Package> {
        let path = path.as_ref().to_path_buf();
        let display = path.display().to_string();

        let metadata =
            std::fs::metadata(&path).map_err(|_| Error::PackageNotFound(display.clone()))?;
        if metadata.len() == 0 {
            return Err(Error::EmptyPackage(display));
        }
        if metadata.len() < PackageVersion::Me3.header_size() as u64 {
            return Err(Error::BrokenHeader(display));
        }

        let mut stream = File::open(&path)?;
        let tag = stream.read_u32::<LittleEndian>()?;
        if tag != PACKAGE_TAG {
            return Err(Error::WrongTag(tag));
        }
        let wire_version = stream.read_u16::<LittleEndian>()?;
        let version = PackageVersion::from_wire(wire_version)
            .ok_or(Error::UnsupportedVersion(wire_version))?;

        let mut header_bytes = vec![0u8; version.header_size()];
        stream.seek(SeekFrom::Start(0))?;
        stream.read_exact(&mut header_bytes)?;
        let header = Header::parse(header_bytes, version)?;

        let compression: CompressionType = stream.read_u32::<LittleEndian>()?.try_into()?;
        let chunk_count = stream.read_u32::<LittleEndian>()?;
        let chunks_table_offset = stream.stream_position()?;

        let mut chunks = Vec::new();
        if compression != CompressionType::None {
            for _ in 0..chunk_count {
                chunks.push(ChunkEntry::read(&mut stream)?);
            }
        }
        let after_chunks_table = stream.stream_position()?;

        let package_source = stream.read_u32::<LittleEndian>()?;
        if version == PackageVersion::Me2 {
            stream.read_u32::<LittleEndian>()?; // const 0
        }

        let extra_names = load_extra_names(&mut stream)?;

        // Origin of the uncompressed payload address space: the chunk table
        // occupies no space there.
        let data_offset = chunks_table_offset + (stream.stream_position()? - after_chunks_table);

        let mut cache = ChunkCache::new();
        let mut table_data = None;
        if compression != CompressionType::None {
            let Some(first) = chunks.first() else {
                return Err(Error::Corrupt("compressed package without chunks"));
            };
            if stream.stream_position()? != first.compressed_offset as u64 {
                return Err(Error::Corrupt("chunk data does not follow the extra names"));
            }
            if data_offset != first.uncompressed_offset as u64 {
                return Err(Error::Corrupt("first chunk does not start at the data offset"));
            }
            let end_of_tables = header.end_of_tables() as u64;
            if end_of_tables < data_offset {
                return Err(Error::Corrupt("end of tables before the data offset"));
            }

            let tables = read_range(
                &mut stream,
                &chunks,
                compression,
                &mut cache,
                data_offset,
                end_of_tables - data_offset,
            )?;
            let mut padded = vec![0u8; data_offset as usize];
            padded.extend_from_slice(&tables);
            table_data = Some(Cursor::new(padded));
        }

        let compressed = table_data.is_some();
        let (names, names_end, imports, imports_end, exports, exports_end_offset, depends, guids) = {
            let source: &mut dyn ReadSeek = match table_data.as_mut() {
                Some(cursor) => cursor,
                None => &mut stream,
            };

            if compressed && header.end_of_tables() < header.names_offset() {
                return Err(Error::Corrupt("names table outside the table region"));
            }
            let (names, names_end) = load_names(
                source,
                version,
                header.names_offset() as u64,
                header.names_count(),
            )?;

            if compressed && header.end_of_tables() < header.imports_offset() {
                return Err(Error::Corrupt("imports table outside the table region"));
            }
            let (imports, imports_end) = load_imports(
                source,
                header.imports_offset() as u64,
                header.imports_count(),
                &names,
            )?;

            let (exports, exports_end_offset) = load_exports(
                source,
                version,
                header.exports_offset() as u64,
                header.exports_count(),
                &names,
            )?;

            let depends =
                load_depends(source, header.depends_offset() as u64, header.exports_count())?;

            let guids = if version.has_guids() {
                load_guids(source, header.guids_offset() as u64, header.guids_count())?
            } else {
                Vec::new()
            };

            (
                names,
                names_end,
                imports,
                imports_end,
                exports,
                exports_end_offset,
                depends,
                guids,
            )
        };

        let class_ids = TextureClassIds::scan(&names);
        let mut name_ids = IndexMap::with_capacity(names.len());
        for (i, entry) in names.iter().enumerate() {
            // first occurrence wins for duplicated names
            name_ids.entry(entry.name.clone()).or_insert(i);
        }

        debug!(
            names = names.len(),
            imports = imports.len(),
            exports = exports.len(),
            ?compression,
            "parsed package"
        );

        Ok(Package {
            path,
            stream,
            header,
            version,
            compression,
            package_source,
            chunks,
            table_data,
            cache,
            names,
            name_ids,
            extra_names,
            imports,
            exports,
            depends,
            guids,
            names_end,
            imports_end,
            exports_end_offset,
            class_ids,
            names_modified: false,
            imports_modified: false,
            modified: false,
        })
    }

    /// The format variant of this package; fixed for its lifetime.
    pub fn version(&self) -> PackageVersion {
        self.version
    }

    /// The compression algorithm the payload region is stored with.
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Whether the payload region is chunk compressed on disk.
    pub fn is_compressed(&self) -> bool {
        self.compression != CompressionType::None
    }

    /// Whether any in-memory mutation has been made since open.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// The path this package was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name_count(&self) -> usize {
        self.names.len()
    }

    pub fn export_count(&self) -> usize {
        self.exports.len()
    }

    pub fn import_count(&self) -> usize {
        self.imports.len()
    }

    /// All export entries, in table order.
    pub fn exports(&self) -> &[ExportEntry] {
        &self.exports
    }

    /// All import entries, in table order.
    pub fn imports(&self) -> &[ImportEntry] {
        &self.imports
    }

    pub fn export(&self, id: usize) -> Result<&ExportEntry> {
        self.exports
            .get(id)
            .ok_or_else(|| EntryNotFoundError::Export(id).into())
    }

    pub fn import(&self, id: usize) -> Result<&ImportEntry> {
        self.imports
            .get(id)
            .ok_or_else(|| EntryNotFoundError::Import(id).into())
    }

    /// Iterate over all names in table order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(|entry| &*entry.name)
    }

    /// Get a name by its table index.
    pub fn name(&self, id: usize) -> Result<&str> {
        self.names
            .get(id)
            .map(|entry| &*entry.name)
            .ok_or_else(|| EntryNotFoundError::Name(id).into())
    }

    /// Get the table index of a name, if present.
    pub fn name_id(&self, name: &str) -> Option<usize> {
        self.name_ids.get(name).copied()
    }

    /// Append a name to the table and return its index.
    ///
    /// Names are never removed and existing indices are never disturbed.
    /// Adding a name that is already present is a usage error.
    #[instrument(skip(self), err)]
    pub fn add_name(&mut self, name: &str) -> Result<usize> {
        if self.name_ids.contains_key(name) {
            return Err(Error::DuplicateName(name.to_owned()));
        }

        let flags = match self.version {
            PackageVersion::Me1 => NEW_NAME_FLAGS_ME1,
            PackageVersion::Me2 => NEW_NAME_FLAGS_ME2,
            PackageVersion::Me3 => 0,
        };
        self.names.push(NameEntry {
            name: name.into(),
            flags,
        });
        let id = self.names.len() - 1;
        self.name_ids.insert(name.into(), id);
        self.header.set_names_count(self.names.len() as u32);
        self.names_modified = true;
        self.modified = true;
        Ok(id)
    }

    /// The object name of the export or import a signed id refers to, or
    /// `"Class"` when the reference resolves to nothing.
    pub fn class_name(&self, id: i32) -> &str {
        match ObjectRef::decode(id) {
            ObjectRef::Export(i) => self.exports.get(i).map(|e| &*e.object_name),
            ObjectRef::Import(i) => self.imports.get(i).map(|e| &*e.object_name),
            ObjectRef::None => None,
        }
        .unwrap_or("Class")
    }

    /// The name-table index of the referenced object's name.
    pub fn class_name_id(&self, id: i32) -> Option<usize> {
        match ObjectRef::decode(id) {
            ObjectRef::Export(i) => self.exports.get(i).map(|e| e.object_name_id()),
            ObjectRef::Import(i) => self.imports.get(i).map(|e| e.object_name_id),
            ObjectRef::None => None,
        }
    }

    /// Resolve a signed object id to a dotted path by walking link ids.
    pub fn object_path(&self, id: i32) -> String {
        self.resolve_path(ObjectRef::decode(id))
    }

    fn resolve_path(&self, reference: ObjectRef) -> String {
        let (name, link) = match reference {
            ObjectRef::Export(i) => match self.exports.get(i) {
                Some(entry) => (&entry.object_name, entry.link()),
                None => return String::new(),
            },
            ObjectRef::Import(i) => match self.imports.get(i) {
                Some(entry) => (&entry.object_name, entry.link),
                None => return String::new(),
            },
            ObjectRef::None => return String::new(),
        };

        let mut path = self.resolve_path(link);
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(name);
        path
    }

    /// Upper bound of the payload region in uncompressed address space.
    pub fn exports_end_offset(&self) -> u32 {
        self.exports_end_offset
    }

    /// Read a byte range of the uncompressed payload address space,
    /// decompressing only the chunks that intersect it.
    pub(crate) fn read_data(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        read_range(
            &mut self.stream,
            &self.chunks,
            self.compression,
            &mut self.cache,
            offset,
            length,
        )
    }

    /// Read bytes of the table region, from the materialized buffer for
    /// compressed packages or straight from the file otherwise.
    pub(crate) fn table_bytes(&mut self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; length as usize];
        match self.table_data.as_mut() {
            Some(cursor) => {
                cursor.set_position(offset);
                cursor.read_exact(&mut buffer)?;
            }
            None => {
                self.stream.seek(SeekFrom::Start(offset))?;
                self.stream.read_exact(&mut buffer)?;
            }
        }
        Ok(buffer)
    }

    /// Get the payload of an export: the in-memory replacement when one has
    /// been set, otherwise the original bytes through the chunk cache.
    #[instrument(skip(self), err)]
    pub fn export_data(&mut self, id: usize) -> Result<Vec<u8>> {
        let entry = self
            .exports
            .get(id)
            .ok_or(EntryNotFoundError::Export(id))?;
        if let Some(data) = &entry.new_data {
            return Ok(data.clone());
        }
        let offset = entry.data_offset() as u64;
        let size = entry.data_size() as u64;
        self.read_data(offset, size)
    }

    /// Replace the payload of an export.
    ///
    /// A payload larger than the previously declared size is relocated to
    /// the end of the payload region; one that fits keeps its offset and
    /// the freed tail is zero padded on save.
    #[instrument(skip(self, data), fields(size = data.len()), err)]
    pub fn set_export_data(&mut self, id: usize, data: Vec<u8>) -> Result<()> {
        let exports_end = self.exports_end_offset;
        let entry = self
            .exports
            .get_mut(id)
            .ok_or(EntryNotFoundError::Export(id))?;

        let size = data.len() as u32;
        if size > entry.data_size() {
            entry.set_data_offset(exports_end);
            self.exports_end_offset = exports_end + size;
        }
        entry.set_data_size(size);
        entry.new_data = Some(data);
        self.modified = true;
        Ok(())
    }

    /// Relocate one export's payload to the end of the payload region,
    /// materializing its bytes in memory.
    fn move_export_data_to_end(&mut self, id: usize) -> Result<()> {
        let data = self.export_data(id)?;
        let end = self.exports_end_offset;
        let entry = &mut self.exports[id];
        entry.set_data_offset(end);
        self.exports_end_offset = end + entry.data_size();
        entry.new_data = Some(data);
        self.modified = true;
        Ok(())
    }

    /// Export ids with their payload offset and size, ordered by ascending
    /// payload offset.
    pub(crate) fn exports_sorted_by_offset(&self) -> Vec<(usize, u32, u32)> {
        let mut sorted: Vec<_> = self
            .exports
            .iter()
            .map(|entry| (entry.id as usize, entry.data_offset(), entry.data_size()))
            .collect();
        sorted.sort_by_key(|&(_, offset, _)| offset);
        sorted
    }

    /// Free at least `space` bytes between the end of the metadata region
    /// and the first export payload by relocating leading exports to the
    /// end of the payload region.
    ///
    /// Runs a dry feasibility pass first, then repeats the walk performing
    /// the relocations; no export is moved unless the whole reservation can
    /// complete. Returns `false` when an ineligible export (a shader cache
    /// object, or a texture-family object on the oldest variant) is reached
    /// before enough space is freed.
    #[instrument(skip(self), err)]
    pub fn reserve_space_before_exports(&mut self, space: u32) -> Result<bool> {
        let sorted = self.exports_sorted_by_offset();
        let Some(&(_, first_offset, _)) = sorted.first() else {
            return Ok(false);
        };
        if self.header.end_of_tables() > first_offset {
            return Err(Error::Corrupt("end of tables beyond the first export"));
        }

        let mut expand = first_offset - self.header.end_of_tables();
        if expand >= space {
            return Ok(true);
        }

        let mut dry_run = true;
        let mut i = 0;
        while i < sorted.len() {
            let (id, _, size) = sorted[i];
            let ineligible = {
                let entry = &self.exports[id];
                let shader_cache = &*entry.object_name == "SeekFreeShaderCache"
                    && self.class_name(entry.class_id()) == "ShaderCache";
                let me1_texture = self.version == PackageVersion::Me1
                    && self
                        .class_name_id(entry.class_id())
                        .is_some_and(|name_id| self.class_ids.contains(name_id));
                shader_cache || me1_texture
            };
            if ineligible {
                return Ok(false);
            }

            expand += size;
            if !dry_run {
                self.move_export_data_to_end(id)?;
            }
            if expand >= space {
                if !dry_run {
                    return Ok(true);
                }
                // The dry run proved feasibility; restart and relocate for
                // real. Nothing may touch the export table between the two
                // passes.
                expand = first_offset - self.header.end_of_tables();
                dry_run = false;
                i = 0;
                continue;
            }
            i += 1;
        }

        Ok(false)
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Package")
            .field("path", &self.path)
            .field("version", &self.version)
            .field("compression", &self.compression)
            .field("names", &self.names.len())
            .field("imports", &self.imports.len())
            .field("exports", &self.exports.len())
            .finish()
    }
}

pub(crate) trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Read `[offset, offset + length)` of the uncompressed payload address
/// space, decompressing only the chunks that intersect the range.
pub(crate) fn read_range<R: Read + Seek>(
    stream: &mut R,
    chunks: &[ChunkEntry],
    compression: CompressionType,
    cache: &mut ChunkCache,
    offset: u64,
    length: u64,
) -> Result<Vec<u8>> {
    if compression == CompressionType::None {
        stream.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; length as usize];
        stream.read_exact(&mut buffer)?;
        return Ok(buffer);
    }

    let mut output = Vec::with_capacity(length as usize);
    let mut bytes_left = length;
    for (index, chunk) in chunks.iter().enumerate() {
        if chunk.uncompressed_end() as u64 <= offset {
            continue;
        }
        let start_in_chunk = offset.saturating_sub(chunk.uncompressed_offset as u64);
        let available = chunk.uncompressed_size as u64 - start_in_chunk;
        let take = available.min(bytes_left);

        let bytes = cache.materialize(stream, index, chunk, compression)?;
        output.extend_from_slice(&bytes[start_in_chunk as usize..(start_in_chunk + take) as usize]);

        bytes_left -= take;
        if bytes_left == 0 {
            break;
        }
    }
    if bytes_left > 0 {
        return Err(Error::Corrupt("read past the end of the payload region"));
    }
    Ok(output)
}

fn load_extra_names<R: Read + Seek>(input: &mut R) -> Result<Vec<ExtraNameEntry>> {
    let count = input.read_u32::<LittleEndian>()?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = input.read_i32::<LittleEndian>()?;
        let raw_size = if len < 0 {
            (-(len as i64) * 2) as usize
        } else {
            len as usize
        };
        let mut raw = vec![0u8; raw_size];
        input.read_exact(&mut raw)?;
        entries.push(ExtraNameEntry { raw: raw.into() });
    }
    Ok(entries)
}

fn load_names<R: ReadSeek + ?Sized>(
    input: &mut R,
    version: PackageVersion,
    offset: u64,
    count: u32,
) -> Result<(Vec<NameEntry>, u64)> {
    input.seek(SeekFrom::Start(offset))?;
    let mut names = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = input.read_i32::<LittleEndian>()?;
        let mut name = if len < 0 {
            let units = (-(len as i64)) as usize;
            if version.wide_names() {
                let mut buffer = Vec::with_capacity(units);
                for _ in 0..units {
                    buffer.push(input.read_u16::<LittleEndian>()?);
                }
                String::from_utf16_lossy(&buffer)
            } else {
                // legacy wide encoding: one byte per character plus padding
                let mut buffer = String::with_capacity(units);
                for _ in 0..units {
                    let c = input.read_u8()?;
                    input.read_u8()?;
                    buffer.push(c as char);
                }
                buffer
            }
        } else {
            // the declared length includes the terminator
            let mut buffer = vec![0u8; len as usize];
            input.read_exact(&mut buffer)?;
            let end = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
            String::from_utf8_lossy(&buffer[..end]).into_owned()
        };
        while name.ends_with('\0') {
            name.pop();
        }

        let flags = match version {
            PackageVersion::Me1 => input.read_u64::<LittleEndian>()?,
            PackageVersion::Me2 => input.read_u32::<LittleEndian>()? as u64,
            PackageVersion::Me3 => 0,
        };
        names.push(NameEntry {
            name: name.into(),
            flags,
        });
    }
    let names_end = input.stream_position()?;
    Ok((names, names_end))
}

fn load_imports<R: ReadSeek + ?Sized>(
    input: &mut R,
    offset: u64,
    count: u32,
    names: &[NameEntry],
) -> Result<(Vec<ImportEntry>, u64)> {
    input.seek(SeekFrom::Start(offset))?;
    let mut imports = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let start = input.stream_position()?;
        input.read_i32::<LittleEndian>()?; // package file id
        input.read_i32::<LittleEndian>()?; // const 0
        let class_id = input.read_i32::<LittleEndian>()?;
        input.read_i32::<LittleEndian>()?; // const 0
        let link_id = input.read_i32::<LittleEndian>()?;
        let object_name_id = input.read_i32::<LittleEndian>()? as usize;
        input.read_i32::<LittleEndian>()?;
        let len = input.stream_position()? - start;

        input.seek(SeekFrom::Start(start))?;
        let mut raw = vec![0u8; len as usize];
        input.read_exact(&mut raw)?;

        let object_name = names
            .get(object_name_id)
            .ok_or(Error::Corrupt("import name id out of range"))?
            .name
            .clone();

        imports.push(ImportEntry {
            raw: raw.into(),
            class: ObjectRef::decode(class_id),
            link: ObjectRef::decode(link_id),
            object_name_id,
            object_name,
        });
    }
    let imports_end = input.stream_position()?;
    Ok((imports, imports_end))
}

fn load_exports<R: ReadSeek + ?Sized>(
    input: &mut R,
    version: PackageVersion,
    offset: u64,
    count: u32,
    names: &[NameEntry],
) -> Result<(Vec<ExportEntry>, u32)> {
    input.seek(SeekFrom::Start(offset))?;
    let mut exports = Vec::with_capacity(count as usize);
    let mut exports_end_offset = 0u32;
    for i in 0..count {
        let start = input.stream_position()?;

        // Walk the record's fixed and variable sub-fields to find its length.
        input.seek(SeekFrom::Current(ExportEntry::DATA_OFFSET_OFFSET as i64 + 4))?;
        if version != PackageVersion::Me3 {
            let entries = input.read_u32::<LittleEndian>()?;
            input.seek(SeekFrom::Current(entries as i64 * 12))?;
        }
        input.seek(SeekFrom::Current(4))?;
        let entries = input.read_u32::<LittleEndian>()?;
        input.seek(SeekFrom::Current(entries as i64 * 4 + 16 + 4))?;
        let len = input.stream_position()? - start;

        input.seek(SeekFrom::Start(start))?;
        let mut raw = vec![0u8; len as usize];
        input.read_exact(&mut raw)?;

        let entry = ExportEntry {
            id: i,
            raw: raw.into(),
            new_data: None,
            object_name: "".into(),
        };

        let end = entry.data_offset() + entry.data_size();
        if end > exports_end_offset {
            exports_end_offset = end;
        }

        let object_name = names
            .get(entry.object_name_id())
            .ok_or(Error::Corrupt("export name id out of range"))?
            .name
            .clone();

        exports.push(ExportEntry {
            object_name,
            ..entry
        });
    }
    Ok((exports, exports_end_offset))
}

fn load_depends<R: ReadSeek + ?Sized>(
    input: &mut R,
    offset: u64,
    count: u32,
) -> Result<Vec<i32>> {
    let stream_len = input.seek(SeekFrom::End(0))?;
    input.seek(SeekFrom::Start(offset))?;
    let available = stream_len.saturating_sub(offset);

    let mut depends = Vec::with_capacity(count as usize);
    for i in 0..count as u64 {
        // tolerate truncated tables produced by some tools
        if (i + 1) * 4 <= available {
            depends.push(input.read_i32::<LittleEndian>()?);
        } else {
            depends.push(0);
        }
    }
    Ok(depends)
}

fn load_guids<R: ReadSeek + ?Sized>(
    mut input: &mut R,
    offset: u64,
    count: u32,
) -> Result<Vec<GuidEntry>> {
    input.seek(SeekFrom::Start(offset))?;
    let mut guids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        guids.push(GuidEntry::read(&mut input)?);
    }
    Ok(guids)
}
