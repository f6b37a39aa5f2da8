mod common;

use common::{write_package, ExportSpec, PackageBuilder};
use me_pcc::{error::Error, CompressionType, Package, PackageVersion};
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

/// A small three-export fixture with a nested object hierarchy.
fn fixture() -> PackageBuilder {
    PackageBuilder::me3()
        .name("None")
        .name("Core")
        .name("Package")
        .name("BIOC_Base")
        .name("Texture2D")
        .name("WorldMesh")
        // class Package, class Texture2D
        .import(0, 0, 2)
        .import(0, 0, 4)
        // BIOC_Base (a Package), WorldMesh and a texture inside it
        .export(ExportSpec {
            name_id: 3,
            class_id: -1,
            link_id: 0,
            payload: b"base package payload".to_vec(),
        })
        .export(ExportSpec {
            name_id: 5,
            class_id: 0,
            link_id: 1,
            payload: vec![0xAA; 64],
        })
        .export(ExportSpec {
            name_id: 4,
            class_id: -2,
            link_id: 2,
            payload: vec![0xBB; 32],
        })
}

#[traced_test]
#[test]
fn open_rejects_missing_file() {
    let result = Package::open("/definitely/not/here.pcc");
    assert!(matches!(result, Err(Error::PackageNotFound(_))));
}

#[traced_test]
#[test]
fn open_rejects_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_package(dir.path(), "empty.pcc", &[]);
    assert!(matches!(
        Package::open(path),
        Err(Error::EmptyPackage(_))
    ));
}

#[traced_test]
#[test]
fn open_rejects_truncated_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_package(dir.path(), "short.pcc", &[0u8; 40]);
    assert!(matches!(
        Package::open(path),
        Err(Error::BrokenHeader(_))
    ));
}

#[traced_test]
#[test]
fn open_rejects_wrong_tag() {
    let dir = tempfile::tempdir().unwrap();
    let mut image = fixture().build();
    image[0] ^= 0xFF;
    let path = write_package(dir.path(), "tag.pcc", &image);
    assert!(matches!(Package::open(path), Err(Error::WrongTag(_))));
}

#[traced_test]
#[test]
fn open_rejects_unknown_version() {
    let dir = tempfile::tempdir().unwrap();
    let mut image = fixture().build();
    image[4..6].copy_from_slice(&999u16.to_le_bytes());
    let path = write_package(dir.path(), "version.pcc", &image);
    assert!(matches!(
        Package::open(path),
        Err(Error::UnsupportedVersion(999))
    ));
}

#[traced_test]
#[test]
fn open_rejects_unknown_compression_tag() {
    let dir = tempfile::tempdir().unwrap();
    let builder = fixture();
    let header_size = 126;
    let mut image = builder.build();
    image[header_size..header_size + 4].copy_from_slice(&9u32.to_le_bytes());
    let path = write_package(dir.path(), "compression.pcc", &image);
    assert!(matches!(
        Package::open(path),
        Err(Error::UnknownCompression(9))
    ));
}

#[traced_test]
#[test]
fn parses_tables_of_an_uncompressed_package() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_package(dir.path(), "plain.pcc", &fixture().build());

    let mut package = Package::open(path).unwrap();
    assert_eq!(package.version(), PackageVersion::Me3);
    assert_eq!(package.compression(), CompressionType::None);
    assert!(!package.is_compressed());
    assert!(!package.is_modified());

    assert_eq!(package.name_count(), 6);
    assert_eq!(package.import_count(), 2);
    assert_eq!(package.export_count(), 3);

    assert_eq!(package.name(1).unwrap(), "Core");
    assert_eq!(package.name_id("Texture2D"), Some(4));
    assert_eq!(package.name_id("NotHere"), None);
    assert!(package.name(17).is_err());

    // signed reference resolution
    assert_eq!(package.class_name(1), "BIOC_Base");
    assert_eq!(package.class_name(-2), "Texture2D");
    assert_eq!(package.class_name(0), "Class");

    // dotted paths walk the link chain
    assert_eq!(package.object_path(1), "BIOC_Base");
    assert_eq!(package.object_path(2), "BIOC_Base.WorldMesh");
    assert_eq!(package.object_path(3), "BIOC_Base.WorldMesh.Texture2D");

    assert_eq!(
        package.export_data(0).unwrap(),
        b"base package payload".to_vec()
    );
    assert_eq!(package.export_data(1).unwrap(), vec![0xAA; 64]);
    assert!(package.export_data(9).is_err());
}

#[traced_test]
#[test]
fn payload_bounds_follow_the_table() {
    let dir = tempfile::tempdir().unwrap();
    let builder = fixture();
    let path = write_package(dir.path(), "bounds.pcc", &builder.build());

    let package = Package::open(path).unwrap();
    let first = package.export(0).unwrap();
    assert_eq!(first.data_size(), 20);

    let mut expected_end = 0;
    for export in package.exports() {
        expected_end = expected_end.max(export.data_offset() + export.data_size());
    }
    assert_eq!(package.exports_end_offset(), expected_end);
}

#[traced_test]
#[test]
fn reads_exports_from_a_compressed_package() {
    let dir = tempfile::tempdir().unwrap();
    let builder = fixture();
    let image = builder.build_compressed(&[]);
    let path = write_package(dir.path(), "one_chunk.pcc", &image);

    let mut package = Package::open(path).unwrap();
    assert!(package.is_compressed());
    assert_eq!(package.compression(), CompressionType::Zlib);
    assert_eq!(package.name(4).unwrap(), "Texture2D");
    assert_eq!(
        package.export_data(0).unwrap(),
        b"base package payload".to_vec()
    );
    assert_eq!(package.export_data(2).unwrap(), vec![0xBB; 32]);
}

/// A read whose range spans a chunk boundary must decompress both chunks
/// and stitch the bytes together in order.
#[traced_test]
#[test]
fn reads_across_a_chunk_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..4000u32).map(|i| (i % 251) as u8).collect();
    let builder = PackageBuilder::me3()
        .name("None")
        .name("Blob")
        .export(ExportSpec::new(1, payload.clone()));

    // split in the middle of the only payload
    let image = builder.build();
    let payload_start = image.len() as u32 - 4000;
    let split = payload_start + 1000;
    let compressed = builder.build_compressed(&[split]);
    let path = write_package(dir.path(), "two_chunks.pcc", &compressed);

    let mut package = Package::open(path).unwrap();
    assert_eq!(package.export_data(0).unwrap(), payload);
}

#[traced_test]
#[test]
fn corrupt_chunk_data_aborts_the_read() {
    let dir = tempfile::tempdir().unwrap();
    let builder = fixture();
    let image = builder.build();
    let split = image.len() as u32 - 8;
    let mut compressed = builder.build_compressed(&[split]);

    // damage the second chunk's tag; tables live in the first chunk so the
    // package still opens
    let tag_pos = {
        // chunk table entry 1 holds the compressed offset at +8
        let table = 126 + 8 + 16;
        u32::from_le_bytes(compressed[table + 8..table + 12].try_into().unwrap()) as usize
    };
    compressed[tag_pos] ^= 0xFF;
    let path = write_package(dir.path(), "damaged.pcc", &compressed);

    let mut package = Package::open(path).unwrap();
    let result = package.export_data(2);
    assert!(matches!(result, Err(Error::Corrupt(_))));
}

#[traced_test]
#[test]
fn append_only_names_keep_their_indices() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_package(dir.path(), "names.pcc", &fixture().build());

    let mut package = Package::open(path).unwrap();
    let before: Vec<(String, usize)> = package
        .names()
        .enumerate()
        .map(|(i, n)| (n.to_owned(), i))
        .collect();

    let id = package.add_name("BrandNew").unwrap();
    assert_eq!(id, before.len());
    assert!(package.is_modified());
    for (name, i) in &before {
        assert_eq!(package.name_id(name), Some(*i));
    }

    assert!(matches!(
        package.add_name("BrandNew"),
        Err(Error::DuplicateName(_))
    ));
}
