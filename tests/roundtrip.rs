use tempfile::tempdir;
use zipedit::{AccessMode, AddOptions, Archive, CompressionMethod, EntryKind, ExtractOptions};

#[test]
fn stored_entry_roundtrip_in_memory() {
    let mut archive = Archive::create_in_memory().unwrap();
    archive
        .add_buffer("a.txt", b"hello", AddOptions::stored())
        .unwrap();

    let crc = archive
        .extract("a.txt", ExtractOptions::default(), |_| Ok(()))
        .unwrap();
    assert_eq!(crc, 0x3610A686);

    let buffer = archive.into_buffer().unwrap();
    let mut reopened = Archive::with_buffer(buffer, AccessMode::Read).unwrap();
    assert_eq!(reopened.len(), 1);
    let entry = reopened.entry("a.txt").unwrap();
    assert_eq!(entry.kind(), EntryKind::File);
    assert_eq!(entry.method(), CompressionMethod::Stored);
    assert_eq!(entry.uncompressed_size(), 5);
    assert_eq!(entry.compressed_size(), 5);
    assert_eq!(entry.checksum(), 0x3610A686);
    assert_eq!(reopened.read_entry("a.txt").unwrap(), b"hello");
}

#[test]
fn deflated_zeros_compress_small() {
    let mut archive = Archive::create_in_memory().unwrap();
    let data = vec![0u8; 4096];
    archive
        .add_buffer("a.bin", &data, AddOptions::default())
        .unwrap();

    let entry = archive.entry("a.bin").unwrap();
    assert_eq!(entry.method(), CompressionMethod::Deflate);
    assert!(entry.compressed_size() < 100);
    assert_eq!(entry.checksum(), 0x1E8B0731);
    assert_eq!(archive.read_entry("a.bin").unwrap(), data);
}

#[test]
fn file_archive_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("roundtrip.zip");
    {
        let mut archive = Archive::open(&path, AccessMode::Create).unwrap();
        archive
            .add_directory("docs", AddOptions::default())
            .unwrap();
        archive
            .add_buffer("docs/readme.md", b"# readme\n", AddOptions::default())
            .unwrap();
        archive
            .add_symlink("docs/latest", "readme.md", AddOptions::default())
            .unwrap();
    }

    let mut archive = Archive::open(&path, AccessMode::Read).unwrap();
    assert_eq!(archive.len(), 3);
    assert_eq!(archive.entry("docs/").unwrap().kind(), EntryKind::Directory);
    assert_eq!(
        archive.entry("docs/latest").unwrap().kind(),
        EntryKind::Symlink
    );
    assert_eq!(archive.read_entry("docs/readme.md").unwrap(), b"# readme\n");
    // A symlink entry stores its target as content.
    assert_eq!(archive.read_entry("docs/latest").unwrap(), b"readme.md");
    archive.check_integrity().unwrap();
}

#[test]
fn lookup_is_exact_byte_match() {
    let mut archive = Archive::create_in_memory().unwrap();
    archive
        .add_directory("dir", AddOptions::default())
        .unwrap();
    assert!(archive.contains("dir/"));
    assert!(!archive.contains("dir"));
    assert!(!archive.contains("DIR/"));
}

#[test]
fn catalog_matches_on_disk_layout() {
    let mut archive = Archive::create_in_memory().unwrap();
    archive
        .add_buffer("one", b"1111", AddOptions::stored())
        .unwrap();
    archive
        .add_buffer("two", b"22222222", AddOptions::default())
        .unwrap();
    archive
        .add_buffer("three", b"3", AddOptions::stored())
        .unwrap();

    // Iteration order equals on-disk order.
    let offsets: Vec<u64> = archive
        .entries()
        .iter()
        .map(|e| e.local_header_offset())
        .collect();
    let mut sorted = offsets.clone();
    sorted.sort_unstable();
    assert_eq!(offsets, sorted);
    assert_eq!(offsets[0], 0);

    // The payload region is exactly the sum of the entries' local sizes.
    let total: u64 = archive.entries().iter().map(|e| e.local_size()).sum();
    let buffer = archive.into_buffer().unwrap();
    let eocd = &buffer[buffer.len() - 22..];
    let cd_offset = u32::from_le_bytes(eocd[16..20].try_into().unwrap()) as u64;
    assert_eq!(total, cd_offset);

    // Each local header on disk declares the same name as its catalog entry.
    let mut reopened = Archive::with_buffer(buffer, AccessMode::Read).unwrap();
    let bytes = reopened.as_bytes().unwrap().to_vec();
    for entry in reopened.entries() {
        let start = entry.local_header_offset() as usize;
        let name_len =
            u16::from_le_bytes(bytes[start + 26..start + 28].try_into().unwrap()) as usize;
        assert_eq!(&bytes[start + 30..start + 30 + name_len], entry.path_bytes());
    }
    reopened.check_integrity().unwrap();
}

#[test]
fn add_then_remove_restores_archive_bytes() {
    let mut archive = Archive::create_in_memory().unwrap();
    archive
        .add_buffer("keep-a", b"aaaa", AddOptions::stored())
        .unwrap();
    archive
        .add_buffer("keep-b", b"bb", AddOptions::default())
        .unwrap();
    let before = archive.as_bytes().unwrap().to_vec();

    archive
        .add_buffer("transient", b"tttt", AddOptions::stored())
        .unwrap();
    assert_ne!(archive.as_bytes().unwrap(), &before[..]);

    archive.remove_entry("transient").unwrap();
    assert_eq!(archive.as_bytes().unwrap(), &before[..]);
}

#[test]
fn entry_attributes_survive_roundtrip() {
    let mut archive = Archive::create_in_memory().unwrap();
    archive
        .add_buffer(
            "tool.sh",
            b"#!/bin/sh\n",
            AddOptions::default().with_permissions(0o755),
        )
        .unwrap();
    let buffer = archive.into_buffer().unwrap();

    let reopened = Archive::with_buffer(buffer, AccessMode::Read).unwrap();
    let attributes = reopened.entry("tool.sh").unwrap().attributes();
    assert_eq!(attributes.permissions, 0o755);
    assert_eq!(attributes.kind, EntryKind::File);
    assert_eq!(attributes.size, 10);
}
