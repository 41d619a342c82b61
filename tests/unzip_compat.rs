use std::process::Command;
use tempfile::tempdir;
use zipedit::{AccessMode, AddOptions, Archive};

// Writes and edits an archive with the library, then calls `unzip -t` to
// verify compatibility. Skipped when `unzip` is not present on the system.

#[test]
fn unzip_compatibility() {
    let check = Command::new("unzip").arg("-v").output();
    if check.is_err() {
        eprintln!("skipping test: `unzip` not found");
        return;
    }

    let dir = tempdir().unwrap();
    let zip_path = dir.path().join("compat.zip");
    {
        let mut archive = Archive::open(&zip_path, AccessMode::Create).unwrap();
        archive
            .add_buffer("hello.txt", b"hello from test", AddOptions::stored())
            .unwrap();
        archive.add_directory("data", AddOptions::default()).unwrap();
        let big = vec![0u8; 1024 * 1024];
        archive
            .add_buffer("data/big.bin", &big, AddOptions::default())
            .unwrap();
        // Edit in place before handing the file over.
        archive.remove_entry("hello.txt").unwrap();
        archive
            .add_buffer("hello.txt", b"rewritten", AddOptions::default())
            .unwrap();
    }

    let output = Command::new("unzip")
        .arg("-t")
        .arg(&zip_path)
        .output()
        .expect("failed to run unzip");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(
        output.status.success(),
        "unzip reported failure: {} {}",
        stdout,
        stderr
    );
}
