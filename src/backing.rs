//! Seekable byte-stream backing with file and in-memory variants.
//!
//! Both variants expose the same contract: explicit seeks, short reads
//! allowed, write-all semantics, truncate and sync. The archive layer never
//! cares which variant it drives. Failures map to `UnreadableFile` /
//! `UnwritableFile` at this boundary so the layers above can use `?` freely.

use crate::error::{Result, ZipError};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Capability set for an open backing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
}

impl OpenFlags {
    pub fn read_only() -> Self {
        OpenFlags {
            read: true,
            ..OpenFlags::default()
        }
    }

    pub fn read_write() -> Self {
        OpenFlags {
            read: true,
            write: true,
            ..OpenFlags::default()
        }
    }

    /// Read-write on a file that must not exist yet.
    pub fn create_new() -> Self {
        OpenFlags {
            read: true,
            write: true,
            create: true,
            ..OpenFlags::default()
        }
    }
}

/// A random-access byte store, either a file on disk or a growable buffer.
pub(crate) enum Backing {
    File { file: File, flags: OpenFlags },
    Memory { buf: Vec<u8>, pos: u64, flags: OpenFlags },
}

impl Backing {
    /// Open a file backing with the given capability set.
    pub fn open_file(path: &Path, flags: OpenFlags) -> Result<Self> {
        let file = OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .create_new(flags.create)
            .truncate(flags.truncate)
            .append(flags.append)
            .open(path)
            .map_err(|e| {
                if flags.write {
                    ZipError::UnwritableFile(e)
                } else {
                    ZipError::UnreadableFile(e)
                }
            })?;
        Ok(Backing::File { file, flags })
    }

    /// Wrap an in-memory buffer. The offset starts at zero.
    pub fn in_memory(buf: Vec<u8>, flags: OpenFlags) -> Self {
        Backing::Memory { buf, pos: 0, flags }
    }

    /// Seek to an absolute offset. The memory variant clamps to `[0, len]`.
    pub fn seek(&mut self, offset: u64) -> Result<u64> {
        match self {
            Backing::File { file, .. } => file
                .seek(SeekFrom::Start(offset))
                .map_err(ZipError::UnreadableFile),
            Backing::Memory { buf, pos, .. } => {
                *pos = offset.min(buf.len() as u64);
                Ok(*pos)
            }
        }
    }

    pub fn seek_to_end(&mut self) -> Result<u64> {
        match self {
            Backing::File { file, .. } => file
                .seek(SeekFrom::End(0))
                .map_err(ZipError::UnreadableFile),
            Backing::Memory { buf, pos, .. } => {
                *pos = buf.len() as u64;
                Ok(*pos)
            }
        }
    }

    pub fn offset(&mut self) -> Result<u64> {
        match self {
            Backing::File { file, .. } => {
                file.stream_position().map_err(ZipError::UnreadableFile)
            }
            Backing::Memory { pos, .. } => Ok(*pos),
        }
    }

    /// Read up to `n` bytes from the current offset. Short reads are allowed;
    /// an empty result means end of stream.
    pub fn read_up_to(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        let got = Read::read(self, &mut out).map_err(ZipError::UnreadableFile)?;
        out.truncate(got);
        Ok(out)
    }

    /// Read exactly `n` bytes, failing on a premature end of stream.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            let got = Read::read(self, &mut out[filled..]).map_err(ZipError::UnreadableFile)?;
            if got == 0 {
                return Err(ZipError::UnreadableFile(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {} bytes, got {}", n, filled),
                )));
            }
            filled += got;
        }
        Ok(out)
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        Read::read_to_end(self, &mut out).map_err(ZipError::UnreadableFile)?;
        Ok(out)
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        Write::write_all(self, data).map_err(ZipError::UnwritableFile)
    }

    /// Cut the backing at `offset`. Shrinks or grows; the memory variant
    /// zero-fills on growth and clamps its offset to the cut point.
    pub fn truncate(&mut self, offset: u64) -> Result<()> {
        match self {
            Backing::File { file, flags } => {
                if !flags.write {
                    return Err(ZipError::UnwritableFile(not_writable()));
                }
                file.set_len(offset).map_err(ZipError::UnwritableFile)
            }
            Backing::Memory { buf, pos, flags } => {
                if !flags.write {
                    return Err(ZipError::UnwritableFile(not_writable()));
                }
                buf.resize(offset as usize, 0);
                *pos = (*pos).min(offset);
                Ok(())
            }
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        match self {
            Backing::File { file, .. } => file.sync_all().map_err(ZipError::UnwritableFile),
            Backing::Memory { .. } => Ok(()),
        }
    }

    /// Borrow the buffer of a memory backing.
    pub fn memory_slice(&self) -> Option<&[u8]> {
        match self {
            Backing::Memory { buf, .. } => Some(buf),
            Backing::File { .. } => None,
        }
    }

    /// Take the buffer out of a memory backing.
    pub fn into_memory(self) -> Option<Vec<u8>> {
        match self {
            Backing::Memory { buf, .. } => Some(buf),
            Backing::File { .. } => None,
        }
    }
}

fn not_readable() -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        "backing not opened for reading",
    )
}

fn not_writable() -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        "backing not opened for writing",
    )
}

impl Read for Backing {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match self {
            Backing::File { file, flags } => {
                if !flags.read {
                    return Err(not_readable());
                }
                file.read(out)
            }
            Backing::Memory { buf, pos, flags } => {
                if !flags.read {
                    return Err(not_readable());
                }
                let start = (*pos).min(buf.len() as u64) as usize;
                let n = out.len().min(buf.len() - start);
                out[..n].copy_from_slice(&buf[start..start + n]);
                *pos += n as u64;
                Ok(n)
            }
        }
    }
}

impl Write for Backing {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Backing::File { file, flags } => {
                if !flags.write {
                    return Err(not_writable());
                }
                // The append capability is handled by the OS via OpenOptions.
                file.write(data)
            }
            Backing::Memory { buf, pos, flags } => {
                if !flags.write {
                    return Err(not_writable());
                }
                if flags.append {
                    *pos = buf.len() as u64;
                }
                let start = *pos as usize;
                let end = start + data.len();
                if end > buf.len() {
                    buf.resize(end, 0);
                }
                buf[start..end].copy_from_slice(data);
                *pos = end as u64;
                Ok(data.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Backing::File { file, .. } => file.flush(),
            Backing::Memory { .. } => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_rw(initial: &[u8]) -> Backing {
        Backing::in_memory(initial.to_vec(), OpenFlags::read_write())
    }

    #[test]
    fn test_memory_seek_clamps_to_length() {
        let mut backing = memory_rw(b"abcdef");
        assert_eq!(backing.seek(3).unwrap(), 3);
        assert_eq!(backing.seek(100).unwrap(), 6);
        assert_eq!(backing.offset().unwrap(), 6);
    }

    #[test]
    fn test_memory_read_short_at_end() {
        let mut backing = memory_rw(b"abcdef");
        backing.seek(4).unwrap();
        assert_eq!(backing.read_up_to(10).unwrap(), b"ef");
        assert!(backing.read_up_to(10).unwrap().is_empty());
    }

    #[test]
    fn test_memory_read_exact_fails_past_end() {
        let mut backing = memory_rw(b"abc");
        assert!(matches!(
            backing.read_exact(4),
            Err(ZipError::UnreadableFile(_))
        ));
    }

    #[test]
    fn test_memory_write_grows_and_overwrites() {
        let mut backing = memory_rw(b"abcdef");
        backing.seek(4).unwrap();
        backing.write_all(b"XYZW").unwrap();
        assert_eq!(backing.memory_slice().unwrap(), b"abcdXYZW");
        assert_eq!(backing.offset().unwrap(), 8);
    }

    #[test]
    fn test_memory_truncate_shrinks_and_clamps_offset() {
        let mut backing = memory_rw(b"abcdef");
        backing.seek_to_end().unwrap();
        backing.truncate(2).unwrap();
        assert_eq!(backing.memory_slice().unwrap(), b"ab");
        assert_eq!(backing.offset().unwrap(), 2);
    }

    #[test]
    fn test_memory_truncate_grows_with_zero_fill() {
        let mut backing = memory_rw(b"ab");
        backing.truncate(4).unwrap();
        assert_eq!(backing.memory_slice().unwrap(), &[b'a', b'b', 0, 0]);
    }

    #[test]
    fn test_write_without_write_flag_fails() {
        let mut backing = Backing::in_memory(b"ab".to_vec(), OpenFlags::read_only());
        assert!(matches!(
            backing.write_all(b"x"),
            Err(ZipError::UnwritableFile(_))
        ));
        assert!(matches!(backing.truncate(0), Err(ZipError::UnwritableFile(_))));
    }

    #[test]
    fn test_append_flag_writes_at_end() {
        let flags = OpenFlags {
            read: true,
            write: true,
            append: true,
            ..OpenFlags::default()
        };
        let mut backing = Backing::in_memory(b"abc".to_vec(), flags);
        backing.seek(0).unwrap();
        backing.write_all(b"def").unwrap();
        assert_eq!(backing.memory_slice().unwrap(), b"abcdef");
    }
}
