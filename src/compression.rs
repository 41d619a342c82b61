//! Streaming payload transfer between providers, the backing and consumers.
//!
//! Content is pulled from a `provider(offset, max)` callback and pushed to a
//! `consumer(bytes)` callback in chunks of at most `buffer_size`, so no path
//! ever materializes a whole entry in memory. CRC-32 is accumulated over the
//! uncompressed bytes on both directions; compressed bytes are counted as
//! they reach the backing.

use crate::backing::Backing;
use crate::cancel::CancelToken;
use crate::entry::CompressionMethod;
use crate::error::{Result, ZipError};
use crc32fast::Hasher as Crc32;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Write};

/// Totals accumulated while streaming a payload into the backing.
pub(crate) struct StreamCounters {
    pub crc32: u32,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
}

/// Writer that counts compressed bytes as they reach the backing.
struct CountingWriter<'a> {
    backing: &'a mut Backing,
    written: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = Write::write(self.backing, buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Write::flush(self.backing)
    }
}

/// Stream a payload from `provider` into the backing at its current offset.
pub(crate) fn write_payload<P>(
    backing: &mut Backing,
    method: CompressionMethod,
    compression_level: u32,
    buffer_size: usize,
    cancel: &CancelToken,
    provider: &mut P,
) -> Result<StreamCounters>
where
    P: FnMut(u64, usize) -> Result<Vec<u8>>,
{
    let buffer_size = buffer_size.max(1);
    let mut crc = Crc32::new();
    let mut uncompressed = 0u64;
    match method {
        CompressionMethod::Stored => {
            loop {
                cancel.check()?;
                let chunk = provider(uncompressed, buffer_size)?;
                if chunk.is_empty() {
                    break;
                }
                crc.update(&chunk);
                backing.write_all(&chunk)?;
                uncompressed += chunk.len() as u64;
            }
            Ok(StreamCounters {
                crc32: crc.finalize(),
                uncompressed_size: uncompressed,
                compressed_size: uncompressed,
            })
        }
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(
                CountingWriter {
                    backing,
                    written: 0,
                },
                Compression::new(compression_level.min(9)),
            );
            loop {
                cancel.check()?;
                let chunk = provider(uncompressed, buffer_size)?;
                if chunk.is_empty() {
                    break;
                }
                crc.update(&chunk);
                encoder.write_all(&chunk).map_err(ZipError::UnwritableFile)?;
                uncompressed += chunk.len() as u64;
            }
            let writer = encoder.finish().map_err(ZipError::UnwritableFile)?;
            Ok(StreamCounters {
                crc32: crc.finalize(),
                uncompressed_size: uncompressed,
                compressed_size: writer.written,
            })
        }
        CompressionMethod::Unsupported(m) => Err(ZipError::UnwritableArchive(format!(
            "cannot write entries with compression method {}",
            m
        ))),
    }
}

/// Stream `compressed_size` payload bytes from the backing's current offset
/// through the decoder into `consumer`. Returns the CRC-32 and the
/// uncompressed byte count.
pub(crate) fn read_payload<C>(
    backing: &mut Backing,
    method: CompressionMethod,
    compressed_size: u64,
    buffer_size: usize,
    cancel: &CancelToken,
    consumer: &mut C,
) -> Result<(u32, u64)>
where
    C: FnMut(&[u8]) -> Result<()>,
{
    let buffer_size = buffer_size.max(1);
    let mut crc = Crc32::new();
    let mut uncompressed = 0u64;
    match method {
        CompressionMethod::Stored => {
            let mut remaining = compressed_size;
            while remaining > 0 {
                cancel.check()?;
                let want = (buffer_size as u64).min(remaining) as usize;
                let chunk = backing.read_exact(want)?;
                crc.update(&chunk);
                consumer(&chunk)?;
                remaining -= chunk.len() as u64;
                uncompressed += chunk.len() as u64;
            }
            Ok((crc.finalize(), uncompressed))
        }
        CompressionMethod::Deflate => {
            let limited = Read::take(&mut *backing, compressed_size);
            let mut decoder = DeflateDecoder::new(limited);
            let mut buf = vec![0u8; buffer_size];
            loop {
                cancel.check()?;
                let n = decoder
                    .read(&mut buf)
                    .map_err(|e| ZipError::UnreadableArchive(format!("inflate failed: {}", e)))?;
                if n == 0 {
                    break;
                }
                crc.update(&buf[..n]);
                consumer(&buf[..n])?;
                uncompressed += n as u64;
            }
            Ok((crc.finalize(), uncompressed))
        }
        CompressionMethod::Unsupported(m) => Err(ZipError::UnreadableArchive(format!(
            "unsupported compression method {}",
            m
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backing::OpenFlags;

    fn provider_over(data: &[u8]) -> impl FnMut(u64, usize) -> Result<Vec<u8>> + '_ {
        move |offset, max| {
            let start = (offset as usize).min(data.len());
            let end = (start + max).min(data.len());
            Ok(data[start..end].to_vec())
        }
    }

    fn roundtrip(method: CompressionMethod, data: &[u8], buffer_size: usize) {
        let mut backing = Backing::in_memory(Vec::new(), OpenFlags::read_write());
        let cancel = CancelToken::new();
        let counters = write_payload(
            &mut backing,
            method,
            6,
            buffer_size,
            &cancel,
            &mut provider_over(data),
        )
        .unwrap();
        assert_eq!(counters.uncompressed_size, data.len() as u64);
        assert_eq!(counters.crc32, crc32fast::hash(data));

        backing.seek(0).unwrap();
        let mut out = Vec::new();
        let (crc, total) = read_payload(
            &mut backing,
            method,
            counters.compressed_size,
            buffer_size,
            &cancel,
            &mut |chunk: &[u8]| {
                out.extend_from_slice(chunk);
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(out, data);
        assert_eq!(total, data.len() as u64);
        assert_eq!(crc, counters.crc32);
    }

    #[test]
    fn test_stored_roundtrip() {
        roundtrip(CompressionMethod::Stored, b"hello stored world", 4);
    }

    #[test]
    fn test_deflate_roundtrip_small_buffers() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        roundtrip(CompressionMethod::Deflate, &data, 257);
    }

    #[test]
    fn test_deflate_shrinks_repetitive_input() {
        let data = vec![0u8; 4096];
        let mut backing = Backing::in_memory(Vec::new(), OpenFlags::read_write());
        let counters = write_payload(
            &mut backing,
            CompressionMethod::Deflate,
            6,
            1024,
            &CancelToken::new(),
            &mut provider_over(&data),
        )
        .unwrap();
        assert!(counters.compressed_size < 100);
    }

    #[test]
    fn test_cancelled_token_stops_stream() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut backing = Backing::in_memory(Vec::new(), OpenFlags::read_write());
        let result = write_payload(
            &mut backing,
            CompressionMethod::Stored,
            6,
            1024,
            &cancel,
            &mut provider_over(b"data"),
        );
        assert!(matches!(result, Err(ZipError::Cancelled)));
    }

    #[test]
    fn test_unsupported_method_rejected() {
        let mut backing = Backing::in_memory(Vec::new(), OpenFlags::read_write());
        let result = write_payload(
            &mut backing,
            CompressionMethod::Unsupported(93),
            6,
            1024,
            &CancelToken::new(),
            &mut provider_over(b"data"),
        );
        assert!(matches!(result, Err(ZipError::UnwritableArchive(_))));
    }
}
