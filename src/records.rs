//! Fixed-layout PKZIP records.
//!
//! Every record is little-endian, byte-packed, led by a 4-byte signature.
//! Each type pairs a plain struct with `parse` over the fixed-size prefix
//! (returning `None` on a short slice or signature mismatch) and `to_bytes`
//! emitting the canonical layout including the variable trailing region.
//! The variable bytes (name, extra, comment) are read by the caller in a
//! second step once the fixed header has declared their lengths.

use crate::backing::Backing;
use crate::error::{Result, ZipError};

pub(crate) const LFH_SIGNATURE: u32 = 0x04034B50;
pub(crate) const CDH_SIGNATURE: u32 = 0x02014B50;
pub(crate) const EOCD_SIGNATURE: u32 = 0x06054B50;
pub(crate) const ZIP64_EOCD_SIGNATURE: u32 = 0x06064B50;
pub(crate) const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x07064B50;
pub(crate) const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074B50;

/// Extra-field tag carrying 64-bit shadows of sentinel'd narrow fields.
pub(crate) const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// EOCD fixed size plus the maximum comment length.
pub(crate) const EOCD_MAX_SEARCH: u64 = 22 + u16::MAX as u64;

pub(crate) const VERSION_NEEDED_DEFAULT: u16 = 20;
pub(crate) const VERSION_NEEDED_ZIP64: u16 = 45;
/// Version-made-by with host OS 3 (UNIX) in the high byte.
pub(crate) const VERSION_MADE_BY_UNIX: u16 = (3 << 8) | VERSION_NEEDED_DEFAULT;

fn read_u16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

fn read_u64(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
        data[offset + 4],
        data[offset + 5],
        data[offset + 6],
        data[offset + 7],
    ])
}

/// Local file header, 30 fixed bytes + name + extra.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
}

impl LocalFileHeader {
    pub const SIZE: usize = 30;

    /// Parses the fixed portion; returns the record (with empty variable
    /// fields) and the declared name and extra lengths.
    pub fn parse(fixed: &[u8]) -> Option<(Self, usize, usize)> {
        if fixed.len() < Self::SIZE || read_u32(fixed, 0) != LFH_SIGNATURE {
            return None;
        }
        let header = LocalFileHeader {
            version_needed: read_u16(fixed, 4),
            flags: read_u16(fixed, 6),
            method: read_u16(fixed, 8),
            mod_time: read_u16(fixed, 10),
            mod_date: read_u16(fixed, 12),
            crc32: read_u32(fixed, 14),
            compressed_size: read_u32(fixed, 18),
            uncompressed_size: read_u32(fixed, 22),
            file_name: Vec::new(),
            extra_field: Vec::new(),
        };
        let name_len = read_u16(fixed, 26) as usize;
        let extra_len = read_u16(fixed, 28) as usize;
        Some((header, name_len, extra_len))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + self.file_name.len() + self.extra_field.len());
        out.extend_from_slice(&LFH_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        out
    }

    /// On-disk length including the variable region.
    pub fn len(&self) -> u64 {
        (Self::SIZE + self.file_name.len() + self.extra_field.len()) as u64
    }
}

/// Central directory header, 46 fixed bytes + name + extra + comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attributes: u16,
    pub external_attributes: u32,
    pub local_header_offset: u32,
    pub file_name: Vec<u8>,
    pub extra_field: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    pub const SIZE: usize = 46;

    /// Parses the fixed portion; returns the record and the declared name,
    /// extra and comment lengths.
    pub fn parse(fixed: &[u8]) -> Option<(Self, usize, usize, usize)> {
        if fixed.len() < Self::SIZE || read_u32(fixed, 0) != CDH_SIGNATURE {
            return None;
        }
        let header = CentralDirectoryHeader {
            version_made_by: read_u16(fixed, 4),
            version_needed: read_u16(fixed, 6),
            flags: read_u16(fixed, 8),
            method: read_u16(fixed, 10),
            mod_time: read_u16(fixed, 12),
            mod_date: read_u16(fixed, 14),
            crc32: read_u32(fixed, 16),
            compressed_size: read_u32(fixed, 20),
            uncompressed_size: read_u32(fixed, 24),
            disk_number_start: read_u16(fixed, 34),
            internal_attributes: read_u16(fixed, 36),
            external_attributes: read_u32(fixed, 38),
            local_header_offset: read_u32(fixed, 42),
            file_name: Vec::new(),
            extra_field: Vec::new(),
            comment: Vec::new(),
        };
        let name_len = read_u16(fixed, 28) as usize;
        let extra_len = read_u16(fixed, 30) as usize;
        let comment_len = read_u16(fixed, 32) as usize;
        Some((header, name_len, extra_len, comment_len))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            Self::SIZE + self.file_name.len() + self.extra_field.len() + self.comment.len(),
        );
        out.extend_from_slice(&CDH_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.mod_time.to_le_bytes());
        out.extend_from_slice(&self.mod_date.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        out.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.extra_field.len() as u16).to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.disk_number_start.to_le_bytes());
        out.extend_from_slice(&self.internal_attributes.to_le_bytes());
        out.extend_from_slice(&self.external_attributes.to_le_bytes());
        out.extend_from_slice(&self.local_header_offset.to_le_bytes());
        out.extend_from_slice(&self.file_name);
        out.extend_from_slice(&self.extra_field);
        out.extend_from_slice(&self.comment);
        out
    }
}

/// Data descriptor trailing a streamed payload. The on-disk form may or may
/// not carry its signature; sizes are 32-bit unless the entry went ZIP64.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub fn parse(data: &[u8], zip64: bool) -> Option<Self> {
        let body = if data.len() >= 4 && read_u32(data, 0) == DATA_DESCRIPTOR_SIGNATURE {
            &data[4..]
        } else {
            data
        };
        if zip64 {
            if body.len() < 20 {
                return None;
            }
            Some(DataDescriptor {
                crc32: read_u32(body, 0),
                compressed_size: read_u64(body, 4),
                uncompressed_size: read_u64(body, 12),
            })
        } else {
            if body.len() < 12 {
                return None;
            }
            Some(DataDescriptor {
                crc32: read_u32(body, 0),
                compressed_size: read_u32(body, 4) as u64,
                uncompressed_size: read_u32(body, 8) as u64,
            })
        }
    }

    pub fn to_bytes(&self, zip64: bool) -> Vec<u8> {
        let mut out = Vec::with_capacity(24);
        out.extend_from_slice(&DATA_DESCRIPTOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        if zip64 {
            out.extend_from_slice(&self.compressed_size.to_le_bytes());
            out.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        } else {
            out.extend_from_slice(&(self.compressed_size as u32).to_le_bytes());
            out.extend_from_slice(&(self.uncompressed_size as u32).to_le_bytes());
        }
        out
    }
}

/// Size a data descriptor occupies on disk, probing for the optional
/// signature in the bytes following the payload.
pub(crate) fn data_descriptor_len(after_payload: &[u8], zip64: bool) -> u64 {
    let body: u64 = if zip64 { 20 } else { 12 };
    if after_payload.len() >= 4 && read_u32(after_payload, 0) == DATA_DESCRIPTOR_SIGNATURE {
        body + 4
    } else {
        body
    }
}

/// End of central directory record, 22 fixed bytes + comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub entries_on_disk: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub const SIZE: usize = 22;

    /// Parses the fixed portion; returns the record and the declared comment
    /// length.
    pub fn parse(fixed: &[u8]) -> Option<(Self, usize)> {
        if fixed.len() < Self::SIZE || read_u32(fixed, 0) != EOCD_SIGNATURE {
            return None;
        }
        let record = EndOfCentralDirectory {
            disk_number: read_u16(fixed, 4),
            disk_with_cd: read_u16(fixed, 6),
            entries_on_disk: read_u16(fixed, 8),
            total_entries: read_u16(fixed, 10),
            cd_size: read_u32(fixed, 12),
            cd_offset: read_u32(fixed, 16),
            comment: Vec::new(),
        };
        let comment_len = read_u16(fixed, 20) as usize;
        Some((record, comment_len))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE + self.comment.len());
        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }

    /// An empty archive footer, written by create-mode opens.
    pub fn empty() -> Self {
        EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            entries_on_disk: 0,
            total_entries: 0,
            cd_size: 0,
            cd_offset: 0,
            comment: Vec::new(),
        }
    }
}

/// ZIP64 end of central directory locator, 20 bytes before the EOCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Zip64EocdLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EocdLocator {
    pub const SIZE: usize = 20;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || read_u32(data, 0) != ZIP64_EOCD_LOCATOR_SIGNATURE {
            return None;
        }
        Some(Zip64EocdLocator {
            disk_with_eocd64: read_u32(data, 4),
            eocd64_offset: read_u64(data, 8),
            total_disks: read_u32(data, 16),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&ZIP64_EOCD_LOCATOR_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&self.disk_with_eocd64.to_le_bytes());
        out.extend_from_slice(&self.eocd64_offset.to_le_bytes());
        out.extend_from_slice(&self.total_disks.to_le_bytes());
        out
    }
}

/// ZIP64 end of central directory record. The extensible data sector after
/// the fixed fields is tolerated on parse and never emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Zip64Eocd {
    pub record_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub entries_on_disk: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64Eocd {
    pub const SIZE: usize = 56;
    /// Fixed fields after the signature and the size field itself.
    const RECORD_SIZE: u64 = 44;

    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE || read_u32(data, 0) != ZIP64_EOCD_SIGNATURE {
            return None;
        }
        Some(Zip64Eocd {
            record_size: read_u64(data, 4),
            version_made_by: read_u16(data, 12),
            version_needed: read_u16(data, 14),
            disk_number: read_u32(data, 16),
            disk_with_cd: read_u32(data, 20),
            entries_on_disk: read_u64(data, 24),
            total_entries: read_u64(data, 32),
            cd_size: read_u64(data, 40),
            cd_offset: read_u64(data, 48),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&ZIP64_EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&Self::RECORD_SIZE.to_le_bytes());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.version_needed.to_le_bytes());
        out.extend_from_slice(&self.disk_number.to_le_bytes());
        out.extend_from_slice(&self.disk_with_cd.to_le_bytes());
        out.extend_from_slice(&self.entries_on_disk.to_le_bytes());
        out.extend_from_slice(&self.total_entries.to_le_bytes());
        out.extend_from_slice(&self.cd_size.to_le_bytes());
        out.extend_from_slice(&self.cd_offset.to_le_bytes());
        out
    }

    pub fn new(total_entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Zip64Eocd {
            record_size: Self::RECORD_SIZE,
            version_made_by: VERSION_MADE_BY_UNIX,
            version_needed: VERSION_NEEDED_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            entries_on_disk: total_entries,
            total_entries,
            cd_size,
            cd_offset,
        }
    }
}

/// 64-bit shadow values carried by the ZIP64 extra field (tag 0x0001).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Zip64ExtraValues {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_number_start: Option<u32>,
}

impl Zip64ExtraValues {
    /// Serialize as a complete extra-field tag, fields in the canonical
    /// order: uncompressed size, compressed size, offset, disk start.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(28);
        if let Some(v) = self.uncompressed_size {
            data.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.compressed_size {
            data.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.local_header_offset {
            data.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.disk_number_start {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut out = Vec::with_capacity(4 + data.len());
        out.extend_from_slice(&ZIP64_EXTRA_FIELD_ID.to_le_bytes());
        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
        out.extend_from_slice(&data);
        out
    }
}

/// Walk an extra-field region, consuming the ZIP64 tag and keeping every
/// other tag verbatim. Shadow values are read only for the fields whose
/// narrow counterparts held the sentinel, in canonical order.
pub(crate) fn split_zip64_extra(
    extra: &[u8],
    uncompressed_sentinel: bool,
    compressed_sentinel: bool,
    offset_sentinel: bool,
    disk_sentinel: bool,
) -> (Option<Zip64ExtraValues>, Vec<u8>) {
    let mut zip64 = None;
    let mut rest = Vec::new();
    let mut i = 0usize;
    while i + 4 <= extra.len() {
        let id = read_u16(extra, i);
        let data_len = read_u16(extra, i + 2) as usize;
        if i + 4 + data_len > extra.len() {
            // Malformed tail, keep it verbatim.
            rest.extend_from_slice(&extra[i..]);
            return (zip64, rest);
        }
        let data = &extra[i + 4..i + 4 + data_len];
        if id == ZIP64_EXTRA_FIELD_ID && zip64.is_none() {
            let mut values = Zip64ExtraValues::default();
            let mut cursor = 0usize;
            if uncompressed_sentinel && cursor + 8 <= data.len() {
                values.uncompressed_size = Some(read_u64(data, cursor));
                cursor += 8;
            }
            if compressed_sentinel && cursor + 8 <= data.len() {
                values.compressed_size = Some(read_u64(data, cursor));
                cursor += 8;
            }
            if offset_sentinel && cursor + 8 <= data.len() {
                values.local_header_offset = Some(read_u64(data, cursor));
                cursor += 8;
            }
            if disk_sentinel && cursor + 4 <= data.len() {
                values.disk_number_start = Some(read_u32(data, cursor));
            }
            zip64 = Some(values);
        } else {
            rest.extend_from_slice(&extra[i..i + 4 + data_len]);
        }
        i += 4 + data_len;
    }
    if i < extra.len() {
        rest.extend_from_slice(&extra[i..]);
    }
    (zip64, rest)
}

/// Locate and parse the EOCD by scanning backward from the end of the
/// backing over at most `EOCD_MAX_SEARCH` bytes. A candidate whose comment
/// length does not reach EOF is rejected and the scan continues, so a
/// comment containing the signature bytes cannot shadow the real record.
pub(crate) fn scan_for_eocd(backing: &mut Backing) -> Result<(u64, EndOfCentralDirectory)> {
    let file_len = backing.seek_to_end()?;
    if file_len < EndOfCentralDirectory::SIZE as u64 {
        return Err(ZipError::UnreadableArchive(
            "backing too small to hold an end of central directory record".to_string(),
        ));
    }
    let window_start = file_len - file_len.min(EOCD_MAX_SEARCH);
    backing.seek(window_start)?;
    let window = backing.read_to_end()?;

    let signature = EOCD_SIGNATURE.to_le_bytes();
    for i in (0..=window.len() - EndOfCentralDirectory::SIZE).rev() {
        if window[i..i + 4] != signature {
            continue;
        }
        if let Some((mut record, comment_len)) = EndOfCentralDirectory::parse(&window[i..]) {
            let candidate_end = window_start + i as u64 + EndOfCentralDirectory::SIZE as u64;
            if candidate_end + comment_len as u64 != file_len {
                continue;
            }
            let comment_start = i + EndOfCentralDirectory::SIZE;
            record.comment = window[comment_start..comment_start + comment_len].to_vec();
            return Ok((window_start + i as u64, record));
        }
    }
    Err(ZipError::UnreadableArchive(
        "end of central directory record not found".to_string(),
    ))
}

/// Probe the 20 bytes preceding the EOCD for the ZIP64 locator and follow
/// it to the ZIP64 EOCD record.
pub(crate) fn locate_zip64_eocd(
    backing: &mut Backing,
    eocd_offset: u64,
) -> Result<Option<Zip64Eocd>> {
    if eocd_offset < Zip64EocdLocator::SIZE as u64 {
        return Ok(None);
    }
    backing.seek(eocd_offset - Zip64EocdLocator::SIZE as u64)?;
    let bytes = backing.read_exact(Zip64EocdLocator::SIZE)?;
    let locator = match Zip64EocdLocator::parse(&bytes) {
        Some(locator) => locator,
        None => return Ok(None),
    };
    backing.seek(locator.eocd64_offset)?;
    let bytes = backing.read_exact(Zip64Eocd::SIZE)?;
    match Zip64Eocd::parse(&bytes) {
        Some(record) => Ok(Some(record)),
        None => Err(ZipError::UnreadableArchive(
            "ZIP64 locator does not point at a ZIP64 end of central directory record".to_string(),
        )),
    }
}
