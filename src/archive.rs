//! Stateful ZIP archive container.
//!
//! An [`Archive`] owns a backing, the cached end-of-central-directory
//! records and an ordered catalog of entries. The catalog always mirrors the
//! on-disk central directory: every mutation streams payload bytes first and
//! commits by rewriting the whole central directory and footer last, so a
//! failure mid-operation leaves the previous directory intact and the
//! archive re-openable.
//!
//! Operations take `&mut self`; at most one is in flight per archive and
//! every step seeks explicitly.

use crate::backing::{Backing, OpenFlags};
use crate::cancel::CancelToken;
use crate::compression::{read_payload, write_payload};
use crate::entry::{
    unix_to_dos, CompressionMethod, Entry, EntryKind, DEFAULT_DIRECTORY_PERMISSIONS,
    DEFAULT_FILE_PERMISSIONS, FLAG_UTF8, MSDOS_DIRECTORY_ATTRIBUTE, S_IFDIR, S_IFLNK, S_IFMT,
    S_IFREG,
};
use crate::error::{Result, ZipError};
use crate::records::{
    data_descriptor_len, locate_zip64_eocd, scan_for_eocd, split_zip64_extra,
    CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, LocalFileHeader, Zip64Eocd,
    Zip64EocdLocator, Zip64ExtraValues, VERSION_MADE_BY_UNIX, VERSION_NEEDED_DEFAULT,
    VERSION_NEEDED_ZIP64,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Chunk size used when no explicit buffer size is given.
pub const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// How an archive is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Iterate, look up and extract only.
    Read,
    /// Everything `Read` allows, plus adding and removing entries.
    Update,
    /// Like `Update`, over a freshly created archive. Fails if the target
    /// already exists.
    Create,
}

/// Boundaries above which narrow fields overflow into ZIP64 structures.
/// Lowered by unit tests to exercise the promotion paths.
#[derive(Debug, Clone, Copy)]
struct Zip64Limits {
    max_u32: u64,
    max_u16: u64,
}

impl Default for Zip64Limits {
    fn default() -> Self {
        Zip64Limits {
            max_u32: u32::MAX as u64,
            max_u16: u16::MAX as u64,
        }
    }
}

/// Configuration for [`Archive::add_entry`].
#[derive(Debug, Clone)]
pub struct AddOptions {
    pub kind: EntryKind,
    pub method: CompressionMethod,
    /// DEFLATE level 0-9
    pub compression_level: u32,
    pub buffer_size: usize,
    /// POSIX permission bits; defaults to 0644 for files and 0755 otherwise
    pub permissions: Option<u16>,
    pub modified: SystemTime,
    /// Expected uncompressed size. Required for entries of 4 GiB or more so
    /// the local header can reserve its ZIP64 extra field up front.
    pub size_hint: Option<u64>,
    pub cancel: CancelToken,
}

impl Default for AddOptions {
    fn default() -> Self {
        AddOptions {
            kind: EntryKind::File,
            method: CompressionMethod::Deflate,
            compression_level: 6,
            buffer_size: DEFAULT_BUFFER_SIZE,
            permissions: None,
            modified: SystemTime::now(),
            size_hint: None,
            cancel: CancelToken::new(),
        }
    }
}

impl AddOptions {
    /// Options for an uncompressed entry.
    pub fn stored() -> Self {
        AddOptions::default().with_method(CompressionMethod::Stored)
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_method(mut self, method: CompressionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_permissions(mut self, permissions: u16) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = modified;
        self
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Configuration for [`Archive::extract`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub buffer_size: usize,
    pub verify_crc32: bool,
    pub cancel: CancelToken,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            buffer_size: DEFAULT_BUFFER_SIZE,
            verify_crc32: true,
            cancel: CancelToken::new(),
        }
    }
}

impl ExtractOptions {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Skip the checksum comparison after streaming.
    pub fn skip_crc32(mut self) -> Self {
        self.verify_crc32 = false;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// A ZIP archive over a file or in-memory backing.
pub struct Archive {
    backing: Backing,
    mode: AccessMode,
    eocd: EndOfCentralDirectory,
    zip64_eocd: Option<Zip64Eocd>,
    entries: Vec<Entry>,
    index: HashMap<Vec<u8>, usize>,
    limits: Zip64Limits,
}

impl Archive {
    /// Open a file archive. `Create` writes an empty end-of-central-directory
    /// record to a new file and fails if the target exists; `Update` requires
    /// a writable file with a valid central directory.
    pub fn open<P: AsRef<Path>>(path: P, mode: AccessMode) -> Result<Archive> {
        let path = path.as_ref();
        let backing = match mode {
            AccessMode::Read => Backing::open_file(path, OpenFlags::read_only()).map_err(|e| {
                ZipError::UnreadableArchive(format!("cannot open {}: {}", path.display(), e))
            })?,
            AccessMode::Update => {
                Backing::open_file(path, OpenFlags::read_write()).map_err(|e| {
                    ZipError::UnwritableArchive(format!(
                        "cannot open {} for update: {}",
                        path.display(),
                        e
                    ))
                })?
            }
            AccessMode::Create => {
                let mut backing =
                    Backing::open_file(path, OpenFlags::create_new()).map_err(|e| {
                        ZipError::UnwritableArchive(format!(
                            "cannot create {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                backing.write_all(&EndOfCentralDirectory::empty().to_bytes())?;
                backing.sync()?;
                backing
            }
        };
        Self::from_backing(backing, mode)
    }

    /// Open an archive over an in-memory buffer. `Create` requires an empty
    /// buffer and seeds it with an empty end-of-central-directory record.
    pub fn with_buffer(data: Vec<u8>, mode: AccessMode) -> Result<Archive> {
        let backing = match mode {
            AccessMode::Read => Backing::in_memory(data, OpenFlags::read_only()),
            AccessMode::Update => Backing::in_memory(data, OpenFlags::read_write()),
            AccessMode::Create => {
                if !data.is_empty() {
                    return Err(ZipError::UnwritableArchive(
                        "create mode requires an empty buffer".to_string(),
                    ));
                }
                let mut backing = Backing::in_memory(Vec::new(), OpenFlags::read_write());
                backing.write_all(&EndOfCentralDirectory::empty().to_bytes())?;
                backing
            }
        };
        Self::from_backing(backing, mode)
    }

    /// Shorthand for a fresh writable in-memory archive.
    pub fn create_in_memory() -> Result<Archive> {
        Self::with_buffer(Vec::new(), AccessMode::Create)
    }

    fn from_backing(mut backing: Backing, mode: AccessMode) -> Result<Archive> {
        let (eocd_offset, eocd) = scan_for_eocd(&mut backing)?;
        let zip64_eocd = locate_zip64_eocd(&mut backing, eocd_offset)?;
        let entries = Self::read_central_directory(&mut backing, &eocd, zip64_eocd.as_ref())?;
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            index.insert(entry.path_bytes().to_vec(), i);
        }
        debug!(mode = ?mode, entries = entries.len(), "opened archive");
        Ok(Archive {
            backing,
            mode,
            eocd,
            zip64_eocd,
            entries,
            index,
            limits: Zip64Limits::default(),
        })
    }

    fn read_central_directory(
        backing: &mut Backing,
        eocd: &EndOfCentralDirectory,
        zip64: Option<&Zip64Eocd>,
    ) -> Result<Vec<Entry>> {
        let (total, cd_offset) = match zip64 {
            Some(record) => (record.total_entries, record.cd_offset),
            None => {
                if eocd.total_entries == u16::MAX
                    || eocd.cd_size == u32::MAX
                    || eocd.cd_offset == u32::MAX
                {
                    return Err(ZipError::UnreadableArchive(
                        "EOCD carries ZIP64 sentinels but no ZIP64 record was found".to_string(),
                    ));
                }
                (eocd.total_entries as u64, eocd.cd_offset as u64)
            }
        };

        let mut entries = Vec::with_capacity(total.min(u16::MAX as u64) as usize);
        let mut cursor = cd_offset;
        for _ in 0..total {
            backing.seek(cursor)?;
            let fixed = scan_read(backing, CentralDirectoryHeader::SIZE)?;
            let (mut cdh, name_len, extra_len, comment_len) =
                CentralDirectoryHeader::parse(&fixed).ok_or_else(|| {
                    ZipError::UnreadableArchive(
                        "bad central directory header signature".to_string(),
                    )
                })?;
            cdh.file_name = scan_read(backing, name_len)?;
            let raw_extra = scan_read(backing, extra_len)?;
            cdh.comment = scan_read(backing, comment_len)?;
            cursor = backing.offset()?;

            let uncompressed_sentinel = cdh.uncompressed_size == u32::MAX;
            let compressed_sentinel = cdh.compressed_size == u32::MAX;
            let offset_sentinel = cdh.local_header_offset == u32::MAX;
            let disk_sentinel = cdh.disk_number_start == u16::MAX;
            let (zip64_extra, foreign_extra) = split_zip64_extra(
                &raw_extra,
                uncompressed_sentinel,
                compressed_sentinel,
                offset_sentinel,
                disk_sentinel,
            );
            cdh.extra_field = foreign_extra;
            let shadows = zip64_extra.unwrap_or_default();
            let uncompressed_size = shadows
                .uncompressed_size
                .unwrap_or(cdh.uncompressed_size as u64);
            let compressed_size = shadows
                .compressed_size
                .unwrap_or(cdh.compressed_size as u64);
            let local_header_offset = shadows
                .local_header_offset
                .unwrap_or(cdh.local_header_offset as u64);

            backing.seek(local_header_offset)?;
            let lfh_fixed = scan_read(backing, LocalFileHeader::SIZE)?;
            let (mut lfh, lfh_name_len, lfh_extra_len) = LocalFileHeader::parse(&lfh_fixed)
                .ok_or_else(|| {
                    ZipError::UnreadableArchive("bad local file header signature".to_string())
                })?;
            lfh.file_name = scan_read(backing, lfh_name_len)?;
            lfh.extra_field = scan_read(backing, lfh_extra_len)?;

            let mut entry = Entry {
                cdh,
                lfh,
                local_header_offset,
                compressed_size,
                uncompressed_size,
                data_descriptor_size: 0,
            };
            if entry.has_data_descriptor() {
                let payload_end = local_header_offset + entry.lfh.len() + compressed_size;
                backing.seek(payload_end)?;
                let probe = backing.read_up_to(24)?;
                let lfh_zip64 =
                    split_zip64_extra(&entry.lfh.extra_field, false, false, false, false)
                        .0
                        .is_some();
                entry.data_descriptor_size = data_descriptor_len(&probe, lfh_zip64);
                if let Some(descriptor) = DataDescriptor::parse(&probe, lfh_zip64) {
                    if descriptor.crc32 != entry.cdh.crc32 {
                        return Err(ZipError::UnreadableArchive(format!(
                            "data descriptor disagrees with central directory for {}",
                            entry.path()
                        )));
                    }
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Entries in on-disk central directory order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by its exact stored path bytes. No case folding, no
    /// normalization; directory entries carry their trailing slash.
    pub fn entry<P: AsRef<[u8]>>(&self, path: P) -> Option<&Entry> {
        self.index.get(path.as_ref()).map(|&i| &self.entries[i])
    }

    pub fn contains<P: AsRef<[u8]>>(&self, path: P) -> bool {
        self.index.contains_key(path.as_ref())
    }

    /// The archive comment, preserved across central directory rewrites.
    pub fn comment(&self) -> &[u8] {
        &self.eocd.comment
    }

    /// Borrow the raw bytes of an in-memory archive.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        self.backing.memory_slice()
    }

    /// Consume the archive and return the buffer of an in-memory backing.
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        self.backing.into_memory()
    }

    fn cd_offset(&self) -> u64 {
        match &self.zip64_eocd {
            Some(record) => record.cd_offset,
            None => self.eocd.cd_offset as u64,
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.mode == AccessMode::Read {
            return Err(ZipError::UnwritableArchive(
                "archive is opened read-only".to_string(),
            ));
        }
        Ok(())
    }

    /// Add an entry whose content is pulled from `provider(offset, max)` in
    /// `buffer_size` chunks until it returns an empty chunk.
    ///
    /// The payload overwrites the outgoing central directory, a definitive
    /// local header is written back over the placeholder once the sizes and
    /// CRC are known, and the central directory plus footer are rewritten
    /// last. An existing entry at the same path is removed first.
    pub fn add_entry<P>(&mut self, path: &str, options: AddOptions, mut provider: P) -> Result<()>
    where
        P: FnMut(u64, usize) -> Result<Vec<u8>>,
    {
        self.ensure_writable()?;
        if path.is_empty() {
            return Err(ZipError::InvalidEntryPath(
                "entry path must not be empty".to_string(),
            ));
        }
        let mut name = path.as_bytes().to_vec();
        if options.kind == EntryKind::Directory && !name.ends_with(b"/") {
            name.push(b'/');
        }
        if self.index.contains_key(&name) {
            self.remove_entry_with(&name, &options.cancel)?;
        }
        options.cancel.check()?;

        let local_header_offset = self.cd_offset();
        let reserve_zip64 = options
            .size_hint
            .map_or(false, |hint| hint >= self.limits.max_u32);

        let (mod_date, mod_time) = dos_fields(options.modified);
        let mut lfh = LocalFileHeader {
            version_needed: if reserve_zip64 {
                VERSION_NEEDED_ZIP64
            } else {
                VERSION_NEEDED_DEFAULT
            },
            flags: FLAG_UTF8,
            method: options.method.as_u16(),
            mod_time,
            mod_date,
            crc32: 0,
            compressed_size: if reserve_zip64 { u32::MAX } else { 0 },
            uncompressed_size: if reserve_zip64 { u32::MAX } else { 0 },
            file_name: name.clone(),
            extra_field: if reserve_zip64 {
                Zip64ExtraValues {
                    uncompressed_size: Some(0),
                    compressed_size: Some(0),
                    ..Zip64ExtraValues::default()
                }
                .to_bytes()
            } else {
                Vec::new()
            },
        };
        self.backing.seek(local_header_offset)?;
        self.backing.write_all(&lfh.to_bytes())?;

        let counters = write_payload(
            &mut self.backing,
            options.method,
            options.compression_level,
            options.buffer_size,
            &options.cancel,
            &mut provider,
        )?;

        // The header is rewritten in place, so its length must not change:
        // without a reserved ZIP64 extra there is no room for 64-bit sizes.
        let overflows = counters.uncompressed_size >= self.limits.max_u32
            || counters.compressed_size >= self.limits.max_u32;
        if overflows && !reserve_zip64 {
            return Err(ZipError::UnwritableArchive(
                "entry overflows 32-bit size fields; supply a size hint when adding entries of 4 GiB or more"
                    .to_string(),
            ));
        }
        lfh.crc32 = counters.crc32;
        if reserve_zip64 {
            lfh.extra_field = Zip64ExtraValues {
                uncompressed_size: Some(counters.uncompressed_size),
                compressed_size: Some(counters.compressed_size),
                ..Zip64ExtraValues::default()
            }
            .to_bytes();
        } else {
            lfh.compressed_size = counters.compressed_size as u32;
            lfh.uncompressed_size = counters.uncompressed_size as u32;
        }
        self.backing.seek(local_header_offset)?;
        self.backing.write_all(&lfh.to_bytes())?;

        let permissions = options.permissions.unwrap_or(match options.kind {
            EntryKind::File => DEFAULT_FILE_PERMISSIONS,
            EntryKind::Directory | EntryKind::Symlink => DEFAULT_DIRECTORY_PERMISSIONS,
        });
        let type_bits = match options.kind {
            EntryKind::File => S_IFREG,
            EntryKind::Directory => S_IFDIR,
            EntryKind::Symlink => S_IFLNK,
        };
        let mut external_attributes =
            ((type_bits | (permissions & !S_IFMT)) as u32) << 16;
        if options.kind == EntryKind::Directory {
            external_attributes |= MSDOS_DIRECTORY_ATTRIBUTE;
        }

        let cdh = CentralDirectoryHeader {
            version_made_by: VERSION_MADE_BY_UNIX,
            version_needed: lfh.version_needed,
            flags: FLAG_UTF8,
            method: options.method.as_u16(),
            mod_time,
            mod_date,
            crc32: counters.crc32,
            // Narrow size and offset fields are recomputed from the resolved
            // 64-bit values on every central directory write.
            compressed_size: 0,
            uncompressed_size: 0,
            disk_number_start: 0,
            internal_attributes: 0,
            external_attributes,
            local_header_offset: 0,
            file_name: name.clone(),
            extra_field: Vec::new(),
            comment: Vec::new(),
        };
        let entry = Entry {
            cdh,
            lfh,
            local_header_offset,
            compressed_size: counters.compressed_size,
            uncompressed_size: counters.uncompressed_size,
            data_descriptor_size: 0,
        };
        let cd_start = local_header_offset + entry.local_size();
        let slot = self.entries.len();
        self.entries.push(entry);
        self.index.insert(name, slot);

        self.rewrite_central_directory(cd_start)?;
        debug!(
            path = %path,
            uncompressed = counters.uncompressed_size,
            compressed = counters.compressed_size,
            "added entry"
        );
        Ok(())
    }

    /// Add an entry with contents taken from a byte slice.
    pub fn add_buffer(&mut self, path: &str, data: &[u8], options: AddOptions) -> Result<()> {
        let options = if options.size_hint.is_none() {
            options.with_size_hint(data.len() as u64)
        } else {
            options
        };
        self.add_entry(path, options, |offset, max| {
            let start = (offset as usize).min(data.len());
            let end = (start + max).min(data.len());
            Ok(data[start..end].to_vec())
        })
    }

    /// Add a directory entry. A trailing slash is appended if missing.
    pub fn add_directory(&mut self, path: &str, options: AddOptions) -> Result<()> {
        let options = options
            .with_kind(EntryKind::Directory)
            .with_method(CompressionMethod::Stored);
        self.add_entry(path, options, |_, _| Ok(Vec::new()))
    }

    /// Add a symbolic link entry whose content is the link target.
    pub fn add_symlink(&mut self, path: &str, target: &str, options: AddOptions) -> Result<()> {
        let options = options
            .with_kind(EntryKind::Symlink)
            .with_method(CompressionMethod::Stored);
        self.add_buffer(path, target.as_bytes(), options)
    }

    /// Remove the entry at `path`, compacting the payload region and
    /// rewriting the central directory.
    pub fn remove_entry<P: AsRef<[u8]>>(&mut self, path: P) -> Result<()> {
        self.remove_entry_with(path, &CancelToken::new())
    }

    /// [`Archive::remove_entry`] with a cancellation token checked between
    /// copied chunks.
    pub fn remove_entry_with<P: AsRef<[u8]>>(
        &mut self,
        path: P,
        cancel: &CancelToken,
    ) -> Result<()> {
        self.ensure_writable()?;
        let path = path.as_ref();
        let idx = match self.index.get(path) {
            Some(&idx) => idx,
            None => {
                return Err(ZipError::InvalidEntryPath(format!(
                    "no entry at {}",
                    String::from_utf8_lossy(path)
                )))
            }
        };
        let removed = self.entries[idx].clone();
        let local_size = removed.local_size();
        let hole_start = removed.local_header_offset;
        let cd_offset = self.cd_offset();

        // Slide the payloads of every later entry over the hole.
        let mut src = hole_start + local_size;
        let mut dst = hole_start;
        while src < cd_offset {
            cancel.check()?;
            let want = (DEFAULT_BUFFER_SIZE as u64).min(cd_offset - src) as usize;
            self.backing.seek(src)?;
            let chunk = self.backing.read_exact(want)?;
            self.backing.seek(dst)?;
            self.backing.write_all(&chunk)?;
            src += chunk.len() as u64;
            dst += chunk.len() as u64;
        }

        self.entries.remove(idx);
        for entry in self.entries.iter_mut() {
            if entry.local_header_offset > hole_start {
                entry.local_header_offset -= local_size;
            }
        }
        self.rebuild_index();
        self.rewrite_central_directory(cd_offset - local_size)?;
        debug!(path = %String::from_utf8_lossy(path), freed = local_size, "removed entry");
        Ok(())
    }

    /// Stream an entry's decompressed content into `consumer` and return the
    /// computed CRC-32. The checksum is compared against the central
    /// directory unless disabled in `options`.
    pub fn extract<P, C>(&mut self, path: P, options: ExtractOptions, consumer: C) -> Result<u32>
    where
        P: AsRef<[u8]>,
        C: FnMut(&[u8]) -> Result<()>,
    {
        let path = path.as_ref();
        let entry = self.entry(path).cloned().ok_or_else(|| {
            ZipError::InvalidEntryPath(format!("no entry at {}", String::from_utf8_lossy(path)))
        })?;
        self.extract_entry(&entry, options, consumer)
    }

    /// [`Archive::extract`] for an entry snapshot obtained earlier.
    pub fn extract_entry<C>(
        &mut self,
        entry: &Entry,
        options: ExtractOptions,
        mut consumer: C,
    ) -> Result<u32>
    where
        C: FnMut(&[u8]) -> Result<()>,
    {
        self.backing.seek(entry.local_header_offset())?;
        let fixed = self.backing.read_exact(LocalFileHeader::SIZE)?;
        let (_, name_len, extra_len) = LocalFileHeader::parse(&fixed).ok_or_else(|| {
            ZipError::UnreadableArchive("bad local file header signature".to_string())
        })?;
        let data_start = entry.local_header_offset()
            + LocalFileHeader::SIZE as u64
            + name_len as u64
            + extra_len as u64;
        self.backing.seek(data_start)?;
        let (crc32, _) = read_payload(
            &mut self.backing,
            entry.method(),
            entry.compressed_size(),
            options.buffer_size,
            &options.cancel,
            &mut consumer,
        )?;
        if options.verify_crc32 && crc32 != entry.checksum() {
            return Err(ZipError::InvalidCrc32 {
                expected: entry.checksum(),
                actual: crc32,
            });
        }
        Ok(crc32)
    }

    /// Extract an entry into a vector.
    pub fn read_entry<P: AsRef<[u8]>>(&mut self, path: P) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.extract(path, ExtractOptions::default(), |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(out)
    }

    /// Extract every entry with checksum verification into a sink.
    pub fn check_integrity(&mut self) -> Result<()> {
        let entries = self.entries.clone();
        for entry in &entries {
            self.extract_entry(entry, ExtractOptions::default(), |_| Ok(()))?;
        }
        Ok(())
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.path_bytes().to_vec(), i))
            .collect();
    }

    /// Write every central directory header, the ZIP64 records when any
    /// archive-wide value overflows, and the footer. Commits the catalog to
    /// disk; cached records are refreshed afterwards.
    fn rewrite_central_directory(&mut self, cd_offset: u64) -> Result<()> {
        let limits = self.limits;
        self.backing.seek(cd_offset)?;
        let mut cd_size = 0u64;
        for entry in &self.entries {
            let bytes = serialize_cdh(entry, &limits);
            self.backing.write_all(&bytes)?;
            cd_size += bytes.len() as u64;
        }
        let total = self.entries.len() as u64;
        let needs_zip64 =
            total >= limits.max_u16 || cd_size >= limits.max_u32 || cd_offset >= limits.max_u32;
        let zip64_eocd = if needs_zip64 {
            let record = Zip64Eocd::new(total, cd_size, cd_offset);
            self.backing.write_all(&record.to_bytes())?;
            let locator = Zip64EocdLocator {
                disk_with_eocd64: 0,
                eocd64_offset: cd_offset + cd_size,
                total_disks: 1,
            };
            self.backing.write_all(&locator.to_bytes())?;
            Some(record)
        } else {
            None
        };
        let eocd = EndOfCentralDirectory {
            disk_number: 0,
            disk_with_cd: 0,
            entries_on_disk: clamp_u16(total, &limits),
            total_entries: clamp_u16(total, &limits),
            cd_size: clamp_u32(cd_size, &limits),
            cd_offset: clamp_u32(cd_offset, &limits),
            comment: self.eocd.comment.clone(),
        };
        self.backing.write_all(&eocd.to_bytes())?;
        let end = self.backing.offset()?;
        self.backing.truncate(end)?;
        self.backing.sync()?;
        self.eocd = eocd;
        self.zip64_eocd = zip64_eocd;
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Archive {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn clamp_u16(value: u64, limits: &Zip64Limits) -> u16 {
    if value >= limits.max_u16 {
        u16::MAX
    } else {
        value as u16
    }
}

fn clamp_u32(value: u64, limits: &Zip64Limits) -> u32 {
    if value >= limits.max_u32 {
        u32::MAX
    } else {
        value as u32
    }
}

fn scan_read(backing: &mut Backing, n: usize) -> Result<Vec<u8>> {
    backing
        .read_exact(n)
        .map_err(|e| ZipError::UnreadableArchive(format!("truncated record: {}", e)))
}

fn dos_fields(modified: SystemTime) -> (u16, u16) {
    let unix = match modified.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_secs() as i64,
        Err(before) => -(before.duration().as_secs() as i64),
    };
    unix_to_dos(unix)
}

/// Serialize one central directory header, recomputing the narrow fields and
/// the ZIP64 extra from the entry's resolved values. Foreign extra tags are
/// forwarded verbatim after the ZIP64 block.
fn serialize_cdh(entry: &Entry, limits: &Zip64Limits) -> Vec<u8> {
    let mut cdh = entry.cdh.clone();
    let uncompressed_over = entry.uncompressed_size() >= limits.max_u32;
    let compressed_over = entry.compressed_size() >= limits.max_u32;
    let offset_over = entry.local_header_offset() >= limits.max_u32;
    cdh.uncompressed_size = if uncompressed_over {
        u32::MAX
    } else {
        entry.uncompressed_size() as u32
    };
    cdh.compressed_size = if compressed_over {
        u32::MAX
    } else {
        entry.compressed_size() as u32
    };
    cdh.local_header_offset = if offset_over {
        u32::MAX
    } else {
        entry.local_header_offset() as u32
    };
    if uncompressed_over || compressed_over || offset_over {
        let values = Zip64ExtraValues {
            uncompressed_size: uncompressed_over.then_some(entry.uncompressed_size()),
            compressed_size: compressed_over.then_some(entry.compressed_size()),
            local_header_offset: offset_over.then_some(entry.local_header_offset()),
            disk_number_start: None,
        };
        let mut extra = values.to_bytes();
        extra.extend_from_slice(&entry.cdh.extra_field);
        cdh.extra_field = extra;
        if cdh.version_needed < VERSION_NEEDED_ZIP64 {
            cdh.version_needed = VERSION_NEEDED_ZIP64;
        }
    }
    cdh.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{EOCD_SIGNATURE, ZIP64_EOCD_LOCATOR_SIGNATURE, ZIP64_EOCD_SIGNATURE};

    #[test]
    fn test_create_in_memory_is_empty() {
        let archive = Archive::create_in_memory().unwrap();
        assert!(archive.is_empty());
        assert_eq!(archive.as_bytes().unwrap().len(), 22);
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive
            .add_buffer("a.txt", b"one", AddOptions::stored())
            .unwrap();
        archive
            .add_buffer("a.txt", b"three", AddOptions::stored())
            .unwrap();
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.read_entry("a.txt").unwrap(), b"three");
    }

    #[test]
    fn test_zip64_promotion_with_lowered_thresholds() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.limits = Zip64Limits {
            max_u32: 4096,
            max_u16: 64,
        };
        let data = [0xABu8; 100];
        for i in 0..65 {
            archive
                .add_buffer(&format!("entry-{:03}", i), &data, AddOptions::stored())
                .unwrap();
        }

        let buffer = archive.into_buffer().unwrap();
        // Classic EOCD sits at the very end (empty comment) with sentinel
        // counts and offset.
        let eocd = &buffer[buffer.len() - 22..];
        assert_eq!(eocd[0..4], EOCD_SIGNATURE.to_le_bytes());
        assert_eq!(eocd[8..10], 0xFFFFu16.to_le_bytes());
        assert_eq!(eocd[10..12], 0xFFFFu16.to_le_bytes());
        assert_eq!(eocd[16..20], 0xFFFF_FFFFu32.to_le_bytes());
        // The locator sits directly before the EOCD and the record before
        // that.
        let locator = &buffer[buffer.len() - 42..buffer.len() - 22];
        assert_eq!(locator[0..4], ZIP64_EOCD_LOCATOR_SIGNATURE.to_le_bytes());
        let record_offset =
            u64::from_le_bytes(locator[8..16].try_into().unwrap()) as usize;
        assert_eq!(
            buffer[record_offset..record_offset + 4],
            ZIP64_EOCD_SIGNATURE.to_le_bytes()
        );

        // Reopening with default limits resolves totals through the ZIP64
        // record.
        let mut reopened = Archive::with_buffer(buffer, AccessMode::Read).unwrap();
        assert_eq!(reopened.len(), 65);
        assert_eq!(reopened.read_entry("entry-064").unwrap(), data);
        reopened.check_integrity().unwrap();
    }

    #[test]
    fn test_zip64_entry_sizes_with_lowered_threshold() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.limits = Zip64Limits {
            max_u32: 4096,
            max_u16: u16::MAX as u64,
        };
        let data = vec![7u8; 5000];
        archive
            .add_buffer("big.bin", &data, AddOptions::stored())
            .unwrap();
        let entry = archive.entry("big.bin").unwrap();
        assert_eq!(entry.uncompressed_size(), 5000);
        // The narrow fields carry the sentinel; the real sizes travel in the
        // ZIP64 extra.
        let bytes = serialize_cdh(entry, &archive.limits);
        let narrow = u32::from_le_bytes(bytes[20..24].try_into().unwrap());
        assert_eq!(narrow, u32::MAX);
        assert_eq!(archive.read_entry("big.bin").unwrap(), data);
    }

    #[test]
    fn test_oversized_entry_without_hint_is_rejected() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive.limits = Zip64Limits {
            max_u32: 4096,
            max_u16: u16::MAX as u64,
        };
        let data = vec![7u8; 5000];
        let result = archive.add_entry(
            "big.bin",
            AddOptions::stored(),
            |offset, max| {
                let start = (offset as usize).min(data.len());
                let end = (start + max).min(data.len());
                Ok(data[start..end].to_vec())
            },
        );
        assert!(matches!(result, Err(ZipError::UnwritableArchive(_))));
    }

    #[test]
    fn test_remove_shifts_successor_offsets() {
        let mut archive = Archive::create_in_memory().unwrap();
        archive
            .add_buffer("first", b"aaaa", AddOptions::stored())
            .unwrap();
        archive
            .add_buffer("second", b"bbbb", AddOptions::stored())
            .unwrap();
        archive
            .add_buffer("third", b"cccc", AddOptions::stored())
            .unwrap();
        let freed = archive.entry("second").unwrap().local_size();
        let third_before = archive.entry("third").unwrap().local_header_offset();

        archive.remove_entry("second").unwrap();
        let paths: Vec<String> =
            archive.entries().iter().map(|e| e.path().into_owned()).collect();
        assert_eq!(paths, ["first", "third"]);
        assert_eq!(
            archive.entry("third").unwrap().local_header_offset(),
            third_before - freed
        );
        assert_eq!(archive.read_entry("first").unwrap(), b"aaaa");
        assert_eq!(archive.read_entry("third").unwrap(), b"cccc");
        archive.check_integrity().unwrap();
    }
}
