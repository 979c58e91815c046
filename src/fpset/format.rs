// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Sorted fingerprint files.
//!
//! Overflow pages and checkpoint segments share one layout:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Header (32 bytes, little endian)            │
//! │  - Magic: "FPPG" (page) / "FPCK" (chkpt)     │
//! │  - Version: u32                              │
//! │  - Entry count: u64                          │
//! │  - Checksum: u64 (FNV-1a over the entries)   │
//! │  - Reserved: u64                             │
//! ├──────────────────────────────────────────────┤
//! │  Entries: count × u64, strictly ascending    │
//! └──────────────────────────────────────────────┘
//! ```

use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fnv::FnvHasher;

use crate::error::{FpSetError, FpSetResult, IoResultExt};

/// Header size in bytes.
pub(crate) const HEADER_LEN: u64 = 32;

/// Current file format version.
pub(crate) const FORMAT_VERSION: u32 = 1;

/// What a fingerprint file is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    /// Disk overflow page
    Page,
    /// Checkpoint segment
    Checkpoint,
}

impl FileKind {
    fn magic(self) -> &'static [u8; 4] {
        match self {
            FileKind::Page => b"FPPG",
            FileKind::Checkpoint => b"FPCK",
        }
    }
}

/// Decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    pub count: u64,
    pub checksum: u64,
}

impl Header {
    fn encode(&self, kind: FileKind) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..4].copy_from_slice(kind.magic());
        buf[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[8..16].copy_from_slice(&self.count.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Reads and validates the header at the current position of `file`.
    pub fn read(file: &mut File, kind: FileKind, path: &Path) -> FpSetResult<Self> {
        let mut buf = [0u8; HEADER_LEN as usize];
        file.read_exact(&mut buf)
            .map_err(|e| FpSetError::corrupt(path, format!("unreadable header: {e}")))?;

        if &buf[0..4] != kind.magic() {
            return Err(FpSetError::corrupt(path, "bad magic"));
        }
        let version = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if version != FORMAT_VERSION {
            return Err(FpSetError::corrupt(
                path,
                format!("unsupported format version {version}"),
            ));
        }
        let header = Self {
            count: decode_u64(&buf[8..16]),
            checksum: decode_u64(&buf[16..24]),
        };

        let len = file
            .metadata()
            .storage_context(|| format!("reading metadata of {}", path.display()))?
            .len();
        let expected = header
            .count
            .checked_mul(8)
            .and_then(|bytes| bytes.checked_add(HEADER_LEN));
        if expected != Some(len) {
            return Err(FpSetError::corrupt(
                path,
                format!("length {len} does not match {} entries", header.count),
            ));
        }
        Ok(header)
    }
}

/// Decodes a little-endian u64 from an 8-byte slice.
#[inline]
pub(crate) fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Result of finishing a [`FingerprintWriter`].
#[derive(Debug, Clone)]
pub(crate) struct WrittenFile {
    pub path: PathBuf,
    pub count: u64,
    pub checksum: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
    /// Every `stride`-th entry, when an index was requested
    pub index: Vec<u64>,
}

/// Streams strictly ascending fingerprints into a new file.
pub(crate) struct FingerprintWriter {
    path: PathBuf,
    kind: FileKind,
    out: BufWriter<File>,
    hasher: FnvHasher,
    count: u64,
    min: Option<u64>,
    last: Option<u64>,
    index_stride: u64,
    index: Vec<u64>,
    sync: bool,
}

impl FingerprintWriter {
    /// Creates (or truncates) `path` and reserves room for the header.
    pub fn create(path: &Path, kind: FileKind, sync: bool) -> FpSetResult<Self> {
        let context = || format!("creating {}", path.display());
        let file = File::create(path).storage_context(context)?;
        let mut out = BufWriter::new(file);
        out.write_all(&[0u8; HEADER_LEN as usize])
            .storage_context(context)?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
            out,
            hasher: FnvHasher::default(),
            count: 0,
            min: None,
            last: None,
            index_stride: 0,
            index: Vec::new(),
            sync,
        })
    }

    /// Records every `stride`-th entry as a sparse probe index.
    pub fn with_index(mut self, stride: usize) -> Self {
        self.index_stride = stride as u64;
        self
    }

    /// Appends `fp`, which must be greater than every entry written so far.
    pub fn push(&mut self, fp: u64) -> FpSetResult<()> {
        debug_assert!(self.last.map_or(true, |last| fp > last));
        let bytes = fp.to_le_bytes();
        self.out
            .write_all(&bytes)
            .storage_context(|| format!("writing {}", self.path.display()))?;
        self.hasher.write(&bytes);
        if self.index_stride > 0 && self.count % self.index_stride == 0 {
            self.index.push(fp);
        }
        self.min.get_or_insert(fp);
        self.last = Some(fp);
        self.count += 1;
        Ok(())
    }

    /// Writes the header, optionally fsyncs, and closes the file.
    pub fn finish(self) -> FpSetResult<WrittenFile> {
        let Self {
            path,
            kind,
            out,
            hasher,
            count,
            min,
            last,
            index,
            sync,
            ..
        } = self;
        let context = || format!("finishing {}", path.display());

        let mut file = out.into_inner().map_err(|e| e.into_error()).storage_context(context)?;
        let header = Header {
            count,
            checksum: hasher.finish(),
        };
        file.seek(SeekFrom::Start(0)).storage_context(context)?;
        file.write_all(&header.encode(kind)).storage_context(context)?;
        if sync {
            file.sync_all().storage_context(context)?;
        }

        Ok(WrittenFile {
            path: path.clone(),
            count,
            checksum: header.checksum,
            min,
            max: last,
            index,
        })
    }
}

/// Streams the entries of a fingerprint file, verifying the checksum once the
/// last entry has been read.
pub(crate) struct FingerprintReader {
    path: PathBuf,
    input: BufReader<File>,
    header: Header,
    remaining: u64,
    hasher: FnvHasher,
    finished: bool,
}

impl std::fmt::Debug for FingerprintReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintReader")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("remaining", &self.remaining)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl FingerprintReader {
    /// Opens `path` and validates its header.
    pub fn open(path: &Path, kind: FileKind) -> FpSetResult<Self> {
        let mut file =
            File::open(path).storage_context(|| format!("opening {}", path.display()))?;
        let header = Header::read(&mut file, kind, path)?;
        Ok(Self {
            path: path.to_path_buf(),
            input: BufReader::new(file),
            header,
            remaining: header.count,
            hasher: FnvHasher::default(),
            finished: false,
        })
    }

    /// The validated header.
    pub fn header(&self) -> Header {
        self.header
    }
}

impl Iterator for FingerprintReader {
    type Item = FpSetResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.remaining == 0 {
            self.finished = true;
            if self.hasher.finish() != self.header.checksum {
                return Some(Err(FpSetError::corrupt(&self.path, "checksum mismatch")));
            }
            return None;
        }

        let mut buf = [0u8; 8];
        if let Err(e) = self.input.read_exact(&mut buf) {
            self.finished = true;
            return Some(Err(FpSetError::StorageIo {
                context: format!("reading {}", self.path.display()),
                source: e,
            }));
        }
        self.hasher.write(&buf);
        self.remaining -= 1;
        Some(Ok(u64::from_le_bytes(buf)))
    }
}

/// Flushes directory metadata (renames, new files) to disk.
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> FpSetResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .storage_context(|| format!("syncing directory {}", dir.display()))
}

/// Directory handles cannot be fsynced here; renames are durable once the call returns.
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> FpSetResult<()> {
    Ok(())
}

/// Removes a file, treating "already gone" as success.
pub(crate) fn remove_file_if_exists(path: &Path) -> FpSetResult<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            Err(e).storage_context(|| format!("removing {}", path.display()))
        }
        _ => Ok(()),
    }
}
