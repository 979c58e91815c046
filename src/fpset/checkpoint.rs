// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Two-phase checkpoints.
//!
//! `begin` opens a staging directory that receives one sorted file per segment
//! plus a manifest. `commit` renames the staging directory to the next
//! generation directory and removes older generations. A crash before the
//! rename leaves only a staging directory behind, which recovery deletes.
//!
//! ```text
//! <directory>/
//!   <filename>.chkpt.staging/        in progress, discarded on recovery
//!   <filename>.chkpt.00000007/       committed generation 7
//!     manifest.json
//!     seg-0000.fps
//!     seg-0001.fps
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FpSetError, FpSetResult, IoResultExt};
use crate::fpset::format::{
    sync_dir, FileKind, FingerprintReader, FingerprintWriter, WrittenFile, FORMAT_VERSION,
};

/// Name of the manifest inside a generation directory.
pub const MANIFEST_FILE: &str = "manifest.json";

const STAGING_SUFFIX: &str = "staging";

/// One segment file of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    /// Segment index
    pub index: usize,
    /// File name inside the generation directory
    pub file: String,
    /// Fingerprints in the file
    pub count: u64,
    /// FNV-1a checksum over the file's entries
    pub checksum: u64,
}

/// Description of a checkpoint generation, stored as `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Fingerprint file format version
    pub format_version: u32,
    /// Generation number, also encoded in the directory name
    pub generation: u64,
    /// Seed the set was initialised with
    pub seed: u64,
    /// Segment bits of the set that wrote the checkpoint
    pub segment_bits: u32,
    /// Distinct fingerprints across all segment files
    pub count: u64,
    /// Segment files in ascending index order
    pub segments: Vec<SegmentEntry>,
}

/// Owns the checkpoint directories of one fingerprint set.
#[derive(Debug)]
pub(crate) struct CheckpointManager {
    directory: PathBuf,
    filename: String,
    sync: bool,
    next_generation: u64,
    staged: Option<Manifest>,
}

impl CheckpointManager {
    /// Validates the naming root and prepares `directory`.
    pub fn open(directory: &Path, filename: &str, sync: bool) -> FpSetResult<Self> {
        validate_filename(filename)?;
        fs::create_dir_all(directory).map_err(|e| {
            FpSetError::InvalidConfiguration(format!(
                "cannot use directory {}: {e}",
                directory.display()
            ))
        })?;
        if !directory.is_dir() {
            return Err(FpSetError::InvalidConfiguration(format!(
                "{} is not a directory",
                directory.display()
            )));
        }

        let mut manager = Self {
            directory: directory.to_path_buf(),
            filename: filename.to_string(),
            sync,
            next_generation: 1,
            staged: None,
        };
        if let Some((latest, _)) = manager.generations()?.last() {
            manager.next_generation = latest + 1;
        }
        Ok(manager)
    }

    fn staging_dir(&self) -> PathBuf {
        self.directory
            .join(format!("{}.chkpt.{STAGING_SUFFIX}", self.filename))
    }

    fn generation_dir(&self, generation: u64) -> PathBuf {
        self.directory
            .join(format!("{}.chkpt.{generation:08}", self.filename))
    }

    /// Committed generation directories, oldest first.
    fn generations(&self) -> FpSetResult<Vec<(u64, PathBuf)>> {
        let prefix = format!("{}.chkpt.", self.filename);
        let entries = fs::read_dir(&self.directory)
            .storage_context(|| format!("listing {}", self.directory.display()))?;

        let mut found = Vec::new();
        for entry in entries {
            let entry =
                entry.storage_context(|| format!("listing {}", self.directory.display()))?;
            let name = entry.file_name();
            let Some(generation) = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|suffix| suffix.parse::<u64>().ok())
            else {
                continue;
            };
            if entry.path().is_dir() {
                found.push((generation, entry.path()));
            }
        }
        found.sort_unstable_by_key(|(generation, _)| *generation);
        Ok(found)
    }

    /// Discards any staging directory and loads the newest valid generation.
    ///
    /// Corrupt generations are skipped with a warning. Fails if generations
    /// exist but none of them can be loaded.
    pub fn recover(&self) -> FpSetResult<Option<Checkpoint>> {
        let staging = self.staging_dir();
        if staging.exists() {
            warn!(path = %staging.display(), "Discarding uncommitted checkpoint");
            fs::remove_dir_all(&staging)
                .storage_context(|| format!("removing {}", staging.display()))?;
        }

        let generations = self.generations()?;
        if generations.is_empty() {
            return Ok(None);
        }
        for (generation, dir) in generations.iter().rev() {
            match Checkpoint::load(dir, *generation) {
                Ok(checkpoint) => {
                    info!(
                        generation,
                        count = checkpoint.count(),
                        path = %dir.display(),
                        "Loaded checkpoint"
                    );
                    return Ok(Some(checkpoint));
                }
                Err(e) => warn!(generation, error = %e, "Skipping unusable checkpoint"),
            }
        }
        Err(FpSetError::corrupt(
            &self.directory,
            format!(
                "none of the {} checkpoint generations of {} is loadable",
                generations.len(),
                self.filename
            ),
        ))
    }

    /// Opens a fresh staging area for the next generation.
    pub fn begin(&mut self, seed: u64, segment_bits: u32) -> FpSetResult<Staging> {
        if self.staged.is_some() {
            return Err(FpSetError::CheckpointState(
                "a checkpoint is already staged and awaiting commit".to_string(),
            ));
        }

        let dir = self.staging_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).storage_context(|| format!("removing {}", dir.display()))?;
        }
        fs::create_dir_all(&dir).storage_context(|| format!("creating {}", dir.display()))?;

        // Never reuse a generation already on disk.
        if let Some((latest, _)) = self.generations()?.last() {
            self.next_generation = self.next_generation.max(latest + 1);
        }

        Ok(Staging {
            dir,
            sync: self.sync,
            manifest: Manifest {
                format_version: FORMAT_VERSION,
                generation: self.next_generation,
                seed,
                segment_bits,
                count: 0,
                segments: Vec::new(),
            },
        })
    }

    /// Writes the manifest of a fully written staging area and makes it
    /// eligible for [`commit`](Self::commit). Returns the staged count.
    pub fn stage(&mut self, staging: Staging) -> FpSetResult<u64> {
        let Staging { dir, sync, manifest } = staging;
        let path = dir.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(&manifest)?;

        let mut file =
            File::create(&path).storage_context(|| format!("creating {}", path.display()))?;
        file.write_all(&bytes)
            .storage_context(|| format!("writing {}", path.display()))?;
        if sync {
            file.sync_all()
                .storage_context(|| format!("syncing {}", path.display()))?;
            sync_dir(&dir)?;
        }

        debug!(
            generation = manifest.generation,
            count = manifest.count,
            segments = manifest.segments.len(),
            "Staged checkpoint"
        );
        let count = manifest.count;
        self.staged = Some(manifest);
        Ok(count)
    }

    /// Publishes the staged generation and deletes older ones.
    pub fn commit(&mut self) -> FpSetResult<Manifest> {
        let manifest = self.staged.take().ok_or_else(|| {
            FpSetError::CheckpointState("commit requested without a staged checkpoint".to_string())
        })?;

        let staging = self.staging_dir();
        let target = self.generation_dir(manifest.generation);
        if let Err(e) = fs::rename(&staging, &target) {
            self.staged = Some(manifest);
            return Err(e).storage_context(|| {
                format!("publishing {} as {}", staging.display(), target.display())
            });
        }
        self.next_generation = manifest.generation + 1;
        if self.sync {
            sync_dir(&self.directory)?;
        }

        for (generation, dir) in self.generations()? {
            if generation >= manifest.generation {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!(generation, error = %e, "Failed to remove old checkpoint");
            }
        }

        info!(
            generation = manifest.generation,
            count = manifest.count,
            path = %target.display(),
            "Committed checkpoint"
        );
        Ok(manifest)
    }

    /// Whether a staged checkpoint is waiting for commit.
    pub fn is_staged(&self) -> bool {
        self.staged.is_some()
    }
}

fn validate_filename(filename: &str) -> FpSetResult<()> {
    if filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0'])
    {
        return Err(FpSetError::InvalidConfiguration(format!(
            "{filename:?} is not a usable checkpoint name"
        )));
    }
    Ok(())
}

/// A checkpoint generation being written.
#[derive(Debug)]
pub(crate) struct Staging {
    dir: PathBuf,
    sync: bool,
    manifest: Manifest,
}

impl Staging {
    /// Generation this staging area will be committed as.
    pub fn generation(&self) -> u64 {
        self.manifest.generation
    }

    /// Creates the file for segment `index`.
    pub fn segment_writer(&self, index: usize) -> FpSetResult<FingerprintWriter> {
        FingerprintWriter::create(
            &self.dir.join(segment_file(index)),
            FileKind::Checkpoint,
            self.sync,
        )
    }

    /// Records a finished segment file in the manifest.
    pub fn record(&mut self, index: usize, written: &WrittenFile) {
        self.manifest.count += written.count;
        self.manifest.segments.push(SegmentEntry {
            index,
            file: segment_file(index),
            count: written.count,
            checksum: written.checksum,
        });
    }
}

fn segment_file(index: usize) -> String {
    format!("seg-{index:04}.fps")
}

/// A committed generation whose files have been fully verified.
#[derive(Debug)]
pub(crate) struct Checkpoint {
    dir: PathBuf,
    manifest: Manifest,
}

impl Checkpoint {
    /// Reads the manifest of `dir` and verifies every segment file against it.
    pub fn load(dir: &Path, generation: u64) -> FpSetResult<Self> {
        let path = dir.join(MANIFEST_FILE);
        let bytes = fs::read(&path).storage_context(|| format!("reading {}", path.display()))?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| FpSetError::corrupt(&path, format!("unreadable manifest: {e}")))?;

        if manifest.format_version != FORMAT_VERSION {
            return Err(FpSetError::corrupt(
                &path,
                format!("unsupported format version {}", manifest.format_version),
            ));
        }
        if manifest.generation != generation {
            return Err(FpSetError::corrupt(
                &path,
                format!(
                    "manifest names generation {} inside directory of generation {generation}",
                    manifest.generation
                ),
            ));
        }

        let mut total = 0u64;
        for entry in &manifest.segments {
            if Path::new(&entry.file).file_name().and_then(|n| n.to_str()) != Some(entry.file.as_str()) {
                return Err(FpSetError::corrupt(
                    &path,
                    format!("invalid segment file name {:?}", entry.file),
                ));
            }
            let file = dir.join(&entry.file);
            let reader = FingerprintReader::open(&file, FileKind::Checkpoint)?;
            let header = reader.header();
            if header.count != entry.count || header.checksum != entry.checksum {
                return Err(FpSetError::corrupt(&file, "header disagrees with manifest"));
            }

            let mut last = None;
            for fp in reader {
                let fp = fp?;
                if last.is_some_and(|prev| fp <= prev) {
                    return Err(FpSetError::corrupt(&file, "entries out of order"));
                }
                last = Some(fp);
            }
            total += entry.count;
        }
        if total != manifest.count {
            return Err(FpSetError::corrupt(
                &path,
                format!("segments hold {total} entries, manifest says {}", manifest.count),
            ));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
        })
    }

    /// Generation directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The verified manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Distinct fingerprints in the checkpoint.
    pub fn count(&self) -> u64 {
        self.manifest.count
    }

    /// Streams every fingerprint, segment by segment.
    pub fn fingerprints(&self) -> FpSetResult<impl Iterator<Item = FpSetResult<u64>>> {
        let readers = self
            .manifest
            .segments
            .iter()
            .map(|entry| FingerprintReader::open(&self.dir.join(&entry.file), FileKind::Checkpoint))
            .collect::<FpSetResult<Vec<_>>>()?;
        Ok(readers.into_iter().flatten())
    }
}
