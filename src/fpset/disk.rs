// Copyright (c) 2025 Mauka MCP Authors
//
// Licensed under dual license:
// - MIT License (LICENSE-MIT or https://opensource.org/licenses/MIT)
// - Apache License, Version 2.0 (LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0)

//! Disk overflow store for one segment.
//!
//! Fingerprints evicted from memory are written as immutable, sorted pages.
//! Each page keeps its min/max and a sparse index (every `stride`-th entry)
//! in memory, so a probe costs at most one block read per page whose range
//! covers the fingerprint. The indexes of a store share a fixed entry budget;
//! when it is exceeded the largest index is thinned to every other entry,
//! doubling that page's block size. Page files are opened on demand and kept
//! in a small LRU of handles, so open descriptors do not grow with the page
//! count.
//!
//! Two merges exist: a tiered merge of similarly sized pages, run when a
//! store holds too many pages, and a full merge into one page, run before a
//! checkpoint. Both drop any duplicates they meet along the way.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tracing::debug;

use crate::error::{FpSetResult, IoResultExt};
use crate::fpset::format::{
    decode_u64, remove_file_if_exists, FileKind, FingerprintReader, FingerprintWriter,
    WrittenFile, HEADER_LEN,
};

/// Pages in the same tier differ in size by less than `2^TIER_BITS`.
const TIER_BITS: u32 = 2;

/// Where a probed fingerprint can be.
enum Lookup {
    Absent,
    Present,
    /// Entries `start..start + len` of the page
    Block { start: u64, len: usize },
}

/// An immutable page on disk plus its in-memory summary.
#[derive(Debug)]
struct Page {
    id: u64,
    path: PathBuf,
    count: u64,
    min: u64,
    max: u64,
    stride: u64,
    index: Vec<u64>,
}

impl Page {
    fn new(id: u64, written: WrittenFile, stride: usize) -> Self {
        let mut index = written.index;
        index.shrink_to_fit();
        Self {
            id,
            count: written.count,
            min: written.min.unwrap_or(u64::MAX),
            max: written.max.unwrap_or(0),
            stride: stride as u64,
            index,
            path: written.path,
        }
    }

    fn locate(&self, fp: u64) -> Lookup {
        if self.count == 0 || fp < self.min || fp > self.max {
            return Lookup::Absent;
        }
        let slot = match self.index.binary_search(&fp) {
            Ok(_) => return Lookup::Present,
            Err(0) => return Lookup::Absent,
            Err(i) => i - 1,
        };
        let start = slot as u64 * self.stride;
        Lookup::Block {
            start,
            len: (self.count - start).min(self.stride) as usize,
        }
    }

    fn read_block(&self, file: &mut File, start: u64, block: &mut Vec<u8>) -> FpSetResult<()> {
        let context = || format!("probing page {}", self.path.display());
        file.seek(SeekFrom::Start(HEADER_LEN + start * 8))
            .storage_context(context)?;
        file.read_exact(block).storage_context(context)
    }

    /// Keeps every other index entry.
    fn thin_index(&mut self) {
        self.index = self.index.iter().copied().step_by(2).collect();
        self.stride *= 2;
    }

    fn tier(&self) -> u32 {
        (u64::BITS - self.count.leading_zeros()) / TIER_BITS
    }
}

fn search_block(block: &[u8], fp: u64) -> bool {
    let (mut lo, mut hi) = (0usize, block.len() / 8);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let value = decode_u64(&block[mid * 8..mid * 8 + 8]);
        match value.cmp(&fp) {
            std::cmp::Ordering::Equal => return true,
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    false
}

/// One input of a [`SortedMerge`].
pub(crate) enum MergeSource {
    /// Sorted, deduplicated fingerprints already in memory
    Memory(std::vec::IntoIter<u64>),
    /// A fingerprint file read from disk
    File(FingerprintReader),
}

impl Iterator for MergeSource {
    type Item = FpSetResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            MergeSource::Memory(values) => values.next().map(Ok),
            MergeSource::File(reader) => reader.next(),
        }
    }
}

/// K-way merge of ascending sources into one strictly ascending stream.
pub(crate) struct SortedMerge {
    sources: Vec<MergeSource>,
    heap: BinaryHeap<Reverse<(u64, usize)>>,
    last: Option<u64>,
    primed: bool,
    failed: bool,
}

impl SortedMerge {
    pub fn new(sources: Vec<MergeSource>) -> Self {
        let heap = BinaryHeap::with_capacity(sources.len());
        Self {
            sources,
            heap,
            last: None,
            primed: false,
            failed: false,
        }
    }

    fn pull(&mut self, source: usize) -> FpSetResult<()> {
        match self.sources[source].next() {
            Some(Ok(value)) => self.heap.push(Reverse((value, source))),
            Some(Err(e)) => return Err(e),
            None => {}
        }
        Ok(())
    }
}

impl Iterator for SortedMerge {
    type Item = FpSetResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                if let Err(e) = self.pull(source) {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }

        loop {
            let Reverse((value, source)) = self.heap.pop()?;
            if let Err(e) = self.pull(source) {
                self.failed = true;
                return Some(Err(e));
            }
            if self.last == Some(value) {
                continue;
            }
            self.last = Some(value);
            return Some(Ok(value));
        }
    }
}

/// A merge of a store's pages prepared under the segment lock and run outside it.
pub(crate) struct CompactionJob {
    replaced: Vec<u64>,
    readers: Vec<FingerprintReader>,
    target_id: u64,
    target: PathBuf,
    stride: usize,
    sync: bool,
}

/// Output of a finished [`CompactionJob`], ready to be installed.
#[derive(Debug)]
pub(crate) struct CompactedPage {
    replaced: Vec<u64>,
    id: u64,
    written: WrittenFile,
}

impl CompactionJob {
    /// Merges the snapshotted pages into the target page.
    pub fn run(self) -> FpSetResult<CompactedPage> {
        let Self {
            replaced,
            readers,
            target_id,
            target,
            stride,
            sync,
        } = self;

        let result = (|| {
            let mut writer =
                FingerprintWriter::create(&target, FileKind::Page, sync)?.with_index(stride);
            let merge = SortedMerge::new(readers.into_iter().map(MergeSource::File).collect());
            for fp in merge {
                writer.push(fp?)?;
            }
            writer.finish()
        })();

        match result {
            Ok(written) => Ok(CompactedPage {
                replaced,
                id: target_id,
                written,
            }),
            Err(e) => {
                remove_file_if_exists(&target)?;
                Err(e)
            }
        }
    }
}

/// Limits of one [`DiskStore`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct StoreSettings {
    /// Base index stride of newly written pages
    pub stride: usize,
    /// Whether page writes are fsynced
    pub sync: bool,
    /// Index entries all pages together may keep
    pub index_entries: usize,
    /// Page files kept open between probes
    pub open_handles: NonZeroUsize,
}

/// Append-only page store holding one segment's evicted fingerprints.
#[derive(Debug)]
pub(crate) struct DiskStore {
    dir: PathBuf,
    pages: Vec<Page>,
    handles: LruCache<u64, File>,
    next_page_id: u64,
    settings: StoreSettings,
    entries: u64,
    compactions: u64,
    block: Vec<u8>,
}

impl DiskStore {
    /// Creates an empty store in `dir`, creating the directory if needed.
    pub fn create(dir: PathBuf, settings: StoreSettings) -> FpSetResult<Self> {
        fs::create_dir_all(&dir)
            .storage_context(|| format!("creating overflow directory {}", dir.display()))?;
        Ok(Self {
            dir,
            pages: Vec::new(),
            handles: LruCache::new(settings.open_handles),
            next_page_id: 0,
            settings,
            entries: 0,
            compactions: 0,
            block: Vec::with_capacity(settings.stride * 8),
        })
    }

    fn allocate_page(&mut self) -> (u64, PathBuf) {
        let id = self.next_page_id;
        self.next_page_id += 1;
        (id, self.dir.join(format!("page-{id:08}.fpp")))
    }

    /// Thins the largest indexes until all of them fit the entry budget. A
    /// page always keeps its first index entry.
    fn enforce_index_budget(&mut self) {
        let mut total = self.index_entries();
        while total > self.settings.index_entries {
            let Some(page) = self
                .pages
                .iter_mut()
                .filter(|p| p.index.len() > 1)
                .max_by_key(|p| p.index.len())
            else {
                break;
            };
            let before = page.index.len();
            page.thin_index();
            total -= before - page.index.len();
        }
    }

    /// Writes `sorted` (strictly ascending) as a new page.
    pub fn append(&mut self, sorted: &[u64]) -> FpSetResult<()> {
        if sorted.is_empty() {
            return Ok(());
        }
        let (id, path) = self.allocate_page();
        let mut writer = FingerprintWriter::create(&path, FileKind::Page, self.settings.sync)?
            .with_index(self.settings.stride);
        for &fp in sorted {
            writer.push(fp)?;
        }
        let page = Page::new(id, writer.finish()?, self.settings.stride);
        self.entries += page.count;
        debug!(page = id, entries = page.count, dir = %self.dir.display(), "Wrote overflow page");
        self.pages.push(page);
        self.enforce_index_budget();
        Ok(())
    }

    /// Whether any page contains `fp`. Newest pages are probed first.
    pub fn probe(&mut self, fp: u64) -> FpSetResult<bool> {
        let Self {
            pages,
            handles,
            block,
            ..
        } = self;
        for page in pages.iter().rev() {
            let (start, len) = match page.locate(fp) {
                Lookup::Absent => continue,
                Lookup::Present => return Ok(true),
                Lookup::Block { start, len } => (start, len),
            };
            let file = handles.try_get_or_insert_mut(page.id, || {
                File::open(&page.path)
                    .storage_context(|| format!("opening page {}", page.path.display()))
            })?;
            block.resize(len * 8, 0);
            page.read_block(file, start, block)?;
            if search_block(block, fp) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Opens a fresh reader on every page.
    pub fn open_readers(&self) -> FpSetResult<Vec<FingerprintReader>> {
        self.pages
            .iter()
            .map(|page| FingerprintReader::open(&page.path, FileKind::Page))
            .collect()
    }

    fn job_for(&mut self, replaced: Vec<u64>) -> FpSetResult<Option<CompactionJob>> {
        if replaced.len() < 2 {
            return Ok(None);
        }
        let readers = self
            .pages
            .iter()
            .filter(|page| replaced.contains(&page.id))
            .map(|page| FingerprintReader::open(&page.path, FileKind::Page))
            .collect::<FpSetResult<Vec<_>>>()?;
        let (target_id, target) = self.allocate_page();
        Ok(Some(CompactionJob {
            replaced,
            readers,
            target_id,
            target,
            stride: self.settings.stride,
            sync: self.settings.sync,
        }))
    }

    /// Prepares a merge of all current pages, or `None` if there is nothing to merge.
    pub fn compaction_job(&mut self) -> FpSetResult<Option<CompactionJob>> {
        let all = self.pages.iter().map(|p| p.id).collect();
        self.job_for(all)
    }

    /// Prepares a merge of similarly sized pages once the store holds more
    /// than `max_pages`.
    ///
    /// Picks every page of the smallest size tier holding at least two pages,
    /// or the two smallest pages when every tier holds one. Large pages are
    /// only rewritten once enough pages of their size exist, so each entry is
    /// rewritten a logarithmic number of times.
    pub fn tiered_compaction_job(&mut self, max_pages: usize) -> FpSetResult<Option<CompactionJob>> {
        if self.pages.len() <= max_pages {
            return Ok(None);
        }
        let mut tiers: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
        for page in &self.pages {
            tiers.entry(page.tier()).or_default().push(page.id);
        }
        let selected = match tiers.into_values().find(|ids| ids.len() >= 2) {
            Some(ids) => ids,
            None => {
                let mut by_size: Vec<&Page> = self.pages.iter().collect();
                by_size.sort_unstable_by_key(|p| p.count);
                by_size.iter().take(2).map(|p| p.id).collect()
            }
        };
        self.job_for(selected)
    }

    /// Swaps the merged page in for the pages it replaces and deletes them.
    pub fn install(&mut self, compacted: CompactedPage) -> FpSetResult<()> {
        let replaced: HashSet<u64> = compacted.replaced.iter().copied().collect();
        let present = self.pages.iter().filter(|p| replaced.contains(&p.id)).count();
        if present != replaced.len() {
            // The inputs changed underneath the job; keep the current pages.
            return remove_file_if_exists(&compacted.written.path);
        }

        let (old, kept): (Vec<Page>, Vec<Page>) = std::mem::take(&mut self.pages)
            .into_iter()
            .partition(|p| replaced.contains(&p.id));
        let merged = Page::new(compacted.id, compacted.written, self.settings.stride);

        let old_entries: u64 = old.iter().map(|p| p.count).sum();
        self.entries = self.entries - old_entries + merged.count;
        self.compactions += 1;
        debug!(
            merged_pages = old.len(),
            entries = merged.count,
            dir = %self.dir.display(),
            "Compacted overflow pages"
        );

        self.pages = kept;
        self.pages.push(merged);
        self.enforce_index_budget();
        for page in old {
            self.handles.pop(&page.id);
            remove_file_if_exists(&page.path)?;
        }
        Ok(())
    }

    /// Merges all pages into one, holding `&mut self` for the duration.
    pub fn compact(&mut self) -> FpSetResult<()> {
        match self.compaction_job()? {
            Some(job) => {
                let compacted = job.run()?;
                self.install(compacted)
            }
            None => Ok(()),
        }
    }

    /// Number of pages on disk.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Fingerprints stored on disk.
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Index entries held in memory across all pages.
    pub fn index_entries(&self) -> usize {
        self.pages.iter().map(|p| p.index.len()).sum()
    }

    /// Page files currently held open for probing.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Compactions performed so far.
    pub fn compactions(&self) -> u64 {
        self.compactions
    }

    /// Directory holding the pages.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
