//! On-disk record storage for the out-of-core scheduler.
//!
//! Fixed-width little-endian records in plain files, with sequential append,
//! random access by record range, chunked sequential scans, and a
//! budget-bounded external merge sort. This is the only layer that touches
//! scratch storage; everything above it works with typed records.

use std::collections::BinaryHeap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::dataset::{POINT_RECORD_BYTES, decode_point, encode_point};
use crate::error::{KnnError, Result};
use crate::point::{NeighbourExt, Point};

/// A value with a fixed-width on-disk encoding.
pub(crate) trait Record: Copy {
    /// Encoded size in bytes.
    const BYTES: usize;

    /// Encodes `self` into `buf`, which is exactly [`Record::BYTES`] long.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes a value from `buf`, which is exactly [`Record::BYTES`] long.
    fn decode(buf: &[u8]) -> Self;
}

impl Record for Point {
    const BYTES: usize = POINT_RECORD_BYTES;

    fn encode(&self, buf: &mut [u8]) {
        let mut record = [0_u8; POINT_RECORD_BYTES];
        encode_point(self, &mut record);
        buf.copy_from_slice(&record);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut record = [0_u8; POINT_RECORD_BYTES];
        record.copy_from_slice(buf);
        decode_point(&record)
    }
}

/// Bytes of one packed external-neighbour record.
pub(crate) const NEIGHBOUR_EXT_RECORD_BYTES: usize = 28;

impl Record for NeighbourExt {
    const BYTES: usize = NEIGHBOUR_EXT_RECORD_BYTES;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..8].copy_from_slice(&self.input_id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.rank.to_le_bytes());
        buf[12..20].copy_from_slice(&self.point_id.to_le_bytes());
        buf[20..28].copy_from_slice(&self.distance_squared.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let mut u64_buf = [0_u8; 8];
        let mut u32_buf = [0_u8; 4];
        u64_buf.copy_from_slice(&buf[0..8]);
        let input_id = u64::from_le_bytes(u64_buf);
        u32_buf.copy_from_slice(&buf[8..12]);
        let rank = u32::from_le_bytes(u32_buf);
        u64_buf.copy_from_slice(&buf[12..20]);
        let point_id = u64::from_le_bytes(u64_buf);
        u64_buf.copy_from_slice(&buf[20..28]);
        let distance_squared = f64::from_le_bytes(u64_buf);
        Self {
            input_id,
            rank,
            point_id,
            distance_squared,
        }
    }
}

/// A directory of scratch files, removed wholesale on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: PathBuf,
}

impl ScratchDir {
    /// Creates a fresh scratch directory under `parent`.
    ///
    /// # Errors
    /// Returns [`KnnError::Scratch`] when the directory cannot be created.
    pub fn create(parent: &Path) -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static SEQUENCE: AtomicU64 = AtomicU64::new(0);
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let dir = parent.join(format!(
            "aknn-scratch-{}-{sequence}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).map_err(|source| KnnError::Scratch {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    /// Path of a named scratch file inside the directory.
    #[must_use]
    pub(crate) fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        // Best effort; leftover scratch is harmless.
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn scratch_error(path: &Path, source: io::Error) -> KnnError {
    KnnError::Scratch {
        path: path.to_path_buf(),
        source,
    }
}

/// A closed file of `count` fixed-width records.
#[derive(Debug)]
pub(crate) struct RecordFile<T: Record> {
    path: PathBuf,
    count: u64,
    _marker: PhantomData<T>,
}

impl<T: Record> RecordFile<T> {
    /// Number of records stored.
    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Reads `len` records starting at record index `start`.
    pub(crate) fn read_range(&self, start: u64, len: usize) -> Result<Vec<T>> {
        let len = usize::try_from((self.count - start.min(self.count)).min(len as u64))
            .unwrap_or(0);
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut file = File::open(&self.path).map_err(|e| scratch_error(&self.path, e))?;
        file.seek(SeekFrom::Start(start * T::BYTES as u64))
            .map_err(|e| scratch_error(&self.path, e))?;
        let mut bytes = vec![0_u8; len * T::BYTES];
        file.read_exact(&mut bytes)
            .map_err(|e| scratch_error(&self.path, e))?;
        Ok(bytes.chunks_exact(T::BYTES).map(T::decode).collect())
    }

    /// Removes the backing file.
    pub(crate) fn remove(self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|e| scratch_error(&self.path, e))
    }
}

/// Append-only writer producing a [`RecordFile`].
#[derive(Debug)]
pub(crate) struct RecordWriter<T: Record> {
    path: PathBuf,
    writer: BufWriter<File>,
    count: u64,
    _marker: PhantomData<T>,
}

impl<T: Record> RecordWriter<T> {
    pub(crate) fn create(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| scratch_error(&path, e))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            count: 0,
            _marker: PhantomData,
        })
    }

    pub(crate) fn push(&mut self, record: &T) -> Result<()> {
        let mut buf = vec![0_u8; T::BYTES];
        record.encode(&mut buf);
        self.writer
            .write_all(&buf)
            .map_err(|e| scratch_error(&self.path, e))?;
        self.count += 1;
        Ok(())
    }

    pub(crate) fn push_all(&mut self, records: &[T]) -> Result<()> {
        for record in records {
            self.push(record)?;
        }
        Ok(())
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }

    pub(crate) fn finish(mut self) -> Result<RecordFile<T>> {
        self.writer
            .flush()
            .map_err(|e| scratch_error(&self.path, e))?;
        Ok(RecordFile {
            path: self.path,
            count: self.count,
            _marker: PhantomData,
        })
    }
}

/// Buffered sequential reader over a [`RecordFile`].
#[derive(Debug)]
pub(crate) struct ChunkedReader<'a, T: Record> {
    file: &'a RecordFile<T>,
    next: u64,
    chunk: Vec<T>,
    chunk_pos: usize,
    chunk_records: usize,
}

impl<'a, T: Record> ChunkedReader<'a, T> {
    pub(crate) fn new(file: &'a RecordFile<T>, chunk_records: usize) -> Self {
        Self {
            file,
            next: 0,
            chunk: Vec::new(),
            chunk_pos: 0,
            chunk_records: chunk_records.max(1),
        }
    }

    /// Returns the next record without consuming it.
    pub(crate) fn peek(&mut self) -> Result<Option<&T>> {
        if self.chunk_pos == self.chunk.len() {
            if self.next >= self.file.count() {
                return Ok(None);
            }
            self.chunk = self.file.read_range(self.next, self.chunk_records)?;
            self.next += self.chunk.len() as u64;
            self.chunk_pos = 0;
        }
        Ok(self.chunk.get(self.chunk_pos))
    }

    /// Returns the next record, advancing the cursor.
    pub(crate) fn next_record(&mut self) -> Result<Option<T>> {
        let record = self.peek()?.copied();
        if record.is_some() {
            self.chunk_pos += 1;
        }
        Ok(record)
    }
}

/// Total-order key over `f64` for external sorting.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct SortKeyF64(pub f64);

impl Eq for SortKeyF64 {}

impl Ord for SortKeyF64 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for SortKeyF64 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct MergeEntry<T, K: Ord> {
    key: K,
    run: usize,
    record: T,
}

impl<T, K: Ord> PartialEq for MergeEntry<T, K> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.run == other.run
    }
}

impl<T, K: Ord> Eq for MergeEntry<T, K> {}

// Reversed so the BinaryHeap pops the smallest key first; ties fall back to
// the run index, which preserves stability across runs.
impl<T, K: Ord> Ord for MergeEntry<T, K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.run.cmp(&self.run))
    }
}

impl<T, K: Ord> PartialOrd for MergeEntry<T, K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Sorts `source` by `key` into a new record file under `scratch`, holding at
/// most roughly `memory_budget_bytes` of records in memory at a time.
///
/// Runs are sorted in memory with a stable sort and merged k-way, so records
/// with equal keys keep their original relative order.
pub(crate) fn external_sort_by_key<T, K, F>(
    source: &RecordFile<T>,
    scratch: &ScratchDir,
    tag: &str,
    memory_budget_bytes: u64,
    key: F,
) -> Result<RecordFile<T>>
where
    T: Record,
    K: Ord,
    F: Fn(&T) -> K,
{
    let run_records = run_length::<T>(memory_budget_bytes);

    // Phase 1: sorted runs.
    let mut runs = Vec::new();
    let mut start = 0_u64;
    while start < source.count() {
        let mut chunk = source.read_range(start, run_records)?;
        start += chunk.len() as u64;
        chunk.sort_by(|a, b| key(a).cmp(&key(b)));
        let mut writer =
            RecordWriter::create(scratch.file(&format!("{tag}-run{}", runs.len())))?;
        writer.push_all(&chunk)?;
        runs.push(writer.finish()?);
    }

    // Phase 2: k-way merge. The per-reader buffers exist simultaneously, so
    // the chunk size shrinks as the run count grows; their combined footprint
    // stays at one run's worth of records however tight the budget is.
    let chunk_records = (run_records / (runs.len() + 1)).max(1);
    let mut readers: Vec<ChunkedReader<'_, T>> = runs
        .iter()
        .map(|run| ChunkedReader::new(run, chunk_records))
        .collect();

    let mut heap = BinaryHeap::new();
    for (run, reader) in readers.iter_mut().enumerate() {
        if let Some(record) = reader.next_record()? {
            heap.push(MergeEntry {
                key: key(&record),
                run,
                record,
            });
        }
    }

    let mut writer = RecordWriter::create(scratch.file(&format!("{tag}-sorted")))?;
    while let Some(entry) = heap.pop() {
        writer.push(&entry.record)?;
        if let Some(record) = readers[entry.run].next_record()? {
            heap.push(MergeEntry {
                key: key(&record),
                run: entry.run,
                record,
            });
        }
    }
    let sorted = writer.finish()?;

    drop(readers);
    for run in runs {
        run.remove()?;
    }
    Ok(sorted)
}

fn run_length<T: Record>(memory_budget_bytes: u64) -> usize {
    // Quarter of the budget per run leaves room for the decoded records and
    // the merge readers. Only one run buffer is ever resident at a time, so
    // a small floor keeps degenerate budgets making progress without
    // multiplying across readers (the merge phase divides this by the run
    // count).
    let records = memory_budget_bytes / 4 / T::BYTES as u64;
    usize::try_from(records).unwrap_or(usize::MAX).max(4096)
}
