//! Durable, resumable storage for per-frame assignment results.
//!
//! A store lives in an output directory and holds:
//!
//! - `assignments.bin`: a `sequences x width` rectangle of little-endian
//!   `i32` reference indices,
//! - `distances.bin`: the co-indexed rectangle of little-endian `f32`
//!   distances,
//! - `completed.bin`: one byte per chunk, non-zero once the chunk's results
//!   are durable,
//! - `manifest.json`: the shape the store was created for.
//!
//! `width` is the longest sequence. Cells past a sequence's end, and cells of
//! frames that have not been written yet, hold [`PADDING_ASSIGNMENT`] and
//! [`PADDING_DISTANCE`].
//!
//! ## Crash consistency
//!
//! [`ResultStore::write`] syncs both rectangles before it sets and syncs the
//! chunk's completion byte. A crash can leave a chunk partially written, but
//! never partially written and marked complete, so the next run simply redoes
//! it.

mod manifest;
#[cfg(test)]
mod tests;

use crate::{Error, Partition, Result, SequenceSet, Span};
use manifest::Manifest;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const ASSIGNMENTS_FILE: &str = "assignments.bin";
pub const DISTANCES_FILE: &str = "distances.bin";
pub const COMPLETED_FILE: &str = "completed.bin";

/// Assignment value of cells that hold no result.
pub const PADDING_ASSIGNMENT: i32 = -1;
/// Distance value of cells that hold no result.
pub const PADDING_DISTANCE: f32 = -1.0;

const CELL_BYTES: usize = 4;
// Cells written per block while padding a fresh rectangle.
const FILL_BLOCK_CELLS: usize = 1 << 14;

/// On-disk container for the two result rectangles and the completion bitmap.
///
/// The store is owned by the scheduler and mutated one chunk at a time.
/// Workers never see it.
#[derive(Debug)]
pub struct ResultStore {
    dir: PathBuf,
    manifest: Manifest,
    sequences: SequenceSet,
    assignments: File,
    distances: File,
    completed_file: File,
    completed: Vec<bool>,
}

impl ResultStore {
    /// Opens the store in `dir`, creating it if it does not exist yet.
    ///
    /// An existing store is reused as-is, including its completion bitmap,
    /// which is what lets an interrupted run resume. A directory without a
    /// manifest (for example, one left behind by a crash during creation) is
    /// initialised from scratch.
    ///
    /// # Errors
    ///
    /// - [`Error::ShapeMismatch`] if the existing store was created for other
    ///   sequence lengths, another chunk size or another chunk count, or if
    ///   its data files have the wrong size.
    /// - [`Error::Io`] / [`Error::Manifest`] if the directory cannot be read
    ///   or written.
    pub fn open_or_create(
        dir: impl AsRef<Path>,
        sequences: &SequenceSet,
        partition: &Partition,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let expected = Manifest::expected(sequences, partition);

        match Manifest::load(&dir)? {
            Some(existing) => {
                existing.check_matches(&expected)?;
                tracing::debug!("Reopening result store at {}", dir.display());
                Self::open_existing(dir, existing, sequences.clone())
            }
            None => {
                tracing::debug!("Creating result store at {}", dir.display());
                Self::create(dir, expected, sequences.clone())
            }
        }
    }

    /// Opens an existing store in `dir` using the shape recorded in its
    /// manifest. Returns `None` if `dir` holds no initialised store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if a data file does not match the
    /// manifest, or [`Error::Io`] / [`Error::Manifest`] if the directory
    /// cannot be read.
    pub fn open(dir: impl AsRef<Path>) -> Result<Option<Self>> {
        let dir = dir.as_ref().to_path_buf();
        let Some(manifest) = Manifest::load(&dir)? else {
            return Ok(None);
        };
        let sequences = SequenceSet::new(manifest.lengths.clone());
        Self::open_existing(dir, manifest, sequences).map(Some)
    }

    fn create(dir: PathBuf, manifest: Manifest, sequences: SequenceSet) -> Result<Self> {
        let cells = manifest.cells();
        let assignments = create_file(&dir.join(ASSIGNMENTS_FILE))?;
        fill(&assignments, cells, &PADDING_ASSIGNMENT.to_le_bytes())?;
        let distances = create_file(&dir.join(DISTANCES_FILE))?;
        fill(&distances, cells, &PADDING_DISTANCE.to_le_bytes())?;

        let mut completed_file = create_file(&dir.join(COMPLETED_FILE))?;
        completed_file.write_all(&vec![0_u8; manifest.chunk_count])?;
        completed_file.sync_all()?;

        // Written last: a store without a manifest is treated as absent.
        manifest.save(&dir)?;

        Ok(Self {
            completed: vec![false; manifest.chunk_count],
            dir,
            manifest,
            sequences,
            assignments,
            distances,
            completed_file,
        })
    }

    fn open_existing(dir: PathBuf, manifest: Manifest, sequences: SequenceSet) -> Result<Self> {
        let rect_bytes = (manifest.cells() * CELL_BYTES) as u64;
        let assignments = open_file(&dir.join(ASSIGNMENTS_FILE), rect_bytes)?;
        let distances = open_file(&dir.join(DISTANCES_FILE), rect_bytes)?;
        let mut completed_file =
            open_file(&dir.join(COMPLETED_FILE), manifest.chunk_count as u64)?;

        let mut bitmap = Vec::with_capacity(manifest.chunk_count);
        completed_file.read_to_end(&mut bitmap)?;
        let completed = bitmap.into_iter().map(|b| b != 0).collect();

        Ok(Self {
            dir,
            manifest,
            sequences,
            assignments,
            distances,
            completed_file,
            completed,
        })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn sequences(&self) -> &SequenceSet {
        &self.sequences
    }

    /// Chunk size the store was partitioned with.
    pub fn chunk_size(&self) -> usize {
        self.manifest.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.completed.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.iter().filter(|done| **done).count()
    }

    pub fn is_completed(&self, chunk_index: usize) -> bool {
        self.completed.get(chunk_index).copied().unwrap_or(false)
    }

    /// Indices of chunks whose completion bit is unset, in ascending order.
    pub fn pending_chunk_indices(&self) -> BTreeSet<usize> {
        self.completed
            .iter()
            .enumerate()
            .filter(|(_, done)| !**done)
            .map(|(i, _)| i)
            .collect()
    }

    /// Stores one chunk's results and marks the chunk complete.
    ///
    /// `assignments[k]` and `distances[k]` belong to the `k`-th frame of the
    /// concatenated `spans`. Writing the same chunk twice leaves the store
    /// exactly as a single write would.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `chunk_index` is out of range, a span
    ///   falls outside its sequence, or the value slices do not have one
    ///   entry per frame. Nothing is written in that case.
    /// - [`Error::Io`] if the payload or the completion bit cannot be made
    ///   durable. The bit is only set after the payload has been synced.
    pub fn write(
        &mut self,
        chunk_index: usize,
        spans: &[Span],
        assignments: &[i32],
        distances: &[f32],
    ) -> Result<()> {
        if chunk_index >= self.completed.len() {
            return Err(Error::invalid(format!(
                "chunk {chunk_index} is out of range ({} chunks)",
                self.completed.len()
            )));
        }
        for span in spans {
            span.validate(&self.sequences)?;
        }
        let frames: usize = spans.iter().map(Span::len).sum();
        if assignments.len() != frames || distances.len() != frames {
            return Err(Error::invalid(format!(
                "chunk {chunk_index} covers {frames} frames but got {} assignments and {} distances",
                assignments.len(),
                distances.len()
            )));
        }

        let mut offset = 0;
        for span in spans {
            let values = offset..offset + span.len();
            let pos = self.cell_offset(span.sequence, span.start);
            write_cells(&mut self.assignments, pos, &assignments[values.clone()], |v| {
                v.to_le_bytes()
            })?;
            write_cells(&mut self.distances, pos, &distances[values], |v| {
                v.to_le_bytes()
            })?;
            offset += span.len();
        }
        self.assignments.sync_data()?;
        self.distances.sync_data()?;

        self.completed_file.seek(SeekFrom::Start(chunk_index as u64))?;
        self.completed_file.write_all(&[1])?;
        self.completed_file.sync_data()?;
        self.completed[chunk_index] = true;

        Ok(())
    }

    /// Reads back the assignments and distances of one sequence, without
    /// padding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `sequence` is out of range.
    pub fn read_sequence(&mut self, sequence: usize) -> Result<(Vec<i32>, Vec<f32>)> {
        let Some(length) = self.sequences.length(sequence) else {
            return Err(Error::invalid(format!(
                "sequence {sequence} is out of range ({} sequences)",
                self.sequences.len()
            )));
        };
        let pos = self.cell_offset(sequence, 0);
        let assignments = read_cells(&mut self.assignments, pos, length, i32::from_le_bytes)?;
        let distances = read_cells(&mut self.distances, pos, length, f32::from_le_bytes)?;
        Ok((assignments, distances))
    }

    /// Flushes every file to disk and releases the store.
    pub fn close(self) -> Result<()> {
        self.assignments.sync_all()?;
        self.distances.sync_all()?;
        self.completed_file.sync_all()?;
        tracing::debug!(
            "Closed result store at {} ({}/{} chunks complete)",
            self.dir.display(),
            self.completed_count(),
            self.chunk_count()
        );
        Ok(())
    }

    fn cell_offset(&self, sequence: usize, frame: usize) -> u64 {
        ((sequence * self.manifest.width + frame) * CELL_BYTES) as u64
    }
}

fn create_file(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?)
}

fn open_file(path: &Path, expected_len: u64) -> Result<File> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let len = file.metadata()?.len();
    if len != expected_len {
        return Err(Error::shape(format!(
            "{} is {len} bytes, expected {expected_len}",
            path.display()
        )));
    }
    Ok(file)
}

fn fill(mut file: &File, cells: usize, cell: &[u8; CELL_BYTES]) -> Result<()> {
    let block: Vec<u8> = cell
        .iter()
        .copied()
        .cycle()
        .take(FILL_BLOCK_CELLS.min(cells) * CELL_BYTES)
        .collect();
    let mut remaining = cells;
    while remaining > 0 {
        let n = remaining.min(FILL_BLOCK_CELLS);
        file.write_all(&block[..n * CELL_BYTES])?;
        remaining -= n;
    }
    file.sync_all()?;
    Ok(())
}

fn write_cells<T: Copy>(
    file: &mut File,
    pos: u64,
    values: &[T],
    encode: impl Fn(T) -> [u8; CELL_BYTES],
) -> Result<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| encode(*v)).collect();
    file.seek(SeekFrom::Start(pos))?;
    file.write_all(&bytes)?;
    Ok(())
}

fn read_cells<T>(
    file: &mut File,
    pos: u64,
    count: usize,
    decode: impl Fn([u8; CELL_BYTES]) -> T,
) -> Result<Vec<T>> {
    let mut bytes = vec![0_u8; count * CELL_BYTES];
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(&mut bytes)?;
    Ok(bytes
        .chunks_exact(CELL_BYTES)
        .map(|b| decode([b[0], b[1], b[2], b[3]]))
        .collect())
}
