use crate::{Error, Partition, Result, SequenceSet};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub(super) const MANIFEST_FILE: &str = "manifest.json";
const FORMAT_VERSION: u32 = 1;

/// Describes the shape of a result store.
///
/// The manifest is written last when a store is created, so its presence
/// marks a fully initialised store. Reopening compares it field by field with
/// the shape the current run expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(super) struct Manifest {
    pub format: u32,
    pub chunk_size: usize,
    pub chunk_count: usize,
    pub width: usize,
    pub lengths: Vec<usize>,
}

impl Manifest {
    pub fn expected(sequences: &SequenceSet, partition: &Partition) -> Self {
        Self {
            format: FORMAT_VERSION,
            chunk_size: partition.chunk_size(),
            chunk_count: partition.len(),
            width: sequences.max_length(),
            lengths: sequences.lengths().to_vec(),
        }
    }

    /// Number of cells in each rectangular output.
    pub fn cells(&self) -> usize {
        self.lengths.len() * self.width
    }

    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(MANIFEST_FILE);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the manifest atomically: write a sibling temp file, sync it,
    /// then rename it over the old one.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, self)?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(MANIFEST_FILE))
            .map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Explains the first difference between an existing store and the shape
    /// the current run expects.
    pub fn check_matches(&self, expected: &Self) -> Result<()> {
        if self.format != expected.format {
            return Err(Error::shape(format!(
                "store format {} is not supported (expected {})",
                self.format, expected.format
            )));
        }
        if self.lengths.len() != expected.lengths.len() {
            return Err(Error::shape(format!(
                "store holds {} sequences, run has {}",
                self.lengths.len(),
                expected.lengths.len()
            )));
        }
        if let Some((i, (have, want))) = self
            .lengths
            .iter()
            .zip(&expected.lengths)
            .enumerate()
            .find(|(_, (have, want))| have != want)
        {
            return Err(Error::shape(format!(
                "sequence {i} has length {have} in the store, {want} in the run"
            )));
        }
        if self.chunk_size != expected.chunk_size {
            return Err(Error::shape(format!(
                "store was partitioned with chunk size {}, run uses {}",
                self.chunk_size, expected.chunk_size
            )));
        }
        if self.chunk_count != expected.chunk_count || self.width != expected.width {
            return Err(Error::shape(format!(
                "store is {} chunks x width {}, run expects {} chunks x width {}",
                self.chunk_count, self.width, expected.chunk_count, expected.width
            )));
        }
        Ok(())
    }
}
