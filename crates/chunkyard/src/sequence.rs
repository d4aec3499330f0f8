use crate::{Error, Result};
use core::ops::Range;
use serde::{Deserialize, Serialize};

/// The ordered frame counts of every sequence in a run.
///
/// A sequence's position in the set is its stable index: spans, the result
/// store and the worker protocol all address sequences by it. The set is
/// immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceSet {
    lengths: Vec<usize>,
}

impl SequenceSet {
    pub const fn new(lengths: Vec<usize>) -> Self {
        Self { lengths }
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Number of sequences, including empty ones.
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Frame count of sequence `index`, or `None` if it is out of range.
    pub fn length(&self, index: usize) -> Option<usize> {
        self.lengths.get(index).copied()
    }

    /// Total number of frames across all sequences.
    pub fn total_frames(&self) -> usize {
        self.lengths.iter().sum()
    }

    /// Length of the longest sequence; the width of the result rectangle.
    pub fn max_length(&self) -> usize {
        self.lengths.iter().copied().max().unwrap_or(0)
    }
}

impl From<Vec<usize>> for SequenceSet {
    fn from(lengths: Vec<usize>) -> Self {
        Self::new(lengths)
    }
}

/// Builds a set from signed lengths as they arrive from untyped input.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if any length is negative.
impl TryFrom<Vec<i64>> for SequenceSet {
    type Error = Error;

    fn try_from(raw: Vec<i64>) -> Result<Self> {
        let lengths = raw
            .into_iter()
            .enumerate()
            .map(|(index, len)| {
                usize::try_from(len).map_err(|_| {
                    Error::invalid(format!("sequence {index} has negative length {len}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(lengths))
    }
}

/// A half-open range of frames `[start, end)` inside a single sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub sequence: usize,
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(sequence: usize, start: usize, end: usize) -> Self {
        Self {
            sequence,
            start,
            end,
        }
    }

    /// Number of frames covered by the span.
    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub const fn frames(&self) -> Range<usize> {
        self.start..self.end
    }

    /// Checks `start < end <= length(sequence)` against `sequences`.
    pub fn validate(&self, sequences: &SequenceSet) -> Result<()> {
        let Some(length) = sequences.length(self.sequence) else {
            return Err(Error::invalid(format!(
                "span {self:?} addresses sequence {} of {}",
                self.sequence,
                sequences.len()
            )));
        };
        if self.start >= self.end || self.end > length {
            return Err(Error::invalid(format!(
                "span {self:?} is outside sequence {} of length {length}",
                self.sequence
            )));
        }
        Ok(())
    }
}

impl From<(usize, usize, usize)> for Span {
    fn from((sequence, start, end): (usize, usize, usize)) -> Self {
        Self::new(sequence, start, end)
    }
}
