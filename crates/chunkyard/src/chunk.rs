use crate::Span;
use core::ops::Range;
use serde::{Deserialize, Serialize};

/// A fixed-size unit of dispatched work.
///
/// A chunk is an ordered, non-empty list of [`Span`]s that may cross sequence
/// boundaries. Its frame order is the order of its spans, and workers must
/// return one assignment and one distance per frame in exactly that order.
///
/// The `index` is the chunk's position in its partition and doubles as the
/// key of its completion bit in the result store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    index: usize,
    spans: Vec<Span>,
}

impl Chunk {
    pub(crate) const fn new(index: usize, spans: Vec<Span>) -> Self {
        Self { index, spans }
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Total number of frames across all spans.
    pub fn len(&self) -> usize {
        self.spans.iter().map(Span::len).sum()
    }

    /// Partitions never produce empty chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The spans as `(sequence, start, end)` triples.
    pub fn canonical(&self) -> Vec<(usize, usize, usize)> {
        self.spans
            .iter()
            .map(|span| (span.sequence, span.start, span.end))
            .collect()
    }

    /// Loads the frames this chunk addresses, in chunk order.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `source`.
    pub fn materialize<S>(&self, source: &S) -> Result<Vec<S::Frame>, S::Error>
    where
        S: SequenceSource + ?Sized,
    {
        let mut frames = Vec::with_capacity(self.len());
        for span in &self.spans {
            frames.extend(source.frames(span.sequence, span.frames())?);
        }
        Ok(frames)
    }
}

/// Read access to the frame data behind a sequence set.
///
/// Workers hand a source to [`Chunk::materialize`] to turn a chunk's
/// addressing into the concrete frames they classify. How frames are stored
/// (files, memory maps, remote objects) is up to the implementor.
pub trait SequenceSource {
    type Frame;
    type Error;

    /// Returns frames `range` of sequence `sequence`.
    fn frames(
        &self,
        sequence: usize,
        range: Range<usize>,
    ) -> Result<Vec<Self::Frame>, Self::Error>;
}

/// Error returned by the in-memory sources when a span falls outside the data.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("frames {range:?} of sequence {sequence} are not available")]
pub struct MissingFrames {
    pub sequence: usize,
    pub range: Range<usize>,
}

impl<T: Clone> SequenceSource for [Vec<T>] {
    type Frame = T;
    type Error = MissingFrames;

    fn frames(&self, sequence: usize, range: Range<usize>) -> Result<Vec<T>, MissingFrames> {
        self.get(sequence)
            .and_then(|frames| frames.get(range.clone()))
            .map(<[T]>::to_vec)
            .ok_or(MissingFrames { sequence, range })
    }
}

impl<T: Clone> SequenceSource for Vec<Vec<T>> {
    type Frame = T;
    type Error = MissingFrames;

    fn frames(&self, sequence: usize, range: Range<usize>) -> Result<Vec<T>, MissingFrames> {
        self.as_slice().frames(sequence, range)
    }
}
