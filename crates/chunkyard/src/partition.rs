//! Flattening variable-length sequences into fixed-size chunks.
//!
//! All sequences are laid end to end on one virtual tape of
//! `sum(lengths)` frames. The tape is cut every `chunk_size` frames, and each
//! cut becomes a [`Chunk`] whose [`Span`]s record which sequence and which
//! frame range every piece came from. Only the final chunk can be short, and
//! no empty chunk is ever produced.
//!
//! Partitioning is a pure function of `(lengths, chunk_size)`. The result
//! store keys its completion bitmap by chunk index, so the same inputs must
//! always yield the same chunk list.

use crate::{Chunk, Error, Result, SequenceSet, Span};
use serde::{Deserialize, Serialize};

/// Splits `sequences` into chunks of exactly `chunk_size` frames (the last
/// one may be shorter).
///
/// Zero-length sequences contribute no span. A sequence longer than
/// `chunk_size` is spread over several chunks, one maximal span per chunk.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `chunk_size` is zero.
///
/// # Example
///
/// ```
/// use chunkyard::{SequenceSet, partition};
///
/// let chunks = partition(&SequenceSet::new(vec![2, 5]), 3).unwrap();
/// let spans: Vec<_> = chunks.iter().map(|c| c.canonical()).collect();
/// assert_eq!(
///     spans,
///     vec![
///         vec![(0, 0, 2), (1, 0, 1)],
///         vec![(1, 1, 4)],
///         vec![(1, 4, 5)],
///     ]
/// );
/// ```
pub fn partition(sequences: &SequenceSet, chunk_size: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(Error::invalid("chunk size must be greater than 0"));
    }

    let total = sequences.total_frames();
    let mut chunks = Vec::with_capacity(total.div_ceil(chunk_size));
    let mut spans = Vec::new();
    let mut room = chunk_size;

    for (sequence, &length) in sequences.lengths().iter().enumerate() {
        let mut start = 0;
        while start < length {
            let take = room.min(length - start);
            spans.push(Span::new(sequence, start, start + take));
            start += take;
            room -= take;

            if room == 0 {
                chunks.push(Chunk::new(chunks.len(), core::mem::take(&mut spans)));
                room = chunk_size;
            }
        }
    }

    // Leftover frames that did not fill a whole chunk.
    if !spans.is_empty() {
        chunks.push(Chunk::new(chunks.len(), spans));
    }

    Ok(chunks)
}

/// A sequence set cut into chunks, together with the chunk size that
/// produced them.
///
/// The chunk size travels with the chunks because the result store needs it
/// to recognise whether an existing completion bitmap belongs to this
/// partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    chunk_size: usize,
    chunks: Vec<Chunk>,
}

impl Partition {
    /// Partitions `sequences` with [`partition`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `chunk_size` is zero.
    pub fn new(sequences: &SequenceSet, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            chunk_size,
            chunks: partition(sequences, chunk_size)?,
        })
    }

    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Chunk> {
        self.chunks.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical(lengths: &[usize], chunk_size: usize) -> Vec<Vec<(usize, usize, usize)>> {
        partition(&SequenceSet::new(lengths.to_vec()), chunk_size)
            .unwrap()
            .iter()
            .map(Chunk::canonical)
            .collect()
    }

    /// Checks every structural invariant of a partition.
    fn check_partition(lengths: &[usize], chunk_size: usize) {
        let set = SequenceSet::new(lengths.to_vec());
        let chunks = partition(&set, chunk_size).unwrap();

        let total: usize = chunks.iter().map(Chunk::len).sum();
        assert_eq!(total, set.total_frames(), "lengths={lengths:?}");

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index(), i);
            assert!(!chunk.spans().is_empty());
            assert!(chunk.len() <= chunk_size);
            if i + 1 < chunks.len() {
                assert_eq!(chunk.len(), chunk_size, "short chunk {i} in {lengths:?}");
            }
            for span in chunk.spans() {
                span.validate(&set).unwrap();
            }
        }

        // Walking the spans in order must cover every sequence front to back.
        let mut cursor = vec![0; lengths.len()];
        let mut last_sequence = 0;
        for span in chunks.iter().flat_map(Chunk::spans) {
            assert!(span.sequence >= last_sequence, "sequences out of order");
            assert_eq!(span.start, cursor[span.sequence], "gap or overlap at {span:?}");
            cursor[span.sequence] = span.end;
            last_sequence = span.sequence;
        }
        assert_eq!(cursor, lengths);
    }

    #[test]
    fn test_chunks_two_sequences() {
        assert_eq!(
            canonical(&[2, 5], 3),
            vec![vec![(0, 0, 2), (1, 0, 1)], vec![(1, 1, 4)], vec![(1, 4, 5)]]
        );
    }

    #[test]
    fn test_chunks_three_sequences() {
        assert_eq!(
            canonical(&[2, 1, 10], 4),
            vec![
                vec![(0, 0, 2), (1, 0, 1), (2, 0, 1)],
                vec![(2, 1, 5)],
                vec![(2, 5, 9)],
                vec![(2, 9, 10)],
            ]
        );
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = partition(&SequenceSet::new(vec![3]), 0).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn empty_sequences_are_skipped() {
        assert_eq!(
            canonical(&[0, 3, 0, 0, 2], 2),
            vec![vec![(1, 0, 2)], vec![(1, 2, 3), (4, 0, 1)], vec![(4, 1, 2)]]
        );
    }

    #[test]
    fn no_frames_means_no_chunks() {
        assert!(canonical(&[], 5).is_empty());
        assert!(canonical(&[0, 0], 5).is_empty());
    }

    #[test]
    fn oversized_chunk_covers_everything() {
        assert_eq!(
            canonical(&[3, 4], 100),
            vec![vec![(0, 0, 3), (1, 0, 4)]]
        );
    }

    #[test]
    fn exact_multiple_has_no_trailing_chunk() {
        assert_eq!(
            canonical(&[4, 2], 3),
            vec![vec![(0, 0, 3)], vec![(0, 3, 4), (1, 0, 2)]]
        );
    }

    #[test]
    fn chunk_size_one_yields_single_frames() {
        let chunks = canonical(&[2, 1], 1);
        assert_eq!(
            chunks,
            vec![vec![(0, 0, 1)], vec![(0, 1, 2)], vec![(1, 0, 1)]]
        );
    }

    #[test]
    fn invariants_hold_across_many_shapes() {
        let shapes: &[&[usize]] = &[
            &[1],
            &[7],
            &[5, 5, 5],
            &[0, 1, 0, 1, 0, 1],
            &[13, 2, 0, 8, 1, 21],
            &[100, 3, 57, 0, 64],
            &[1; 17],
        ];
        for lengths in shapes {
            for chunk_size in [1, 2, 3, 4, 5, 7, 8, 16, 64, 1000] {
                check_partition(lengths, chunk_size);
            }
        }
    }

    #[test]
    fn partition_is_deterministic() {
        let set = SequenceSet::new(vec![13, 2, 0, 8, 1, 21]);
        let a = Partition::new(&set, 6).unwrap();
        let b = Partition::new(&set, 6).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.chunk_size(), 6);
        assert_eq!(a.len(), 8);
    }
}
