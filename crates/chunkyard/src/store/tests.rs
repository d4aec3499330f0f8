use super::*;
use crate::Chunk;

fn setup(lengths: &[usize], chunk_size: usize) -> (SequenceSet, Partition) {
    let sequences = SequenceSet::new(lengths.to_vec());
    let partition = Partition::new(&sequences, chunk_size).unwrap();
    (sequences, partition)
}

/// Deterministic fake result: assignment = sequence * 100 + frame.
fn fake_result(chunk: &Chunk) -> (Vec<i32>, Vec<f32>) {
    let assignments: Vec<i32> = chunk
        .spans()
        .iter()
        .flat_map(|s| s.frames().map(move |f| (s.sequence * 100 + f) as i32))
        .collect();
    let distances = assignments.iter().map(|a| *a as f32 / 4.0).collect();
    (assignments, distances)
}

fn write_chunk(store: &mut ResultStore, chunk: &Chunk) {
    let (a, d) = fake_result(chunk);
    store.write(chunk.index(), chunk.spans(), &a, &d).unwrap();
}

#[test]
fn fresh_store_is_padded_and_fully_pending() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[2, 5], 3);
    let mut store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();

    assert_eq!(store.chunk_count(), 3);
    assert_eq!(store.completed_count(), 0);
    assert_eq!(store.pending_chunk_indices(), BTreeSet::from([0, 1, 2]));

    let (a, d) = store.read_sequence(1).unwrap();
    assert_eq!(a, vec![PADDING_ASSIGNMENT; 5]);
    assert_eq!(d, vec![PADDING_DISTANCE; 5]);

    // 2 sequences x width 5 x 4 bytes
    let size = std::fs::metadata(dir.path().join(ASSIGNMENTS_FILE))
        .unwrap()
        .len();
    assert_eq!(size, 40);
    store.close().unwrap();
}

#[test]
fn write_places_values_at_span_positions() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[2, 5], 3);
    let mut store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();

    // Chunk 0 spans (0,0,2) and (1,0,1).
    store
        .write(
            0,
            partition.chunks()[0].spans(),
            &[7, 8, 9],
            &[0.5, 1.5, 2.5],
        )
        .unwrap();

    assert_eq!(store.read_sequence(0).unwrap(), (vec![7, 8], vec![0.5, 1.5]));
    assert_eq!(
        store.read_sequence(1).unwrap(),
        (vec![9, -1, -1, -1, -1], vec![2.5, -1.0, -1.0, -1.0, -1.0])
    );
    assert!(store.is_completed(0));
    assert_eq!(store.pending_chunk_indices(), BTreeSet::from([1, 2]));
}

#[test]
fn reopen_preserves_completion_state() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[2, 1, 10], 4);
    assert_eq!(partition.len(), 4);

    let mut store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();
    for chunk in &partition.chunks()[..3] {
        write_chunk(&mut store, chunk);
    }
    store.close().unwrap();

    let mut store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();
    assert_eq!(store.completed_count(), 3);
    assert_eq!(store.pending_chunk_indices(), BTreeSet::from([3]));

    // Values written before the reopen are still there.
    let (a, _) = store.read_sequence(2).unwrap();
    assert_eq!(&a[..9], &[200, 201, 202, 203, 204, 205, 206, 207, 208]);
    assert_eq!(a[9], PADDING_ASSIGNMENT);
}

#[test]
fn repeated_write_is_idempotent() {
    let (sequences, partition) = setup(&[3, 4, 1], 3);

    let once = tempfile::tempdir().unwrap();
    let mut a = ResultStore::open_or_create(once.path(), &sequences, &partition).unwrap();
    for chunk in partition.chunks() {
        write_chunk(&mut a, chunk);
    }
    a.close().unwrap();

    let twice = tempfile::tempdir().unwrap();
    let mut b = ResultStore::open_or_create(twice.path(), &sequences, &partition).unwrap();
    for chunk in partition.chunks() {
        write_chunk(&mut b, chunk);
        write_chunk(&mut b, chunk);
    }
    b.close().unwrap();

    for file in [ASSIGNMENTS_FILE, DISTANCES_FILE, COMPLETED_FILE] {
        assert_eq!(
            std::fs::read(once.path().join(file)).unwrap(),
            std::fs::read(twice.path().join(file)).unwrap(),
            "{file} differs"
        );
    }
}

#[test]
fn different_lengths_are_a_shape_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[2, 5], 3);
    ResultStore::open_or_create(dir.path(), &sequences, &partition)
        .unwrap()
        .close()
        .unwrap();

    let (other, other_partition) = setup(&[2, 6], 3);
    let err = ResultStore::open_or_create(dir.path(), &other, &other_partition).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
    assert!(err.to_string().contains("sequence 1"));

    let (other, other_partition) = setup(&[2, 5, 1], 3);
    let err = ResultStore::open_or_create(dir.path(), &other, &other_partition).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
}

#[test]
fn different_chunk_size_is_a_shape_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[4, 4], 4);
    ResultStore::open_or_create(dir.path(), &sequences, &partition)
        .unwrap()
        .close()
        .unwrap();

    // Same chunk count (2), different chunk boundaries.
    let (_, repartitioned) = setup(&[4, 4], 5);
    assert_eq!(repartitioned.len(), partition.len());
    let err = ResultStore::open_or_create(dir.path(), &sequences, &repartitioned).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
}

#[test]
fn truncated_data_file_is_a_shape_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[3, 3], 2);
    ResultStore::open_or_create(dir.path(), &sequences, &partition)
        .unwrap()
        .close()
        .unwrap();

    let file = OpenOptions::new()
        .write(true)
        .open(dir.path().join(DISTANCES_FILE))
        .unwrap();
    file.set_len(4).unwrap();

    let err = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }), "{err}");
}

#[test]
fn missing_manifest_recreates_store() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[3, 3], 2);
    let mut store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();
    write_chunk(&mut store, &partition.chunks()[0]);
    store.close().unwrap();

    std::fs::remove_file(dir.path().join("manifest.json")).unwrap();

    let store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();
    assert_eq!(store.completed_count(), 0);
}

#[test]
fn malformed_writes_are_rejected_without_marking_complete() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[2, 5], 3);
    let mut store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();
    let spans = partition.chunks()[1].spans();

    let err = store.write(1, spans, &[1, 2], &[0.0, 0.0]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");

    let err = store.write(9, spans, &[1, 2, 3], &[0.0; 3]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");

    let bad = [Span::new(1, 3, 7)];
    let err = store.write(1, &bad, &[1, 2, 3, 4], &[0.0; 4]).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument { .. }), "{err}");

    assert_eq!(store.completed_count(), 0);
}

#[test]
fn empty_sequence_set_has_no_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let (sequences, partition) = setup(&[0, 0], 3);
    let store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();
    assert_eq!(store.chunk_count(), 0);
    assert!(store.pending_chunk_indices().is_empty());
    store.close().unwrap();
}

#[test]
fn open_reads_shape_from_manifest() {
    let dir = tempfile::tempdir().unwrap();
    assert!(ResultStore::open(dir.path()).unwrap().is_none());

    let (sequences, partition) = setup(&[6, 0, 3], 4);
    let mut store = ResultStore::open_or_create(dir.path(), &sequences, &partition).unwrap();
    write_chunk(&mut store, &partition.chunks()[1]);
    store.close().unwrap();

    let mut store = ResultStore::open(dir.path()).unwrap().unwrap();
    assert_eq!(store.sequences(), &sequences);
    assert_eq!(store.chunk_size(), 4);
    assert_eq!(store.pending_chunk_indices(), BTreeSet::from([0, 2]));
    assert_eq!(store.read_sequence(2).unwrap().0, vec![200, 201, -1]);
}
