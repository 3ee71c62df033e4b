//! Search quality and state handling of the IVF-PQ index.

use quarry::vector::{IndexState, default_nlist};
use quarry::{IndexParams, IvfPqIndex, SlotId, VectorDimension, VectorError};

use crate::common::{clustered_vectors, exact_top_k, random_vectors};

fn slots(n: usize) -> Vec<SlotId> {
    (0..n as u64).map(SlotId::new).collect()
}

fn trained_index(vectors: &[Vec<f32>], params: IndexParams) -> IvfPqIndex {
    let dim = VectorDimension::new(vectors[0].len()).unwrap();
    let mut index = IvfPqIndex::new(dim, params).unwrap();
    index.train(vectors).unwrap();
    index.add(vectors, &slots(vectors.len())).unwrap();
    index
}

#[test]
fn test_stored_vectors_are_found_at_distance_zero() {
    // 256 training vectors with 8-bit codes: every sub-centroid is one
    // training residual, so the stored codes are exact.
    let vectors = random_vectors(256, 384, 7);
    let params = IndexParams {
        nlist: Some(10),
        m: 16,
        nbits: 8,
        max_iterations: 25,
    };
    let index = trained_index(&vectors, params);

    assert_eq!(index.state(), IndexState::Populated);
    assert_eq!(index.len(), 256);
    assert_eq!(index.nlist(), 10);

    for i in (0..256).step_by(17) {
        let hits = index.search(&vectors[i], 1, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slot, SlotId::new(i as u64));
        assert!(
            hits[0].distance.abs() < 1e-2,
            "vector {i} came back at distance {}",
            hits[0].distance
        );
    }
}

#[test]
fn test_too_few_vectors_for_eight_bit_codes() {
    let vectors = random_vectors(100, 384, 3);
    let params = IndexParams {
        nlist: Some(10),
        m: 16,
        nbits: 8,
        max_iterations: 25,
    };
    let mut index = IvfPqIndex::new(VectorDimension::new(384).unwrap(), params).unwrap();

    let err = index.train(&vectors).unwrap_err();

    assert!(matches!(
        err,
        VectorError::InsufficientData {
            available: 100,
            required: 256,
            ..
        }
    ));
    assert_eq!(index.state(), IndexState::Untrained);
}

#[test]
fn test_recall_grows_with_nprobe() {
    let nlist = 8;
    let vectors = clustered_vectors(256, 32, nlist, 11);
    let params = IndexParams {
        nlist: Some(nlist),
        m: 8,
        nbits: 8,
        max_iterations: 25,
    };
    let index = trained_index(&vectors, params);
    let queries = clustered_vectors(24, 32, nlist, 99);

    let k = 10;
    let recall_at = |nprobe: usize| -> f64 {
        let mut found = 0usize;
        for query in &queries {
            let truth = exact_top_k(&vectors, query, k);
            let hits = index.search(query, k, nprobe).unwrap();
            found += hits
                .iter()
                .filter(|hit| truth.contains(&hit.slot.get()))
                .count();
        }
        found as f64 / (queries.len() * k) as f64
    };

    let recalls: Vec<f64> = [1, 2, 4, nlist].into_iter().map(recall_at).collect();
    for pair in recalls.windows(2) {
        assert!(pair[1] + 0.01 >= pair[0], "recall dropped: {recalls:?}");
    }
    assert!(recalls[3] >= 0.95, "full probe recall too low: {recalls:?}");

    // Against the exhaustive probe, probing more lists never loses a hit.
    let baseline: Vec<Vec<u64>> = queries
        .iter()
        .map(|query| {
            let hits = index.search(query, k, nlist).unwrap();
            hits.iter().map(|hit| hit.slot.get()).collect()
        })
        .collect();
    let baseline_recall_at = |nprobe: usize| -> f64 {
        let mut found = 0usize;
        let mut total = 0usize;
        for (query, expected) in queries.iter().zip(&baseline) {
            let hits = index.search(query, k, nprobe).unwrap();
            found += hits
                .iter()
                .filter(|hit| expected.contains(&hit.slot.get()))
                .count();
            total += expected.len();
        }
        found as f64 / total as f64
    };

    let relative: Vec<f64> = (1..=nlist).map(baseline_recall_at).collect();
    for pair in relative.windows(2) {
        assert!(pair[1] >= pair[0], "recall against full probe dropped: {relative:?}");
    }
    assert_eq!(relative[nlist - 1], 1.0);
}

#[test]
fn test_results_are_sorted_and_never_padded() {
    let vectors = random_vectors(64, 16, 5);
    let params = IndexParams {
        nlist: Some(4),
        m: 4,
        nbits: 4,
        max_iterations: 10,
    };
    let index = trained_index(&vectors, params);

    let hits = index.search(&vectors[0], 1000, 4).unwrap();
    assert_eq!(hits.len(), 64);
    for pair in hits.windows(2) {
        assert!(
            pair[0].distance < pair[1].distance
                || (pair[0].distance == pair[1].distance && pair[0].slot < pair[1].slot)
        );
    }

    // A single probed list holds fewer than all vectors.
    let narrow = index.search(&vectors[0], 1000, 1).unwrap();
    assert!(!narrow.is_empty());
    assert!(narrow.len() <= 64);

    assert!(index.search(&vectors[0], 0, 4).unwrap().is_empty());
}

#[test]
fn test_nprobe_is_clamped() {
    let vectors = random_vectors(64, 16, 9);
    let params = IndexParams {
        nlist: Some(4),
        m: 4,
        nbits: 4,
        max_iterations: 10,
    };
    let index = trained_index(&vectors, params);
    let query = &vectors[3];

    assert_eq!(
        index.search(query, 5, 0).unwrap(),
        index.search(query, 5, 1).unwrap()
    );
    assert_eq!(
        index.search(query, 64, 1000).unwrap(),
        index.search(query, 64, 4).unwrap()
    );
}

#[test]
fn test_lifecycle_errors() {
    let dim = VectorDimension::new(16).unwrap();
    let params = IndexParams {
        nlist: Some(2),
        m: 4,
        nbits: 2,
        max_iterations: 10,
    };
    let vectors = random_vectors(32, 16, 1);
    let mut index = IvfPqIndex::new(dim, params).unwrap();

    assert!(matches!(
        index.search(&vectors[0], 3, 1),
        Err(VectorError::NotTrained)
    ));
    assert!(matches!(
        index.add(&vectors, &slots(32)),
        Err(VectorError::NotTrained)
    ));

    index.train(&vectors).unwrap();
    assert_eq!(index.state(), IndexState::Trained);
    assert!(index.search(&vectors[0], 3, 1).unwrap().is_empty());
    assert!(matches!(
        index.train(&vectors),
        Err(VectorError::AlreadyTrained)
    ));
}

#[test]
fn test_wrong_dimension_is_rejected_without_side_effects() {
    let vectors = random_vectors(32, 16, 2);
    let params = IndexParams {
        nlist: Some(2),
        m: 4,
        nbits: 2,
        max_iterations: 10,
    };
    let mut index = trained_index(&vectors, params);

    assert!(matches!(
        index.search(&vec![0.0; 8], 3, 2),
        Err(VectorError::DimensionMismatch {
            expected: 16,
            actual: 8
        })
    ));

    let mut batch = random_vectors(3, 16, 4);
    batch.push(vec![0.0; 15]);
    let new_slots: Vec<SlotId> = (32..36).map(SlotId::new).collect();
    assert!(matches!(
        index.add(&batch, &new_slots),
        Err(VectorError::DimensionMismatch { .. })
    ));
    assert_eq!(index.len(), 32);
}

#[test]
fn test_default_nlist_follows_corpus_size() {
    let vectors = random_vectors(400, 8, 21);
    let params = IndexParams {
        nlist: None,
        m: 2,
        nbits: 4,
        max_iterations: 10,
    };
    let index = trained_index(&vectors, params);

    assert_eq!(default_nlist(400), 20);
    assert_eq!(index.nlist(), 20);
    assert_eq!(index.list_sizes().iter().sum::<usize>(), 400);
}
