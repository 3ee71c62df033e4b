//! Saving and reopening index artifacts.

use std::fs;

use quarry::vector::{INDEX_FILE, MAPPING_FILE, METADATA_FILE};
use quarry::{
    EmbeddingGenerator, IndexParams, IvfPqIndex, PassageId, SlotId, VectorDimension, VectorError,
    VectorSearchEngine,
};
use tempfile::TempDir;

use crate::common::{HashEmbedder, random_vectors};

const TOPICS: &[&str] = &[
    "tuition fees are due before the start of term",
    "the library opens at nine on weekends",
    "exam timetables are published in october",
    "dormitory applications close in june",
    "scholarships require a minimum grade average",
    "parking permits are issued by campus security",
    "graduation ceremonies take place in july",
    "lab safety training is mandatory for chemistry students",
];

fn texts() -> Vec<String> {
    (0..64)
        .map(|i| format!("{} (note {i})", TOPICS[i % TOPICS.len()]))
        .collect()
}

fn build_engine(embedder: &HashEmbedder) -> VectorSearchEngine {
    let texts = texts();
    // Passage ids deliberately differ from slot numbers.
    let passages: Vec<(PassageId, &str)> = texts
        .iter()
        .enumerate()
        .map(|(i, t)| (PassageId::new(1000 + i as u64 * 3), t.as_str()))
        .collect();
    let params = IndexParams {
        nlist: Some(4),
        m: 4,
        nbits: 4,
        max_iterations: 15,
    };
    VectorSearchEngine::build(&passages, embedder, params, 16, |_| {}).unwrap()
}

#[test]
fn test_engine_round_trip_preserves_results() {
    let embedder = HashEmbedder::new(32);
    let dir = TempDir::new().unwrap();
    let mut engine = build_engine(&embedder);
    engine.save(dir.path()).unwrap();

    assert!(VectorSearchEngine::exists(dir.path()));
    let reopened = VectorSearchEngine::open(dir.path()).unwrap();

    assert_eq!(reopened.len(), 64);
    assert_eq!(reopened.dimension(), engine.dimension());
    assert_eq!(reopened.nlist(), 4);
    assert_eq!(reopened.metadata().model_name, "hash-test");
    assert_eq!(reopened.metadata().vector_count, 64);
    assert_eq!(reopened.mapping(), engine.mapping());

    for query in ["library weekend hours", "exam timetable", "parking on campus"] {
        let q = embedder.embed(query).unwrap();
        for nprobe in [1, 2, 4] {
            assert_eq!(
                engine.search(&q, 5, nprobe).unwrap(),
                reopened.search(&q, 5, nprobe).unwrap(),
                "results differ for {query:?} at nprobe {nprobe}"
            );
        }
    }
}

#[test]
fn test_search_hits_resolve_to_passage_ids() {
    let embedder = HashEmbedder::new(32);
    let engine = build_engine(&embedder);

    let q = embedder.embed(&texts()[5]).unwrap();
    let hits = engine.search(&q, 3, 4).unwrap();

    assert_eq!(hits.len(), 3);
    for (id, _) in &hits {
        assert!(id.get() >= 1000);
        assert_eq!((id.get() - 1000) % 3, 0);
    }
}

#[test]
fn test_index_file_reopens_bit_exact() {
    let vectors = random_vectors(64, 16, 13);
    let params = IndexParams {
        nlist: Some(4),
        m: 4,
        nbits: 4,
        max_iterations: 10,
    };
    let mut index = IvfPqIndex::new(VectorDimension::new(16).unwrap(), params).unwrap();
    index.train(&vectors).unwrap();
    let slots: Vec<SlotId> = (0..64).map(SlotId::new).collect();
    index.add(&vectors, &slots).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join(INDEX_FILE);
    index.save(&path).unwrap();
    let reopened = IvfPqIndex::open(&path).unwrap();

    assert_eq!(reopened.model(), index.model());
    assert_eq!(reopened.lists(), index.lists());
    assert_eq!(reopened.len(), index.len());
    assert_eq!(reopened.serialize().unwrap(), fs::read(&path).unwrap());
}

#[test]
fn test_short_mapping_is_an_artifact_mismatch() {
    let embedder = HashEmbedder::new(32);
    let dir = TempDir::new().unwrap();
    build_engine(&embedder).save(dir.path()).unwrap();

    let ids: Vec<u64> = (0..63).collect();
    fs::write(
        dir.path().join(MAPPING_FILE),
        serde_json::to_string(&ids).unwrap(),
    )
    .unwrap();

    assert!(matches!(
        VectorSearchEngine::open(dir.path()),
        Err(VectorError::ArtifactMismatch {
            index_count: 64,
            other_count: 63,
            ..
        })
    ));
}

#[test]
fn test_stale_metadata_is_an_artifact_mismatch() {
    let embedder = HashEmbedder::new(32);
    let dir = TempDir::new().unwrap();
    build_engine(&embedder).save(dir.path()).unwrap();

    let path = dir.path().join(METADATA_FILE);
    let mut metadata: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    metadata["vector_count"] = serde_json::json!(10);
    fs::write(&path, metadata.to_string()).unwrap();

    assert!(matches!(
        VectorSearchEngine::open(dir.path()),
        Err(VectorError::ArtifactMismatch {
            index_count: 64,
            other_count: 10,
            ..
        })
    ));
}

#[test]
fn test_corrupted_index_file_is_rejected() {
    let embedder = HashEmbedder::new(32);
    let dir = TempDir::new().unwrap();
    build_engine(&embedder).save(dir.path()).unwrap();

    let path = dir.path().join(INDEX_FILE);
    let mut bytes = fs::read(&path).unwrap();
    bytes[0] = b'X';
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        VectorSearchEngine::open(dir.path()),
        Err(VectorError::InvalidFormat(_))
    ));

    bytes[0] = b'Q';
    bytes.truncate(bytes.len() - 1);
    fs::write(&path, &bytes).unwrap();
    assert!(VectorSearchEngine::open(dir.path()).is_err());
}

#[test]
fn test_missing_directory_has_no_index() {
    let dir = TempDir::new().unwrap();
    assert!(!VectorSearchEngine::exists(dir.path().join("index")));
    assert!(VectorSearchEngine::open(dir.path().join("index")).is_err());
}
