//! Ingest → build → retrieve → prompt, end to end with a hash embedder.

use std::sync::Arc;

use parking_lot::Mutex;
use quarry::config::{IngestConfig, RetrievalConfig};
use quarry::prompt::DEFAULT_PREAMBLE;
use quarry::{
    GenerationError, GenerationOptions, Generator, IndexParams, JsonPassageStore, PassageId,
    PassageStore, Pipeline, PromptAssembler, QuarryError, Retriever, VectorError,
    VectorSearchEngine, ingest_directory,
};

use crate::common::{HashEmbedder, TestProject};

const DIM: usize = 64;

#[derive(Default)]
struct EchoGenerator {
    prompts: Mutex<Vec<String>>,
}

impl Generator for EchoGenerator {
    fn generate(&self, prompt: &str, _: &GenerationOptions) -> Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        Ok(format!("answer from {} chars of prompt", prompt.len()))
    }
}

fn write_corpus(project: &TestProject) {
    let docs = [
        (
            "fees.txt",
            "Tuition fees are due on the first of September. Late fees apply after two weeks. \
             Fees can be paid online or at the finance office.",
        ),
        (
            "library.txt",
            "The library opens at eight on weekdays. On weekends the library opens at ten. \
             Group study rooms in the library must be booked online.",
        ),
        (
            "housing.txt",
            "Dormitory applications close in June. Housing offers are sent in July. \
             Each dormitory room has a desk and a wardrobe.",
        ),
        (
            "exams.txt",
            "Exam timetables are published in October. Exam results appear after four weeks. \
             Resit exams take place in August.",
        ),
    ];
    for round in 0..6 {
        for (name, text) in docs {
            project.add_file(&format!("data/r{round}/{name}"), text);
        }
    }
    project.add_file("data/notes.md", "ignored because of its extension");
    project.add_file("data/empty.txt", "   ");
}

/// Ingests the corpus, builds and saves the index, then reopens both.
fn build_workspace(project: &TestProject) -> (Arc<JsonPassageStore>, Arc<VectorSearchEngine>) {
    write_corpus(project);
    let config = IngestConfig {
        data_dir: project.path().join("data"),
        chunk_size: 80,
        chunk_overlap: 0,
        extensions: vec!["txt".to_string()],
    };
    let store_path = project.path().join("passages.json");

    let store = JsonPassageStore::open(&store_path).unwrap();
    let mut seen = Vec::new();
    let report = ingest_directory(&config, &store, |path, _| seen.push(path.to_path_buf())).unwrap();
    store.flush().unwrap();

    assert_eq!(report.files, 25);
    assert_eq!(report.skipped_empty, 1);
    assert_eq!(seen.len(), 25);
    assert!(report.passages >= 48);

    let store = JsonPassageStore::open(&store_path).unwrap();
    let passages = store.passages().unwrap();
    assert_eq!(passages.len(), report.passages);

    let inputs: Vec<(PassageId, &str)> =
        passages.iter().map(|p| (p.id, p.text.as_str())).collect();
    let params = IndexParams {
        nlist: Some(4),
        m: 8,
        nbits: 4,
        max_iterations: 20,
    };
    let mut engine =
        VectorSearchEngine::build(&inputs, &HashEmbedder::new(DIM), params, 8, |_| {}).unwrap();
    let index_dir = project.path().join("index");
    engine.save(&index_dir).unwrap();

    let engine = VectorSearchEngine::open(&index_dir).unwrap();
    (Arc::new(store), Arc::new(engine))
}

#[test]
fn test_query_returns_relevant_passages() {
    let project = TestProject::new();
    let (store, engine) = build_workspace(&project);
    let nlist = engine.nlist();
    let retriever = Retriever::new(
        engine,
        Arc::new(HashEmbedder::new(DIM)),
        store,
        &RetrievalConfig::default(),
    )
    .unwrap()
    .with_nprobe(nlist);

    let report = retriever
        .retrieve("When do the library doors open on weekends?", 5)
        .unwrap();

    assert_eq!(report.dropped, 0);
    assert_eq!(report.passages.len(), 5);
    assert_eq!(report.passages[0].passage.doc_id, "library.txt");
    for pair in report.passages.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    for retrieved in &report.passages {
        let expected = (1.0 - retrieved.distance).clamp(0.0, 1.0);
        assert!((retrieved.confidence.get() - expected).abs() < 1e-6);
    }

    let prompt = PromptAssembler::default().assemble("library hours", &report.passages);
    assert!(prompt.contains("[library.txt | 0]"));
}

#[test]
fn test_pipeline_answers_through_generator() {
    let project = TestProject::new();
    let (store, engine) = build_workspace(&project);
    let retriever = Retriever::new(
        engine,
        Arc::new(HashEmbedder::new(DIM)),
        store,
        &RetrievalConfig::default(),
    )
    .unwrap()
    .with_nprobe(4);
    let generator = Arc::new(EchoGenerator::default());
    let pipeline = Pipeline::new(
        retriever,
        PromptAssembler::default(),
        generator.clone(),
        GenerationOptions::default(),
        3,
    );

    let answer = pipeline.answer("When are exam timetables published?").unwrap();

    assert_eq!(answer.sources.len(), 3);
    assert!(answer.prompt.starts_with(&format!("SYSTEM: {DEFAULT_PREAMBLE}\n")));
    assert!(answer.prompt.contains("USER QUERY: When are exam timetables published?"));
    assert_eq!(generator.prompts.lock().as_slice(), [answer.prompt.clone()]);
}

#[test]
fn test_missing_rows_leave_a_citation_free_prompt() {
    let project = TestProject::new();
    let (store, engine) = build_workspace(&project);
    store.clear();

    let retriever = Retriever::new(
        engine,
        Arc::new(HashEmbedder::new(DIM)),
        store,
        &RetrievalConfig::default(),
    )
    .unwrap()
    .with_nprobe(4);
    let generator = Arc::new(EchoGenerator::default());
    let pipeline = Pipeline::new(
        retriever,
        PromptAssembler::default(),
        generator,
        GenerationOptions::default(),
        4,
    );

    let answer = pipeline.answer("dormitory deadline").unwrap();

    assert!(answer.sources.is_empty());
    assert_eq!(answer.dropped, 4);
    assert_eq!(
        answer.prompt,
        format!("SYSTEM: {DEFAULT_PREAMBLE}\nUSER QUERY: dormitory deadline\nCONTEXT:\n")
    );
}

#[test]
fn test_embedder_with_other_dimension_is_rejected() {
    let project = TestProject::new();
    let (store, engine) = build_workspace(&project);

    let result = Retriever::new(
        engine,
        Arc::new(HashEmbedder::new(DIM * 2)),
        store,
        &RetrievalConfig::default(),
    );

    assert!(matches!(
        result,
        Err(QuarryError::Vector(VectorError::DimensionMismatch { .. }))
    ));
}
