use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use secdoc_core::{Language, PageDocument, RetrievalConfig, SecdocConfig, SecdocError};
use secdoc_retrieval::ensemble::EnsembleMerger;
use secdoc_retrieval::hit::{SearchHit, SearchSource};
use secdoc_retrieval::{BuildOutcome, Embedder, Engine, EngineState, RelevanceScorer};
use tokio::sync::Notify;

const DIMENSIONS: usize = 32;

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Hashed bag of words with a constant bias component.
struct BagOfWordsEmbedder;

impl Embedder for BagOfWordsEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SecdocError> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMENSIONS + 1];
                for word in words(text) {
                    let slot = word.chars().map(|c| c as usize).sum::<usize>() % DIMENSIONS;
                    v[slot] += 1.0;
                }
                v[DIMENSIONS] = 0.05;
                v
            })
            .collect())
    }
}

/// Number of query words that occur somewhere in the document.
struct OverlapScorer;

impl RelevanceScorer for OverlapScorer {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>, SecdocError> {
        let query = words(query);
        Ok(documents
            .iter()
            .map(|doc| {
                let doc = doc.to_lowercase();
                query.iter().filter(|w| doc.contains(w.as_str())).count() as f64
            })
            .collect())
    }
}

/// Blocks the first embedding call until released.
struct GatedEmbedder {
    entered: Arc<Notify>,
    gate: Arc<Notify>,
    released: AtomicBool,
}

impl Embedder for GatedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SecdocError> {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.notified().await;
        }
        BagOfWordsEmbedder.embed(texts).await
    }
}

fn config(root: &Path) -> SecdocConfig {
    let mut config = SecdocConfig::default();
    config.index.root = root.join("database");
    config
}

fn engine(root: &Path) -> Engine<BagOfWordsEmbedder, OverlapScorer> {
    Engine::new(&config(root), BagOfWordsEmbedder, OverlapScorer).unwrap()
}

fn page(content: &str, source: &str, logical_page: &str) -> PageDocument {
    PageDocument::new(content, source, logical_page, Language::English)
}

fn corpus() -> Vec<PageDocument> {
    vec![
        page("Firewall configuration required for DMZ", "nist-800-41.pdf", "3"),
        page("Password complexity must be eight characters", "nist-800-63b.pdf", "12"),
        page(
            "Backups must be encrypted and restore procedures tested every quarter",
            "iso-27001.pdf",
            "A.12",
        ),
        page(
            "Remote access requires multi factor authentication (MFA)",
            "cis-controls.pdf",
            "6b",
        ),
        PageDocument::new(
            "หน่วยงานต้องติดตั้งไฟร์วอลล์ระหว่างเครือข่ายภายในและภายนอก",
            "thai-ncsa.pdf",
            "10",
            Language::Thai,
        ),
        page(
            "Audit logs must be retained for at least one year and reviewed weekly",
            "pci-dss.pdf",
            "10.7",
        ),
    ]
}

fn ids_and_scores(results: &[secdoc_core::RankedChunk]) -> Vec<(String, f64)> {
    results
        .iter()
        .map(|r| (r.chunk.id.clone(), r.score))
        .collect()
}

#[tokio::test]
async fn firewall_query_ranks_firewall_chunk_first() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    engine
        .build(&[
            page("firewall configuration required for DMZ", "a.pdf", "1"),
            page("password complexity must be eight characters", "b.pdf", "1"),
        ])
        .await
        .unwrap();

    let results = engine.search("firewall DMZ rules").await.unwrap();
    assert_eq!(results[0].source, "a.pdf");
    if let Some(b) = results.iter().position(|c| c.source == "b.pdf") {
        assert!(b > 0);
    }
}

#[tokio::test]
async fn loaded_engine_matches_built_engine() {
    let dir = tempfile::tempdir().unwrap();
    let built = engine(dir.path());
    built.build(&corpus()).await.unwrap();

    let loaded = engine(dir.path());
    assert!(loaded.load());
    assert_eq!(loaded.stats(), built.stats());

    for query in [
        "firewall DMZ",
        "password length",
        "MFA for remote access",
        "ไฟร์วอลล์",
        "how long to keep audit logs",
        "nothing relevant at all",
    ] {
        let expected = built.search_with_scores(query).await.unwrap();
        let actual = loaded.search_with_scores(query).await.unwrap();
        assert_eq!(ids_and_scores(&actual), ids_and_scores(&expected), "query: {query}");
    }
}

#[tokio::test]
async fn results_never_exceed_top_n_and_come_from_the_last_build() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.retrieval.rerank_top_n = 2;
    let engine = Engine::new(&config, BagOfWordsEmbedder, OverlapScorer).unwrap();

    engine.build(&corpus()).await.unwrap();
    let results = engine.search("must be").await.unwrap();
    assert_eq!(results.len(), 2);

    let replacement = vec![page("Incident response within 72 hours", "gdpr.pdf", "33")];
    engine.build(&replacement).await.unwrap();
    let results = engine.search("must be firewall incident").await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|c| c.source == "gdpr.pdf"));
}

#[tokio::test]
async fn thai_query_finds_thai_page() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    engine.build(&corpus()).await.unwrap();

    let results = engine.search("ติดตั้งไฟร์วอลล์").await.unwrap();
    assert!(results.iter().any(|c| c.source == "thai-ncsa.pdf"));
    assert_eq!(results[0].language, Language::Thai);
}

#[tokio::test]
async fn search_before_build_is_not_ready() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    assert!(!engine.is_ready());
    assert!(matches!(
        engine.search("firewall").await,
        Err(SecdocError::NotReady)
    ));
}

#[tokio::test]
async fn empty_build_keeps_ready_engine_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine(dir.path());
    engine.build(&corpus()).await.unwrap();
    let before = engine.search("firewall DMZ").await.unwrap();
    let stats = engine.stats();

    assert_eq!(engine.build(&[]).await.unwrap(), BuildOutcome::SkippedEmpty);
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.stats(), stats);
    assert_eq!(engine.search("firewall DMZ").await.unwrap(), before);
}

#[tokio::test]
async fn missing_semantic_artifact_fails_load() {
    let dir = tempfile::tempdir().unwrap();
    let builder = engine(dir.path());
    let BuildOutcome::Built(stats) = builder.build(&corpus()).await.unwrap() else {
        panic!("expected a build");
    };
    let generation_dir = dir.path().join("database").join(&stats.generation);
    assert!(generation_dir.join("lexical.json").exists());
    std::fs::remove_file(generation_dir.join("semantic.db")).unwrap();

    let fresh = engine(dir.path());
    assert!(!fresh.load());
    assert_eq!(fresh.state(), EngineState::Empty);
    assert!(matches!(
        fresh.try_load(),
        Err(SecdocError::PartialArtifact { .. })
    ));
    assert!(matches!(
        fresh.search("firewall").await,
        Err(SecdocError::NotReady)
    ));
}

#[tokio::test]
async fn corrupt_artifact_fails_load_without_panicking() {
    let dir = tempfile::tempdir().unwrap();
    let builder = engine(dir.path());
    let BuildOutcome::Built(stats) = builder.build(&corpus()).await.unwrap() else {
        panic!("expected a build");
    };
    let lexical = dir
        .path()
        .join("database")
        .join(&stats.generation)
        .join("lexical.json");
    std::fs::write(&lexical, b"\x00\x01 truncated").unwrap();

    let fresh = engine(dir.path());
    assert!(!fresh.load());
    assert!(matches!(
        fresh.try_load(),
        Err(SecdocError::Deserialization { .. })
    ));
}

#[tokio::test]
async fn concurrent_build_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let embedder = GatedEmbedder {
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
        released: AtomicBool::new(false),
    };
    let engine = Arc::new(Engine::new(&config(dir.path()), embedder, OverlapScorer).unwrap());

    let background = Arc::clone(&engine);
    let first = tokio::spawn(async move { background.build(&corpus()).await });
    entered.notified().await;

    assert_eq!(engine.state(), EngineState::Building);
    assert!(!engine.is_ready());
    assert!(matches!(
        engine.build(&corpus()).await,
        Err(SecdocError::BuildInProgress)
    ));
    assert!(matches!(engine.try_load(), Err(SecdocError::BuildInProgress)));

    gate.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, BuildOutcome::Built(_)));
    assert_eq!(engine.state(), EngineState::Ready);
}

#[tokio::test]
async fn searches_during_rebuild_use_the_previous_pair() {
    let dir = tempfile::tempdir().unwrap();
    let query = "firewall DMZ";

    let first = engine(dir.path());
    first.build(&corpus()).await.unwrap();
    let before = ids_and_scores(&first.search_with_scores(query).await.unwrap());
    assert!(!before.is_empty());

    let entered = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let embedder = GatedEmbedder {
        entered: Arc::clone(&entered),
        gate: Arc::clone(&gate),
        released: AtomicBool::new(false),
    };
    let engine = Arc::new(Engine::new(&config(dir.path()), embedder, OverlapScorer).unwrap());
    assert!(engine.load());

    let replacement = vec![
        page("Firewall rule review every quarter", "cis-firewall.pdf", "2"),
        page("DMZ hosts must not reach the internal network", "nist-dmz.pdf", "8"),
    ];
    let background = Arc::clone(&engine);
    let pages = replacement.clone();
    let rebuild = tokio::spawn(async move { background.build(&pages).await });
    entered.notified().await;

    assert_eq!(engine.state(), EngineState::Building);
    assert!(engine.is_ready());
    let during = ids_and_scores(&engine.search_with_scores(query).await.unwrap());
    assert_eq!(during, before);

    gate.notify_one();
    assert!(matches!(
        rebuild.await.unwrap().unwrap(),
        BuildOutcome::Built(_)
    ));
    assert_eq!(engine.state(), EngineState::Ready);

    let after = engine.search_with_scores(query).await.unwrap();
    assert!(!after.is_empty());
    let sources: Vec<&str> = replacement.iter().map(|p| p.source.as_str()).collect();
    for result in &after {
        assert!(sources.contains(&result.chunk.source.as_str()), "{}", result.chunk.source);
    }
}

#[tokio::test]
async fn init_or_build_prefers_the_persisted_index() {
    let dir = tempfile::tempdir().unwrap();
    let pages_path = dir.path().join("pages.json");
    std::fs::write(
        &pages_path,
        r#"[{"content": "Firewall configuration required for DMZ",
             "metadata": {"source": "nist.pdf", "logical_page": 3, "language": "en"}}]"#,
    )
    .unwrap();

    let first = engine(dir.path());
    assert!(first.init_or_build(&pages_path).await.unwrap());
    let generation = first.stats().unwrap().generation;

    std::fs::remove_file(&pages_path).unwrap();
    let second = engine(dir.path());
    assert!(second.init_or_build(&pages_path).await.unwrap());
    assert_eq!(second.stats().unwrap().generation, generation);
}

#[test]
fn merge_rewards_agreement_between_indexes() {
    let chunk = |id: &str| secdoc_core::Chunk {
        id: id.into(),
        content: String::new(),
        source: "x.pdf".into(),
        logical_page: "1".into(),
        language: Language::English,
    };
    let hit = |id: &str, score: f64, source| SearchHit {
        chunk: chunk(id),
        score,
        source,
    };

    for (lexical_weight, semantic_weight) in [(0.4, 0.6), (0.5, 0.5), (0.9, 0.1), (0.1, 0.9)] {
        for fusion in [
            secdoc_core::FusionMethod::ReciprocalRank,
            secdoc_core::FusionMethod::MinMax,
        ] {
            let merger = EnsembleMerger::new(&RetrievalConfig {
                lexical_weight,
                semantic_weight,
                fusion,
                ..RetrievalConfig::default()
            });
            // "solo" and "both" hold the same lexical rank and score; only
            // "both" is also found semantically.
            let merged = merger.merge(
                vec![
                    hit("solo", 2.0, SearchSource::Lexical),
                    hit("both", 2.0, SearchSource::Lexical),
                    hit("floor", 0.5, SearchSource::Lexical),
                ],
                vec![
                    hit("both", 0.9, SearchSource::Semantic),
                    hit("other", 0.1, SearchSource::Semantic),
                ],
            );
            let rank = |id: &str| merged.iter().position(|c| c.chunk.id == id).unwrap();
            assert!(
                rank("both") < rank("solo"),
                "weights {lexical_weight}/{semantic_weight}, {fusion:?}"
            );
        }
    }
}
