use crate::chunking::normalize_whitespace;
use crate::embeddings::OllamaEmbedder;
use crate::generation::{AnswerGenerator, OllamaModel, PromptFormat};
use crate::retriever::{validate_request, Retriever};
use crate::stores::LocalVectorStore;
use crate::traits::{Embedder, LanguageModel, VectorIndex};
use crate::{
    Answer, ConfigError, IndexedFile, QueryError, RagSettings, RetrievedChunk, SearchError,
    SearchHit, StoreStats, StoreStatus,
};
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{info, warn};

/// Marker the fail-soft adapter of [`RagContext::query`] puts in front of the cause.
pub const QUERY_ERROR_PREFIX: &str = "Error processing query: ";
/// Marker used by [`RagContext::simple_query`].
pub const SIMPLE_QUERY_ERROR_PREFIX: &str = "Error: ";

/// Phrases that suggest the model declined to answer from the context.
pub const LOW_CONFIDENCE_PHRASES: [&str; 3] = ["cannot answer", "don't know", "don\u{2019}t know"];

const SNIPPET_CHARS: usize = 200;
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Best-effort phrase match. It does not measure confidence; it only spots
/// the usual refusal wording.
pub fn is_low_confidence(answer: &str) -> bool {
    let lowered = answer.to_lowercase();
    LOW_CONFIDENCE_PHRASES
        .iter()
        .any(|phrase| lowered.contains(*phrase))
}

pub fn build_context(hits: &[RetrievedChunk]) -> String {
    hits.iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Everything a query or ingestion needs, built once at startup and shared
/// by reference.
pub struct RagContext<E, M, V> {
    embedder: E,
    generator: AnswerGenerator<M>,
    index: V,
    top_k: usize,
    search_k: usize,
}

impl<E, M, V> RagContext<E, M, V>
where
    E: Embedder,
    M: LanguageModel,
    V: VectorIndex,
{
    pub fn new(embedder: E, model: M, index: V, prompt_format: PromptFormat) -> Self {
        let defaults = RagSettings::default();
        Self {
            embedder,
            generator: AnswerGenerator::new(model, prompt_format),
            index,
            top_k: defaults.top_k,
            search_k: defaults.search_k,
        }
    }

    pub fn with_limits(mut self, top_k: usize, search_k: usize) -> Self {
        self.top_k = top_k;
        self.search_k = search_k;
        self
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    pub fn index(&self) -> &V {
        &self.index
    }

    pub fn generator(&self) -> &AnswerGenerator<M> {
        &self.generator
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    fn retriever(&self) -> Retriever<'_, E, V> {
        Retriever::new(&self.embedder, &self.index)
    }

    /// Retrieve, then generate with the structured prompt.
    pub async fn try_query(&self, question: &str, k: usize) -> Result<Answer, QueryError> {
        validate_question(question, k)?;

        let hits = self.retriever().search(question, k).await?;
        let context = build_context(&hits);
        let answer = self.generator.generate(question, &context).await?;

        Ok(Answer {
            question: question.to_string(),
            answer,
            sources: hits.into_iter().map(|hit| hit.chunk.text).collect(),
            context_used: None,
        })
    }

    /// Fail-soft wrapper around [`Self::try_query`]: never errors, failures
    /// come back as an answer starting with [`QUERY_ERROR_PREFIX`].
    pub async fn query(&self, question: &str) -> Answer {
        self.query_with(question, self.top_k).await
    }

    pub async fn query_with(&self, question: &str, k: usize) -> Answer {
        match self.try_query(question, k).await {
            Ok(answer) => answer,
            Err(error) => {
                warn!(error = %error, "query failed");
                degraded_answer(question, QUERY_ERROR_PREFIX, &error)
            }
        }
    }

    /// Manual retrieve-then-generate with a bare prompt; also reports the
    /// context it sent.
    pub async fn try_simple_query(&self, question: &str, k: usize) -> Result<Answer, QueryError> {
        validate_question(question, k)?;

        let hits = self.retriever().search(question, k).await?;
        let context = build_context(&hits);
        let answer = self.generator.generate_simple(question, &context).await?;

        Ok(Answer {
            question: question.to_string(),
            answer,
            sources: hits.into_iter().map(|hit| hit.chunk.text).collect(),
            context_used: Some(context),
        })
    }

    pub async fn simple_query(&self, question: &str) -> Answer {
        self.simple_query_with(question, self.top_k).await
    }

    pub async fn simple_query_with(&self, question: &str, k: usize) -> Answer {
        match self.try_simple_query(question, k).await {
            Ok(answer) => answer,
            Err(error) => {
                warn!(error = %error, "simple query failed");
                degraded_answer(question, SIMPLE_QUERY_ERROR_PREFIX, &error)
            }
        }
    }

    /// Caller-side composition: structured query first, then the simple path
    /// when the answer reads like a refusal.
    pub async fn ask(&self, question: &str) -> Answer {
        self.ask_with(question, self.top_k).await
    }

    pub async fn ask_with(&self, question: &str, k: usize) -> Answer {
        let answer = self.query_with(question, k).await;
        if !is_low_confidence(&answer.answer) {
            return answer;
        }

        info!("structured answer looked unsure, retrying with the simple prompt");
        self.simple_query_with(question, k).await
    }

    /// Similarity search with display-ready relevance.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, SearchError> {
        let metric = self.index.metric();
        let hits = self.retriever().search(query, k).await?;

        let mut results = hits
            .into_iter()
            .enumerate()
            .map(|(position, hit)| SearchHit {
                rank: position + 1,
                snippet: snippet(&hit.chunk.text),
                source: hit.chunk.metadata.source,
                original_filename: hit.chunk.metadata.original_filename,
                relevance: metric.relevance(hit.score),
            })
            .collect::<Vec<_>>();

        results.sort_by(|left, right| {
            right
                .relevance
                .total_cmp(&left.relevance)
                .then(left.rank.cmp(&right.rank))
        });
        Ok(results)
    }

    pub async fn search_default(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.search(query, self.search_k).await
    }

    pub async fn stats(&self) -> StoreStats {
        let model_name = self.generator.model().model_name().to_string();
        let embedding_model = self.embedder.model_name().to_string();

        match self.index.count().await {
            Ok(count) => StoreStats {
                entry_count: Some(count),
                model_name,
                embedding_model,
                status: StoreStatus::Ready,
            },
            Err(error) => StoreStats {
                entry_count: None,
                model_name,
                embedding_model,
                status: StoreStatus::Error(error.to_string()),
            },
        }
    }

    /// One entry per originating document, keyed by its display name.
    pub async fn list_files(&self) -> Result<Vec<IndexedFile>, SearchError> {
        let mut unique = BTreeMap::new();
        for metadata in self.index.list_metadata().await? {
            let name = metadata.display_name();
            if !name.is_empty() {
                unique.insert(name, metadata.source);
            }
        }

        Ok(unique
            .into_iter()
            .map(|(name, path)| IndexedFile { name, path })
            .collect())
    }
}

fn validate_question(question: &str, k: usize) -> Result<(), QueryError> {
    validate_request(question, k).map_err(|error| match error {
        SearchError::InvalidArgument(details) => QueryError::InvalidArgument(details),
        other => QueryError::Search(other),
    })
}

fn degraded_answer(question: &str, prefix: &str, error: &QueryError) -> Answer {
    Answer {
        question: question.to_string(),
        answer: format!("{prefix}{error}"),
        sources: Vec::new(),
        context_used: None,
    }
}

fn snippet(text: &str) -> String {
    let normalized = normalize_whitespace(text);
    if normalized.chars().count() <= SNIPPET_CHARS {
        return normalized;
    }
    let mut cut: String = normalized.chars().take(SNIPPET_CHARS).collect();
    cut.push_str("...");
    cut
}

pub type OllamaContext = RagContext<OllamaEmbedder, OllamaModel, LocalVectorStore>;

/// Probes the embedder for its dimensionality and returns it.
pub async fn probe_embedder<E: Embedder + ?Sized>(embedder: &E) -> Result<usize, ConfigError> {
    let vector = embedder.embed("test").await?;
    info!(model = embedder.model_name(), dimensions = vector.len(), "embeddings working");
    Ok(vector.len())
}

/// Confirms the language model answers at all.
pub async fn probe_model<M: LanguageModel + ?Sized>(model: &M) -> Result<(), ConfigError> {
    let reply = model.complete("Hello, respond with just 'OK'").await?;
    let preview: String = reply.trim().chars().take(20).collect();
    info!(model = model.model_name(), reply = %preview, "language model working");
    Ok(())
}

/// Probes both models, opens the index with the probed dimensionality and
/// returns a ready context. Any failure aborts startup.
pub async fn initialize<E, M, V, F, Fut>(
    embedder: E,
    model: M,
    open_index: F,
    settings: &RagSettings,
) -> Result<RagContext<E, M, V>, ConfigError>
where
    E: Embedder,
    M: LanguageModel,
    V: VectorIndex,
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = Result<V, ConfigError>>,
{
    let dimensions = probe_embedder(&embedder).await?;
    let index = open_index(dimensions).await?;
    if index.dimensions() != dimensions {
        return Err(ConfigError::DimensionMismatch {
            location: settings.collection.clone(),
            expected: index.dimensions(),
            actual: dimensions,
        });
    }

    probe_model(&model).await?;

    let existing = index.count().await?;
    if existing == 0 {
        info!(collection = %settings.collection, "vector store is empty, ingest PDFs to get started");
    } else {
        info!(collection = %settings.collection, entries = existing, "found existing entries");
    }

    Ok(RagContext::new(embedder, model, index, settings.prompt_format)
        .with_limits(settings.top_k, settings.search_k))
}

/// Ollama for both models, the on-disk store under `persist_dir/collection`.
pub async fn connect(settings: &RagSettings) -> Result<OllamaContext, ConfigError> {
    let embedder = OllamaEmbedder::new(&settings.ollama_url, settings.embedding_model.clone())?;
    let model = OllamaModel::new(&settings.ollama_url, settings.model_name.clone())?;
    let location = settings.persist_dir.join(&settings.collection);

    initialize(
        embedder,
        model,
        |dimensions| LocalVectorStore::open(location, dimensions, settings.metric),
        settings,
    )
    .await
}


#[cfg(test)]
mod tests {
    use super::fakes::{FailingEmbedder, ScriptedModel};
    use super::*;
    use crate::embeddings::HashingEmbedder;
    use crate::store::DistanceMetric;
    use crate::{Chunk, ChunkMetadata, IndexEntry};
    use std::path::Path;
    use tempfile::tempdir;

    const CHUNKS: [(&str, &str); 3] = [
        ("Photosynthesis takes place in the chloroplasts of plant cells.", "/pdf/plants.pdf"),
        ("Chlorophyll in plant cells absorbs red and blue light.", "/pdf/plants.pdf"),
        ("The treaty ended a long war between the two kingdoms.", "/pdf/history.pdf"),
    ];

    async fn populated_store(
        dir: &Path,
        embedder: &HashingEmbedder,
        metric: DistanceMetric,
    ) -> Result<LocalVectorStore, Box<dyn std::error::Error>> {
        let store = LocalVectorStore::open(dir, embedder.vector_len(), metric).await?;
        let entries = CHUNKS
            .iter()
            .map(|(text, source)| IndexEntry {
                vector: embedder.embed_sync(text),
                chunk: Chunk {
                    text: text.to_string(),
                    metadata: ChunkMetadata {
                        source: source.to_string(),
                        original_filename: None,
                    },
                },
            })
            .collect::<Vec<_>>();
        store.add(&entries).await?;
        Ok(store)
    }

    async fn context_with(
        dir: &Path,
        replies: &[Result<&str, &str>],
    ) -> Result<RagContext<HashingEmbedder, ScriptedModel, LocalVectorStore>, Box<dyn std::error::Error>>
    {
        let embedder = HashingEmbedder::default();
        let store = populated_store(dir, &embedder, DistanceMetric::Cosine).await?;
        Ok(RagContext::new(
            embedder,
            ScriptedModel::replying(replies),
            store,
            PromptFormat::Plain,
        ))
    }

    #[test]
    fn refusal_phrases_are_detected() {
        assert!(is_low_confidence("I cannot answer that from the context."));
        assert!(is_low_confidence("Sorry, I DON'T KNOW."));
        assert!(is_low_confidence("I don\u{2019}t know."));
        assert!(!is_low_confidence("Chloroplasts host photosynthesis."));
    }

    #[tokio::test]
    async fn query_returns_answer_with_retrieved_sources() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(dir.path(), &[Ok("In the chloroplasts.")]).await?;

        let answer = rag.query("Where does photosynthesis happen in plant cells?").await;

        assert_eq!(answer.answer, "In the chloroplasts.");
        assert_eq!(answer.sources.len(), 3);
        assert_eq!(answer.sources[0], CHUNKS[0].0);
        assert_eq!(answer.context_used, None);

        let prompts = rag.generator().model().prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(&answer.sources.join("\n\n")));
        assert!(prompts[0].contains("Question: Where does photosynthesis happen in plant cells?"));
        Ok(())
    }

    #[tokio::test]
    async fn generation_failure_is_reported_in_band() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(dir.path(), &[Err("model unavailable")]).await?;

        let answer = rag.query("What is chlorophyll?").await;

        assert!(answer.answer.starts_with(QUERY_ERROR_PREFIX));
        assert!(answer.answer.contains("model unavailable"));
        assert!(answer.sources.is_empty());
        assert_eq!(answer.question, "What is chlorophyll?");
        Ok(())
    }

    #[tokio::test]
    async fn tagged_result_exposes_the_failure_kind() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(dir.path(), &[Err("model unavailable")]).await?;

        assert!(matches!(
            rag.try_query("What is chlorophyll?", 3).await,
            Err(QueryError::Generation(_))
        ));
        assert!(matches!(
            rag.try_query("  ", 3).await,
            Err(QueryError::InvalidArgument(_))
        ));
        assert!(matches!(
            rag.try_query("What is chlorophyll?", 0).await,
            Err(QueryError::InvalidArgument(_))
        ));
        assert_eq!(rag.generator().model().prompts().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn embedding_failure_is_reported_in_band() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalVectorStore::open(dir.path(), 8, DistanceMetric::Cosine).await?;
        let rag = RagContext::new(
            FailingEmbedder,
            ScriptedModel::replying(&[Ok("unused")]),
            store,
            PromptFormat::Llama3Chat,
        );

        let answer = rag.query("What is osmosis?").await;
        assert!(answer.answer.starts_with(QUERY_ERROR_PREFIX));
        assert!(answer.answer.contains("connection refused"));
        assert!(answer.sources.is_empty());

        let simple = rag.simple_query("What is osmosis?").await;
        assert!(simple.answer.starts_with(SIMPLE_QUERY_ERROR_PREFIX));
        assert!(rag.generator().model().prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unsure_answers_fall_back_to_simple_prompt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(
            dir.path(),
            &[Ok("I don't know based on this context."), Ok("Chlorophyll absorbs light.")],
        )
        .await?;

        let answer = rag.ask("What does chlorophyll absorb?").await;

        assert_eq!(answer.answer, "Chlorophyll absorbs light.");
        let context = answer.context_used.ok_or("simple path reports its context")?;
        assert_eq!(context, answer.sources.join("\n\n"));

        let prompts = rag.generator().model().prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("Based on the following context, answer this question:"));
        Ok(())
    }

    #[tokio::test]
    async fn confident_answers_skip_the_fallback() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(dir.path(), &[Ok("Red and blue light."), Ok("unused")]).await?;

        let answer = rag.ask("What does chlorophyll absorb?").await;
        assert_eq!(answer.answer, "Red and blue light.");
        assert_eq!(rag.generator().model().prompts().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn search_reports_snippets_and_relevance() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(dir.path(), &[]).await?;

        let hits = rag.search("chlorophyll plant cells light", 10).await?;

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].snippet, CHUNKS[1].0);
        assert_eq!(hits[0].source, "/pdf/plants.pdf");
        assert!(hits.windows(2).all(|pair| pair[0].relevance >= pair[1].relevance));
        assert!(hits.iter().all(|hit| (0.0..=1.0).contains(&hit.relevance)));
        Ok(())
    }

    #[tokio::test]
    async fn ask_with_uses_the_requested_k_on_both_paths() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(
            dir.path(),
            &[Ok("I cannot answer that."), Ok("Chloroplasts.")],
        )
        .await?;

        let answer = rag.ask_with("Where does photosynthesis happen?", 1).await;

        assert_eq!(answer.answer, "Chloroplasts.");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.context_used.as_deref(), Some(answer.sources[0].as_str()));
        assert_eq!(rag.generator().model().prompts().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn failed_ask_reports_the_simple_path_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(
            dir.path(),
            &[Ok("I don't know."), Err("model unavailable")],
        )
        .await?;

        let answer = rag.ask_with("What is chlorophyll?", 2).await;
        assert!(answer.answer.starts_with(SIMPLE_QUERY_ERROR_PREFIX));
        assert!(answer.sources.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn default_search_uses_the_configured_width() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(dir.path(), &[]).await?.with_limits(3, 2);

        let hits = rag.search_default("plant cells").await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rank, 1);
        Ok(())
    }

    #[test]
    fn long_snippets_are_truncated() {
        let text = "word ".repeat(100);
        let cut = snippet(&text);
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn stats_and_files_describe_the_index() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let rag = context_with(dir.path(), &[]).await?;

        let stats = rag.stats().await;
        assert_eq!(stats.entry_count, Some(3));
        assert_eq!(stats.status, StoreStatus::Ready);
        assert_eq!(stats.model_name, "scripted");
        assert_eq!(stats.embedding_model, "feature-hashing");

        let files = rag.list_files().await?;
        assert_eq!(
            files,
            vec![
                IndexedFile {
                    name: "history.pdf".to_string(),
                    path: "/pdf/history.pdf".to_string(),
                },
                IndexedFile {
                    name: "plants.pdf".to_string(),
                    path: "/pdf/plants.pdf".to_string(),
                },
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn initialize_refuses_an_unreachable_embedder() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().to_path_buf();
        let result = initialize(
            FailingEmbedder,
            ScriptedModel::replying(&[Ok("OK")]),
            |dimensions| LocalVectorStore::open(location, dimensions, DistanceMetric::Cosine),
            &RagSettings::default(),
        )
        .await;

        assert!(matches!(result, Err(ConfigError::Embedder(_))));
        Ok(())
    }

    #[tokio::test]
    async fn initialize_refuses_an_unreachable_model() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().to_path_buf();
        let result = initialize(
            HashingEmbedder::default(),
            ScriptedModel::replying(&[Err("connection refused")]),
            |dimensions| LocalVectorStore::open(location, dimensions, DistanceMetric::Cosine),
            &RagSettings::default(),
        )
        .await;

        assert!(matches!(result, Err(ConfigError::Model(_))));
        Ok(())
    }

    #[tokio::test]
    async fn initialize_builds_a_ready_context() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let location = dir.path().to_path_buf();
        let settings = RagSettings {
            top_k: 2,
            ..RagSettings::default()
        };
        let rag = initialize(
            HashingEmbedder::default(),
            ScriptedModel::replying(&[Ok("OK"), Ok("Answer")]),
            |dimensions| LocalVectorStore::open(location, dimensions, DistanceMetric::Cosine),
            &settings,
        )
        .await?;

        assert_eq!(rag.top_k(), 2);
        let answer = rag.query("anything at all").await;
        assert_eq!(answer.answer, "Answer");
        assert!(answer.sources.is_empty());
        Ok(())
    }
}
