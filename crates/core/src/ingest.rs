use crate::chunking::{build_chunks, ChunkingConfig};
use crate::extractor::{join_pages, LopdfExtractor, PdfExtractor};
use crate::orchestrator::RagContext;
use crate::traits::{Embedder, LanguageModel, VectorIndex};
use crate::{
    Chunk, ChunkMetadata, IndexEntry, IngestError, IngestionOptions, IngestionSummary, SkippedPdf,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if is_pdf_name(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn is_pdf_name(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

pub fn upload_source_id(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("upload:sha256:{:x}", hasher.finalize())
}

/// Chunks that survived extraction plus the documents that did not.
struct Collected {
    chunks: Vec<Chunk>,
    documents_processed: usize,
    skipped_files: Vec<SkippedPdf>,
}

fn collect_chunks<X: PdfExtractor>(
    paths: &[PathBuf],
    extractor: &X,
    config: ChunkingConfig,
) -> Collected {
    let mut collected = Collected {
        chunks: Vec::new(),
        documents_processed: 0,
        skipped_files: Vec::new(),
    };

    for path in paths {
        let outcome = if is_pdf_name(path) {
            extractor.extract_text(path)
        } else {
            Err(IngestError::UnsupportedFormat(format!(
                "{} is not a .pdf file",
                path.display()
            )))
        };

        let metadata = ChunkMetadata {
            source: path.to_string_lossy().to_string(),
            original_filename: None,
        };

        match outcome.map(|text| build_chunks(&text, &metadata, config)) {
            Ok(chunks) if !chunks.is_empty() => {
                info!(path = %path.display(), chunks = chunks.len(), "loaded and chunked pdf");
                collected.documents_processed += 1;
                collected.chunks.extend(chunks);
            }
            Ok(_) => {
                warn!(path = %path.display(), "no extractable text");
                collected.skipped_files.push(SkippedPdf {
                    path: path.clone(),
                    reason: "no extractable text".to_string(),
                });
            }
            Err(error) => {
                warn!(path = %path.display(), error = %error, "skipped pdf");
                collected.skipped_files.push(SkippedPdf {
                    path: path.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    collected
}

/// Embeds every chunk, then writes the whole batch with a single index call.
/// One embedding failure fails the batch and nothing is written.
pub async fn index_chunks<E, V>(embedder: &E, index: &V, chunks: Vec<Chunk>) -> Result<usize, IngestError>
where
    E: Embedder + ?Sized,
    V: VectorIndex + ?Sized,
{
    if chunks.is_empty() {
        return Ok(0);
    }

    let mut entries = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let vector = embedder.embed(&chunk.text).await?;
        entries.push(IndexEntry { vector, chunk });
    }

    index.add(&entries).await?;
    Ok(entries.len())
}

/// Extracts, chunks and indexes a batch of PDFs. Unreadable or empty
/// documents are skipped and reported; they never abort the batch.
pub async fn ingest_pdfs<E, M, V>(
    rag: &RagContext<E, M, V>,
    paths: &[PathBuf],
    options: IngestionOptions,
) -> Result<IngestionSummary, IngestError>
where
    E: Embedder,
    M: LanguageModel,
    V: VectorIndex,
{
    ingest_pdfs_with(rag, paths, options, &LopdfExtractor).await
}

/// Extraction is CPU-bound and runs on the blocking pool, off the async
/// worker threads.
pub async fn ingest_pdfs_with<E, M, V, X>(
    rag: &RagContext<E, M, V>,
    paths: &[PathBuf],
    options: IngestionOptions,
    extractor: &X,
) -> Result<IngestionSummary, IngestError>
where
    E: Embedder,
    M: LanguageModel,
    V: VectorIndex,
    X: PdfExtractor + Clone + Send + 'static,
{
    let config = ChunkingConfig::try_from(options)?;
    if paths.is_empty() {
        return Err(IngestError::InvalidArgument(
            "no pdf paths given".to_string(),
        ));
    }

    let owned_paths = paths.to_vec();
    let worker = extractor.clone();
    let collected =
        tokio::task::spawn_blocking(move || collect_chunks(&owned_paths, &worker, config))
            .await
            .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))?;
    let chunks_added = index_chunks(rag.embedder(), rag.index(), collected.chunks).await?;

    if chunks_added == 0 {
        warn!(documents = paths.len(), "no chunks were added");
    } else {
        info!(
            chunks = chunks_added,
            documents = collected.documents_processed,
            "added chunks to the vector store"
        );
    }

    Ok(IngestionSummary {
        documents_processed: collected.documents_processed,
        chunks_added,
        skipped_files: collected.skipped_files,
        completed_at: Utc::now(),
    })
}

pub async fn ingest_folder<E, M, V>(
    rag: &RagContext<E, M, V>,
    folder: &Path,
    options: IngestionOptions,
) -> Result<IngestionSummary, IngestError>
where
    E: Embedder,
    M: LanguageModel,
    V: VectorIndex,
{
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    ingest_pdfs(rag, &files, options).await
}

/// Ingests one uploaded PDF held in memory. Chunks keep `display_name` as
/// their original file name; the source is a digest of the bytes.
pub async fn ingest_upload<E, M, V>(
    rag: &RagContext<E, M, V>,
    bytes: &[u8],
    display_name: &str,
    options: IngestionOptions,
) -> Result<IngestionSummary, IngestError>
where
    E: Embedder,
    M: LanguageModel,
    V: VectorIndex,
{
    if !is_pdf_name(Path::new(display_name)) {
        return Err(IngestError::UnsupportedFormat(format!(
            "only PDF files are supported, got {display_name}"
        )));
    }
    let config = ChunkingConfig::try_from(options)?;

    let metadata = ChunkMetadata {
        source: upload_source_id(bytes),
        original_filename: Some(display_name.to_string()),
    };

    let owned = bytes.to_vec();
    let extracted = tokio::task::spawn_blocking(move || {
        LopdfExtractor
            .extract_pages_from_bytes(&owned)
            .map(|pages| build_chunks(&join_pages(&pages), &metadata, config))
    })
    .await
    .map_err(|error| IngestError::Extraction(format!("extraction task failed: {error}")))?;

    let (chunks, skipped_files) = match extracted {
        Ok(chunks) if !chunks.is_empty() => (chunks, Vec::new()),
        Ok(_) => (
            Vec::new(),
            vec![SkippedPdf {
                path: PathBuf::from(display_name),
                reason: "no extractable text".to_string(),
            }],
        ),
        Err(error) => (
            Vec::new(),
            vec![SkippedPdf {
                path: PathBuf::from(display_name),
                reason: error.to_string(),
            }],
        ),
    };

    for skipped in &skipped_files {
        warn!(file = display_name, reason = %skipped.reason, "skipped upload");
    }

    let chunks_added = index_chunks(rag.embedder(), rag.index(), chunks).await?;
    if chunks_added > 0 {
        info!(file = display_name, chunks = chunks_added, "processed upload");
    }

    Ok(IngestionSummary {
        documents_processed: usize::from(chunks_added > 0),
        chunks_added,
        skipped_files,
        completed_at: Utc::now(),
    })
}
