use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::documents;
use crate::error::{PipelineError, Result};
use crate::models::{Passage, RetrievedPassage};
use crate::openai::Embedder;

const INDEX_FILE: &str = "index.db";

/// Top-k passage lookup for a free-text query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Opened,
    Built,
}

/// Embedding index over the course documents, persisted as SQLite inside the
/// configured directory.
pub struct KnowledgeStore {
    pool: SqlitePool,
    embedder: Arc<dyn Embedder>,
    mode: IndexMode,
}

impl KnowledgeStore {
    /// Opens the persisted index when its directory exists and is non-empty,
    /// otherwise builds it from the configured documents. A directory that
    /// holds no complete index is rebuilt.
    pub async fn open_or_build(config: &IndexConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let dir = &config.persist_dir;
        if index_exists(dir) {
            info!(dir = %dir.display(), "loading existing course index");
            match Self::open(dir, embedder.clone()).await {
                Err(PipelineError::IncompleteIndex(_)) => {
                    warn!(dir = %dir.display(), "course index is incomplete, rebuilding");
                }
                result => return result,
            }
        } else {
            info!(dir = %dir.display(), "creating course index from documents");
        }
        Self::build(config, embedder).await
    }

    /// Opens a persisted index, checking that its last build finished.
    pub async fn open(persist_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let path = index_path(persist_dir);
        if !path.is_file() {
            return Err(PipelineError::IncompleteIndex(persist_dir.to_path_buf()));
        }

        let pool = connect(&path, false).await?;
        if let Err(err) = verify_index(&pool, persist_dir).await {
            pool.close().await;
            return Err(err);
        }

        Ok(Self {
            pool,
            embedder,
            mode: IndexMode::Opened,
        })
    }

    /// Reads, splits and embeds every document, writes the index into a
    /// staging directory beside the persist directory, then swaps it into
    /// place. A failed build leaves any previous index untouched.
    pub async fn build(config: &IndexConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let sources = documents::load_documents(&config.documents)?;
        let passages =
            documents::split_documents(&sources, config.chunk_size, config.chunk_overlap);
        if passages.is_empty() {
            return Err(PipelineError::NoDocumentsLoaded);
        }

        let embeddings = embed_passages(embedder.as_ref(), &passages, config.embedding_batch_size)
            .await?;

        let staging = staging_dir(&config.persist_dir);
        let build_id = Uuid::new_v4();
        let written = write_index(
            &staging,
            build_id,
            embedder.model_name(),
            sources.len(),
            &passages,
            &embeddings,
        )
        .await
        .and_then(|()| swap_into_place(&staging, &config.persist_dir));
        if let Err(err) = written {
            if staging.exists() {
                let _ = std::fs::remove_dir_all(&staging);
            }
            return Err(err);
        }

        info!(
            %build_id,
            documents = sources.len(),
            passages = passages.len(),
            "course index persisted"
        );

        let pool = connect(&index_path(&config.persist_dir), false).await?;
        Ok(Self {
            pool,
            embedder,
            mode: IndexMode::Built,
        })
    }

    /// Builds a fresh index and replaces the persisted one with it.
    pub async fn rebuild(config: &IndexConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        Self::build(config, embedder).await
    }

    pub fn mode(&self) -> IndexMode {
        self.mode
    }

    pub async fn passage_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query("SELECT COUNT(*) AS count FROM passages")
            .fetch_one(&self.pool)
            .await?
            .get("count");
        Ok(count)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Retriever for KnowledgeStore {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedPassage>> {
        let mut query_embedding = self.embedder.embed(&[query.to_string()]).await?;
        let query_embedding = query_embedding.pop().ok_or(PipelineError::EmbeddingCountMismatch {
            expected: 1,
            actual: 0,
        })?;

        let rows = sqlx::query(
            "SELECT source_name, page, content, embedding FROM passages ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in rows {
            let embedding: Vec<f32> = serde_json::from_str(row.get::<&str, _>("embedding"))?;
            let page: Option<i64> = row.get("page");
            scored.push(RetrievedPassage {
                source_name: row.get("source_name"),
                page: page.and_then(|p| u32::try_from(p).ok()),
                text: row.get("content"),
                score: cosine_similarity(&query_embedding, &embedding),
            });
        }

        // Stable sort: equal scores keep insertion order.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        for passage in &scored {
            debug!(source = %passage.label(), score = passage.score, "retrieved passage");
        }

        Ok(scored)
    }
}

async fn embed_passages(
    embedder: &dyn Embedder,
    passages: &[Passage],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(passages.len());

    for batch in passages.chunks(batch_size.max(1)) {
        let inputs: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
        let vectors = embedder.embed(&inputs).await?;
        if vectors.len() != inputs.len() {
            return Err(PipelineError::EmbeddingCountMismatch {
                expected: inputs.len(),
                actual: vectors.len(),
            });
        }
        embeddings.extend(vectors);
    }

    Ok(embeddings)
}

async fn write_index(
    dir: &Path,
    build_id: Uuid,
    embedding_model: &str,
    document_count: usize,
    passages: &[Passage],
    embeddings: &[Vec<f32>],
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let pool = connect(&index_path(dir), true).await?;
    let result = insert_build(
        &pool,
        build_id,
        embedding_model,
        document_count,
        passages,
        embeddings,
    )
    .await;
    pool.close().await;
    result
}

async fn insert_build(
    pool: &SqlitePool,
    build_id: Uuid,
    embedding_model: &str,
    document_count: usize,
    passages: &[Passage],
    embeddings: &[Vec<f32>],
) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO index_builds (id, built_at, embedding_model, document_count, passage_count)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(build_id.to_string())
    .bind(Utc::now())
    .bind(embedding_model)
    .bind(document_count as i64)
    .bind(passages.len() as i64)
    .execute(&mut *tx)
    .await?;

    for (passage, embedding) in passages.iter().zip(embeddings) {
        sqlx::query(
            r#"
            INSERT INTO passages (build_id, source_name, page, content, embedding)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(build_id.to_string())
        .bind(&passage.source_name)
        .bind(passage.page.map(i64::from))
        .bind(&passage.content)
        .bind(serde_json::to_string(embedding)?)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Both tables present and the latest build row matching the stored passage
/// count.
async fn verify_index(pool: &SqlitePool, persist_dir: &Path) -> Result<()> {
    let incomplete = || PipelineError::IncompleteIndex(persist_dir.to_path_buf());

    let tables: i64 = sqlx::query(
        r#"
        SELECT COUNT(*) AS count FROM sqlite_master
        WHERE type = 'table' AND name IN ('index_builds', 'passages')
        "#,
    )
    .fetch_one(pool)
    .await
    .map_err(|err| {
        debug!(error = %err, "course index is unreadable");
        incomplete()
    })?
    .get("count");
    if tables != 2 {
        return Err(incomplete());
    }

    let expected: i64 = sqlx::query(
        "SELECT passage_count FROM index_builds ORDER BY built_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?
    .ok_or_else(incomplete)?
    .get("passage_count");
    let actual: i64 = sqlx::query("SELECT COUNT(*) AS count FROM passages")
        .fetch_one(pool)
        .await?
        .get("count");

    if expected == 0 || actual != expected {
        debug!(expected, actual, "course index passage count mismatch");
        return Err(incomplete());
    }
    Ok(())
}

/// `.<name>.building-<uuid>` next to the persist directory, so the final
/// rename stays on one filesystem.
fn staging_dir(persist_dir: &Path) -> PathBuf {
    let name = persist_dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let parent = persist_dir
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{name}.building-{}", Uuid::new_v4()))
}

fn swap_into_place(staging: &Path, persist_dir: &Path) -> Result<()> {
    if persist_dir.exists() {
        std::fs::remove_dir_all(persist_dir)?;
    }
    std::fs::rename(staging, persist_dir)?;
    Ok(())
}

async fn connect(path: &Path, create: bool) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create);

    Ok(SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?)
}

fn index_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(INDEX_FILE)
}

pub fn index_exists(persist_dir: &Path) -> bool {
    std::fs::read_dir(persist_dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a > 0.0 && mag_b > 0.0 {
        dot / (mag_a * mag_b)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashEmbedder;

    fn course_config(root: &Path) -> IndexConfig {
        let syllabus = root.join("Syllabus.txt");
        let prompt = root.join("Assignment_prompt.txt");
        std::fs::write(
            &syllabus,
            "Week one covers joins and keys\u{000C}Week two covers window functions",
        )
        .unwrap();
        std::fs::write(&prompt, "The ad-hoc analysis assignment asks for grouped revenue").unwrap();

        IndexConfig {
            persist_dir: root.join("index"),
            documents: vec![syllabus, root.join("missing.pdf"), prompt],
            chunk_size: 4000,
            chunk_overlap: 200,
            embedding_batch_size: 2,
        }
    }

    #[test]
    fn cosine_similarity_handles_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn builds_then_reopens_without_reingesting() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        let embedder = Arc::new(HashEmbedder::default());

        let store = KnowledgeStore::open_or_build(&config, embedder.clone()).await.unwrap();
        assert_eq!(store.mode(), IndexMode::Built);
        assert_eq!(store.passage_count().await.unwrap(), 3);
        store.close().await;
        let calls_after_build = embedder.calls();

        for _ in 0..2 {
            let store = KnowledgeStore::open_or_build(&config, embedder.clone()).await.unwrap();
            assert_eq!(store.mode(), IndexMode::Opened);
            assert_eq!(store.passage_count().await.unwrap(), 3);
            store.close().await;
        }
        assert_eq!(embedder.calls(), calls_after_build);
    }

    #[tokio::test]
    async fn build_fails_when_every_document_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexConfig {
            persist_dir: dir.path().join("index"),
            documents: vec![dir.path().join("a.pdf"), dir.path().join("b.pdf")],
            ..IndexConfig::default()
        };

        let result = KnowledgeStore::open_or_build(&config, Arc::new(HashEmbedder::default())).await;
        assert!(matches!(result, Err(PipelineError::NoDocumentsLoaded)));
        assert!(!config.persist_dir.exists());
    }

    #[tokio::test]
    async fn empty_persist_dir_triggers_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        std::fs::create_dir_all(&config.persist_dir).unwrap();

        let store = KnowledgeStore::open_or_build(&config, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();
        assert_eq!(store.mode(), IndexMode::Built);
    }

    #[tokio::test]
    async fn retrieval_ranks_by_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        let store = KnowledgeStore::build(&config, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();

        let results = store.retrieve("window functions", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_name, "Syllabus.txt");
        assert_eq!(results[0].page, Some(2));
        assert!(results[0].score >= results[1].score);

        let all = store.retrieve("window functions", 10).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn rebuild_replaces_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        let embedder = Arc::new(HashEmbedder::default());

        KnowledgeStore::build(&config, embedder.clone()).await.unwrap().close().await;
        let store = KnowledgeStore::rebuild(&config, embedder).await.unwrap();
        assert_eq!(store.mode(), IndexMode::Built);
        assert_eq!(store.passage_count().await.unwrap(), 3);
        assert!(no_staging_left(dir.path()));
    }

    fn no_staging_left(root: &Path) -> bool {
        std::fs::read_dir(root).unwrap().all(|entry| {
            !entry
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(".index.building-")
        })
    }

    async fn migrate_empty_index(persist_dir: &Path) {
        std::fs::create_dir_all(persist_dir).unwrap();
        let pool = connect(&index_path(persist_dir), true).await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool.close().await;
    }

    #[tokio::test]
    async fn open_rejects_an_index_without_a_finished_build() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        migrate_empty_index(&config.persist_dir).await;

        let result = KnowledgeStore::open(&config.persist_dir, Arc::new(HashEmbedder::default())).await;
        assert!(matches!(result, Err(PipelineError::IncompleteIndex(_))));

        std::fs::remove_file(index_path(&config.persist_dir)).unwrap();
        let result = KnowledgeStore::open(&config.persist_dir, Arc::new(HashEmbedder::default())).await;
        assert!(matches!(result, Err(PipelineError::IncompleteIndex(_))));
    }

    #[tokio::test]
    async fn empty_migrated_index_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        migrate_empty_index(&config.persist_dir).await;

        let store = KnowledgeStore::open_or_build(&config, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();
        assert_eq!(store.mode(), IndexMode::Built);
        assert_eq!(store.passage_count().await.unwrap(), 3);
        assert_eq!(store.retrieve("window functions", 3).await.unwrap().len(), 3);
        assert!(no_staging_left(dir.path()));
    }

    #[tokio::test]
    async fn stray_files_without_an_index_are_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        std::fs::create_dir_all(&config.persist_dir).unwrap();
        std::fs::write(config.persist_dir.join("notes.txt"), "not an index").unwrap();

        let store = KnowledgeStore::open_or_build(&config, Arc::new(HashEmbedder::default()))
            .await
            .unwrap();
        assert_eq!(store.mode(), IndexMode::Built);
        assert_eq!(store.passage_count().await.unwrap(), 3);
        assert!(!config.persist_dir.join("notes.txt").exists());
    }

    #[tokio::test]
    async fn index_missing_passages_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let config = course_config(dir.path());
        let embedder = Arc::new(HashEmbedder::default());
        KnowledgeStore::build(&config, embedder.clone()).await.unwrap().close().await;

        let pool = connect(&index_path(&config.persist_dir), false).await.unwrap();
        sqlx::query("DELETE FROM passages WHERE id = (SELECT MAX(id) FROM passages)")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let store = KnowledgeStore::open_or_build(&config, embedder).await.unwrap();
        assert_eq!(store.mode(), IndexMode::Built);
        assert_eq!(store.passage_count().await.unwrap(), 3);
    }
}
