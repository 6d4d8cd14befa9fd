use crate::catalog::{SchemaCatalog, TableRef};
use crate::db::Database;
use crate::llm::Embedder;
use futures::future::join_all;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Cosine similarity of two vectors, accumulated in f32.
///
/// Returns `None` for vectors of different length or with zero norm, which
/// have no direction to compare.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some((dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0))
}

/// Text embedded for a table: `schema.table: col_a, col_b`
pub fn describe_table(table: &TableRef, columns: &[String]) -> String {
    format!("{}.{}: {}", table.schema, table.table, columns.join(", "))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableScore {
    pub table: TableRef,
    pub similarity: f32,
}

/// Applies the gating rule to scored tables.
///
/// Tables are ordered by descending similarity (ties keep their input order).
/// The best table is always kept; the others only at or above `threshold`.
/// At most `max_tables` survive.
pub fn rank_tables(mut scored: Vec<TableScore>, threshold: f32, max_tables: usize) -> Vec<TableScore> {
    scored.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

    scored
        .into_iter()
        .enumerate()
        .filter(|(rank, score)| *rank == 0 || score.similarity >= threshold)
        .map(|(_, score)| score)
        .take(max_tables)
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct TableSelection {
    pub tables: Vec<TableRef>,
    /// Every ranked table with its similarity, best first
    pub scores: Vec<TableScore>,
    /// False when no similarity ranking took place
    pub gated: bool,
}

impl TableSelection {
    fn everything(catalog: &SchemaCatalog) -> Self {
        Self {
            tables: catalog.tables(),
            scores: Vec::new(),
            gated: false,
        }
    }

    /// Declaration-order prefix of the catalog, used when ranking was attempted but impossible
    fn best_effort(catalog: &SchemaCatalog, max_tables: usize) -> Self {
        Self {
            tables: catalog.tables().into_iter().take(max_tables).collect(),
            scores: Vec::new(),
            gated: false,
        }
    }
}

/// Table embeddings keyed by a hash of model, table identity and description
#[derive(Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<String, Arc<Vec<f32>>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(model: &str, table: &TableRef, description: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [model, table.schema.as_str(), table.table.as_str(), description] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<f32>>> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: String, vector: Arc<Vec<f32>>) {
        self.entries.write().await.insert(key, vector);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

/// Restricts the schema shown to the SQL prompt to the tables closest to the question.
pub struct TableSelector {
    embedder: Option<Arc<dyn Embedder>>,
    database: Arc<dyn Database>,
    cache: Option<EmbeddingCache>,
    threshold: f32,
    max_tables: usize,
}

impl TableSelector {
    pub fn new(
        embedder: Option<Arc<dyn Embedder>>,
        database: Arc<dyn Database>,
        threshold: f32,
        max_tables: usize,
        use_cache: bool,
    ) -> Self {
        Self {
            embedder,
            database,
            cache: use_cache.then(EmbeddingCache::new),
            threshold,
            max_tables,
        }
    }

    pub fn is_gating(&self) -> bool {
        self.embedder.is_some()
    }

    /// Never fails. Without an embedder every declared table is returned; when
    /// ranking is impossible the first `max_tables` declared tables are.
    pub async fn select(&self, query: &str, catalog: &SchemaCatalog) -> TableSelection {
        let Some(embedder) = self.embedder.as_ref() else {
            info!("No embedding model configured, using all declared tables");
            return TableSelection::everything(catalog);
        };

        let query_vector = match embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(
                    "Failed to embed query, using the first {} declared tables: {}",
                    self.max_tables, e
                );
                return TableSelection::best_effort(catalog, self.max_tables);
            }
        };

        let declared = catalog.tables();
        let table_vectors = join_all(
            declared
                .iter()
                .map(|table| self.embed_table(embedder.as_ref(), table)),
        )
        .await;

        let scored: Vec<TableScore> = declared
            .into_iter()
            .zip(table_vectors)
            .filter_map(|(table, vector)| {
                let similarity = cosine_similarity(&query_vector, vector?.as_slice());
                if similarity.is_none() {
                    debug!("Excluding {} from ranking: degenerate embedding", table);
                }
                similarity.map(|similarity| TableScore { table, similarity })
            })
            .collect();

        if scored.is_empty() {
            warn!(
                "No table could be ranked, using the first {} declared tables",
                self.max_tables
            );
            return TableSelection::best_effort(catalog, self.max_tables);
        }

        let selected = rank_tables(scored.clone(), self.threshold, self.max_tables);
        let mut scores = scored;
        scores.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        for score in &selected {
            info!("Selected table {} (similarity {:.3})", score.table, score.similarity);
        }

        TableSelection {
            tables: selected.into_iter().map(|score| score.table).collect(),
            scores,
            gated: true,
        }
    }

    async fn embed_table(&self, embedder: &dyn Embedder, table: &TableRef) -> Option<Arc<Vec<f32>>> {
        let columns = match self.database.column_names(table).await {
            Ok(columns) => columns,
            Err(e) => {
                warn!("Failed to read columns of {}, excluding it from ranking: {}", table, e);
                return None;
            }
        };

        let description = describe_table(table, &columns);
        let key = EmbeddingCache::key(embedder.model(), table, &description);

        if let Some(cache) = &self.cache {
            if let Some(vector) = cache.get(&key).await {
                return Some(vector);
            }
        }

        match embedder.embed(&description).await {
            Ok(vector) => {
                let vector = Arc::new(vector);
                if let Some(cache) = &self.cache {
                    cache.insert(key, Arc::clone(&vector)).await;
                }
                Some(vector)
            }
            Err(e) => {
                warn!("Failed to embed table {}: {}", table, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{
        constructor_championships, drivers, f1_catalog, f1_columns, f1_vocabulary,
        FailingEmbedder, KeywordEmbedder, ScriptedDatabase,
    };

    fn score(schema_table: (&str, &str), similarity: f32) -> TableScore {
        TableScore {
            table: TableRef::new(schema_table.0, schema_table.1),
            similarity,
        }
    }

    fn database() -> Arc<ScriptedDatabase> {
        Arc::new(ScriptedDatabase::new(f1_columns(), |_| Ok(Vec::new())))
    }

    fn selector(embedder: Option<Arc<dyn Embedder>>, max_tables: usize) -> TableSelector {
        TableSelector::new(embedder, database(), 0.20, max_tables, true)
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = [1.0, 2.0, 3.0];
        let b = [-2.0, 0.5, 4.0];

        let self_similarity = cosine_similarity(&a, &a).unwrap();
        assert!((self_similarity - 1.0).abs() < 1e-6);

        let ab = cosine_similarity(&a, &b).unwrap();
        let ba = cosine_similarity(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert!((-1.0..=1.0).contains(&ab));

        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        let opposite = cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]).unwrap();
        assert!((opposite + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_rejects_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), None);
        assert_eq!(cosine_similarity(&[1.0, 1.0], &[0.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn test_cosine_similarity_bounded_for_many_vectors() {
        let vectors: Vec<Vec<f32>> = (1..20)
            .map(|i| (0..8).map(|j| ((i * 7 + j * 3) % 11) as f32 - 5.0).collect())
            .collect();
        for a in &vectors {
            for b in &vectors {
                if let Some(similarity) = cosine_similarity(a, b) {
                    assert!((-1.0..=1.0).contains(&similarity));
                    assert_eq!(Some(similarity), cosine_similarity(b, a));
                }
            }
        }
    }

    #[test]
    fn test_describe_table_format() {
        let columns = vec!["driver_name".to_string(), "points".to_string()];
        assert_eq!(
            describe_table(&drivers(), &columns),
            "f1.Drivers: driver_name, points"
        );
    }

    #[test]
    fn test_rank_keeps_best_table_below_threshold() {
        let ranked = rank_tables(
            vec![score(("s", "a"), 0.05), score(("s", "b"), 0.12), score(("s", "c"), -0.3)],
            0.20,
            2,
        );
        assert_eq!(ranked, vec![score(("s", "b"), 0.12)]);
    }

    #[test]
    fn test_rank_caps_at_max_tables() {
        let ranked = rank_tables(
            vec![
                score(("s", "a"), 0.30),
                score(("s", "b"), 0.90),
                score(("s", "c"), 0.50),
                score(("s", "d"), 0.21),
            ],
            0.20,
            2,
        );
        let names: Vec<&str> = ranked.iter().map(|s| s.table.table.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_rank_threshold_is_inclusive_and_ties_keep_order() {
        let ranked = rank_tables(
            vec![score(("s", "first"), 0.20), score(("s", "second"), 0.20)],
            0.20,
            5,
        );
        let names: Vec<&str> = ranked.iter().map(|s| s.table.table.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_selects_drivers_for_points_question() {
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::new(f1_vocabulary()));
        let selection = selector(Some(embedder), 2)
            .select("How many points did Max Verstappen score in 2023?", &f1_catalog())
            .await;

        assert!(selection.gated);
        assert_eq!(selection.tables, vec![drivers()]);
        assert_eq!(selection.scores.len(), 2);
        assert_eq!(selection.scores[0].table, drivers());
    }

    #[tokio::test]
    async fn test_selection_never_empty_and_never_invents_tables() {
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::new(f1_vocabulary()));
        let selector = selector(Some(embedder), 2);
        let catalog = f1_catalog();

        for query in [
            "weather in Monaco",
            "which team took the constructor title",
            "driver points",
            "points",
        ] {
            let selection = selector.select(query, &catalog).await;
            assert!(!selection.tables.is_empty(), "empty selection for {query}");
            assert!(selection.tables.len() <= 2);
            assert!(selection.tables.iter().all(|t| catalog.contains(t)));
        }
    }

    #[tokio::test]
    async fn test_best_table_kept_when_all_below_threshold() {
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::new(f1_vocabulary()));
        let selection = selector(Some(embedder), 2)
            .select("team team team team team title", &f1_catalog())
            .await;

        assert!(selection.gated);
        assert!(selection.scores.iter().all(|s| s.similarity < 0.20));
        assert_eq!(selection.tables, vec![constructor_championships()]);
    }

    #[tokio::test]
    async fn test_no_embedder_selects_everything() {
        let selection = selector(None, 1)
            .select("How many points did Max Verstappen score?", &f1_catalog())
            .await;

        assert!(!selection.gated);
        assert_eq!(selection.tables, vec![drivers(), constructor_championships()]);
    }

    #[tokio::test]
    async fn test_zero_query_vector_keeps_the_cap() {
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder::new(f1_vocabulary()));
        let selection = selector(Some(embedder), 1)
            .select("weather in Monaco", &f1_catalog())
            .await;

        assert!(!selection.gated);
        assert_eq!(selection.tables, vec![drivers()]);
    }

    #[tokio::test]
    async fn test_embedding_failure_keeps_the_cap() {
        let embedder: Arc<dyn Embedder> = Arc::new(FailingEmbedder);
        let catalog = f1_catalog();

        let single = selector(Some(embedder.clone()), 1)
            .select("driver points", &catalog)
            .await;
        assert!(!single.gated);
        assert_eq!(single.tables, vec![drivers()]);

        let pair = selector(Some(embedder), 2).select("driver points", &catalog).await;
        assert_eq!(pair.tables, vec![drivers(), constructor_championships()]);
    }

    #[tokio::test]
    async fn test_zero_norm_table_is_excluded_while_others_rank() {
        // No vocabulary word occurs in the ConstructorChampionships description
        let embedder: Arc<dyn Embedder> =
            Arc::new(KeywordEmbedder::new(vec!["driver", "points", "verstappen"]));
        let selector = selector(Some(embedder), 2);
        let catalog = f1_catalog();

        let related = selector.select("driver points", &catalog).await;
        assert!(related.gated);
        assert_eq!(related.scores.len(), 1);
        assert_eq!(related.scores[0].table, drivers());
        assert_eq!(related.tables, vec![drivers()]);

        // Orthogonal to the only rankable table, which is still kept as the best one
        let unrelated = selector.select("verstappen", &catalog).await;
        assert!(unrelated.gated);
        assert_eq!(unrelated.scores[0].similarity, 0.0);
        assert_eq!(unrelated.tables, vec![drivers()]);
    }

    #[tokio::test]
    async fn test_cache_avoids_repeat_table_embeddings() {
        let embedder = Arc::new(KeywordEmbedder::new(f1_vocabulary()));
        let selector = TableSelector::new(
            Some(embedder.clone() as Arc<dyn Embedder>),
            database(),
            0.20,
            2,
            true,
        );
        let catalog = f1_catalog();

        selector.select("driver points", &catalog).await;
        assert_eq!(embedder.call_count(), 3);

        selector.select("constructor titles", &catalog).await;
        assert_eq!(embedder.call_count(), 4);
        assert_eq!(selector.cache.as_ref().unwrap().len().await, 2);
    }

    #[test]
    fn test_cache_key_changes_with_columns() {
        let a = EmbeddingCache::key("m", &drivers(), "f1.Drivers: name");
        let b = EmbeddingCache::key("m", &drivers(), "f1.Drivers: name, points");
        let c = EmbeddingCache::key("other", &drivers(), "f1.Drivers: name");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, EmbeddingCache::key("m", &drivers(), "f1.Drivers: name"));
    }
}
