use std::collections::HashMap;
use std::sync::RwLock;

use crate::vector_store::{
    BoxFuture, CollectionStats, DeleteSelector, Metadata, ScoredVectorPoint, VectorFilter,
    VectorPoint, VectorStore, VectorStoreError, cosine_similarity,
};

struct StoredPoint {
    vector: Vec<f32>,
    text: String,
    metadata: Metadata,
}

struct InMemoryCollection {
    dimension: u64,
    points: HashMap<String, StoredPoint>,
}

impl InMemoryCollection {
    fn check_dimension(&self, vector: &[f32]) -> Result<(), VectorStoreError> {
        let actual = vector.len() as u64;
        if actual == self.dimension {
            Ok(())
        } else {
            Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual,
            })
        }
    }
}

/// Exact brute-force store. Used in tests and with `backend = "memory"`.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.collections.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("InMemoryVectorStore")
            .field("collections", &count)
            .finish_non_exhaustive()
    }
}

fn passes(metadata: &Metadata, filter: Option<&VectorFilter>) -> bool {
    filter.is_none_or(|f| f.matches(metadata))
}

impl VectorStore for InMemoryVectorStore {
    fn create_collection(
        &self,
        collection: &str,
        dimension: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            if let Some(existing) = cols.get(&collection) {
                if existing.dimension != dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: existing.dimension,
                        actual: dimension,
                    });
                }
                return Ok(());
            }
            cols.insert(
                collection,
                InMemoryCollection {
                    dimension,
                    points: HashMap::new(),
                },
            );
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn drop_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::NotFound(collection.clone()))?;
            for p in &points {
                col.check_dimension(&p.vector)?;
            }
            for p in points {
                col.points.insert(
                    p.id,
                    StoredPoint {
                        vector: p.vector,
                        text: p.text,
                        metadata: p.metadata,
                    },
                );
            }
            Ok(())
        })
    }

    fn query(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Query(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::NotFound(collection.clone()))?;
            col.check_dimension(&vector)?;

            let mut scored: Vec<ScoredVectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| passes(&sp.metadata, filter.as_ref()))
                .map(|(id, sp)| ScoredVectorPoint {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &sp.vector),
                    text: sp.text.clone(),
                    metadata: sp.metadata.clone(),
                    vector: Some(sp.vector.clone()),
                })
                .collect();

            scored.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            });
            scored.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(scored)
        })
    }

    fn delete(
        &self,
        collection: &str,
        selector: DeleteSelector,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let col = cols
                .get_mut(&collection)
                .ok_or_else(|| VectorStoreError::NotFound(collection.clone()))?;
            match selector {
                DeleteSelector::Ids(ids) => {
                    for id in &ids {
                        col.points.remove(id);
                    }
                }
                DeleteSelector::Filter(filter) => {
                    col.points.retain(|_, sp| !filter.matches(&sp.metadata));
                }
            }
            Ok(())
        })
    }

    fn stats(&self, collection: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::NotFound(collection.clone()))?;
            Ok(CollectionStats {
                count: col.points.len() as u64,
            })
        })
    }

    fn scroll(
        &self,
        collection: &str,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<VectorPoint>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))?;
            let col = cols
                .get(&collection)
                .ok_or_else(|| VectorStoreError::NotFound(collection.clone()))?;
            let mut points: Vec<VectorPoint> = col
                .points
                .iter()
                .filter(|(_, sp)| passes(&sp.metadata, filter.as_ref()))
                .map(|(id, sp)| VectorPoint {
                    id: id.clone(),
                    vector: sp.vector.clone(),
                    text: sp.text.clone(),
                    metadata: sp.metadata.clone(),
                })
                .collect();
            points.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(points)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::FieldValue;

    fn point(id: &str, vector: Vec<f32>, file: &str) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            text: format!("text of {id}"),
            metadata: Metadata::from([("file_path".into(), FieldValue::from(file))]),
        }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 3).await.unwrap();
        store.create_collection("c", 3).await.unwrap();
        assert!(store.collection_exists("c").await.unwrap());
        assert!(!store.collection_exists("other").await.unwrap());
    }

    #[tokio::test]
    async fn create_with_other_dimension_fails() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 3).await.unwrap();
        let err = store.create_collection("c", 4).await.unwrap_err();
        assert!(matches!(err, VectorStoreError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert("c", vec![point("a", vec![1.0, 0.0], "x.rs")])
            .await
            .unwrap();
        store
            .upsert("c", vec![point("a", vec![0.0, 1.0], "y.rs")])
            .await
            .unwrap();
        assert_eq!(store.stats("c").await.unwrap().count, 1);
        let all = store.scroll("c", None).await.unwrap();
        assert_eq!(all[0].vector, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_dimension_atomically() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        let err = store
            .upsert(
                "c",
                vec![
                    point("a", vec![1.0, 0.0], "x.rs"),
                    point("b", vec![1.0, 0.0, 0.0], "x.rs"),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(store.stats("c").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn query_orders_by_similarity_with_filter() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("a", vec![1.0, 0.0], "x.rs"),
                    point("b", vec![0.7, 0.7], "x.rs"),
                    point("c", vec![0.0, 1.0], "y.rs"),
                ],
            )
            .await
            .unwrap();

        let hits = store.query("c", vec![1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(hits[0].distance().abs() < 1e-6);
        assert!(hits[0].vector.is_some());
        assert_eq!(hits[0].text, "text of a");

        let filtered = store
            .query(
                "c",
                vec![1.0, 0.0],
                10,
                Some(VectorFilter::field("file_path", "y.rs")),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "c");
    }

    #[tokio::test]
    async fn query_truncates_to_limit() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        let points = (0..5)
            .map(|i| point(&format!("p{i}"), vec![1.0, 0.1 * i as f32], "x.rs"))
            .collect();
        store.upsert("c", points).await.unwrap();
        assert_eq!(store.query("c", vec![1.0, 0.0], 2, None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn delete_by_ids_and_filter() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store
            .upsert(
                "c",
                vec![
                    point("a", vec![1.0, 0.0], "x.rs"),
                    point("b", vec![1.0, 0.0], "x.rs"),
                    point("c", vec![1.0, 0.0], "y.rs"),
                ],
            )
            .await
            .unwrap();
        store
            .delete("c", DeleteSelector::Ids(vec!["c".into(), "missing".into()]))
            .await
            .unwrap();
        assert_eq!(store.stats("c").await.unwrap().count, 2);
        store
            .delete(
                "c",
                DeleteSelector::Filter(VectorFilter::field("file_path", "x.rs")),
            )
            .await
            .unwrap();
        assert_eq!(store.stats("c").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn missing_collection_is_not_found() {
        let store = InMemoryVectorStore::new();
        assert!(matches!(
            store.stats("nope").await,
            Err(VectorStoreError::NotFound(_))
        ));
        assert!(matches!(
            store.query("nope", vec![1.0], 1, None).await,
            Err(VectorStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn drop_collection_removes_everything() {
        let store = InMemoryVectorStore::new();
        store.create_collection("c", 2).await.unwrap();
        store.drop_collection("c").await.unwrap();
        assert!(!store.collection_exists("c").await.unwrap());
        store.drop_collection("c").await.unwrap();
    }
}
