//! Qdrant-backed [`VectorStore`].

use std::collections::HashMap;
use std::sync::RwLock;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::vector_output::Vector as DenseOrSparse;
use qdrant_client::qdrant::vectors_output::VectorsOptions;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
    DeletePointsBuilder, Distance, FieldType, Filter, PointId, PointStruct, PointsIdsList,
    ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
    VectorsOutput, point_id::PointIdOptions, value::Kind,
};

use crate::vector_store::{
    BoxFuture, CollectionStats, DeleteSelector, FieldCondition, FieldValue, Metadata,
    ScoredVectorPoint, TEXT_FIELD, VectorFilter, VectorPoint, VectorStore, VectorStoreError,
};

const SCROLL_PAGE: u32 = 256;

/// Payload fields that get a keyword index on collection creation.
const INDEXED_FIELDS: &[&str] = &["file_path", "language", "unit_type"];

#[derive(Clone, Copy)]
enum Op {
    Collection,
    Upsert,
    Query,
    Delete,
    Scroll,
}

fn map_err(op: Op, collection: &str, e: &qdrant_client::QdrantError) -> VectorStoreError {
    let msg = e.to_string();
    if msg.contains("Not found") || msg.contains("doesn't exist") {
        return VectorStoreError::NotFound(collection.to_owned());
    }
    if msg.contains("transport error") || msg.contains("Unavailable") {
        return VectorStoreError::Connection(msg);
    }
    match op {
        Op::Collection => VectorStoreError::Collection(msg),
        Op::Upsert => VectorStoreError::Upsert(msg),
        Op::Query => VectorStoreError::Query(msg),
        Op::Delete => VectorStoreError::Delete(msg),
        Op::Scroll => VectorStoreError::Scroll(msg),
    }
}

pub struct QdrantVectorStore {
    client: Qdrant,
    dimensions: RwLock<HashMap<String, u64>>,
}

impl std::fmt::Debug for QdrantVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantVectorStore").finish_non_exhaustive()
    }
}

impl QdrantVectorStore {
    /// Create a store connected to the given gRPC URL.
    ///
    /// # Errors
    ///
    /// Returns [`VectorStoreError::Connection`] if the client cannot be built.
    pub fn new(url: &str) -> Result<Self, VectorStoreError> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            dimensions: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn client(&self) -> &Qdrant {
        &self.client
    }

    fn known_dimension(&self, collection: &str) -> Option<u64> {
        self.dimensions
            .read()
            .ok()
            .and_then(|d| d.get(collection).copied())
    }

    fn remember_dimension(&self, collection: &str, dimension: Option<u64>) {
        if let Ok(mut d) = self.dimensions.write() {
            match dimension {
                Some(dim) => {
                    d.insert(collection.to_owned(), dim);
                }
                None => {
                    d.remove(collection);
                }
            }
        }
    }

    fn check_dimension(&self, collection: &str, vector: &[f32]) -> Result<(), VectorStoreError> {
        if let Some(expected) = self.known_dimension(collection) {
            let actual = vector.len() as u64;
            if actual != expected {
                return Err(VectorStoreError::DimensionMismatch { expected, actual });
            }
        }
        Ok(())
    }
}

impl VectorStore for QdrantVectorStore {
    fn create_collection(
        &self,
        collection: &str,
        dimension: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if let Some(existing) = self.known_dimension(&collection)
                && existing != dimension
            {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
            let exists = self
                .client
                .collection_exists(&collection)
                .await
                .map_err(|e| map_err(Op::Collection, &collection, &e))?;
            if !exists {
                self.client
                    .create_collection(
                        CreateCollectionBuilder::new(&collection)
                            .vectors_config(VectorParamsBuilder::new(dimension, Distance::Cosine)),
                    )
                    .await
                    .map_err(|e| map_err(Op::Collection, &collection, &e))?;
                for field in INDEXED_FIELDS {
                    self.client
                        .create_field_index(CreateFieldIndexCollectionBuilder::new(
                            &collection,
                            *field,
                            FieldType::Keyword,
                        ))
                        .await
                        .map_err(|e| map_err(Op::Collection, &collection, &e))?;
                }
                tracing::info!(collection, dimension, "qdrant collection created");
            }
            self.remember_dimension(&collection, Some(dimension));
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| map_err(Op::Collection, &collection, &e))
        })
    }

    fn drop_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let exists = self
                .client
                .collection_exists(&collection)
                .await
                .map_err(|e| map_err(Op::Collection, &collection, &e))?;
            if exists {
                self.client
                    .delete_collection(&collection)
                    .await
                    .map_err(|e| map_err(Op::Collection, &collection, &e))?;
            }
            self.remember_dimension(&collection, None);
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
            if points.is_empty() {
                return Ok(());
            }
            for p in &points {
                self.check_dimension(&collection, &p.vector)?;
            }
            let qdrant_points: Vec<PointStruct> = points.into_iter().map(to_point_struct).collect();
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, qdrant_points).wait(true))
                .await
                .map_err(|e| map_err(Op::Upsert, &collection, &e))?;
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
            self.check_dimension(&collection, &vector)?;
            let mut builder = SearchPointsBuilder::new(&collection, vector, limit)
                .with_payload(true)
                .with_vectors(true);
            if let Some(f) = filter.filter(|f| !f.is_empty()) {
                builder = builder.filter(to_qdrant_filter(f));
            }
            let response = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| map_err(Op::Query, &collection, &e))?;
            Ok(response
                .result
                .into_iter()
                .map(|p| {
                    let (text, metadata) = from_payload(p.payload);
                    ScoredVectorPoint {
                        id: point_id_string(p.id),
                        score: p.score,
                        text,
                        metadata,
                        vector: dense_vector(p.vectors),
                    }
                })
                .collect())
        })
    }

    fn delete(
        &self,
        collection: &str,
        selector: DeleteSelector,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let builder = match selector {
                DeleteSelector::Ids(ids) => {
                    if ids.is_empty() {
                        return Ok(());
                    }
                    let ids: Vec<PointId> = ids.into_iter().map(PointId::from).collect();
                    DeletePointsBuilder::new(&collection).points(PointsIdsList { ids })
                }
                DeleteSelector::Filter(f) => {
                    DeletePointsBuilder::new(&collection).points(to_qdrant_filter(f))
                }
            };
            self.client
                .delete_points(builder.wait(true))
                .await
                .map_err(|e| map_err(Op::Delete, &collection, &e))?;
            Ok(())
        })
    }

    fn stats(&self, collection: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let response = self
                .client
                .count(CountPointsBuilder::new(&collection).exact(true))
                .await
                .map_err(|e| map_err(Op::Collection, &collection, &e))?;
            Ok(CollectionStats {
                count: response.result.map_or(0, |r| r.count),
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
            let qdrant_filter = filter.filter(|f| !f.is_empty()).map(to_qdrant_filter);
            let mut out = Vec::new();
            let mut offset: Option<PointId> = None;
            loop {
                let mut builder = ScrollPointsBuilder::new(&collection)
                    .with_payload(true)
                    .with_vectors(true)
                    .limit(SCROLL_PAGE);
                if let Some(ref f) = qdrant_filter {
                    builder = builder.filter(f.clone());
                }
                if let Some(off) = offset.take() {
                    builder = builder.offset(off);
                }
                let response = self
                    .client
                    .scroll(builder)
                    .await
                    .map_err(|e| map_err(Op::Scroll, &collection, &e))?;
                for p in response.result {
                    let (text, metadata) = from_payload(p.payload);
                    out.push(VectorPoint {
                        id: point_id_string(p.id),
                        vector: dense_vector(p.vectors).unwrap_or_default(),
                        text,
                        metadata,
                    });
                }
                match response.next_page_offset {
                    Some(next) => offset = Some(next),
                    None => break,
                }
            }
            Ok(out)
        })
    }
}

fn to_point_struct(p: VectorPoint) -> PointStruct {
    let mut payload: HashMap<String, Value> = p
        .metadata
        .into_iter()
        .map(|(k, v)| (k, field_to_value(v)))
        .collect();
    payload.insert(TEXT_FIELD.to_owned(), Value::from(p.text));
    PointStruct::new(p.id, p.vector, payload)
}

fn field_to_value(v: FieldValue) -> Value {
    match v {
        FieldValue::Integer(i) => Value::from(i),
        FieldValue::Text(s) => Value::from(s),
        FieldValue::Bool(b) => Value::from(b),
    }
}

fn from_payload(payload: HashMap<String, Value>) -> (String, Metadata) {
    let mut text = String::new();
    let mut metadata = Metadata::new();
    for (k, v) in payload {
        let value = match v.kind {
            Some(Kind::StringValue(s)) => {
                if k == TEXT_FIELD {
                    text = s;
                    continue;
                }
                FieldValue::Text(s)
            }
            Some(Kind::IntegerValue(i)) => FieldValue::Integer(i),
            Some(Kind::BoolValue(b)) => FieldValue::Bool(b),
            _ => continue,
        };
        metadata.insert(k, value);
    }
    (text, metadata)
}

fn to_qdrant_filter(filter: VectorFilter) -> Filter {
    Filter {
        must: filter.must.into_iter().map(to_condition).collect(),
        must_not: filter.must_not.into_iter().map(to_condition).collect(),
        ..Filter::default()
    }
}

fn to_condition(cond: FieldCondition) -> Condition {
    match cond.value {
        FieldValue::Integer(v) => Condition::matches(cond.field, v),
        FieldValue::Text(v) => Condition::matches(cond.field, v),
        FieldValue::Bool(v) => Condition::matches(cond.field, v),
    }
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|pid| pid.point_id_options) {
        Some(PointIdOptions::Uuid(u)) => u,
        Some(PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

#[allow(deprecated)]
fn dense_vector(vectors: Option<VectorsOutput>) -> Option<Vec<f32>> {
    match vectors?.vectors_options? {
        VectorsOptions::Vector(v) => match v.vector {
            Some(DenseOrSparse::Dense(d)) => Some(d.data),
            _ if !v.data.is_empty() => Some(v.data),
            _ => None,
        },
        VectorsOptions::Vectors(_) => None,
    }
}
