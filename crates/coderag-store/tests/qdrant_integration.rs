//! Runs against a real Qdrant container: `cargo test -- --ignored`.

use coderag_store::{
    DeleteSelector, FieldValue, Metadata, QdrantVectorStore, VectorFilter, VectorPoint,
    VectorStore,
};
use testcontainers::ContainerAsync;
use testcontainers::GenericImage;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;

const QDRANT_GRPC_PORT: ContainerPort = ContainerPort::Tcp(6334);

fn qdrant_image() -> GenericImage {
    GenericImage::new("qdrant/qdrant", "v1.16.0")
        .with_wait_for(WaitFor::message_on_stdout("gRPC listening"))
        .with_exposed_port(QDRANT_GRPC_PORT)
}

async fn setup() -> (QdrantVectorStore, ContainerAsync<GenericImage>) {
    let container = qdrant_image().start().await.unwrap();
    let grpc_port = container.get_host_port_ipv4(6334).await.unwrap();
    let store = QdrantVectorStore::new(&format!("http://127.0.0.1:{grpc_port}")).unwrap();
    (store, container)
}

fn point(n: u128, vector: Vec<f32>, file: &str) -> VectorPoint {
    VectorPoint {
        id: format!("00000000-0000-0000-0000-{n:012}"),
        vector,
        text: format!("chunk {n}"),
        metadata: Metadata::from([
            ("file_path".into(), FieldValue::from(file)),
            ("start_line".into(), FieldValue::from(1_i64)),
        ]),
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn create_collection_is_idempotent() {
    let (store, _container) = setup().await;
    store.create_collection("code", 4).await.unwrap();
    store.create_collection("code", 4).await.unwrap();
    assert!(store.collection_exists("code").await.unwrap());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn upsert_query_delete_roundtrip() {
    let (store, _container) = setup().await;
    store.create_collection("code", 4).await.unwrap();
    store
        .upsert(
            "code",
            vec![
                point(1, vec![1.0, 0.0, 0.0, 0.0], "a.rs"),
                point(2, vec![0.0, 1.0, 0.0, 0.0], "a.rs"),
                point(3, vec![0.0, 0.0, 1.0, 0.0], "b.rs"),
            ],
        )
        .await
        .unwrap();
    assert_eq!(store.stats("code").await.unwrap().count, 3);

    let hits = store
        .query("code", vec![1.0, 0.0, 0.0, 0.0], 2, None)
        .await
        .unwrap();
    assert_eq!(hits[0].text, "chunk 1");
    assert_eq!(hits[0].metadata["file_path"], FieldValue::from("a.rs"));
    assert_eq!(hits[0].vector.as_ref().map(Vec::len), Some(4));

    let only_b = store
        .scroll("code", Some(VectorFilter::field("file_path", "b.rs")))
        .await
        .unwrap();
    assert_eq!(only_b.len(), 1);

    store
        .delete(
            "code",
            DeleteSelector::Filter(VectorFilter::field("file_path", "a.rs")),
        )
        .await
        .unwrap();
    assert_eq!(store.stats("code").await.unwrap().count, 1);

    store.drop_collection("code").await.unwrap();
    assert!(!store.collection_exists("code").await.unwrap());
}
