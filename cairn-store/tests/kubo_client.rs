//! Kubo RPC wire mapping against a mock HTTP server.

use std::time::Duration;

use cairn_core::{Cid, ContentPath, DagNode, Link, Timeouts};
use cairn_store::{
    ErrorKind, KuboStore, PublishOptions, ResolveOptions, StagedFile, Store,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cid(s: &str) -> Cid {
    Cid::parse(s).expect("cid")
}

async fn store() -> (MockServer, KuboStore) {
    let server = MockServer::start().await;
    let store = KuboStore::new(server.uri(), Timeouts::default());
    (server, store)
}

#[tokio::test]
async fn name_resolve_returns_cid_from_path() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/resolve"))
        .and(query_param("arg", "k51raw"))
        .and(query_param("nocache", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Path": "/ipfs/bafyroot"})))
        .expect(1)
        .mount(&server)
        .await;

    let resolved = store
        .name_resolve("k51raw", &ResolveOptions::default())
        .await
        .expect("resolve");
    assert_eq!(resolved, cid("bafyroot"));
}

#[tokio::test]
async fn unresolvable_name_maps_to_not_found() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/resolve"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "Message": "could not resolve name",
            "Code": 0,
            "Type": "error"
        })))
        .mount(&server)
        .await;

    let err = store
        .name_resolve("k51raw", &ResolveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(err.is_transient());
}

#[tokio::test]
async fn slow_resolve_maps_to_timeout() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/resolve"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"Path": "/ipfs/bafyroot"}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let options = ResolveOptions {
        timeout: Some(Duration::from_millis(100)),
        ..ResolveOptions::default()
    };
    let err = store.name_resolve("k51raw", &options).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn put_node_sends_dag_json_and_stats_result() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/dag/put"))
        .and(query_param("store-codec", "dag-pb"))
        .and(query_param("pin", "false"))
        .and(body_string_contains(r#""Data":{"/":{"bytes":"CAE"}}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"Cid": {"/": "bafyput"}})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v0/files/stat"))
        .and(query_param("arg", "/ipfs/bafyput"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Hash": "bafyput",
            "Size": 0,
            "CumulativeSize": 120,
            "Blocks": 1,
            "Type": "directory"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let node = DagNode::directory(vec![Link::new("1.0.0-build", cid("bafychild"), 80)]);
    let stat = store.put_node(&node).await.expect("put");
    assert_eq!(stat.cid, cid("bafyput"));
    assert_eq!(stat.size, 120);
}

#[tokio::test]
async fn get_node_decodes_links() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/dag/get"))
        .and(query_param("arg", "bafyroot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Data": {"/": {"bytes": "CAE"}},
            "Links": [
                {"Hash": {"/": "bafyb"}, "Name": "latest-build", "Tsize": 10},
                {"Hash": {"/": "bafyb"}, "Name": "1.0.0-build", "Tsize": 10}
            ]
        })))
        .mount(&server)
        .await;

    let node = store.get_node(&cid("bafyroot")).await.expect("get");
    assert!(node.is_directory());
    assert_eq!(node.links.len(), 2);
    assert_eq!(node.link("1.0.0-build").expect("link").hash, cid("bafyb"));
}

#[tokio::test]
async fn publish_passes_key_and_flags() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/publish"))
        .and(query_param("arg", "/ipfs/bafyroot"))
        .and(query_param("key", "wiki-raw"))
        .and(query_param("allow-offline", "true"))
        .and(query_param("resolve", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Name": "k51raw",
            "Value": "/ipfs/bafyroot"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let published = store
        .name_publish("wiki-raw", &cid("bafyroot"), &PublishOptions::default())
        .await
        .expect("publish");
    assert_eq!(published.name, "k51raw");
    assert_eq!(published.value, "/ipfs/bafyroot");
}

#[tokio::test]
async fn publish_rejection_is_api_error() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/name/publish"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "Message": "key with name 'wiki-raw' is locked",
            "Code": 0,
            "Type": "error"
        })))
        .mount(&server)
        .await;

    let err = store
        .name_publish("wiki-raw", &cid("bafyroot"), &PublishOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Api);
    assert!(err.message.contains("locked"));
}

#[tokio::test]
async fn key_id_looks_up_named_key() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/key/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Keys": [
                {"Name": "self", "Id": "k51self"},
                {"Name": "wiki-raw", "Id": "k51raw"}
            ]
        })))
        .mount(&server)
        .await;

    assert_eq!(store.key_id("wiki-raw").await.expect("key"), "k51raw");
    let err = store.key_id("missing").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn add_dir_picks_wrapping_root_from_ndjson() {
    let (server, store) = store().await;
    let body = concat!(
        "{\"Name\":\"staged/index.html\",\"Hash\":\"bafyindex\",\"Size\":\"14\"}\n",
        "{\"Name\":\"staged\",\"Hash\":\"bafystaged\",\"Size\":\"77\"}\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/v0/add"))
        .and(query_param("pin", "false"))
        .and(body_string_contains("staged/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let stat = store
        .add_dir(vec![StagedFile::new("index.html", b"<html></html>".to_vec())])
        .await
        .expect("add");
    assert_eq!(stat.cid, cid("bafystaged"));
    assert_eq!(stat.size, 77);
}

#[tokio::test]
async fn missing_link_on_resolve_is_not_found() {
    let (server, store) = store().await;
    Mock::given(method("POST"))
        .and(path("/api/v0/resolve"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "Message": "no link named \"current.json\" under bafyroot",
            "Code": 0,
            "Type": "error"
        })))
        .mount(&server)
        .await;

    let target = ContentPath::ipfs(cid("bafyroot")).join("current.json");
    let err = store.resolve_path(&target).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn unreachable_node_is_network_error() {
    let store = KuboStore::new("http://127.0.0.1:1", Timeouts::default());
    let err = store.stat(&cid("bafyroot")).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Network);
    assert!(!err.is_transient());
}
