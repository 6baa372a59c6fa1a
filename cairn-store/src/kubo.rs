//! Kubo RPC store implementation.
//!
//! Talks to a Kubo node over its HTTP RPC API (`POST /api/v0/<command>`).
//! Every request carries its own timeout from [`Timeouts`]: short for
//! resolution and metadata, long for content-bearing add and pin calls.
//!
//! Directory nodes travel as dag-json and are stored with the dag-pb codec:
//!
//! ```text
//! {"Data":{"/":{"bytes":"CAE"}},"Links":[{"Hash":{"/":"bafy.."},"Name":"x","Tsize":12}]}
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use cairn_core::{Cid, Config, ContentPath, DagNode, Link, NodeStat, Timeouts};

use crate::error::{ErrorKind, StoreError};
use crate::traits::{PublishOptions, Published, ResolveOptions, StagedFile, Store};

/// Name of the wrapping directory used for uploads.
const ADD_ROOT: &str = "staged";

/// Kubo node client.
#[derive(Debug, Clone)]
pub struct KuboStore {
    client: Client,
    /// RPC base URL, e.g. `http://127.0.0.1:5001`.
    api_base: String,
    timeouts: Timeouts,
}

impl KuboStore {
    pub fn new(api_base: impl Into<String>, timeouts: Timeouts) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeouts,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.api_url.clone(), config.timeouts.clone())
    }

    fn request(&self, command: &str, timeout: Duration) -> RequestBuilder {
        self.client
            .post(format!("{}/api/v0/{}", self.api_base, command))
            .timeout(timeout)
    }

    async fn send(&self, op: &'static str, request: RequestBuilder) -> Result<Response, StoreError> {
        tracing::debug!(op, api = %self.api_base, "kubo request");
        let response = request.send().await.map_err(|e| transport_error(op, e))?;
        check_status(op, response).await
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        op: &'static str,
        request: RequestBuilder,
    ) -> Result<T, StoreError> {
        let response = self.send(op, request).await?;
        response.json::<T>().await.map_err(|e| transport_error(op, e))
    }
}

#[async_trait]
impl Store for KuboStore {
    fn name(&self) -> &'static str {
        "kubo"
    }

    async fn put_node(&self, node: &DagNode) -> Result<NodeStat, StoreError> {
        const OP: &str = "dag/put";
        let body = serde_json::to_vec(&DagJsonNode::from_node(node))
            .map_err(|e| StoreError::new(ErrorKind::Decode, OP, e.to_string()))?;
        let form = Form::new().part("file", Part::bytes(body).file_name("node.json"));
        let request = self
            .request(OP, self.timeouts.add())
            .query(&[
                ("store-codec", "dag-pb"),
                ("input-codec", "dag-json"),
                ("pin", "false"),
            ])
            .multipart(form);
        let put: DagPutResponse = self.send_json(OP, request).await?;
        let cid = parse_cid(OP, &put.cid.cid)?;
        self.stat(&cid).await
    }

    async fn get_node(&self, cid: &Cid) -> Result<DagNode, StoreError> {
        const OP: &str = "dag/get";
        let request = self
            .request(OP, self.timeouts.fetch())
            .query(&[("arg", cid.as_str()), ("output-codec", "dag-json")]);
        let value: serde_json::Value = self.send_json(OP, request).await?;
        decode_node(OP, value)
    }

    async fn cat(&self, path: &ContentPath) -> Result<Vec<u8>, StoreError> {
        const OP: &str = "cat";
        let request = self
            .request(OP, self.timeouts.fetch())
            .query(&[("arg", path.to_string())]);
        let response = self.send(OP, request).await?;
        let bytes = response.bytes().await.map_err(|e| transport_error(OP, e))?;
        Ok(bytes.to_vec())
    }

    async fn resolve_path(&self, path: &ContentPath) -> Result<Cid, StoreError> {
        const OP: &str = "resolve";
        let request = self
            .request(OP, self.timeouts.fetch())
            .query(&[("arg", path.to_string()), ("recursive", "true".to_string())]);
        let resolved: PathResponse = self.send_json(OP, request).await?;
        parse_cid(OP, &resolved.path)
    }

    async fn stat(&self, cid: &Cid) -> Result<NodeStat, StoreError> {
        const OP: &str = "files/stat";
        let request = self
            .request(OP, self.timeouts.fetch())
            .query(&[("arg", format!("/ipfs/{cid}"))]);
        let stat: FilesStatResponse = self.send_json(OP, request).await?;
        Ok(NodeStat::new(cid.clone(), stat.cumulative_size))
    }

    async fn add_dir(&self, files: Vec<StagedFile>) -> Result<NodeStat, StoreError> {
        const OP: &str = "add";
        let mut form = Form::new();
        for dir in directories_of(&files) {
            let part = Part::bytes(Vec::new())
                .file_name(escape_filename(&dir))
                .mime_str("application/x-directory")
                .map_err(|e| transport_error(OP, e))?;
            form = form.part("file", part);
        }
        for file in files {
            let name = escape_filename(&format!("{ADD_ROOT}/{}", file.path));
            form = form.part("file", Part::bytes(file.bytes).file_name(name));
        }

        let request = self
            .request(OP, self.timeouts.add())
            .query(&[
                ("recursive", "true"),
                ("cid-version", "1"),
                ("pin", "false"),
                ("progress", "false"),
            ])
            .multipart(form);
        let response = self.send(OP, request).await?;
        let body = response.text().await.map_err(|e| transport_error(OP, e))?;

        let root = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<AddEntry>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::new(ErrorKind::Decode, OP, e.to_string()))?
            .into_iter()
            .find(|entry| entry.name == ADD_ROOT)
            .ok_or_else(|| StoreError::new(ErrorKind::Decode, OP, "no root entry in add output"))?;

        let cid = parse_cid(OP, &root.hash)?;
        match root.size.as_deref().and_then(|s| s.parse::<u64>().ok()) {
            Some(size) => Ok(NodeStat::new(cid, size)),
            None => self.stat(&cid).await,
        }
    }

    async fn pin_add(&self, cid: &Cid, recursive: bool) -> Result<(), StoreError> {
        const OP: &str = "pin/add";
        let request = self
            .request(OP, self.timeouts.pin())
            .query(&[("arg", cid.to_string()), ("recursive", recursive.to_string())]);
        self.send(OP, request).await.map(|_| ())
    }

    async fn pin_rm(&self, cid: &Cid, recursive: bool) -> Result<(), StoreError> {
        const OP: &str = "pin/rm";
        let request = self
            .request(OP, self.timeouts.pin())
            .query(&[("arg", cid.to_string()), ("recursive", recursive.to_string())]);
        self.send(OP, request).await.map(|_| ())
    }

    async fn name_publish(
        &self,
        key: &str,
        cid: &Cid,
        options: &PublishOptions,
    ) -> Result<Published, StoreError> {
        const OP: &str = "name/publish";
        let request = self.request(OP, self.timeouts.publish()).query(&[
            ("arg", format!("/ipfs/{cid}")),
            ("key", key.to_string()),
            ("allow-offline", options.allow_offline.to_string()),
            ("resolve", options.resolve.to_string()),
        ]);
        let published: NamePublishResponse = self.send_json(OP, request).await?;
        Ok(Published {
            name: published.name,
            value: published.value,
        })
    }

    async fn name_resolve(
        &self,
        name: &str,
        options: &ResolveOptions,
    ) -> Result<Cid, StoreError> {
        const OP: &str = "name/resolve";
        let timeout = options.timeout.unwrap_or_else(|| self.timeouts.resolve());
        let request = self.request(OP, timeout).query(&[
            ("arg", name.to_string()),
            ("recursive", options.recursive.to_string()),
            ("nocache", options.nocache.to_string()),
            ("dht-timeout", format!("{}s", timeout.as_secs().max(1))),
        ]);
        let resolved: PathResponse = self.send_json(OP, request).await?;
        parse_cid(OP, &resolved.path)
    }

    async fn key_id(&self, key: &str) -> Result<String, StoreError> {
        const OP: &str = "key/list";
        let request = self
            .request(OP, self.timeouts.fetch())
            .query(&[("l", "true")]);
        let list: KeyListResponse = self.send_json(OP, request).await?;
        list.keys
            .into_iter()
            .find(|k| k.name == key)
            .map(|k| k.id)
            .ok_or_else(|| StoreError::not_found(OP, format!("no key named `{key}`")))
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

fn transport_error(op: &'static str, err: reqwest::Error) -> StoreError {
    let kind = if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_decode() {
        ErrorKind::Decode
    } else {
        ErrorKind::Network
    };
    StoreError::new(kind, op, err.to_string())
}

async fn check_status(op: &'static str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<KuboErrorResponse>(&body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());
    Err(StoreError::new(
        classify_failure(status, &message),
        op,
        format!("{}: {message}", status.as_u16()),
    ))
}

fn classify_failure(status: StatusCode, message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    if status == StatusCode::NOT_FOUND
        || [
            "could not resolve name",
            "no link named",
            "not found",
            "no such",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
    {
        ErrorKind::NotFound
    } else if lower.contains("context deadline exceeded") || lower.contains("timed out") {
        ErrorKind::Timeout
    } else {
        ErrorKind::Api
    }
}

fn parse_cid(op: &'static str, raw: &str) -> Result<Cid, StoreError> {
    Cid::parse(raw).map_err(|e| StoreError::new(ErrorKind::Decode, op, e.to_string()))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct KuboErrorResponse {
    #[serde(rename = "Message")]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DagPutResponse {
    #[serde(rename = "Cid")]
    cid: CidRef,
}

#[derive(Debug, Deserialize)]
struct PathResponse {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct FilesStatResponse {
    #[serde(rename = "CumulativeSize")]
    cumulative_size: u64,
}

#[derive(Debug, Deserialize)]
struct AddEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size", default)]
    size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NamePublishResponse {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct KeyListResponse {
    #[serde(rename = "Keys", default)]
    keys: Vec<KeyEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CidRef {
    #[serde(rename = "/")]
    cid: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct BytesRef {
    #[serde(rename = "/")]
    inner: BytesInner,
}

#[derive(Debug, Serialize, Deserialize)]
struct BytesInner {
    bytes: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct DagJsonLink {
    #[serde(rename = "Hash")]
    hash: CidRef,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Tsize", default)]
    tsize: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct DagJsonNode {
    #[serde(rename = "Data", default, skip_serializing_if = "Option::is_none")]
    data: Option<BytesRef>,
    #[serde(rename = "Links", default)]
    links: Vec<DagJsonLink>,
}

impl DagJsonNode {
    fn from_node(node: &DagNode) -> Self {
        Self {
            data: (!node.data.is_empty()).then(|| BytesRef {
                inner: BytesInner {
                    bytes: STANDARD_NO_PAD.encode(&node.data),
                },
            }),
            links: node
                .links
                .iter()
                .map(|l| DagJsonLink {
                    hash: CidRef {
                        cid: l.hash.to_string(),
                    },
                    name: l.name.clone(),
                    tsize: l.tsize,
                })
                .collect(),
        }
    }
}

fn decode_node(op: &'static str, value: serde_json::Value) -> Result<DagNode, StoreError> {
    let is_pb = value
        .as_object()
        .is_some_and(|o| o.contains_key("Links") || o.contains_key("Data"));
    if !is_pb {
        // Raw leaf: bytes only, never a directory.
        return Ok(DagNode {
            data: Vec::new(),
            links: Vec::new(),
        });
    }

    let wire: DagJsonNode = serde_json::from_value(value)
        .map_err(|e| StoreError::new(ErrorKind::Decode, op, e.to_string()))?;
    let data = match wire.data {
        Some(b) => STANDARD_NO_PAD
            .decode(b.inner.bytes.trim_end_matches('='))
            .map_err(|e| StoreError::new(ErrorKind::Decode, op, e.to_string()))?,
        None => Vec::new(),
    };
    let links = wire
        .links
        .into_iter()
        .map(|l| Ok(Link::new(l.name, parse_cid(op, &l.hash.cid)?, l.tsize)))
        .collect::<Result<Vec<_>, StoreError>>()?;
    Ok(DagNode { data, links })
}

// ---------------------------------------------------------------------------
// Upload helpers
// ---------------------------------------------------------------------------

/// Every directory implied by the file paths, parents first, rooted at
/// [`ADD_ROOT`].
fn directories_of(files: &[StagedFile]) -> Vec<String> {
    let mut dirs = BTreeSet::new();
    dirs.insert(ADD_ROOT.to_string());
    for file in files {
        let mut prefix = ADD_ROOT.to_string();
        let segments: Vec<&str> = file.path.split('/').filter(|s| !s.is_empty()).collect();
        for segment in segments.iter().take(segments.len().saturating_sub(1)) {
            prefix = format!("{prefix}/{segment}");
            dirs.insert(prefix.clone());
        }
    }
    // BTreeSet order puts every parent before its children.
    dirs.into_iter().collect()
}

/// Kubo query-unescapes multipart file names; escape everything but
/// unreserved characters and `/`.
fn escape_filename(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for byte in path.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::DIRECTORY_MARKER;

    #[test]
    fn directory_node_encodes_marker_as_cae() {
        let node = DagNode::directory(vec![Link::new("a", Cid::parse("bafya").unwrap(), 3)]);
        let json = serde_json::to_value(DagJsonNode::from_node(&node)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Data": {"/": {"bytes": "CAE"}},
                "Links": [{"Hash": {"/": "bafya"}, "Name": "a", "Tsize": 3}]
            })
        );
    }

    #[test]
    fn decode_dag_pb_directory() {
        let value = serde_json::json!({
            "Data": {"/": {"bytes": "CAE"}},
            "Links": [{"Hash": {"/": "bafyb"}, "Name": "b", "Tsize": 9}]
        });
        let node = decode_node("dag/get", value).unwrap();
        assert_eq!(node.data, DIRECTORY_MARKER);
        assert_eq!(node.links[0].name, "b");
        assert_eq!(node.links[0].tsize, 9);
    }

    #[test]
    fn decode_raw_leaf_is_not_directory() {
        let value = serde_json::json!({"/": {"bytes": "aGVsbG8"}});
        let node = decode_node("dag/get", value).unwrap();
        assert!(!node.is_directory());
        assert!(node.links.is_empty());
    }

    #[test]
    fn classify_failure_messages() {
        assert_eq!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "could not resolve name"),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "no link named \"x\" under bafy"),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "context deadline exceeded"),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify_failure(StatusCode::BAD_REQUEST, "invalid path"),
            ErrorKind::Api
        );
    }

    #[test]
    fn directories_are_listed_parents_first() {
        let files = vec![
            StagedFile::new("assets/img/logo.png", b"x".to_vec()),
            StagedFile::new("index.html", b"y".to_vec()),
        ];
        assert_eq!(
            directories_of(&files),
            vec!["staged", "staged/assets", "staged/assets/img"]
        );
    }

    #[test]
    fn filenames_are_query_escaped() {
        assert_eq!(escape_filename("staged/a b+c.txt"), "staged/a%20b%2Bc.txt");
        assert_eq!(escape_filename("staged/ok-name_1.js"), "staged/ok-name_1.js");
    }
}
