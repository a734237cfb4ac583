//! [`IndexService`] over an Elasticsearch-compatible REST API.
//!
//! Search uses the scroll API sorted by `_doc`; writes use `_bulk` with
//! `create` actions so existing documents are never overwritten.

use std::time::Duration;

use async_trait::async_trait;
use essync_types::{CursorToken, DocumentRecord};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use crate::endpoint::ClusterEndpoint;
use crate::error::{Result, ServiceError};
use crate::service::{BulkOutcome, IndexService, RejectedRecord, SearchPage};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_IDLE_PER_HOST: usize = 300;

/// HTTP client bound to one cluster.
pub struct HttpIndexService {
    name: String,
    base_url: String,
    endpoint: ClusterEndpoint,
    client: reqwest::Client,
    scroll_keepalive: String,
}

impl HttpIndexService {
    /// Build a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Config`] if the underlying HTTP client cannot
    /// be constructed (e.g. TLS backend initialisation fails).
    pub fn new(
        name: impl Into<String>,
        endpoint: ClusterEndpoint,
        scroll_keepalive: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| ServiceError::Config(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            base_url: endpoint.base_url(),
            endpoint,
            client,
            scroll_keepalive: format!("{}s", scroll_keepalive.as_secs().max(1)),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match self.endpoint.credentials() {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn send(&self, operation: &'static str, builder: RequestBuilder) -> Result<reqwest::Response> {
        tracing::trace!(service = %self.name, operation, "Sending request");
        builder
            .send()
            .await
            .map_err(|source| ServiceError::Transport { operation, source })
    }

    /// Send and decode a JSON body, mapping non-success statuses to
    /// [`ServiceError::Status`].
    ///
    /// A body that stops arriving (connection dropped, timeout) is a
    /// transport error; only a complete body that is not JSON is malformed.
    async fn send_json(&self, operation: &'static str, builder: RequestBuilder) -> Result<Value> {
        let response = self.send(operation, builder).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(operation, status, response).await);
        }
        let body = response
            .bytes()
            .await
            .map_err(|source| ServiceError::Transport { operation, source })?;
        serde_json::from_slice(&body).map_err(|e| ServiceError::malformed(operation, e.to_string()))
    }
}

async fn status_error(
    operation: &'static str,
    status: StatusCode,
    response: reqwest::Response,
) -> ServiceError {
    let body = response.text().await.unwrap_or_default();
    ServiceError::Status {
        operation,
        status: status.as_u16(),
        body: truncate_body(body),
    }
}

fn truncate_body(mut body: String) -> String {
    const LIMIT: usize = 512;
    if body.len() > LIMIT {
        let mut cut = LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push('…');
    }
    body
}

#[async_trait]
impl IndexService for HttpIndexService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, index: &str) -> Result<bool> {
        let response = self
            .send("exists", self.request(Method::HEAD, index))
            .await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(status_error("exists", status, response).await),
        }
    }

    async fn get_mapping(&self, index: &str) -> Result<Value> {
        let body = self
            .send_json(
                "get_mapping",
                self.request(Method::GET, &format!("{index}/_mapping")),
            )
            .await?;
        extract_mapping(index, &body)
    }

    async fn create_index(&self, index: &str, mapping: &Value) -> Result<()> {
        let builder = self
            .request(Method::PUT, index)
            .json(&json!({ "mappings": mapping }));
        self.send_json("create_index", builder).await?;
        Ok(())
    }

    async fn count(&self, index: &str) -> Result<u64> {
        let body = self
            .send_json("count", self.request(Method::GET, &format!("{index}/_count")))
            .await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| ServiceError::malformed("count", "missing numeric 'count'"))
    }

    async fn search(
        &self,
        index: &str,
        page_size: usize,
        cursor: Option<&CursorToken>,
    ) -> Result<SearchPage> {
        let builder = match cursor {
            None => self
                .request(
                    Method::POST,
                    &format!("{index}/_search?scroll={}", self.scroll_keepalive),
                )
                .json(&json!({
                    "size": page_size,
                    "sort": ["_doc"],
                    "query": { "match_all": {} },
                })),
            Some(token) => self
                .request(Method::POST, "_search/scroll")
                .json(&json!({
                    "scroll": self.scroll_keepalive,
                    "scroll_id": token.as_str(),
                })),
        };
        let body = self.send_json("search", builder).await?;
        parse_search_response(&body)
    }

    async fn close_cursors(&self, tokens: &[CursorToken]) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = tokens.iter().map(CursorToken::as_str).collect();
        let builder = self
            .request(Method::DELETE, "_search/scroll")
            .json(&json!({ "scroll_id": ids }));
        let response = self.send("close_cursors", builder).await?;
        match response.status() {
            // 404: every context already expired.
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => Err(status_error("close_cursors", status, response).await),
        }
    }

    async fn bulk_create(&self, index: &str, records: &[DocumentRecord]) -> Result<BulkOutcome> {
        if records.is_empty() {
            return Ok(BulkOutcome::default());
        }
        let (body, unencodable) = render_bulk_body(index, records);
        if body.is_empty() {
            return Ok(BulkOutcome {
                rejected: unencodable,
                ..BulkOutcome::default()
            });
        }
        let builder = self
            .request(Method::POST, "_bulk")
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body);
        let response = self.send_json("bulk_create", builder).await?;
        let mut outcome = parse_bulk_response(&response)?;
        outcome.rejected.extend(unencodable);
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Pull the `mappings` object out of a `GET /{index}/_mapping` response.
///
/// The response is keyed by the concrete index name, which differs from the
/// requested name when `index` is an alias, so the first entry is taken.
pub(crate) fn extract_mapping(index: &str, body: &Value) -> Result<Value> {
    body.as_object()
        .and_then(|obj| obj.get(index).or_else(|| obj.values().next()))
        .and_then(|entry| entry.get("mappings"))
        .cloned()
        .ok_or_else(|| ServiceError::malformed("get_mapping", "missing 'mappings'"))
}

/// Decode one scroll page.
///
/// The continuation token is only returned alongside a non-empty page; an
/// empty page ends the stream regardless of `_scroll_id`.
pub(crate) fn parse_search_response(body: &Value) -> Result<SearchPage> {
    let hits = body
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .ok_or_else(|| ServiceError::malformed("search", "missing 'hits.hits'"))?;

    let mut records = Vec::with_capacity(hits.len());
    for hit in hits {
        let id = hit
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::malformed("search", "hit without '_id'"))?;
        let source = hit
            .get("_source")
            .ok_or_else(|| ServiceError::malformed("search", format!("hit {id} without '_source'")))?;
        records.push(DocumentRecord::new(id, source.to_string()));
    }

    let next_token = if records.is_empty() {
        None
    } else {
        body.get("_scroll_id")
            .and_then(Value::as_str)
            .map(CursorToken::new)
    };
    Ok(SearchPage {
        records,
        next_token,
    })
}

/// Render NDJSON `create` actions for `records`.
///
/// Payloads must occupy a single line; multi-line payloads are re-encoded
/// compactly and payloads that are not valid JSON are returned as rejected.
pub(crate) fn render_bulk_body(
    index: &str,
    records: &[DocumentRecord],
) -> (String, Vec<RejectedRecord>) {
    let mut body = String::with_capacity(records.iter().map(|r| r.payload.len() + 64).sum());
    let mut rejected = Vec::new();
    for record in records {
        let payload = if record.payload.contains('\n') {
            match serde_json::from_str::<Value>(&record.payload) {
                Ok(value) => value.to_string(),
                Err(e) => {
                    rejected.push(RejectedRecord {
                        id: record.id.clone(),
                        status: 400,
                        reason: format!("payload is not valid JSON: {e}"),
                    });
                    continue;
                }
            }
        } else {
            record.payload.clone()
        };
        let action = json!({ "create": { "_index": index, "_id": record.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&payload);
        body.push('\n');
    }
    (body, rejected)
}

/// Classify each item of a `_bulk` response.
pub(crate) fn parse_bulk_response(body: &Value) -> Result<BulkOutcome> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ServiceError::malformed("bulk_create", "missing 'items'"))?;

    let mut outcome = BulkOutcome::default();
    for item in items {
        let Some(result) = item.get("create").or_else(|| item.get("index")) else {
            return Err(ServiceError::malformed("bulk_create", "item without 'create'"));
        };
        let status = result
            .get("status")
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .unwrap_or(500);
        match status {
            200..=299 => outcome.created += 1,
            409 => outcome.already_present += 1,
            _ => {
                let id = result
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let error = result.get("error");
                let kind = error
                    .and_then(|e| e.get("type"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                let reason = error
                    .and_then(|e| e.get("reason"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                outcome.rejected.push(RejectedRecord {
                    id,
                    status,
                    reason: format!("{kind}: {reason}"),
                });
            }
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_page_carries_compact_sources() {
        let body = json!({
            "_scroll_id": "scroll-abc",
            "hits": { "total": { "value": 2 }, "hits": [
                { "_id": "1", "_source": { "name": "a", "qty": 3 } },
                { "_id": "2", "_source": { "name": "b" } }
            ]}
        });
        let page = parse_search_response(&body).unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].id, "1");
        assert_eq!(page.records[0].payload, r#"{"name":"a","qty":3}"#);
        assert_eq!(page.next_token, Some(CursorToken::new("scroll-abc")));
    }

    #[test]
    fn empty_page_drops_token() {
        let body = json!({ "_scroll_id": "scroll-abc", "hits": { "hits": [] } });
        let page = parse_search_response(&body).unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn hit_without_source_is_malformed() {
        let body = json!({ "hits": { "hits": [ { "_id": "1" } ] } });
        let err = parse_search_response(&body).unwrap_err();
        assert!(matches!(err, ServiceError::Malformed { .. }));
    }

    #[test]
    fn mapping_is_taken_from_concrete_index_entry() {
        let body = json!({
            "orders-v2": { "mappings": { "properties": { "qty": { "type": "long" } } } }
        });
        let mapping = extract_mapping("orders", &body).unwrap();
        assert_eq!(mapping["properties"]["qty"]["type"], "long");
    }

    #[test]
    fn bulk_body_is_ndjson_create_actions() {
        let records = vec![
            DocumentRecord::new("1", r#"{"a":1}"#),
            DocumentRecord::new("2", "{\n  \"a\": 2\n}"),
        ];
        let (body, rejected) = render_bulk_body("orders", &records);
        assert!(rejected.is_empty());
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["create"]["_index"], "orders");
        assert_eq!(action["create"]["_id"], "1");
        assert_eq!(lines[3], r#"{"a":2}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn multiline_non_json_payload_is_rejected() {
        let records = vec![DocumentRecord::new("bad", "not\njson")];
        let (body, rejected) = render_bulk_body("orders", &records);
        assert!(body.is_empty());
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].id, "bad");
    }

    #[test]
    fn bulk_response_classifies_items() {
        let body = json!({
            "errors": true,
            "items": [
                { "create": { "_id": "1", "status": 201 } },
                { "create": { "_id": "2", "status": 409,
                    "error": { "type": "version_conflict_engine_exception", "reason": "exists" } } },
                { "create": { "_id": "3", "status": 429,
                    "error": { "type": "es_rejected_execution_exception", "reason": "queue full" } } },
                { "create": { "_id": "4", "status": 400,
                    "error": { "type": "mapper_parsing_exception", "reason": "bad field" } } }
            ]
        });
        let outcome = parse_bulk_response(&body).unwrap();
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.already_present, 1);
        assert_eq!(outcome.written(), 2);
        assert_eq!(outcome.rejected.len(), 2);
        assert!(outcome.rejected[0].is_retryable());
        assert!(!outcome.rejected[1].is_retryable());
        assert!(outcome.rejected[1].reason.starts_with("mapper_parsing_exception"));
    }

    #[test]
    fn long_error_bodies_are_truncated() {
        let body = truncate_body("é".repeat(400));
        assert!(body.len() <= 515);
        assert!(body.ends_with('…'));
    }

    #[test]
    fn keepalive_is_rendered_in_seconds() {
        let svc = HttpIndexService::new(
            "source",
            ClusterEndpoint::new("localhost", 9200),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(svc.scroll_keepalive, "60s");
        assert_eq!(svc.name(), "source");
        assert_eq!(svc.base_url, "http://localhost:9200");
    }

    /// Accept one connection, read the whole request, answer with `head`
    /// and `body` verbatim, then close.
    fn serve_once(head: &'static str, body: &'static [u8]) -> (u16, std::thread::JoinHandle<()>) {
        use std::io::Write;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            read_request(&mut stream);
            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(body).unwrap();
            stream.flush().unwrap();
        });
        (port, handle)
    }

    fn read_request(stream: &mut std::net::TcpStream) {
        use std::io::Read;

        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        line.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn local_service(port: u16) -> HttpIndexService {
        HttpIndexService::new(
            "source",
            ClusterEndpoint::new("127.0.0.1", port),
            Duration::from_secs(60),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn truncated_body_is_a_transient_transport_error() {
        let (port, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 1000\r\n\r\n",
            br#"{"hits": {"#,
        );
        let err = local_service(port).search("orders", 10, None).await.unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, ServiceError::Transport { operation: "search", .. }), "got: {err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn complete_non_json_body_is_malformed() {
        let (port, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 9\r\n\r\n",
            b"not json!",
        );
        let err = local_service(port).count("orders").await.unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, ServiceError::Malformed { operation: "count", .. }), "got: {err:?}");
        assert!(!err.is_transient());
    }
}
