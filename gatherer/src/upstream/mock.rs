//! Canned upstream used by the engine's tests.

use super::{
    Upstream,
    UpstreamFuture,
};
use crate::{
    error::CollectError,
    paginate::record_id,
};
use parking_lot::Mutex;
use serde_json::{
    json,
    Value,
};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Request {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl Request {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Responses are keyed by path and `starting_after` cursor.
#[derive(Default)]
pub(crate) struct MockUpstream {
    responses: Mutex<HashMap<(String, Option<String>), Value>>,
    failures: Mutex<HashMap<String, u16>>,
    requests: Mutex<Vec<Request>>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `pages` for `path`, chaining them through the id of each page's last record.
    pub fn paged(&self, path: &str, pages: Vec<Vec<Value>>) -> &Self {
        let mut responses = self.responses.lock();
        responses.retain(|(p, _), _| p != path);

        let mut cursor = None;
        let count = pages.len();
        for (index, page) in pages.into_iter().enumerate() {
            let next_cursor = page.last().and_then(record_id);
            responses.insert(
                (path.to_string(), cursor),
                json!({ "data": page, "has_more": index + 1 < count }),
            );
            cursor = next_cursor;
        }
        drop(responses);
        self.failures.lock().remove(path);
        self
    }

    /// Serve a single collection page.
    pub fn collection(&self, path: &str, records: Vec<Value>) -> &Self {
        self.paged(path, vec![records])
    }

    /// Serve a detail object as `{ "data": ... }`.
    pub fn detail(&self, path: &str, data: Value) -> &Self {
        self.raw(path, None, json!({ "data": data }))
    }

    /// Serve an arbitrary body for one `(path, cursor)` pair.
    pub fn raw(&self, path: &str, cursor: Option<&str>, body: Value) -> &Self {
        self.responses
            .lock()
            .insert((path.to_string(), cursor.map(str::to_string)), body);
        self
    }

    /// Answer every request to `path` with the given HTTP status.
    pub fn fail(&self, path: &str, status: u16) -> &Self {
        self.failures.lock().insert(path.to_string(), status);
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Request> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }

    fn respond(&self, path: &str, query: &[(&'static str, String)]) -> Result<Value, CollectError> {
        let request = Request {
            path: path.to_string(),
            query: query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        };
        let cursor = request.param("starting_after").map(str::to_string);
        self.requests.lock().push(request);

        if let Some(status) = self.failures.lock().get(path) {
            return Err(CollectError::Upstream {
                path: path.to_string(),
                status: *status,
                body: json!({ "error": "injected failure" }).to_string(),
            });
        }

        self.responses
            .lock()
            .get(&(path.to_string(), cursor))
            .cloned()
            .ok_or_else(|| CollectError::Upstream {
                path: path.to_string(),
                status: 404,
                body: "not found".to_string(),
            })
    }
}

impl Upstream for MockUpstream {
    fn get<'a>(&'a self, path: &'a str, query: &'a [(&'static str, String)]) -> UpstreamFuture<'a> {
        let response = self.respond(path, query);
        Box::pin(async move { response })
    }
}

/// A SimpleMDM style record.
pub(crate) fn record(id: u64, attributes: Value) -> Value {
    json!({ "id": id, "type": "record", "attributes": attributes, "relationships": {} })
}

/// A SimpleMDM style record with relationships.
pub(crate) fn record_with(id: u64, attributes: Value, relationships: Value) -> Value {
    json!({ "id": id, "type": "record", "attributes": attributes, "relationships": relationships })
}
