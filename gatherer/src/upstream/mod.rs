//! Access to the SimpleMDM REST API.
//!
//! Collectors only ever talk to the [`Upstream`] trait so that the whole engine can be driven from canned JSON in
//! tests. [`ApiClient`] is the production implementation.

mod client;
#[cfg(test)]
pub(crate) mod mock;

use crate::error::{
    CollectError,
    MappingError,
};
pub use client::ApiClient;
use serde_json::Value;
use std::{
    future::Future,
    pin::Pin,
};

pub type UpstreamFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, CollectError>> + Send + 'a>>;

/// A JSON-over-HTTP source for resource collections and detail objects.
pub trait Upstream: Send + Sync {
    /// `GET <base>/<path>?<query>` and decode the body as JSON.
    fn get<'a>(&'a self, path: &'a str, query: &'a [(&'static str, String)]) -> UpstreamFuture<'a>;
}

/// Fetch a single object (`{ "data": { ... } }`) and return its `data` member.
pub async fn fetch_detail(upstream: &dyn Upstream, path: &str) -> Result<Value, CollectError> {
    let mut body = upstream.get(path, &[]).await?;
    match body.get_mut("data").map(Value::take) {
        Some(data @ Value::Object(_)) => Ok(data),
        Some(other) => Err(MappingError::Malformed {
            field: "data".to_string(),
            reason: format!("expected an object from {path}, got {other}"),
        }
        .into()),
        None => Err(MappingError::MissingField("data".to_string()).into()),
    }
}
