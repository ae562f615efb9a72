use crate::{
    error::{
        CollectError,
        MappingError,
    },
    upstream::Upstream,
};
use serde_json::Value;
use std::sync::Arc;

/// The upstream maximum for `limit`.
pub const DEFAULT_PAGE_SIZE: u32 = 100;
pub const DEFAULT_MAX_PAGES: u32 = 10_000;

/// Walks a cursor-paginated collection: `limit=<page_size>`, then `starting_after=<id of last record>` while the
/// response sets `has_more`.
#[derive(Clone)]
pub struct Paginator {
    upstream: Arc<dyn Upstream>,
    page_size: u32,
    max_pages: u32,
}

impl Paginator {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self {
            upstream,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, DEFAULT_PAGE_SIZE);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub fn upstream(&self) -> &dyn Upstream {
        self.upstream.as_ref()
    }

    /// Fetch every page of `path` and return the records in upstream order.
    ///
    /// All or nothing: a failure on any page discards the pages fetched so far. A server that keeps announcing
    /// more data without moving the cursor forward is reported as malformed instead of being followed forever.
    pub async fn fetch_collection(&self, path: &str) -> Result<Vec<Value>, CollectError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        for page in 1..=self.max_pages {
            let mut query = vec![("limit", self.page_size.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("starting_after", cursor.clone()));
            }

            let body = self.upstream.get(path, &query).await?;
            let (data, has_more) = parse_page(path, body)?;

            if !has_more {
                records.extend(data);
                debug!(path, pages = page, records = records.len(), "fetched collection");
                return Ok(records);
            }

            let next = data.last().and_then(record_id).ok_or_else(|| MappingError::Malformed {
                field: "has_more".to_string(),
                reason: format!("{path} page {page} announces more data but has no record id to continue from"),
            })?;
            if cursor.as_deref() == Some(next.as_str()) {
                return Err(MappingError::Malformed {
                    field: "starting_after".to_string(),
                    reason: format!("{path} page {page} did not advance past cursor {next}"),
                }
                .into());
            }

            records.extend(data);
            cursor = Some(next);
        }

        Err(MappingError::Malformed {
            field: "has_more".to_string(),
            reason: format!("{path} still announces more data after {} pages", self.max_pages),
        }
        .into())
    }
}

/// String form of a record's `id`, which the API sends as a number.
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn parse_page(path: &str, body: Value) -> Result<(Vec<Value>, bool), MappingError> {
    let Value::Object(mut envelope) = body else {
        return Err(MappingError::Malformed {
            field: "data".to_string(),
            reason: format!("{path} did not return a JSON object"),
        });
    };

    let data = match envelope.remove("data") {
        Some(Value::Array(data)) => data,
        Some(other) => {
            return Err(MappingError::Malformed {
                field: "data".to_string(),
                reason: format!("{path} returned {other} instead of a list"),
            })
        }
        None => return Err(MappingError::MissingField("data".to_string())),
    };

    let has_more = match envelope.get("has_more") {
        None | Some(Value::Null) => false,
        Some(Value::Bool(has_more)) => *has_more,
        Some(other) => {
            return Err(MappingError::Malformed {
                field: "has_more".to_string(),
                reason: format!("{path} returned {other} instead of a boolean"),
            })
        }
    };

    Ok((data, has_more))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mock::{
        record,
        MockUpstream,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn records(ids: std::ops::Range<u64>) -> Vec<Value> {
        ids.map(|id| record(id, json!({ "name": format!("device {id}") }))).collect()
    }

    fn paginator(mock: &Arc<MockUpstream>) -> Paginator {
        Paginator::new(mock.clone())
    }

    #[tokio::test]
    async fn concatenates_all_pages_in_order() {
        let mock = Arc::new(MockUpstream::new());
        mock.paged("devices", vec![records(1..101), records(101..201), records(201..238)]);

        let fetched = paginator(&mock).fetch_collection("devices").await.unwrap();

        let expected: Vec<Value> = records(1..238);
        assert_eq!(fetched, expected);
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn single_page_without_more_data_makes_one_request() {
        let mock = Arc::new(MockUpstream::new());
        mock.collection("apps", records(1..5));

        let fetched = paginator(&mock).fetch_collection("apps").await.unwrap();

        assert_eq!(fetched, records(1..5));
        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].param("limit"), Some("100"));
        assert_eq!(requests[0].param("starting_after"), None);
    }

    #[tokio::test]
    async fn cursor_is_the_id_of_the_previous_last_record() {
        let mock = Arc::new(MockUpstream::new());
        mock.paged("profiles", vec![records(1..3), records(7..9), records(20..21)]);

        paginator(&mock).fetch_collection("profiles").await.unwrap();

        let cursors: Vec<Option<String>> = mock
            .requests()
            .iter()
            .map(|r| r.param("starting_after").map(str::to_string))
            .collect();
        assert_eq!(cursors, vec![None, Some("2".to_string()), Some("8".to_string())]);
    }

    #[tokio::test]
    async fn string_ids_are_used_verbatim_as_cursor() {
        let mock = Arc::new(MockUpstream::new());
        mock.raw(
            "enrollments",
            None,
            json!({ "data": [{ "id": "abc" }], "has_more": true }),
        )
        .raw(
            "enrollments",
            Some("abc"),
            json!({ "data": [{ "id": "def" }], "has_more": false }),
        );

        let fetched = paginator(&mock).fetch_collection("enrollments").await.unwrap();

        assert_eq!(fetched, vec![json!({ "id": "abc" }), json!({ "id": "def" })]);
    }

    #[tokio::test]
    async fn failure_on_a_later_page_discards_everything() {
        let mock = Arc::new(MockUpstream::new());
        mock.raw(
            "devices",
            None,
            json!({ "data": records(1..3), "has_more": true }),
        );

        let err = paginator(&mock).fetch_collection("devices").await.unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn upstream_status_is_reported() {
        let mock = Arc::new(MockUpstream::new());
        mock.fail("devices", 401);

        let err = paginator(&mock).fetch_collection("devices").await.unwrap_err();

        assert!(matches!(err, CollectError::Upstream { status: 401, .. }));
    }

    #[tokio::test]
    async fn empty_page_announcing_more_data_is_malformed() {
        let mock = Arc::new(MockUpstream::new());
        mock.raw("apps", None, json!({ "data": [], "has_more": true }));

        let err = paginator(&mock).fetch_collection("apps").await.unwrap_err();

        assert!(matches!(err, CollectError::Mapping(MappingError::Malformed { .. })));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn stuck_cursor_is_malformed() {
        let mock = Arc::new(MockUpstream::new());
        let page = json!({ "data": records(1..3), "has_more": true });
        mock.raw("apps", None, page.clone()).raw("apps", Some("2"), page);

        let err = paginator(&mock).fetch_collection("apps").await.unwrap_err();

        assert!(matches!(err, CollectError::Mapping(MappingError::Malformed { .. })));
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn page_cap_bounds_a_server_that_never_stops() {
        let mock = Arc::new(MockUpstream::new());
        mock.raw("apps", None, json!({ "data": [{ "id": 1 }], "has_more": true }));
        for id in 1..10 {
            mock.raw(
                "apps",
                Some(&id.to_string()),
                json!({ "data": [{ "id": id + 1 }], "has_more": true }),
            );
        }

        let err = paginator(&mock)
            .with_max_pages(5)
            .fetch_collection("apps")
            .await
            .unwrap_err();

        assert!(matches!(err, CollectError::Mapping(MappingError::Malformed { .. })));
        assert_eq!(mock.requests().len(), 5);
    }

    #[tokio::test]
    async fn missing_data_is_reported() {
        let mock = Arc::new(MockUpstream::new());
        mock.raw("apps", None, json!({ "has_more": false }));

        let err = paginator(&mock).fetch_collection("apps").await.unwrap_err();

        assert!(matches!(
            err,
            CollectError::Mapping(MappingError::MissingField(ref field)) if field == "data"
        ));
    }

    #[tokio::test]
    async fn custom_page_size_is_sent_as_limit() {
        let mock = Arc::new(MockUpstream::new());
        mock.collection("apps", records(1..2));

        paginator(&mock).with_page_size(25).fetch_collection("apps").await.unwrap();

        assert_eq!(mock.requests()[0].param("limit"), Some("25"));
    }
}
