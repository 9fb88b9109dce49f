use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use url::Url;

use super::types::{Feed, NewFeedItem, StatusUpdate, StoreError};
use super::FeedStore;

const FEEDS: &str = "feeds";
const FEED_ITEMS: &str = "feed_items";

/// Records requested per page when listing a collection.
const PAGE_SIZE: u32 = 200;

/// One page of a collection listing.
#[derive(Debug, Deserialize)]
struct RecordPage<T> {
    page: u32,
    #[serde(rename = "totalPages")]
    total_pages: i64,
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HashRecord {
    #[serde(default)]
    content_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: Option<String>,
}

/// Client for a PocketBase-style record API exposing the `feeds` and
/// `feed_items` collections.
///
/// Cloning is cheap: the underlying `reqwest::Client` is reference counted
/// and the token is shared read-only. The handle carries an already
/// authenticated session; see [`RecordStore::login`].
#[derive(Clone)]
pub struct RecordStore {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RecordStore {
    /// Creates a store handle for `base_url` (e.g. `http://127.0.0.1:8090`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidUrl`] if `base_url` does not parse.
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        token: Option<SecretString>,
    ) -> Result<Self, StoreError> {
        let parsed = Url::parse(base_url.trim())?;
        let base_url = parsed.as_str().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Exchanges admin credentials for a bearer token.
    ///
    /// Tries the legacy `/api/admins/auth-with-password` endpoint first and
    /// falls back to the `_superusers` collection used by newer servers when
    /// the former is missing (404).
    pub async fn login(
        client: &reqwest::Client,
        base_url: &str,
        identity: &str,
        password: &SecretString,
    ) -> Result<SecretString, StoreError> {
        let base = Url::parse(base_url.trim())?;
        let base = base.as_str().trim_end_matches('/');
        let body = json!({
            "identity": identity,
            "password": password.expose_secret(),
        });

        let endpoints = [
            "api/admins/auth-with-password",
            "api/collections/_superusers/auth-with-password",
        ];

        for endpoint in endpoints {
            let response = client
                .post(format!("{}/{}", base, endpoint))
                .json(&body)
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::NOT_FOUND {
                tracing::debug!(endpoint = endpoint, "Auth endpoint not found, trying next");
                continue;
            }

            let response = check_status(response).await?;
            let auth: AuthResponse = response.json().await?;
            return match auth.token {
                Some(token) if !token.is_empty() => {
                    tracing::info!(endpoint = endpoint, "Authenticated against record store");
                    Ok(SecretString::from(token))
                }
                _ => Err(StoreError::Auth("response did not contain a token".into())),
            };
        }

        Err(StoreError::Auth("no admin auth endpoint available".into()))
    }

    fn records_url(&self, collection: &str) -> Result<Url, StoreError> {
        Ok(Url::parse(&format!(
            "{}/api/collections/{}/records",
            self.base_url, collection
        ))?)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Lists every record of `collection`, following pagination to the end.
    async fn list_records<T: DeserializeOwned>(
        &self,
        collection: &str,
        filter: Option<&str>,
        fields: Option<&str>,
    ) -> Result<Vec<T>, StoreError> {
        let mut records = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut url = self.records_url(collection)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("page", &page.to_string());
                query.append_pair("perPage", &PAGE_SIZE.to_string());
                if let Some(filter) = filter {
                    query.append_pair("filter", filter);
                }
                if let Some(fields) = fields {
                    query.append_pair("fields", fields);
                }
            }

            let response = self.authorize(self.client.get(url)).send().await?;
            let response = check_status(response).await?;
            let body: RecordPage<T> = response.json().await?;

            let received = body.items.len();
            records.extend(body.items);

            if received == 0 || i64::from(body.page) >= body.total_pages {
                break;
            }
            page = body.page.saturating_add(1);
        }

        Ok(records)
    }
}

#[async_trait]
impl FeedStore for RecordStore {
    async fn list_feeds(&self) -> Result<Vec<Feed>, StoreError> {
        self.list_records(FEEDS, None, None).await
    }

    async fn existing_hashes(&self, feed_id: &str) -> Result<HashSet<String>, StoreError> {
        let filter = format!("feed_id={}", filter_literal(feed_id));
        let records: Vec<HashRecord> = self
            .list_records(FEED_ITEMS, Some(&filter), Some("content_hash"))
            .await?;

        Ok(records
            .into_iter()
            .filter_map(|r| r.content_hash)
            .collect())
    }

    async fn insert_feed_item(&self, item: &NewFeedItem) -> Result<(), StoreError> {
        let url = self.records_url(FEED_ITEMS)?;
        let response = self.authorize(self.client.post(url)).json(item).send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn update_feed_status(
        &self,
        feed_id: &str,
        update: &StatusUpdate,
    ) -> Result<(), StoreError> {
        let mut url = self.records_url(FEEDS)?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Decode("store base URL cannot hold a path".into()))?
            .push(feed_id);

        let response = self
            .authorize(self.client.patch(url))
            .json(&status_patch(update))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

/// PATCH body for a status update. Validators are omitted entirely when
/// the update leaves them alone; a replaced but absent token is written as
/// the empty string, which the store treats as unset.
fn status_patch(update: &StatusUpdate) -> Value {
    let mut body = Map::new();
    body.insert("fetch_status".into(), json!(update.fetch_status));
    body.insert(
        "last_fetched".into(),
        json!(update.last_fetched.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
    );
    body.insert("error_message".into(), json!(update.error_message));
    if let Some(validators) = &update.validators {
        body.insert(
            "etag".into(),
            json!(validators.etag.as_deref().unwrap_or_default()),
        );
        body.insert(
            "last_modified".into(),
            json!(validators.last_modified.as_deref().unwrap_or_default()),
        );
    }
    Value::Object(body)
}

/// Quotes a value for use inside a record filter expression.
fn filter_literal(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Turns a non-2xx response into [`StoreError::Rejected`], extracting the
/// API's `message` field when the body is JSON.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
        .unwrap_or(body);

    Err(StoreError::Rejected {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FetchStatus;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store_for(server: &MockServer) -> RecordStore {
        RecordStore::new(
            reqwest::Client::new(),
            &server.uri(),
            Some(SecretString::from("tok")),
        )
        .unwrap()
    }

    fn page(page: u32, total_pages: i64, items: Value) -> Value {
        json!({
            "page": page,
            "perPage": PAGE_SIZE,
            "totalItems": -1,
            "totalPages": total_pages,
            "items": items,
        })
    }

    #[tokio::test]
    async fn test_list_feeds_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/collections/feeds/records"))
            .and(query_param("page", "1"))
            .and(header("Authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                1,
                2,
                json!([{"id": "a", "url": "https://a.example/rss", "title": "A"}]),
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/collections/feeds/records"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                2,
                2,
                json!([{"id": "b", "url": "https://b.example/rss", "title": "B",
                        "fetch_status": "failed", "error_message": "timeout"}]),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let feeds = store_for(&server).list_feeds().await.unwrap();

        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds[0].id, "a");
        assert_eq!(feeds[1].fetch_status, FetchStatus::Failed);
        assert_eq!(feeds[1].error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_existing_hashes_filters_by_feed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/collections/feed_items/records"))
            .and(query_param("filter", "feed_id=\"f1\""))
            .and(query_param("fields", "content_hash"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                1,
                1,
                json!([{"content_hash": "h1"}, {"content_hash": "h2"}, {}]),
            )))
            .expect(1)
            .mount(&server)
            .await;

        let hashes = store_for(&server).existing_hashes("f1").await.unwrap();

        assert_eq!(hashes.len(), 2);
        assert!(hashes.contains("h1"));
        assert!(hashes.contains("h2"));
    }

    #[tokio::test]
    async fn test_insert_feed_item_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/collections/feed_items/records"))
            .and(body_json(json!({
                "feed_id": "f1",
                "title": "Hello",
                "link": "https://example.com/1",
                "published": "2024-01-02T03:04:05Z",
                "summary": "Body",
                "author": "",
                "image_url": null,
                "content_hash": "abc",
                "read_by": [],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "new"})))
            .expect(1)
            .mount(&server)
            .await;

        let item = NewFeedItem {
            feed_id: "f1".into(),
            title: "Hello".into(),
            link: "https://example.com/1".into(),
            published: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            summary: "Body".into(),
            author: String::new(),
            image_url: None,
            content_hash: "abc".into(),
            read_by: Vec::new(),
        };

        store_for(&server).insert_feed_item(&item).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_write_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 400,
                "message": "Failed to create record.",
                "data": {}
            })))
            .mount(&server)
            .await;

        let item = NewFeedItem {
            feed_id: "f1".into(),
            title: String::new(),
            link: String::new(),
            published: None,
            summary: String::new(),
            author: String::new(),
            image_url: None,
            content_hash: "abc".into(),
            read_by: Vec::new(),
        };

        match store_for(&server).insert_feed_item(&item).await {
            Err(StoreError::Rejected { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Failed to create record.");
            }
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_status_omits_unset_validators() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        Mock::given(method("PATCH"))
            .and(path("/api/collections/feeds/records/f1"))
            .and(body_json(json!({
                "fetch_status": "failed",
                "last_fetched": "2024-05-06T07:08:09.000Z",
                "error_message": "Request timed out",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "f1"})))
            .expect(1)
            .mount(&server)
            .await;

        store_for(&server)
            .update_feed_status("f1", &StatusUpdate::failed(now, "Request timed out"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_status_success_writes_validators() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        Mock::given(method("PATCH"))
            .and(path("/api/collections/feeds/records/f1"))
            .and(body_json(json!({
                "fetch_status": "success",
                "last_fetched": "2024-05-06T07:08:09.000Z",
                "error_message": null,
                "etag": "\"v2\"",
                "last_modified": "Mon, 06 May 2024 07:00:00 GMT",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "f1"})))
            .expect(1)
            .mount(&server)
            .await;

        let update = StatusUpdate::success(
            now,
            Some("\"v2\"".into()),
            Some("Mon, 06 May 2024 07:00:00 GMT".into()),
        );
        store_for(&server).update_feed_status("f1", &update).await.unwrap();
    }

    #[tokio::test]
    async fn test_update_status_success_clears_missing_validators() {
        let server = MockServer::start().await;
        let now = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        Mock::given(method("PATCH"))
            .and(path("/api/collections/feeds/records/f1"))
            .and(body_json(json!({
                "fetch_status": "success",
                "last_fetched": "2024-05-06T07:08:09.000Z",
                "error_message": null,
                "etag": "",
                "last_modified": "Mon, 06 May 2024 07:00:00 GMT",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "f1"})))
            .expect(1)
            .mount(&server)
            .await;

        let update =
            StatusUpdate::success(now, None, Some("Mon, 06 May 2024 07:00:00 GMT".into()));
        store_for(&server).update_feed_status("f1", &update).await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        // Nothing listens on port 9 (discard) in the test environment
        let store =
            RecordStore::new(reqwest::Client::new(), "http://127.0.0.1:9", None).unwrap();
        assert!(matches!(
            store.list_feeds().await,
            Err(StoreError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_login_falls_back_to_superusers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admins/auth-with-password"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/collections/_superusers/auth-with-password"))
            .and(body_json(json!({"identity": "admin@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "jwt"})))
            .expect(1)
            .mount(&server)
            .await;

        let token = RecordStore::login(
            &reqwest::Client::new(),
            &server.uri(),
            "admin@example.com",
            &SecretString::from("pw"),
        )
        .await
        .unwrap();
        assert_eq!(token.expose_secret(), "jwt");
    }

    #[tokio::test]
    async fn test_login_without_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/admins/auth-with-password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"admin": {}})))
            .mount(&server)
            .await;

        let result = RecordStore::login(
            &reqwest::Client::new(),
            &server.uri(),
            "admin@example.com",
            &SecretString::from("pw"),
        )
        .await;
        assert!(matches!(result, Err(StoreError::Auth(_))));
    }

    #[test]
    fn test_filter_literal_escapes_quotes() {
        assert_eq!(filter_literal("a\"b"), "\"a\\\"b\"");
        assert_eq!(filter_literal("plain"), "\"plain\"");
    }

    #[test]
    fn test_debug_masks_token() {
        let store = RecordStore::new(
            reqwest::Client::new(),
            "http://127.0.0.1:8090/",
            Some(SecretString::from("super-secret")),
        )
        .unwrap();
        let debug = format!("{:?}", store);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains("http://127.0.0.1:8090\""));
    }
}
