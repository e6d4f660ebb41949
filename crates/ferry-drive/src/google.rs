//! Google Drive v3 implementation of [`RemoteDirectory`].

use async_trait::async_trait;
use ferry_core::{Area, DriveConfig, RemoteEntry};
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenProvider;
use crate::directory::{Relocation, RemoteDirectory, RemoteStream};
use crate::error::{RemoteError, RemoteResult};

const LIST_FIELDS: &str = "nextPageToken, files(id, name, size, mimeType)";
const LIST_PAGE_SIZE: &str = "1000";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: Option<String>,
    name: Option<String>,
    /// Drive reports sizes as decimal strings; native documents have none.
    size: Option<String>,
    mime_type: Option<String>,
}

impl DriveFile {
    /// Missing fields become empty strings so discovery can report and skip
    /// the entry instead of failing the whole listing.
    fn into_entry(self) -> RemoteEntry {
        RemoteEntry::new(
            self.id.unwrap_or_default(),
            self.name.unwrap_or_default(),
            self.size.and_then(|s| s.trim().parse::<u64>().ok()),
            self.mime_type.unwrap_or_default(),
        )
    }
}

#[derive(Debug, Deserialize)]
struct Parents {
    #[serde(default)]
    parents: Vec<String>,
}

/// Drive v3 REST client
pub struct GoogleDriveClient {
    http_client: Client,
    base_url: String,
    request_timeout: Duration,
    tokens: Arc<dyn TokenProvider>,
    config: DriveConfig,
}

impl Debug for GoogleDriveClient {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("GoogleDriveClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GoogleDriveClient {
    pub fn new(config: &DriveConfig, tokens: Arc<dyn TokenProvider>) -> RemoteResult<Self> {
        // No total timeout on the client: downloads of large files legitimately
        // take longer. Metadata calls set a per-request timeout instead.
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(config.request_timeout_seconds),
            tokens,
            config: config.clone(),
        })
    }

    fn file_url(&self, identity_key: &str) -> String {
        format!("{}/files/{}", self.base_url, identity_key)
    }

    async fn authorized(&self, request: RequestBuilder) -> RemoteResult<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    /// Map non-success statuses to errors. 404 becomes `NotFound(subject)`.
    async fn check_status(response: Response, subject: &str) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(subject.to_string()));
        }
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(RemoteError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn list_page(&self, location: &str, page_token: Option<&str>) -> RemoteResult<FileList> {
        let q = format!(
            "'{}' in parents and trashed = false",
            location.replace('\\', "\\\\").replace('\'', "\\'")
        );
        let mut query: Vec<(&str, &str)> = vec![
            ("q", q.as_str()),
            ("fields", LIST_FIELDS),
            ("pageSize", LIST_PAGE_SIZE),
            ("orderBy", "createdTime"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let request = self
            .http_client
            .get(format!("{}/files", self.base_url))
            .query(&query)
            .timeout(self.request_timeout);
        let response = self.authorized(request).await?.send().await?;
        let response = Self::check_status(response, location).await?;

        response
            .json::<FileList>()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))
    }

    async fn current_parents(&self, identity_key: &str) -> RemoteResult<Vec<String>> {
        let request = self
            .http_client
            .get(self.file_url(identity_key))
            .query(&[("fields", "parents")])
            .timeout(self.request_timeout);
        let response = self.authorized(request).await?.send().await?;
        let response = Self::check_status(response, identity_key).await?;
        let parents: Parents = response
            .json()
            .await
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        Ok(parents.parents)
    }
}

#[async_trait]
impl RemoteDirectory for GoogleDriveClient {
    #[tracing::instrument(skip(self))]
    async fn list(&self, location: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let mut entries = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self.list_page(location, page_token.as_deref()).await?;
            pages += 1;
            entries.extend(page.files.into_iter().map(DriveFile::into_entry));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::debug!(location = %location, entries = entries.len(), pages, "Listed remote folder");
        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    async fn relocate(&self, identity_key: &str, area: Area) -> RemoteResult<Relocation> {
        let destination = self.config.area_folder(area);

        let parents = match self.current_parents(identity_key).await {
            Ok(parents) => parents,
            Err(RemoteError::NotFound(_)) => {
                tracing::debug!(identity_key = %identity_key, "Entry vanished before relocation");
                return Ok(Relocation::Missing);
            }
            Err(e) => return Err(e),
        };

        // A file can keep the destination and the watched folder as parents
        // at once; only a file whose sole parent is the destination is done.
        let in_place = parents.iter().any(|p| p == destination);
        let stale: Vec<&str> = parents
            .iter()
            .map(String::as_str)
            .filter(|p| *p != destination)
            .collect();
        if in_place && stale.is_empty() {
            return Ok(Relocation::AlreadyInPlace);
        }

        let remove_parents = stale.join(",");
        let mut query = vec![
            ("removeParents", remove_parents.as_str()),
            ("fields", "id, parents"),
        ];
        if !in_place {
            query.push(("addParents", destination));
        }
        let request = self
            .http_client
            .patch(self.file_url(identity_key))
            .query(&query)
            .json(&serde_json::json!({}))
            .timeout(self.request_timeout);
        let response = self.authorized(request).await?.send().await?;

        match Self::check_status(response, identity_key).await {
            Ok(_) => {
                tracing::debug!(identity_key = %identity_key, area = %area, "Entry relocated");
                Ok(Relocation::Moved)
            }
            Err(RemoteError::NotFound(_)) => Ok(Relocation::Missing),
            Err(e) => Err(e),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn open_stream(&self, identity_key: &str) -> RemoteResult<RemoteStream> {
        let request = self
            .http_client
            .get(self.file_url(identity_key))
            .query(&[("alt", "media")]);
        let response = self.authorized(request).await?.send().await?;
        let response = Self::check_status(response, identity_key).await?;

        let content_length = response.content_length();
        let mut bytes_read = 0u64;
        let body = response
            .bytes_stream()
            .map(move |item| match item {
                Ok(chunk) => {
                    bytes_read += chunk.len() as u64;
                    Ok(chunk)
                }
                Err(e) => Err(RemoteError::Stream {
                    bytes_read,
                    message: e.to_string(),
                }),
            })
            .boxed();

        Ok(RemoteStream {
            content_length,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokenProvider;
    use ferry_core::ErrorClass;
    use mockito::{Matcher, Server};

    fn config(base_url: &str) -> DriveConfig {
        DriveConfig {
            api_base_url: base_url.to_string(),
            request_timeout_seconds: 5,
            access_token: Some("token-123".to_string()),
            watch_folder_id: "watched".to_string(),
            duplicates_folder_id: "dupes".to_string(),
            documents_folder_id: "documents".to_string(),
            download_folder_id: "download".to_string(),
        }
    }

    fn client(server: &Server) -> GoogleDriveClient {
        let tokens = Arc::new(StaticTokenProvider::new("token-123").unwrap());
        GoogleDriveClient::new(&config(&server.url()), tokens).unwrap()
    }

    #[tokio::test]
    async fn list_follows_page_tokens() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("GET", "/files")
            .match_query(Matcher::UrlEncoded(
                "q".into(),
                "'watched' in parents and trashed = false".into(),
            ))
            .match_header("authorization", "Bearer token-123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"nextPageToken":"p2","files":[
                    {"id":"1","name":"A.jpg","size":"100","mimeType":"image/jpeg"}
                ]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/files")
            .match_query(Matcher::UrlEncoded("pageToken".into(), "p2".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"files":[
                    {"id":"2","name":"B","mimeType":"application/vnd.google-apps.document"},
                    {"name":"nameless-id"}
                ]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let entries = client(&server).list("watched").await.unwrap();

        first.assert_async().await;
        second.assert_async().await;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], RemoteEntry::new("1", "A.jpg", Some(100), "image/jpeg"));
        assert_eq!(entries[1].size_bytes, None);
        assert_eq!(entries[2].identity_key, "");
    }

    #[tokio::test]
    async fn list_rate_limit_is_transient() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files")
            .match_query(Matcher::Any)
            .with_status(429)
            .with_body("slow down")
            .create_async()
            .await;

        let err = client(&server).list("watched").await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.status_code(), Some(429));
    }

    #[tokio::test]
    async fn relocate_swaps_parents() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/abc")
            .match_query(Matcher::UrlEncoded("fields".into(), "parents".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"parents":["watched"]}"#)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/files/abc")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("addParents".into(), "download".into()),
                Matcher::UrlEncoded("removeParents".into(), "watched".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"abc","parents":["download"]}"#)
            .expect(1)
            .create_async()
            .await;

        let outcome = client(&server).relocate("abc", Area::Download).await.unwrap();
        assert_eq!(outcome, Relocation::Moved);
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn relocate_is_a_noop_when_already_moved() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/abc")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"parents":["dupes"]}"#)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/files/abc")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let outcome = client(&server).relocate("abc", Area::Duplicates).await.unwrap();
        assert_eq!(outcome, Relocation::AlreadyInPlace);
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn relocate_detaches_leftover_parents() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/abc")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"parents":["download","watched"]}"#)
            .create_async()
            .await;
        let patch = server
            .mock("PATCH", "/files/abc")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("removeParents".into(), "watched".into()),
                Matcher::UrlEncoded("fields".into(), "id, parents".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"abc","parents":["download"]}"#)
            .expect(1)
            .create_async()
            .await;

        let outcome = client(&server).relocate("abc", Area::Download).await.unwrap();
        assert_eq!(outcome, Relocation::Moved);
        patch.assert_async().await;
    }

    #[tokio::test]
    async fn relocate_tolerates_missing_entry() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/gone")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let outcome = client(&server).relocate("gone", Area::Download).await.unwrap();
        assert_eq!(outcome, Relocation::Missing);
    }

    #[tokio::test]
    async fn open_stream_yields_body_bytes() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/abc")
            .match_query(Matcher::UrlEncoded("alt".into(), "media".into()))
            .with_status(200)
            .with_body(vec![7u8; 2048])
            .create_async()
            .await;

        let mut stream = client(&server).open_stream("abc").await.unwrap();
        assert_eq!(stream.content_length, Some(2048));

        let mut total = 0usize;
        while let Some(chunk) = stream.body.next().await {
            total += chunk.unwrap().len();
        }
        assert_eq!(total, 2048);
    }

    #[tokio::test]
    async fn open_stream_unauthorized_is_permanent() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/files/abc")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;

        let err = client(&server).open_stream("abc").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
