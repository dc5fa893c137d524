// workbridge-mcp/src/files.rs
// ============================================================================
// Module: File Handlers
// Description: File tools over the file-storage API.
// Purpose: Pre-signed downloads, bounded uploads, and file search.
// Dependencies: workbridge-upstream, base64, serde_json
// ============================================================================

//! ## Overview
//! File tools never proxy file bytes to the assistant: downloads return the
//! upstream pre-signed URL with its own expiry, and uploads accept bounded
//! base64 content (the validator already rejected anything whose encoded
//! length implies more than the decoded ceiling). Media types are inferred
//! from the filename suffix; unknown suffixes fall back to octet-stream.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use workbridge_contract::ToolName;
use workbridge_contract::ToolRegistry;
use workbridge_contract::tooling::MAX_UPLOAD_DECODED_BYTES;
use workbridge_upstream::cache::ResponseCache;
use workbridge_upstream::client::ApiTarget;
use workbridge_upstream::client::MultipartUpload;
use workbridge_upstream::client::UpstreamGateway;
use workbridge_upstream::client::UpstreamRequest;

use crate::error::ToolError;

// ============================================================================
// SECTION: Argument Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct DownloadFileArgs {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadReviewSheetArgs {
    project_id: String,
    folder_id: String,
    name: String,
    content_base64: String,
}

#[derive(Debug, Deserialize)]
struct SearchFilesArgs {
    query: String,
    folder_id: Option<String>,
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Handler for file tools.
#[derive(Clone)]
pub struct FileHandler {
    /// Upstream gateway.
    gateway: Arc<dyn UpstreamGateway>,
    /// Read-response cache.
    cache: ResponseCache,
    /// Tool registry for cache TTL lookups.
    registry: Arc<ToolRegistry>,
}

impl FileHandler {
    /// Creates a file handler.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn UpstreamGateway>,
        cache: ResponseCache,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            gateway,
            cache,
            registry,
        }
    }

    fn ttl(&self, name: ToolName) -> Duration {
        Duration::from_secs(self.registry.descriptor(name).cache_ttl_secs)
    }

    /// Returns a pre-signed download URL for a file.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the upstream calls fail or no URL is
    /// produced.
    pub async fn download_file(&self, args: Value) -> Result<Value, ToolError> {
        let args: DownloadFileArgs = parse_args(args)?;
        let metadata = self
            .gateway
            .request(UpstreamRequest::get(
                ApiTarget::Files,
                format!("files/{}", args.file_id),
            ))
            .await?;
        let attributes = metadata
            .get("data")
            .and_then(|data| data.get("attributes"))
            .cloned()
            .unwrap_or_else(|| json!({}));

        let download = self
            .gateway
            .request(UpstreamRequest::get(
                ApiTarget::Files,
                format!("files/{}/download", args.file_id),
            ))
            .await?;
        let file_url = download
            .get("download_url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ToolError::Internal("upstream returned no download url".to_string())
            })?;

        Ok(json!({
            "file_id": args.file_id,
            "name": attributes.get("name").and_then(Value::as_str),
            "size": attributes.get("size_in_bytes").and_then(Value::as_u64),
            "file_url": file_url,
            "expires_at": download.get("expires_at").and_then(Value::as_str),
        }))
    }

    /// Uploads a review sheet into a folder.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::InvalidParams`] when the content fails to decode
    /// or exceeds the decoded ceiling, and [`ToolError`] for upstream
    /// failures.
    pub async fn upload_review_sheet(&self, args: Value) -> Result<Value, ToolError> {
        let args: UploadReviewSheetArgs = parse_args(args)?;
        let content = BASE64.decode(args.content_base64.as_bytes()).map_err(|_| {
            ToolError::InvalidParams("parameter content_base64 is not valid base64".to_string())
        })?;
        if content.len() as u64 > MAX_UPLOAD_DECODED_BYTES {
            return Err(ToolError::InvalidParams(format!(
                "parameter content_base64 exceeds the {MAX_UPLOAD_DECODED_BYTES} byte decoded size ceiling"
            )));
        }
        let size = content.len();
        let upload = MultipartUpload {
            file_name: args.name.clone(),
            content_type: media_type_for(&args.name).to_string(),
            data: Bytes::from(content),
            fields: vec![
                ("parent_id".to_string(), args.folder_id.clone()),
                ("filename".to_string(), args.name.clone()),
                ("override-name-exist".to_string(), "true".to_string()),
            ],
        };
        let body = self
            .gateway
            .request(UpstreamRequest::post_multipart(ApiTarget::Files, "files", upload))
            .await?;
        let file_id = body
            .get("data")
            .and_then(|data| data.get("id"))
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::Internal("upload returned no file identifier".to_string()))?;
        Ok(json!({
            "file_id": file_id,
            "name": args.name,
            "folder_id": args.folder_id,
            "project_id": args.project_id,
            "size": size,
        }))
    }

    /// Searches files by query, optionally scoped to a folder.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the upstream call fails.
    pub async fn search_files(&self, args: Value) -> Result<Value, ToolError> {
        let args: SearchFilesArgs = parse_args(args)?;
        let mut cache_args = json!({"query": args.query});
        if let Some(folder_id) = &args.folder_id {
            cache_args["folder_id"] = Value::String(folder_id.clone());
        }
        let ttl = self.ttl(ToolName::SearchFiles);
        if !ttl.is_zero() {
            if let Some(hit) = self.cache.get("searchFiles", &cache_args).await {
                return Ok(hit);
            }
        }

        let mut request = UpstreamRequest::get(ApiTarget::Files, "search")
            .with_query("query", &args.query);
        if let Some(folder_id) = &args.folder_id {
            request = request.with_query("parent_id", folder_id);
        }
        let body = self.gateway.request(request).await?;
        let files: Vec<Value> = body
            .get("data")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(file_summary).collect())
            .unwrap_or_default();
        let result = json!({
            "query": args.query,
            "folder_id": args.folder_id,
            "files": files,
            "total_count": files.len(),
        });
        self.cache.put("searchFiles", &cache_args, &result, ttl).await;
        Ok(result)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Deserializes tool arguments after declarative validation.
fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args)
        .map_err(|err| ToolError::InvalidParams(format!("invalid arguments: {err}")))
}

/// Infers the media type from the filename suffix.
fn media_type_for(name: &str) -> &'static str {
    let suffix = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match suffix.as_str() {
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "md" => "text/markdown",
        "txt" => "text/plain",
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Normalises a raw upstream file entry into the result shape.
fn file_summary(file: &Value) -> Option<Value> {
    let id = file.get("id").and_then(Value::as_str)?;
    let attributes = file.get("attributes").cloned().unwrap_or_else(|| json!({}));
    let name = attributes.get("name").and_then(Value::as_str)?;
    let path = attributes
        .get("path")
        .and_then(Value::as_str)
        .map_or_else(|| name.to_string(), str::to_string);
    Some(json!({
        "id": id,
        "name": name,
        "path": path,
    }))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde_json::Value;
    use serde_json::json;
    use workbridge_contract::ToolRegistry;
    use workbridge_core::kv::MemoryKvStore;
    use workbridge_core::kv::SharedKvStore;
    use workbridge_upstream::cache::ResponseCache;
    use workbridge_upstream::client::RequestBody;
    use workbridge_upstream::client::UpstreamError;
    use workbridge_upstream::client::UpstreamGateway;
    use workbridge_upstream::client::UpstreamRequest;

    use super::FileHandler;
    use super::media_type_for;
    use crate::error::ToolError;

    #[derive(Default)]
    struct RecordingGateway {
        requests: Mutex<Vec<UpstreamRequest>>,
        responses: Mutex<Vec<Value>>,
    }

    impl RecordingGateway {
        fn scripted(responses: Vec<Value>) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl UpstreamGateway for RecordingGateway {
        async fn request(&self, request: UpstreamRequest) -> Result<Value, UpstreamError> {
            self.requests.lock().expect("requests lock").push(request);
            let mut responses = self.responses.lock().expect("responses lock");
            if responses.is_empty() {
                return Err(UpstreamError::NotFound("no scripted response".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    fn handler(gateway: Arc<RecordingGateway>) -> FileHandler {
        let kv = SharedKvStore::from_store(MemoryKvStore::new());
        FileHandler::new(
            gateway,
            ResponseCache::new(kv, "test"),
            Arc::new(ToolRegistry::builtin()),
        )
    }

    #[tokio::test]
    async fn download_returns_presigned_url_without_proxying() {
        let gateway = Arc::new(RecordingGateway::scripted(vec![
            json!({"data": {"attributes": {"name": "report.pdf", "size_in_bytes": 2048}}}),
            json!({"download_url": "https://files/presigned/abc", "expires_at": "2026-08-02T12:00:00Z"}),
        ]));
        let handler = handler(gateway);
        let result = handler
            .download_file(json!({"file_id": "F1"}))
            .await
            .expect("download");
        assert_eq!(result["file_id"], "F1");
        assert_eq!(result["name"], "report.pdf");
        assert_eq!(result["file_url"], "https://files/presigned/abc");
        assert_eq!(result["expires_at"], "2026-08-02T12:00:00Z");
    }

    #[tokio::test]
    async fn download_without_url_is_an_internal_error() {
        let gateway = Arc::new(RecordingGateway::scripted(vec![
            json!({"data": {"attributes": {"name": "report.pdf"}}}),
            json!({}),
        ]));
        let handler = handler(gateway);
        let err = handler
            .download_file(json!({"file_id": "F1"}))
            .await
            .expect_err("fails");
        assert!(matches!(err, ToolError::Internal(_)));
    }

    #[tokio::test]
    async fn upload_decodes_and_sends_multipart() {
        let gateway = Arc::new(RecordingGateway::scripted(vec![
            json!({"data": {"id": "F9"}}),
        ]));
        let handler = handler(gateway.clone());
        let content = BASE64.encode(b"quarterly numbers");
        let result = handler
            .upload_review_sheet(json!({
                "project_id": "P1",
                "folder_id": "D1",
                "name": "review.xlsx",
                "content_base64": content,
            }))
            .await
            .expect("upload");
        assert_eq!(result["file_id"], "F9");
        assert_eq!(result["size"], 17);

        let requests = gateway.requests.lock().expect("requests lock");
        assert_eq!(requests.len(), 1);
        match &requests[0].body {
            Some(RequestBody::Multipart(upload)) => {
                assert_eq!(upload.file_name, "review.xlsx");
                assert_eq!(
                    upload.content_type,
                    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                );
                assert_eq!(upload.data.as_ref(), b"quarterly numbers");
                assert!(upload
                    .fields
                    .iter()
                    .any(|(key, value)| key == "parent_id" && value == "D1"));
            }
            other => panic!("expected multipart body, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_with_undecodable_content_is_invalid_params() {
        let gateway = Arc::new(RecordingGateway::default());
        let handler = handler(gateway.clone());
        let err = handler
            .upload_review_sheet(json!({
                "project_id": "P1",
                "folder_id": "D1",
                "name": "review.xlsx",
                "content_base64": "@@@@",
            }))
            .await
            .expect_err("fails");
        match err {
            ToolError::InvalidParams(message) => assert!(message.contains("content_base64")),
            other => panic!("expected invalid params, got {other:?}"),
        }
        assert!(gateway.requests.lock().expect("requests lock").is_empty());
    }

    #[tokio::test]
    async fn search_normalises_results_and_caches() {
        let gateway = Arc::new(RecordingGateway::scripted(vec![json!({"data": [
            {"id": "F1", "attributes": {"name": "report.xlsx", "path": "/reviews/report.xlsx"}},
            {"id": "F2", "attributes": {"name": "notes.md"}},
        ]})]));
        let handler = handler(gateway.clone());
        let args = json!({"query": "report"});

        let first = handler.search_files(args.clone()).await.expect("first");
        let second = handler.search_files(args).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(first["files"][0]["path"], "/reviews/report.xlsx");
        assert_eq!(first["files"][1]["path"], "notes.md");
        assert_eq!(first["total_count"], 2);
        assert_eq!(gateway.requests.lock().expect("requests lock").len(), 1);
    }

    #[test]
    fn media_types_follow_the_suffix_map() {
        assert_eq!(
            media_type_for("review.xlsx"),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        );
        assert_eq!(media_type_for("notes.MD"), "text/markdown");
        assert_eq!(media_type_for("log.txt"), "text/plain");
        assert_eq!(media_type_for("print.pdf"), "application/pdf");
        assert_eq!(media_type_for("data.csv"), "text/csv");
        assert_eq!(media_type_for("archive.zip"), "application/octet-stream");
        assert_eq!(media_type_for("no-suffix"), "application/octet-stream");
    }
}
