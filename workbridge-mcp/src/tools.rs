// workbridge-mcp/src/tools.rs
// ============================================================================
// Module: Tool Router
// Description: Dispatch from validated tool calls to handlers.
// Purpose: Bind the closed registry to handler implementations.
// Dependencies: workbridge-contract, workbridge-upstream, tokio
// ============================================================================

//! ## Overview
//! The router resolves a tool name against the registry, runs declarative
//! validation, and dispatches to the matching handler under the per-handler
//! deadline. Dispatch is a closed match over [`ToolName`]; adding a tool is a
//! registry edit plus one match arm.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use workbridge_contract::ToolDefinition;
use workbridge_contract::ToolName;
use workbridge_contract::ToolRegistry;
use workbridge_core::kv::SharedKvStore;
use workbridge_upstream::cache::ResponseCache;
use workbridge_upstream::client::UpstreamGateway;

use crate::error::ToolError;
use crate::files::FileHandler;
use crate::tasks::TaskHandler;
use crate::validate::validate_arguments;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Configuration inputs for building a tool router.
pub struct ToolRouterConfig {
    /// Upstream gateway shared by all handlers.
    pub gateway: Arc<dyn UpstreamGateway>,
    /// Read-response cache.
    pub cache: ResponseCache,
    /// KV store for idempotency markers.
    pub kv: SharedKvStore,
    /// Upstream tenant identifier.
    pub portal_id: String,
    /// KV key namespace prefix.
    pub namespace: String,
    /// Per-handler deadline.
    pub handler_timeout: Duration,
}

/// Router binding the closed tool registry to handlers.
#[derive(Clone)]
pub struct ToolRouter {
    /// Closed tool registry.
    registry: Arc<ToolRegistry>,
    /// Task tool handler.
    tasks: TaskHandler,
    /// File tool handler.
    files: FileHandler,
    /// Per-handler deadline.
    handler_timeout: Duration,
}

impl ToolRouter {
    /// Creates a router from configuration.
    #[must_use]
    pub fn new(config: ToolRouterConfig) -> Self {
        let registry = Arc::new(ToolRegistry::builtin());
        let tasks = TaskHandler::new(
            Arc::clone(&config.gateway),
            config.cache.clone(),
            config.kv.clone(),
            Arc::clone(&registry),
            config.portal_id.clone(),
            config.namespace.clone(),
        );
        let files = FileHandler::new(
            Arc::clone(&config.gateway),
            config.cache,
            Arc::clone(&registry),
        );
        Self {
            registry,
            tasks,
            files,
            handler_timeout: config.handler_timeout,
        }
    }

    /// Returns manifest definitions for every registered tool.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Validates and executes a tool call under the handler deadline.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] for unknown tools, invalid arguments, handler
    /// failures, and deadline overruns.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        let Some(tool) = ToolName::parse(name) else {
            return Err(ToolError::UnknownTool);
        };
        let args = if arguments.is_null() { json!({}) } else { arguments };
        validate_arguments(self.registry.descriptor(tool), &args)?;

        let dispatched = self.dispatch(tool, args);
        match tokio::time::timeout(self.handler_timeout, dispatched).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ToolError::Timeout),
        }
    }

    /// Routes a validated call to its handler.
    async fn dispatch(&self, tool: ToolName, args: Value) -> Result<Value, ToolError> {
        match tool {
            ToolName::ListProjects => self.tasks.list_projects(args).await,
            ToolName::ListTasks => self.tasks.list_tasks(args).await,
            ToolName::CreateTask => self.tasks.create_task(args).await,
            ToolName::UpdateTask => self.tasks.update_task(args).await,
            ToolName::GetTaskDetail => self.tasks.get_task_detail(args).await,
            ToolName::GetProjectSummary => self.tasks.get_project_summary(args).await,
            ToolName::DownloadFile => self.files.download_file(args).await,
            ToolName::UploadReviewSheet => self.files.upload_review_sheet(args).await,
            ToolName::SearchFiles => self.files.search_files(args).await,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;
    use serde_json::json;
    use workbridge_core::kv::MemoryKvStore;
    use workbridge_core::kv::SharedKvStore;
    use workbridge_upstream::cache::ResponseCache;
    use workbridge_upstream::client::UpstreamError;
    use workbridge_upstream::client::UpstreamGateway;
    use workbridge_upstream::client::UpstreamRequest;

    use super::ToolRouter;
    use super::ToolRouterConfig;
    use crate::error::ToolError;

    struct CountingGateway {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl UpstreamGateway for CountingGateway {
        async fn request(&self, _request: UpstreamRequest) -> Result<Value, UpstreamError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(json!({"tasks": []}))
        }
    }

    fn router(gateway: Arc<CountingGateway>, handler_timeout: Duration) -> ToolRouter {
        let kv = SharedKvStore::from_store(MemoryKvStore::new());
        ToolRouter::new(ToolRouterConfig {
            gateway,
            cache: ResponseCache::new(kv.clone(), "test"),
            kv,
            portal_id: "portal-1".to_string(),
            namespace: "test".to_string(),
            handler_timeout,
        })
    }

    fn quiet_gateway(delay: Duration) -> Arc<CountingGateway> {
        Arc::new(CountingGateway {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_without_upstream_calls() {
        let gateway = quiet_gateway(Duration::ZERO);
        let router = router(gateway.clone(), Duration::from_secs(5));
        let err = router.call_tool("dropTables", json!({})).await.expect_err("rejected");
        assert!(matches!(err, ToolError::UnknownTool));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_handlers() {
        let gateway = quiet_gateway(Duration::ZERO);
        let router = router(gateway.clone(), Duration::from_secs(5));
        let err = router
            .call_tool("listTasks", json!({"status": "open"}))
            .await
            .expect_err("rejected");
        assert!(matches!(err, ToolError::InvalidParams(_)));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn null_arguments_are_treated_as_empty() {
        let gateway = quiet_gateway(Duration::ZERO);
        let router = router(gateway, Duration::from_secs(5));
        let err = router.call_tool("listTasks", Value::Null).await.expect_err("rejected");
        // Empty arguments still fail the required-parameter check, not parsing.
        assert!(matches!(err, ToolError::InvalidParams(ref msg) if msg.contains("project_id")));
    }

    #[tokio::test]
    async fn handler_deadline_produces_timeout() {
        let gateway = quiet_gateway(Duration::from_secs(5));
        let router = router(gateway, Duration::from_millis(50));
        let err = router
            .call_tool("listTasks", json!({"project_id": "P1"}))
            .await
            .expect_err("times out");
        assert!(matches!(err, ToolError::Timeout));
    }

    #[tokio::test]
    async fn manifest_definitions_cover_all_tools() {
        let gateway = quiet_gateway(Duration::ZERO);
        let router = router(gateway, Duration::from_secs(5));
        assert_eq!(router.definitions().len(), 9);
    }
}
