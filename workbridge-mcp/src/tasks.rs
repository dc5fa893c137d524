// workbridge-mcp/src/tasks.rs
// ============================================================================
// Module: Task Handlers
// Description: Project and task tools over the projects API.
// Purpose: Thin compositions of upstream calls with caching and idempotency.
// Dependencies: workbridge-upstream, workbridge-contract, serde_json
// ============================================================================

//! ## Overview
//! Task tools compose upstream calls without reinterpreting failures. Two
//! handlers carry real coordination logic: `createTask` serialises duplicate
//! suppression through the KV idempotency marker, and `getProjectSummary`
//! fans out three concurrent status-filtered task reads and aggregates them.
//! Read results are memoized under the descriptor-declared TTLs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use tokio::time::sleep;
use workbridge_contract::ToolName;
use workbridge_contract::ToolRegistry;
use workbridge_core::fingerprint;
use workbridge_core::kv::SharedKvStore;
use workbridge_upstream::cache::ResponseCache;
use workbridge_upstream::client::ApiTarget;
use workbridge_upstream::client::UpstreamGateway;
use workbridge_upstream::client::UpstreamRequest;

use crate::error::ToolError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Idempotency marker lifetime.
const IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(60);
/// Marker value while the creating task is still in flight.
const MARKER_PENDING: &str = "pending";
/// Poll interval while waiting on a concurrent identical create.
const MARKER_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Poll attempts before giving up on a concurrent identical create.
const MARKER_POLL_ATTEMPTS: u32 = 50;

// ============================================================================
// SECTION: Argument Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct ListTasksArgs {
    project_id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    project_id: String,
    name: String,
    owner: Option<String>,
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateTaskArgs {
    task_id: String,
    status: Option<String>,
    due_date: Option<String>,
    owner: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskDetailArgs {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ProjectSummaryArgs {
    project_id: String,
    #[allow(dead_code, reason = "accepted and echoed but not an upstream filter")]
    period: Option<String>,
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Handler for project and task tools.
#[derive(Clone)]
pub struct TaskHandler {
    /// Upstream gateway.
    gateway: Arc<dyn UpstreamGateway>,
    /// Read-response cache.
    cache: ResponseCache,
    /// KV store for idempotency markers.
    kv: SharedKvStore,
    /// Tool registry for cache TTL lookups.
    registry: Arc<ToolRegistry>,
    /// Upstream tenant identifier.
    portal_id: String,
    /// KV key namespace prefix.
    namespace: String,
}

impl TaskHandler {
    /// Creates a task handler.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn UpstreamGateway>,
        cache: ResponseCache,
        kv: SharedKvStore,
        registry: Arc<ToolRegistry>,
        portal_id: String,
        namespace: String,
    ) -> Self {
        Self {
            gateway,
            cache,
            kv,
            registry,
            portal_id,
            namespace,
        }
    }

    fn ttl(&self, name: ToolName) -> Duration {
        Duration::from_secs(self.registry.descriptor(name).cache_ttl_secs)
    }

    /// Lists projects in the portal.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the upstream call fails.
    pub async fn list_projects(&self, _args: Value) -> Result<Value, ToolError> {
        let cache_args = json!({});
        if let Some(hit) = self.cache.get("listProjects", &cache_args).await {
            return Ok(hit);
        }
        let body = self
            .gateway
            .request(UpstreamRequest::get(
                ApiTarget::Projects,
                format!("portal/{}/projects/", self.portal_id),
            ))
            .await?;
        let projects: Vec<Value> = body
            .get("projects")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(project_summary).collect())
            .unwrap_or_default();
        let result = json!({
            "projects": projects,
            "total_count": projects.len(),
        });
        self.cache
            .put("listProjects", &cache_args, &result, self.ttl(ToolName::ListProjects))
            .await;
        Ok(result)
    }

    /// Lists tasks in a project, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the upstream call fails.
    pub async fn list_tasks(&self, args: Value) -> Result<Value, ToolError> {
        let args: ListTasksArgs = parse_args(args)?;
        self.list_tasks_cached(&args.project_id, args.status.as_deref()).await
    }

    /// Cached task listing shared by `listTasks` and the summary fan-out.
    async fn list_tasks_cached(
        &self,
        project_id: &str,
        status: Option<&str>,
    ) -> Result<Value, ToolError> {
        let mut cache_args = json!({"project_id": project_id});
        if let Some(status) = status {
            cache_args["status"] = Value::String(status.to_string());
        }
        let ttl = self.ttl(ToolName::ListTasks);
        if !ttl.is_zero() {
            if let Some(hit) = self.cache.get("listTasks", &cache_args).await {
                return Ok(hit);
            }
        }
        let result = self.fetch_tasks(project_id, status).await?;
        self.cache.put("listTasks", &cache_args, &result, ttl).await;
        Ok(result)
    }

    /// Fetches and normalises the upstream task listing.
    async fn fetch_tasks(
        &self,
        project_id: &str,
        status: Option<&str>,
    ) -> Result<Value, ToolError> {
        let mut request = UpstreamRequest::get(
            ApiTarget::Projects,
            format!("portal/{}/projects/{project_id}/tasks/", self.portal_id),
        );
        if let Some(status) = status {
            request = request.with_query("status", status);
        }
        let body = self.gateway.request(request).await?;
        let tasks: Vec<Value> = body
            .get("tasks")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(task_summary).collect())
            .unwrap_or_default();
        Ok(json!({
            "project_id": project_id,
            "tasks": tasks,
            "total_count": tasks.len(),
            "status_filter": status,
        }))
    }

    /// Creates a task, suppressing duplicates within the idempotency window.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the upstream call fails or an in-flight
    /// identical create never resolves.
    pub async fn create_task(&self, args: Value) -> Result<Value, ToolError> {
        let args: CreateTaskArgs = parse_args(args)?;
        let marker_key = self.marker_key(&args.project_id, &args.name);

        if let Some(key) = &marker_key {
            match self.claim_marker(key).await? {
                MarkerClaim::Claimed => {}
                MarkerClaim::Existing(task_id) => {
                    return Ok(json!({"task_id": task_id}));
                }
            }
        }

        let outcome = self.create_task_upstream(&args).await;
        match outcome {
            Ok(task_id) => {
                if let Some(key) = &marker_key {
                    let marker = json!({"task_id": task_id}).to_string();
                    let _ = self.kv.set(key, &marker, IDEMPOTENCY_WINDOW).await;
                }
                Ok(json!({"task_id": task_id}))
            }
            Err(ToolError::Conflict(_)) => {
                // Another writer won upstream; resolve to the existing task.
                let existing = self.find_task_by_name(&args.project_id, &args.name).await?;
                match existing {
                    Some(task_id) => {
                        if let Some(key) = &marker_key {
                            let marker = json!({"task_id": task_id}).to_string();
                            let _ = self.kv.set(key, &marker, IDEMPOTENCY_WINDOW).await;
                        }
                        Ok(json!({"task_id": task_id}))
                    }
                    None => Err(ToolError::Conflict(format!(
                        "task {} already exists but could not be resolved",
                        args.name
                    ))),
                }
            }
            Err(err) => {
                if let Some(key) = &marker_key {
                    let _ = self.kv.delete(key).await;
                }
                Err(err)
            }
        }
    }

    /// Issues the upstream create and extracts the task identifier.
    async fn create_task_upstream(&self, args: &CreateTaskArgs) -> Result<String, ToolError> {
        let mut payload = json!({"name": args.name});
        if let Some(owner) = &args.owner {
            payload["owner"] = Value::String(owner.clone());
        }
        if let Some(due_date) = &args.due_date {
            payload["due_date"] = Value::String(due_date.clone());
        }
        let body = self
            .gateway
            .request(UpstreamRequest::post_json(
                ApiTarget::Projects,
                format!("portal/{}/projects/{}/tasks/", self.portal_id, args.project_id),
                payload,
            ))
            .await?;
        body.get("task")
            .and_then(|task| task.get("id"))
            .and_then(id_string)
            .ok_or_else(|| ToolError::Internal("task creation returned no identifier".to_string()))
    }

    /// Claims or resolves the idempotency marker.
    async fn claim_marker(&self, key: &str) -> Result<MarkerClaim, ToolError> {
        let created = match self
            .kv
            .create_if_absent(key, MARKER_PENDING, IDEMPOTENCY_WINDOW)
            .await
        {
            Ok(created) => created,
            // A KV outage drops duplicate suppression, not the write itself.
            Err(_) => return Ok(MarkerClaim::Claimed),
        };
        if created {
            return Ok(MarkerClaim::Claimed);
        }
        for _ in 0..MARKER_POLL_ATTEMPTS {
            match self.kv.get(key).await {
                Ok(Some(value)) if value == MARKER_PENDING => {
                    sleep(MARKER_POLL_INTERVAL).await;
                }
                Ok(Some(value)) => {
                    if let Some(task_id) = marker_task_id(&value) {
                        return Ok(MarkerClaim::Existing(task_id));
                    }
                    return Ok(MarkerClaim::Claimed);
                }
                Ok(None) => {
                    // The previous writer failed and removed the marker.
                    let reclaimed = self
                        .kv
                        .create_if_absent(key, MARKER_PENDING, IDEMPOTENCY_WINDOW)
                        .await
                        .unwrap_or(true);
                    if reclaimed {
                        return Ok(MarkerClaim::Claimed);
                    }
                }
                Err(_) => return Ok(MarkerClaim::Claimed),
            }
        }
        Err(ToolError::Timeout)
    }

    /// Finds a task by normalised name in a project, bypassing the cache.
    async fn find_task_by_name(
        &self,
        project_id: &str,
        name: &str,
    ) -> Result<Option<String>, ToolError> {
        let listing = self.fetch_tasks(project_id, None).await?;
        let wanted = normalise_name(name);
        let found = listing
            .get("tasks")
            .and_then(Value::as_array)
            .and_then(|tasks| {
                tasks.iter().find(|task| {
                    task.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|candidate| normalise_name(candidate) == wanted)
                })
            })
            .and_then(|task| task.get("id"))
            .and_then(id_string);
        Ok(found)
    }

    /// Updates fields on an existing task.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the upstream call fails.
    pub async fn update_task(&self, args: Value) -> Result<Value, ToolError> {
        let args: UpdateTaskArgs = parse_args(args)?;
        let mut payload = serde_json::Map::new();
        let mut updated_fields = Vec::new();
        if let Some(status) = &args.status {
            payload.insert("status".to_string(), Value::String(status.clone()));
            updated_fields.push("status");
        }
        if let Some(due_date) = &args.due_date {
            payload.insert("due_date".to_string(), Value::String(due_date.clone()));
            updated_fields.push("due_date");
        }
        if let Some(owner) = &args.owner {
            payload.insert("owner".to_string(), Value::String(owner.clone()));
            updated_fields.push("owner");
        }
        self.gateway
            .request(UpstreamRequest::put_json(
                ApiTarget::Projects,
                format!("portal/{}/tasks/{}/", self.portal_id, args.task_id),
                Value::Object(payload),
            ))
            .await?;
        Ok(json!({
            "ok": true,
            "task_id": args.task_id,
            "updated_fields": updated_fields,
        }))
    }

    /// Fetches detailed task information with comments.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the task fetch fails. Comment failures
    /// degrade to an empty list.
    pub async fn get_task_detail(&self, args: Value) -> Result<Value, ToolError> {
        let args: TaskDetailArgs = parse_args(args)?;
        let cache_args = json!({"task_id": args.task_id});
        let ttl = self.ttl(ToolName::GetTaskDetail);
        if !ttl.is_zero() {
            if let Some(hit) = self.cache.get("getTaskDetail", &cache_args).await {
                return Ok(hit);
            }
        }

        let body = self
            .gateway
            .request(UpstreamRequest::get(
                ApiTarget::Projects,
                format!("portal/{}/tasks/{}/", self.portal_id, args.task_id),
            ))
            .await?;
        let task = body.get("task").cloned().unwrap_or_else(|| json!({}));

        let comments = match self
            .gateway
            .request(UpstreamRequest::get(
                ApiTarget::Projects,
                format!("portal/{}/tasks/{}/comments/", self.portal_id, args.task_id),
            ))
            .await
        {
            Ok(body) => body.get("comments").cloned().unwrap_or_else(|| json!([])),
            Err(_) => json!([]),
        };

        let result = json!({
            "id": task.get("id").and_then(id_string),
            "name": task.get("name").and_then(Value::as_str),
            "description": task.get("description").and_then(Value::as_str).unwrap_or(""),
            "status": task.get("status").and_then(Value::as_str).unwrap_or("open"),
            "owner": owner_name(&task),
            "due_date": task.get("due_date").and_then(Value::as_str),
            "created_at": task.get("created_time").and_then(Value::as_str),
            "updated_at": task.get("updated_time").and_then(Value::as_str),
            "percent_complete": task.get("percent_complete").and_then(Value::as_u64).unwrap_or(0),
            "comments": comments,
            "history": task.get("history").cloned().unwrap_or_else(|| json!([])),
            "url": task_url(&task),
        });
        self.cache.put("getTaskDetail", &cache_args, &result, ttl).await;
        Ok(result)
    }

    /// Computes the project summary from three concurrent task reads.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when any constituent read fails.
    pub async fn get_project_summary(&self, args: Value) -> Result<Value, ToolError> {
        let args: ProjectSummaryArgs = parse_args(args)?;
        let (open, closed, overdue) = tokio::join!(
            self.list_tasks_cached(&args.project_id, Some("open")),
            self.list_tasks_cached(&args.project_id, Some("closed")),
            self.list_tasks_cached(&args.project_id, Some("overdue")),
        );
        let open_count = task_count(&open?);
        let closed_count = task_count(&closed?);
        let overdue_count = task_count(&overdue?);

        let total = open_count + closed_count + overdue_count;
        let completion_rate = if total == 0 {
            0.0
        } else {
            closed_count as f64 / total as f64
        };
        Ok(json!({
            "project_id": args.project_id,
            "total_tasks": total,
            "completion_rate": completion_rate,
            "overdue_count": overdue_count,
            "open_count": open_count,
            "closed_count": closed_count,
        }))
    }

    /// Derives the idempotency marker key for a create.
    fn marker_key(&self, project_id: &str, name: &str) -> Option<String> {
        let digest = fingerprint(
            "createTask",
            &json!({"project_id": project_id, "name": normalise_name(name)}),
        )
        .ok()?;
        Some(format!("{}:idem:{digest}", self.namespace))
    }
}

/// Marker claim outcomes.
enum MarkerClaim {
    /// This caller owns the create.
    Claimed,
    /// A previous identical create already produced this identifier.
    Existing(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Deserializes tool arguments after declarative validation.
fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, ToolError> {
    serde_json::from_value(args)
        .map_err(|err| ToolError::InvalidParams(format!("invalid arguments: {err}")))
}

/// Normalises a task name for duplicate suppression.
fn normalise_name(name: &str) -> String {
    name.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reads the task identifier from a stored marker value.
fn marker_task_id(value: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(value).ok()?;
    parsed.get("task_id").and_then(id_string)
}

/// Accepts string or numeric upstream identifiers.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Extracts the owner display name from a task payload.
fn owner_name(task: &Value) -> Option<String> {
    match task.get("owner") {
        Some(Value::String(name)) => Some(name.clone()),
        Some(Value::Object(owner)) => {
            owner.get("name").and_then(Value::as_str).map(str::to_string)
        }
        _ => None,
    }
}

/// Extracts the self link URL from a task payload.
fn task_url(task: &Value) -> Option<String> {
    task.get("link")
        .and_then(|link| link.get("self"))
        .and_then(|link| link.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Normalises a raw upstream task entry into the result shape.
fn task_summary(task: &Value) -> Option<Value> {
    let id = task.get("id").and_then(id_string)?;
    let name = task.get("name").and_then(Value::as_str)?;
    Some(json!({
        "id": id,
        "name": name,
        "owner": owner_name(task),
        "status": task.get("status").and_then(Value::as_str).unwrap_or("open"),
        "due_date": task.get("due_date").and_then(Value::as_str),
        "url": task_url(task),
    }))
}

/// Normalises a raw upstream project entry into the result shape.
fn project_summary(project: &Value) -> Option<Value> {
    let id = project.get("id").and_then(id_string)?;
    let name = project.get("name").and_then(Value::as_str)?;
    Some(json!({
        "id": id,
        "name": name,
        "status": project.get("status").and_then(Value::as_str).unwrap_or("active"),
    }))
}

/// Counts the tasks in a listing result.
fn task_count(listing: &Value) -> u64 {
    listing
        .get("tasks")
        .and_then(Value::as_array)
        .map(|tasks| tasks.len() as u64)
        .unwrap_or(0)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
