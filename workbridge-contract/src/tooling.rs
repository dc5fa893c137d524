// workbridge-contract/src/tooling.rs
// ============================================================================
// Module: Tooling Contract
// Description: Canonical tool identifiers, descriptors, and manifest shapes.
// Purpose: Shared tool naming and parameter contracts across the adapter.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Canonical tool identifiers and descriptors for the Workbridge adapter.
//! Tool names are part of the external contract surface; the set is closed
//! and equal to the advertised manifest.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Tool Names
// ============================================================================

/// Canonical tool names exposed by the Workbridge adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ToolName {
    /// List projects in the configured portal.
    ListProjects,
    /// List tasks in a project, optionally filtered by status.
    ListTasks,
    /// Create a task in a project (idempotent within a short window).
    CreateTask,
    /// Update fields on an existing task.
    UpdateTask,
    /// Fetch detailed task information with comments and history.
    GetTaskDetail,
    /// Compute a project summary from constituent task reads.
    GetProjectSummary,
    /// Obtain a pre-signed download URL for a file.
    DownloadFile,
    /// Upload a review sheet into a folder.
    UploadReviewSheet,
    /// Search files by query, optionally scoped to a folder.
    SearchFiles,
}

impl ToolName {
    /// Returns the canonical string name for the tool.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ListProjects => "listProjects",
            Self::ListTasks => "listTasks",
            Self::CreateTask => "createTask",
            Self::UpdateTask => "updateTask",
            Self::GetTaskDetail => "getTaskDetail",
            Self::GetProjectSummary => "getProjectSummary",
            Self::DownloadFile => "downloadFile",
            Self::UploadReviewSheet => "uploadReviewSheet",
            Self::SearchFiles => "searchFiles",
        }
    }

    /// Returns all tool names in canonical order.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::ListProjects,
            Self::ListTasks,
            Self::CreateTask,
            Self::UpdateTask,
            Self::GetTaskDetail,
            Self::GetProjectSummary,
            Self::DownloadFile,
            Self::UploadReviewSheet,
            Self::SearchFiles,
        ]
    }

    /// Parses a tool name from its string representation.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "listProjects" => Some(Self::ListProjects),
            "listTasks" => Some(Self::ListTasks),
            "createTask" => Some(Self::CreateTask),
            "updateTask" => Some(Self::UpdateTask),
            "getTaskDetail" => Some(Self::GetTaskDetail),
            "getProjectSummary" => Some(Self::GetProjectSummary),
            "downloadFile" => Some(Self::DownloadFile),
            "uploadReviewSheet" => Some(Self::UploadReviewSheet),
            "searchFiles" => Some(Self::SearchFiles),
            _ => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Parameter Contracts
// ============================================================================

/// Parameter value types accepted by tool contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Plain UTF-8 string, non-empty when present.
    String,
    /// Whole number.
    Integer,
    /// ISO 8601 calendar date (`YYYY-MM-DD`).
    Date,
    /// String drawn from a closed value set.
    Enum,
    /// Base64-encoded bytes with a decoded size ceiling.
    Base64Bytes,
}

/// Declarative parameter contract for a single tool input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    /// Parameter name as it appears in tool arguments.
    pub name: &'static str,
    /// Human description for the manifest.
    pub description: &'static str,
    /// Accepted value type.
    pub param_type: ParamType,
    /// Whether the parameter must be present.
    pub required: bool,
    /// Allowed values for enum parameters.
    pub allowed_values: &'static [&'static str],
    /// Decoded size ceiling in bytes for base64 parameters (0 = unlimited).
    pub max_decoded_bytes: u64,
}

impl ParamSpec {
    /// Renders the JSON-schema fragment for this parameter.
    #[must_use]
    pub fn schema(&self) -> Value {
        match self.param_type {
            ParamType::String => json!({"type": "string", "description": self.description}),
            ParamType::Integer => json!({"type": "integer", "description": self.description}),
            ParamType::Date => {
                json!({"type": "string", "format": "date", "description": self.description})
            }
            ParamType::Enum => json!({
                "type": "string",
                "enum": self.allowed_values,
                "description": self.description,
            }),
            ParamType::Base64Bytes => json!({
                "type": "string",
                "contentEncoding": "base64",
                "description": self.description,
            }),
        }
    }
}

// ============================================================================
// SECTION: Tool Descriptors
// ============================================================================

/// Read/write nature of a tool, which drives cache and idempotency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolNature {
    /// Read-only upstream access, cacheable.
    Read,
    /// Mutating upstream access, never cached.
    Write,
    /// Derived from cacheable reads; the aggregate itself is not cached.
    Derived,
}

/// Immutable tool descriptor bound at process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    /// Canonical tool name.
    pub name: ToolName,
    /// Human description for the manifest.
    pub description: &'static str,
    /// Parameter contracts in declaration order.
    pub params: &'static [ParamSpec],
    /// Read/write nature.
    pub nature: ToolNature,
    /// Cache TTL in seconds for read results (0 disables caching).
    pub cache_ttl_secs: u64,
}

impl ToolDescriptor {
    /// Returns true when the tool mutates upstream state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self.nature, ToolNature::Write)
    }

    /// Renders the manifest definition for this tool.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in self.params {
            properties.insert(param.name.to_string(), param.schema());
            if param.required {
                required.push(Value::String(param.name.to_string()));
            }
        }
        ToolDefinition {
            name: self.name.as_str().to_string(),
            description: self.description.to_string(),
            input_schema: json!({
                "type": "object",
                "properties": Value::Object(properties),
                "required": required,
                "additionalProperties": false,
            }),
        }
    }
}

/// Tool definition used by manifest and tool listing responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Tool description for clients.
    pub description: String,
    /// JSON schema for tool input.
    pub input_schema: Value,
}

// ============================================================================
// SECTION: Parameter Tables
// ============================================================================

const TASK_STATUS_VALUES: &[&str] = &["open", "closed", "overdue"];
const SUMMARY_PERIOD_VALUES: &[&str] = &["week", "month"];

/// Decoded upload ceiling: 1 GiB.
pub const MAX_UPLOAD_DECODED_BYTES: u64 = 1024 * 1024 * 1024;

const LIST_PROJECTS_PARAMS: &[ParamSpec] = &[];

const LIST_TASKS_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "project_id",
        description: "Project identifier",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "status",
        description: "Task status filter",
        param_type: ParamType::Enum,
        required: false,
        allowed_values: TASK_STATUS_VALUES,
        max_decoded_bytes: 0,
    },
];

const CREATE_TASK_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "project_id",
        description: "Project identifier",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "name",
        description: "Task name",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "owner",
        description: "Task owner email",
        param_type: ParamType::String,
        required: false,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "due_date",
        description: "Due date (YYYY-MM-DD)",
        param_type: ParamType::Date,
        required: false,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
];

const UPDATE_TASK_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "task_id",
        description: "Task identifier",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "status",
        description: "New task status",
        param_type: ParamType::Enum,
        required: false,
        allowed_values: TASK_STATUS_VALUES,
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "due_date",
        description: "New due date (YYYY-MM-DD)",
        param_type: ParamType::Date,
        required: false,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "owner",
        description: "New task owner email",
        param_type: ParamType::String,
        required: false,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
];

const GET_TASK_DETAIL_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "task_id",
    description: "Task identifier",
    param_type: ParamType::String,
    required: true,
    allowed_values: &[],
    max_decoded_bytes: 0,
}];

const GET_PROJECT_SUMMARY_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "project_id",
        description: "Project identifier",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "period",
        description: "Reporting period",
        param_type: ParamType::Enum,
        required: false,
        allowed_values: SUMMARY_PERIOD_VALUES,
        max_decoded_bytes: 0,
    },
];

const DOWNLOAD_FILE_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "file_id",
    description: "File identifier",
    param_type: ParamType::String,
    required: true,
    allowed_values: &[],
    max_decoded_bytes: 0,
}];

const UPLOAD_REVIEW_SHEET_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "project_id",
        description: "Project identifier",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "folder_id",
        description: "Destination folder identifier",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "name",
        description: "File name including suffix",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "content_base64",
        description: "Base64-encoded file content",
        param_type: ParamType::Base64Bytes,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: MAX_UPLOAD_DECODED_BYTES,
    },
];

const SEARCH_FILES_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "query",
        description: "Search query",
        param_type: ParamType::String,
        required: true,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
    ParamSpec {
        name: "folder_id",
        description: "Folder scope for the search",
        param_type: ParamType::String,
        required: false,
        allowed_values: &[],
        max_decoded_bytes: 0,
    },
];

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Closed registry of tool descriptors bound at process start.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    /// Descriptors keyed by canonical tool name.
    descriptors: BTreeMap<ToolName, ToolDescriptor>,
}

impl ToolRegistry {
    /// Builds the built-in registry.
    #[must_use]
    pub fn builtin() -> Self {
        let mut descriptors = BTreeMap::new();
        for descriptor in builtin_descriptors() {
            descriptors.insert(descriptor.name, descriptor);
        }
        Self {
            descriptors,
        }
    }

    /// Looks up a descriptor by canonical tool name.
    #[must_use]
    pub fn descriptor(&self, name: ToolName) -> &ToolDescriptor {
        // The registry is total over ToolName by construction.
        &self.descriptors[&name]
    }

    /// Returns manifest definitions for every registered tool.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors.values().map(ToolDescriptor::definition).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Builds the canonical descriptor list.
fn builtin_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: ToolName::ListProjects,
            description: "List projects in the configured portal",
            params: LIST_PROJECTS_PARAMS,
            nature: ToolNature::Read,
            cache_ttl_secs: 60,
        },
        ToolDescriptor {
            name: ToolName::ListTasks,
            description: "List tasks in a project, optionally filtered by status",
            params: LIST_TASKS_PARAMS,
            nature: ToolNature::Read,
            cache_ttl_secs: 60,
        },
        ToolDescriptor {
            name: ToolName::CreateTask,
            description: "Create a task in a project",
            params: CREATE_TASK_PARAMS,
            nature: ToolNature::Write,
            cache_ttl_secs: 0,
        },
        ToolDescriptor {
            name: ToolName::UpdateTask,
            description: "Update status, due date, or owner on an existing task",
            params: UPDATE_TASK_PARAMS,
            nature: ToolNature::Write,
            cache_ttl_secs: 0,
        },
        ToolDescriptor {
            name: ToolName::GetTaskDetail,
            description: "Fetch detailed task information with comments and history",
            params: GET_TASK_DETAIL_PARAMS,
            nature: ToolNature::Read,
            cache_ttl_secs: 30,
        },
        ToolDescriptor {
            name: ToolName::GetProjectSummary,
            description: "Compute total, completion rate, and overdue count for a project",
            params: GET_PROJECT_SUMMARY_PARAMS,
            nature: ToolNature::Derived,
            cache_ttl_secs: 0,
        },
        ToolDescriptor {
            name: ToolName::DownloadFile,
            description: "Obtain a pre-signed download URL for a file",
            params: DOWNLOAD_FILE_PARAMS,
            nature: ToolNature::Read,
            cache_ttl_secs: 0,
        },
        ToolDescriptor {
            name: ToolName::UploadReviewSheet,
            description: "Upload a review sheet into a folder",
            params: UPLOAD_REVIEW_SHEET_PARAMS,
            nature: ToolNature::Write,
            cache_ttl_secs: 0,
        },
        ToolDescriptor {
            name: ToolName::SearchFiles,
            description: "Search files by query, optionally scoped to a folder",
            params: SEARCH_FILES_PARAMS,
            nature: ToolNature::Read,
            cache_ttl_secs: 30,
        },
    ]
}

// ============================================================================
// SECTION: Tests
// ============================================================================
