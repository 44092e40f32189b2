use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// `strftime` layout of [`MemoryRecord::last_modified`] (local time, second
/// granularity).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Author label used for memos written on the user's behalf.
pub const AUTHOR_USER: &str = "user";
/// Author label used for memos the model decided to keep on its own.
pub const AUTHOR_LLM: &str = "LLM";

/// Closed vocabulary of memo categories.
///
/// Anything outside the vocabulary is coerced to [`Tag::Others`] by
/// [`Tag::coerce`]; there is no way to store an unknown tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Personal,
    Work,
    Education,
    Life,
    Person,
    Wellness,
    Relationship,
    Reminder,
    /// Catch-all for unrecognised input.
    Others,
}

impl Tag {
    /// Every tag in vocabulary order.
    pub const ALL: [Tag; 9] = [
        Tag::Personal,
        Tag::Work,
        Tag::Education,
        Tag::Life,
        Tag::Person,
        Tag::Wellness,
        Tag::Relationship,
        Tag::Reminder,
        Tag::Others,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Personal => "personal",
            Tag::Work => "work",
            Tag::Education => "education",
            Tag::Life => "life",
            Tag::Person => "person",
            Tag::Wellness => "wellness",
            Tag::Relationship => "relationship",
            Tag::Reminder => "reminder",
            Tag::Others => "others",
        }
    }

    /// Map a raw label onto the vocabulary.  Matching is exact; every other
    /// input becomes [`Tag::Others`].
    pub fn coerce(raw: &str) -> Tag {
        Tag::ALL
            .into_iter()
            .find(|t| t.as_str() == raw)
            .unwrap_or(Tag::Others)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single stored memo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Store-assigned identifier, 1-based and never reused within a file.
    pub id: i64,
    pub tag: Tag,
    pub memo: String,
    /// Who wrote the memo, conventionally [`AUTHOR_USER`] or [`AUTHOR_LLM`].
    #[serde(rename = "by")]
    pub author: String,
    /// Formatted with [`TIMESTAMP_FORMAT`].
    pub last_modified: String,
}

/// One entry of a batch add request.  Missing fields fall back to the same
/// defaults a single add would use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MemoryDraft {
    #[serde(default = "default_draft_tag")]
    pub tag: String,
    #[serde(default)]
    pub memo: String,
    #[serde(default = "default_draft_author")]
    pub by: String,
}

fn default_draft_tag() -> String {
    Tag::Others.as_str().to_string()
}

fn default_draft_author() -> String {
    AUTHOR_LLM.to_string()
}

/// The closed set of operations the model is allowed to request from the
/// memory tool.
///
/// Serialized adjacently tagged so a tool call reads
/// `{"name": "delete_memory_entry", "params": {"index": 3, ...}}`.  Indices
/// are the 1-based record ids shown by `recall_memories`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "name", content = "params", rename_all = "snake_case")]
pub enum MemoryCommand {
    /// Store the current input when either party asked for it.
    HandleInput {
        input_text: String,
        tag: String,
        #[serde(default)]
        user_wants_to_add: bool,
        #[serde(default)]
        llm_wants_to_add: bool,
    },
    /// Return every memo in the active file.
    RecallMemories {},
    /// Remove every memo in the active file.  Requires two-step confirmation.
    ClearMemories {
        #[serde(default)]
        user_confirmation: bool,
    },
    /// Run the store's maintenance pass.
    RefreshMemory {},
    UpdateMemoryEntry {
        index: i64,
        tag: String,
        memo: String,
        by: String,
    },
    AddMultipleMemories {
        memory_entries: Vec<MemoryDraft>,
        #[serde(default)]
        llm_wants_to_add: bool,
    },
    DeleteMemoryEntry {
        index: i64,
        #[serde(default)]
        llm_wants_to_delete: bool,
    },
    DeleteMultipleMemories {
        indices: Vec<i64>,
        #[serde(default)]
        llm_wants_to_delete: bool,
    },
    /// Switch to (creating if needed) another memory file.
    CreateOrSwitchMemoryFile { new_file_name: String },
    ListMemoryFiles {},
    CurrentMemoryFile {},
    /// Delete a non-active memory file.  Requires two-step confirmation.
    DeleteMemoryFile {
        file_to_delete: String,
        #[serde(default)]
        user_confirmation: bool,
    },
    /// Serve one file, or an archive of all files, over a short-lived link.
    DownloadMemory {
        #[serde(default)]
        memory_file_name: String,
        #[serde(default)]
        download_all: bool,
    },
}

impl MemoryCommand {
    /// The wire name of the command (the `name` field of a tool call).
    pub fn name(&self) -> &'static str {
        match self {
            MemoryCommand::HandleInput { .. } => "handle_input",
            MemoryCommand::RecallMemories {} => "recall_memories",
            MemoryCommand::ClearMemories { .. } => "clear_memories",
            MemoryCommand::RefreshMemory {} => "refresh_memory",
            MemoryCommand::UpdateMemoryEntry { .. } => "update_memory_entry",
            MemoryCommand::AddMultipleMemories { .. } => "add_multiple_memories",
            MemoryCommand::DeleteMemoryEntry { .. } => "delete_memory_entry",
            MemoryCommand::DeleteMultipleMemories { .. } => "delete_multiple_memories",
            MemoryCommand::CreateOrSwitchMemoryFile { .. } => "create_or_switch_memory_file",
            MemoryCommand::ListMemoryFiles {} => "list_memory_files",
            MemoryCommand::CurrentMemoryFile {} => "current_memory_file",
            MemoryCommand::DeleteMemoryFile { .. } => "delete_memory_file",
            MemoryCommand::DownloadMemory { .. } => "download_memory",
        }
    }

    /// `true` for commands gated behind two-step confirmation.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            MemoryCommand::ClearMemories { .. } | MemoryCommand::DeleteMemoryFile { .. }
        )
    }
}

/// Outcome class of a [`ToolReply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Ok,
    /// A destructive command was recorded and must be repeated with
    /// confirmation.
    ConfirmationRequired,
    /// A pending destructive command was cancelled.
    Aborted,
    NotFound,
    /// The store declined the request (e.g. deleting the active file) or the
    /// caller did not assert intent.
    Refused,
    /// The request itself was malformed.
    Rejected,
    Error,
}

/// What the memory tool hands back to the model for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolReply {
    pub status: ReplyStatus,
    pub message: String,
}

impl ToolReply {
    pub fn new(status: ReplyStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(ReplyStatus::Ok, message)
    }

    pub fn is_ok(&self) -> bool {
        self.status == ReplyStatus::Ok
    }
}

/// Category of a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    InProgress,
    MemoryAnalysis,
    MemoryUpdate,
    MemoryDeletion,
    Recall,
    Clear,
    Refresh,
    FileSwitching,
    FileListing,
    CurrentFile,
    FileDeletion,
    ConfirmationRequired,
    Aborted,
    Download,
    Complete,
    Error,
}

/// Human-readable progress notification pushed to the status sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "chatmem-runtime::dispatcher"
    pub source: String,
    /// Conversation the event belongs to, if any.
    pub session: Option<String>,
    pub status: StatusKind,
    pub description: String,
    /// `true` on the last event of an operation.
    pub done: bool,
}

impl StatusEvent {
    pub fn new(
        source: impl Into<String>,
        status: StatusKind,
        description: impl Into<String>,
        done: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            session: None,
            status,
            description: description.into(),
            done,
        }
    }

    /// Attach the conversation id (builder-style).
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }
}

/// Workspace-wide error for the layers above the store.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ChatMemError {
    #[error("Storage Error: {0}")]
    Storage(String),

    #[error("Export Error: {0}")]
    Export(String),

    #[error("Invalid Tool Call: {0}")]
    InvalidCommand(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}
