//! [`Dispatcher`] – executes [`MemoryCommand`]s against the [`MemoryStore`].
//!
//! Every command produces exactly one [`ToolReply`] and a short trail of
//! [`StatusEvent`]s on the [`StatusBus`], tagged with the calling session.
//! Storage work runs on the blocking pool so a slow disk never stalls the
//! async runtime.
//!
//! Destructive commands (`clear_memories`, `delete_memory_file`) go through
//! the per-session [`ConfirmationLedger`]; every other command clears the
//! session's pending confirmation before it runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chatmem_middleware::StatusBus;
//! use chatmem_runtime::{DispatchConfig, Dispatcher};
//! use chatmem_store::MemoryStore;
//! use chatmem_types::MemoryCommand;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::open("memory_dbs", "chat_memory.db")?);
//! let dispatcher = Dispatcher::new(store, StatusBus::default(), DispatchConfig::default());
//! let reply = dispatcher.dispatch("session-1", MemoryCommand::RecallMemories {}).await;
//! println!("{}", reply.message);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use chatmem_export::{DownloadServer, ExportError, build_archive, prepare_single};
use chatmem_middleware::StatusBus;
use chatmem_store::{
    DeleteOutcome, FileDeleteOutcome, MemoryStore, StoreError, UpdateOutcome, resolve_file_name,
};
use chatmem_types::{
    AUTHOR_LLM, AUTHOR_USER, ChatMemError, MemoryCommand, MemoryDraft, MemoryRecord, ReplyStatus,
    StatusEvent, StatusKind, Tag, ToolReply,
};
use tracing::{debug, info, warn};

use crate::confirm::{ConfirmationLedger, PendingAction, Verdict};
use crate::tool_calls::ToolCall;

const SOURCE: &str = "chatmem-runtime::dispatcher";

/// How long a download link stays open unless configured otherwise.
pub const DEFAULT_DOWNLOAD_WINDOW: Duration = Duration::from_secs(14);

/// Reply for `handle_input` when nothing was stored.
const NOTHING_STORED: &str = "Memory handling logic executed.";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime switches for [`Dispatcher`].
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// When `false`, `handle_input` and `refresh_memory` become no-ops.
    pub use_memory: bool,
    /// Lifetime of a download link.
    pub download_window: Duration,
    /// Address the download listener binds to.
    pub download_host: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            use_memory: true,
            download_window: DEFAULT_DOWNLOAD_WINDOW,
            download_host: "127.0.0.1".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Routes memory commands to the store.  Cheap to clone; clones share the
/// store, the bus and the confirmation ledger.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<MemoryStore>,
    bus: StatusBus,
    ledger: Arc<ConfirmationLedger>,
    config: Arc<DispatchConfig>,
}

impl Dispatcher {
    pub fn new(store: Arc<MemoryStore>, bus: StatusBus, config: DispatchConfig) -> Self {
        Self {
            store,
            bus,
            ledger: Arc::new(ConfirmationLedger::new()),
            config: Arc::new(config),
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn bus(&self) -> &StatusBus {
        &self.bus
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Execute one command on behalf of `session`.
    pub async fn dispatch(&self, session: &str, command: MemoryCommand) -> ToolReply {
        let name = command.name();
        if !command.is_destructive() {
            self.cancel_pending(session, name);
        }

        let reply = match command {
            MemoryCommand::HandleInput {
                input_text,
                tag,
                user_wants_to_add,
                llm_wants_to_add,
            } => {
                self.handle_input(session, input_text, tag, user_wants_to_add, llm_wants_to_add)
                    .await
            }
            MemoryCommand::RecallMemories {} => self.recall(session).await,
            MemoryCommand::ClearMemories { user_confirmation } => {
                self.clear(session, user_confirmation).await
            }
            MemoryCommand::RefreshMemory {} => self.refresh(session).await,
            MemoryCommand::UpdateMemoryEntry {
                index,
                tag,
                memo,
                by,
            } => self.update(session, index, tag, memo, by).await,
            MemoryCommand::AddMultipleMemories {
                memory_entries,
                llm_wants_to_add,
            } => self.add_many(session, memory_entries, llm_wants_to_add).await,
            MemoryCommand::DeleteMemoryEntry {
                index,
                llm_wants_to_delete,
            } => self.delete_one(session, index, llm_wants_to_delete).await,
            MemoryCommand::DeleteMultipleMemories {
                indices,
                llm_wants_to_delete,
            } => self.delete_many(session, indices, llm_wants_to_delete).await,
            MemoryCommand::CreateOrSwitchMemoryFile { new_file_name } => {
                self.switch_file(session, new_file_name).await
            }
            MemoryCommand::ListMemoryFiles {} => self.list_files(session).await,
            MemoryCommand::CurrentMemoryFile {} => self.current_file(session).await,
            MemoryCommand::DeleteMemoryFile {
                file_to_delete,
                user_confirmation,
            } => self.delete_file(session, file_to_delete, user_confirmation).await,
            MemoryCommand::DownloadMemory {
                memory_file_name,
                download_all,
            } => self.download(session, memory_file_name, download_all).await,
        };

        if reply.status == ReplyStatus::Error {
            warn!(session, command = name, message = %reply.message, "memory command failed");
        } else {
            info!(session, command = name, status = ?reply.status, "memory command handled");
        }
        reply
    }

    /// Look up a single memo for `session`.  Counts as an intervening call,
    /// so it cancels the session's pending confirmation.
    pub async fn fetch(
        &self,
        session: &str,
        index: i64,
    ) -> Result<Option<MemoryRecord>, ChatMemError> {
        self.cancel_pending(session, "get_memory");
        self.with_store(move |store| store.get(index)).await
    }

    /// Execute `calls` in order.  A failing or malformed call is reported in
    /// its slot and does not stop the rest.
    pub async fn execute_sequence<I>(&self, session: &str, calls: I) -> Vec<(String, ToolReply)>
    where
        I: IntoIterator,
        I::Item: Into<ToolCall>,
    {
        let mut results = Vec::new();
        for call in calls {
            let call = call.into();
            let name = call.name().to_string();
            self.emit(session, StatusKind::InProgress, format!("Executing {name}"), false);
            let reply = match call {
                ToolCall::Command(command) => self.dispatch(session, command).await,
                ToolCall::Invalid { name, reason } => {
                    self.ledger.clear(session);
                    self.failure(
                        session,
                        ChatMemError::InvalidCommand(format!("{name}: {reason}")),
                    )
                }
            };
            results.push((name, reply));
        }
        self.emit(
            session,
            StatusKind::Complete,
            "All requested functions have been processed.",
            true,
        );
        results
    }

    // ── Records ──────────────────────────────────────────────────────────────

    async fn handle_input(
        &self,
        session: &str,
        input_text: String,
        tag: String,
        user_wants_to_add: bool,
        llm_wants_to_add: bool,
    ) -> ToolReply {
        self.emit(
            session,
            StatusKind::MemoryAnalysis,
            format!("Analyzing input for memory: {input_text}"),
            false,
        );

        let author = if !self.config.use_memory {
            None
        } else if user_wants_to_add {
            Some(AUTHOR_USER)
        } else if llm_wants_to_add {
            Some(AUTHOR_LLM)
        } else {
            None
        };
        let Some(author) = author else {
            self.emit(session, StatusKind::Complete, NOTHING_STORED, true);
            return ToolReply::ok(NOTHING_STORED);
        };

        let tag = Tag::coerce(&tag);
        self.emit(
            session,
            StatusKind::MemoryUpdate,
            format!("Adding memo with tag {tag} for {author}"),
            false,
        );
        match self
            .with_store(move |store| store.add(tag.as_str(), &input_text, author))
            .await
        {
            Ok(id) => {
                let message = format!("Memo {id} added to memory at the {author}'s request.");
                self.emit(session, StatusKind::MemoryUpdate, &message, true);
                ToolReply::ok(message)
            }
            Err(e) => self.failure(session, e),
        }
    }

    async fn recall(&self, session: &str) -> ToolReply {
        self.emit(session, StatusKind::Recall, "Retrieving all stored memories.", false);
        let records = match self.with_store(|store| store.list_all()).await {
            Ok(records) => records,
            Err(e) => return self.failure(session, e),
        };
        if records.is_empty() {
            let message = "No memory stored.";
            self.emit(session, StatusKind::Recall, message, true);
            return ToolReply::ok(message);
        }
        match serde_json::to_string_pretty(&records) {
            Ok(json) => {
                self.emit(
                    session,
                    StatusKind::Recall,
                    format!("Retrieved {} memories.", records.len()),
                    true,
                );
                ToolReply::ok(format!("Memories are: {json}"))
            }
            Err(e) => self.failure(session, ChatMemError::Storage(e.to_string())),
        }
    }

    async fn clear(&self, session: &str, confirmed: bool) -> ToolReply {
        self.emit(session, StatusKind::Clear, "Attempting to clear all memory entries.", false);
        match self.ledger.evaluate(session, PendingAction::ClearAll, confirmed) {
            Verdict::RequireConfirmation => self.ask_confirmation(
                session,
                "Please confirm that you want to clear all memories: call clear_memories \
                 again with user_confirmation set to true.",
            ),
            Verdict::Abort => self.abort(session, "Memory clear operation aborted."),
            Verdict::Execute => match self.with_store(|store| store.clear_all()).await {
                Ok(removed) => {
                    let message = format!("All memories cleared ({removed} removed).");
                    self.emit(session, StatusKind::Clear, &message, true);
                    ToolReply::ok(message)
                }
                Err(e) => self.failure(session, e),
            },
        }
    }

    async fn refresh(&self, session: &str) -> ToolReply {
        self.emit(session, StatusKind::Refresh, "Starting memory refresh.", false);
        if !self.config.use_memory {
            let message = "Memory refresh completed.";
            self.emit(session, StatusKind::Complete, message, true);
            return ToolReply::ok(message);
        }
        match self.with_store(|store| store.refresh()).await {
            Ok(report) if report.integrity_ok => {
                let message = format!(
                    "Memory file {} refreshed: {} memories stored.",
                    report.file, report.records
                );
                self.emit(session, StatusKind::Refresh, &message, true);
                ToolReply::ok(message)
            }
            Ok(report) => self.failure(
                session,
                ChatMemError::Storage(format!(
                    "memory file {} failed its integrity check",
                    report.file
                )),
            ),
            Err(e) => self.failure(session, e),
        }
    }

    async fn update(
        &self,
        session: &str,
        index: i64,
        tag: String,
        memo: String,
        by: String,
    ) -> ToolReply {
        let outcome = self
            .with_store(move |store| store.update(index, &tag, &memo, &by))
            .await;
        match outcome {
            Ok(UpdateOutcome::Updated) => {
                let message = format!("Memory index {index} updated.");
                self.emit(session, StatusKind::MemoryUpdate, &message, true);
                ToolReply::ok(message)
            }
            Ok(UpdateOutcome::NotFound) => self.not_found(
                session,
                StatusKind::MemoryUpdate,
                format!("Memory index {index} does not exist."),
            ),
            Err(e) => self.failure(session, e),
        }
    }

    async fn add_many(
        &self,
        session: &str,
        entries: Vec<MemoryDraft>,
        llm_wants_to_add: bool,
    ) -> ToolReply {
        if !llm_wants_to_add {
            return self.refuse(
                session,
                StatusKind::MemoryUpdate,
                "LLM has not requested to add multiple memories.",
            );
        }
        if entries.is_empty() {
            return self.failure(
                session,
                ChatMemError::InvalidCommand("memory_entries is empty".to_string()),
            );
        }

        let mut lines = Vec::with_capacity(entries.len());
        let mut failed = 0usize;
        for (n, draft) in entries.into_iter().enumerate() {
            let n = n + 1;
            let MemoryDraft { tag, memo, by } = draft;
            let tag = Tag::coerce(&tag);
            let author = by.clone();
            let line = match self
                .with_store(move |store| store.add(tag.as_str(), &memo, &author))
                .await
            {
                Ok(id) => format!("Memory {n} added as #{id} with tag {tag} by {by}."),
                Err(e) => {
                    failed += 1;
                    format!("Memory {n} failed: {e}")
                }
            };
            self.emit(session, StatusKind::MemoryUpdate, &line, false);
            lines.push(line);
        }
        self.emit(
            session,
            StatusKind::MemoryUpdate,
            "All requested memories have been processed.",
            true,
        );

        let status = if failed == 0 { ReplyStatus::Ok } else { ReplyStatus::Error };
        ToolReply::new(status, lines.join("\n"))
    }

    async fn delete_one(&self, session: &str, index: i64, llm_wants_to_delete: bool) -> ToolReply {
        if !llm_wants_to_delete {
            return self.refuse(
                session,
                StatusKind::MemoryDeletion,
                "LLM has not requested to delete a memory.",
            );
        }
        match self.with_store(move |store| store.delete(index)).await {
            Ok(DeleteOutcome::Deleted) => {
                let message = format!("Memory index {index} deleted.");
                self.emit(session, StatusKind::MemoryDeletion, &message, true);
                ToolReply::ok(message)
            }
            Ok(DeleteOutcome::NotFound) => self.not_found(
                session,
                StatusKind::MemoryDeletion,
                format!("Memory index {index} does not exist."),
            ),
            Err(e) => self.failure(session, e),
        }
    }

    async fn delete_many(
        &self,
        session: &str,
        indices: Vec<i64>,
        llm_wants_to_delete: bool,
    ) -> ToolReply {
        if !llm_wants_to_delete {
            return self.refuse(
                session,
                StatusKind::MemoryDeletion,
                "LLM has not requested to delete multiple memories.",
            );
        }
        if indices.is_empty() {
            return self.failure(
                session,
                ChatMemError::InvalidCommand("indices is empty".to_string()),
            );
        }

        let mut lines = Vec::with_capacity(indices.len());
        let (mut missing, mut failed) = (0usize, 0usize);
        for index in indices {
            let line = match self.with_store(move |store| store.delete(index)).await {
                Ok(DeleteOutcome::Deleted) => format!("Memory index {index} deleted."),
                Ok(DeleteOutcome::NotFound) => {
                    missing += 1;
                    format!("Memory index {index} does not exist.")
                }
                Err(e) => {
                    failed += 1;
                    format!("Memory index {index} could not be deleted: {e}")
                }
            };
            self.emit(session, StatusKind::MemoryDeletion, &line, false);
            lines.push(line);
        }
        self.emit(
            session,
            StatusKind::MemoryDeletion,
            "All requested memory deletions have been processed.",
            true,
        );

        let status = if failed > 0 {
            ReplyStatus::Error
        } else if missing > 0 {
            ReplyStatus::NotFound
        } else {
            ReplyStatus::Ok
        };
        ToolReply::new(status, lines.join("\n"))
    }

    // ── Files ────────────────────────────────────────────────────────────────

    async fn switch_file(&self, session: &str, new_file_name: String) -> ToolReply {
        self.emit(
            session,
            StatusKind::FileSwitching,
            format!("Switching to memory file {new_file_name}."),
            false,
        );
        let switched = self
            .with_store(move |store| {
                store.switch_active_file(&new_file_name)?;
                Ok(store.current_file_name())
            })
            .await;
        match switched {
            Ok(active) => {
                let message = format!("Switched to memory file {active}.");
                self.emit(session, StatusKind::FileSwitching, &message, true);
                ToolReply::ok(message)
            }
            Err(e) => self.failure(session, e),
        }
    }

    async fn list_files(&self, session: &str) -> ToolReply {
        match self.with_store(|store| store.list_files()).await {
            Ok(files) => {
                let message = if files.is_empty() {
                    "No memory files found.".to_string()
                } else {
                    format!("Available memory files: {}", files.join(", "))
                };
                self.emit(session, StatusKind::FileListing, &message, true);
                ToolReply::ok(message)
            }
            Err(e) => self.failure(session, e),
        }
    }

    async fn current_file(&self, session: &str) -> ToolReply {
        match self.with_store(|store| Ok(store.current_file_name())).await {
            Ok(name) => {
                let message = format!("Currently using memory file: {name}");
                self.emit(session, StatusKind::CurrentFile, &message, true);
                ToolReply::ok(message)
            }
            Err(e) => self.failure(session, e),
        }
    }

    async fn delete_file(
        &self,
        session: &str,
        file_to_delete: String,
        confirmed: bool,
    ) -> ToolReply {
        let file = match resolve_file_name(&file_to_delete) {
            Ok(file) => file,
            Err(e) => {
                self.ledger.clear(session);
                return self.failure(session, store_error(e));
            }
        };
        self.emit(
            session,
            StatusKind::FileDeletion,
            format!("Attempting to delete memory file {file}."),
            false,
        );

        match self
            .ledger
            .evaluate(session, PendingAction::DeleteFile(file.clone()), confirmed)
        {
            Verdict::RequireConfirmation => self.ask_confirmation(
                session,
                &format!(
                    "Please confirm that you want to delete memory file '{file}': call \
                     delete_memory_file again with user_confirmation set to true."
                ),
            ),
            Verdict::Abort => {
                self.abort(session, &format!("Deletion of memory file '{file}' aborted."))
            }
            Verdict::Execute => {
                let target = file.clone();
                match self.with_store(move |store| store.delete_file(&target)).await {
                    Ok(FileDeleteOutcome::Deleted) => {
                        let message = format!("File '{file}' deleted.");
                        self.emit(session, StatusKind::FileDeletion, &message, true);
                        ToolReply::ok(message)
                    }
                    Ok(FileDeleteOutcome::RefusedActive) => self.refuse(
                        session,
                        StatusKind::FileDeletion,
                        &format!(
                            "Cannot delete the active memory file '{file}'. \
                             Switch to another file first."
                        ),
                    ),
                    Ok(FileDeleteOutcome::NotFound) => self.not_found(
                        session,
                        StatusKind::FileDeletion,
                        format!("File '{file}' does not exist."),
                    ),
                    Err(e) => self.failure(session, e),
                }
            }
        }
    }

    // ── Export ───────────────────────────────────────────────────────────────

    async fn download(
        &self,
        session: &str,
        memory_file_name: String,
        download_all: bool,
    ) -> ToolReply {
        if !download_all && memory_file_name.trim().is_empty() {
            return self.failure(
                session,
                ChatMemError::InvalidCommand(
                    "provide memory_file_name to download one file, or set download_all to \
                     true; list_memory_files shows what is available"
                        .to_string(),
                ),
            );
        }
        self.emit(session, StatusKind::Download, "Preparing download.", false);

        let dir = self.store.directory().to_path_buf();
        let prepared = tokio::task::spawn_blocking(move || {
            if download_all {
                build_archive(&dir)
            } else {
                prepare_single(&dir, &memory_file_name)
            }
        })
        .await;
        let artifact = match prepared {
            Ok(Ok(path)) => path,
            Ok(Err(e)) => return self.export_failure(session, e),
            Err(e) => {
                let error = ChatMemError::Export(format!("export task failed: {e}"));
                return self.failure(session, error);
            }
        };

        let server = match DownloadServer::bind(artifact, &self.config.download_host).await {
            Ok(server) => server,
            Err(e) => return self.export_failure(session, e),
        };
        let url = server.url();
        let window = self.config.download_window;
        self.emit(
            session,
            StatusKind::Download,
            format!("Download available for {} seconds at {url}", window.as_secs()),
            false,
        );

        let served = server.serve_for(window).await;
        let message = format!(
            "The download link {url} has expired; it served {served} download(s). \
             Tell the user to request a new link if they missed it."
        );
        self.emit(session, StatusKind::Download, &message, true);
        ToolReply::ok(message)
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn cancel_pending(&self, session: &str, command: &str) {
        if let Some(dropped) = self.ledger.clear(session) {
            debug!(session, command, ?dropped, "pending confirmation dropped");
        }
    }

    /// Run a store operation on the blocking pool.
    async fn with_store<T, F>(&self, op: F) -> Result<T, ChatMemError>
    where
        F: FnOnce(&MemoryStore) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| ChatMemError::Storage(format!("storage task failed: {e}")))?
            .map_err(store_error)
    }

    fn emit(&self, session: &str, status: StatusKind, description: impl Into<String>, done: bool) {
        self.bus
            .publish(StatusEvent::new(SOURCE, status, description, done).with_session(session));
    }

    fn ask_confirmation(&self, session: &str, message: &str) -> ToolReply {
        self.emit(session, StatusKind::ConfirmationRequired, message, false);
        ToolReply::new(ReplyStatus::ConfirmationRequired, message)
    }

    fn abort(&self, session: &str, message: &str) -> ToolReply {
        self.emit(session, StatusKind::Aborted, message, true);
        ToolReply::new(ReplyStatus::Aborted, message)
    }

    fn refuse(&self, session: &str, status: StatusKind, message: &str) -> ToolReply {
        self.emit(session, status, message, true);
        ToolReply::new(ReplyStatus::Refused, message)
    }

    fn not_found(&self, session: &str, status: StatusKind, message: String) -> ToolReply {
        self.emit(session, status, &message, true);
        ToolReply::new(ReplyStatus::NotFound, message)
    }

    fn failure(&self, session: &str, error: ChatMemError) -> ToolReply {
        let status = match error {
            ChatMemError::InvalidCommand(_) => ReplyStatus::Rejected,
            _ => ReplyStatus::Error,
        };
        let message = error.to_string();
        self.emit(session, StatusKind::Error, &message, true);
        ToolReply::new(status, message)
    }

    fn export_failure(&self, session: &str, error: ExportError) -> ToolReply {
        match error {
            ExportError::NotFound(name) => self.not_found(
                session,
                StatusKind::Download,
                format!(
                    "Memory file '{name}' does not exist; \
                     use list_memory_files to see what is available."
                ),
            ),
            ExportError::Store(e) => self.failure(session, store_error(e)),
            other => self.failure(session, ChatMemError::Export(other.to_string())),
        }
    }
}

fn store_error(error: StoreError) -> ChatMemError {
    match error {
        StoreError::InvalidPath(name) => {
            ChatMemError::InvalidCommand(format!("invalid memory file name {name:?}"))
        }
        other => ChatMemError::Storage(other.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
