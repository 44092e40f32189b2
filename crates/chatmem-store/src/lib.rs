//! `chatmem-store` – The Memo Store.
//!
//! Gives the assistant persistent, tagged notes, utilizing a directory of
//! local SQLite files of which exactly one is active at a time.
//!
//! # Modules
//!
//! - [`store`] – [`MemoryStore`][store::MemoryStore]: CRUD over the memos in
//!   the active file, plus switching, listing and deleting memory files.
//! - [`files`] – the memory-file naming convention: name resolution that
//!   refuses to leave the directory, and extension-filtered listing.

pub mod files;
pub mod store;

pub use files::{MEMORY_FILE_EXTENSION, resolve_file_name};
pub use store::{
    DEFAULT_DIRECTORY, DEFAULT_FILE_NAME, DeleteOutcome, FileDeleteOutcome, MemoryStore,
    RefreshReport, StoreError, UpdateOutcome,
};
