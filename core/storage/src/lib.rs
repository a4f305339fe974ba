//! Storage abstractions for HealthSync.
//!
//! This crate provides the seams between the export engine and the outside
//! world: trait-based contracts for the remote file and spreadsheet stores,
//! keyed local persistence for queue and settings documents, in-memory fakes
//! of all of them, and the Google-backed transports.
//!
//! # Design Principles
//! - Every remote operation returns a typed `Result`; nothing panics across the seam
//! - Async operations: all I/O is async
//! - Credentials are refreshed explicitly per batch, never cached inside an adapter

pub mod a1;
pub mod gdrive;
pub mod kv;
pub mod local;
pub mod memory;
pub mod provider;

pub use a1::{block_range, column_letter};
pub use kv::KeyValueStore;
pub use local::FileKeyValueStore;
pub use memory::{
    MemoryAdapters, MemoryFileStore, MemoryKeyValueStore, MemorySpreadsheetStore, RemoteCall,
};
pub use provider::{
    FileInfo, FileOperations, RemoteAdapters, RemoteSession, SheetData, SpreadsheetAdapter,
    CSV_MIME_TYPE, PDF_MIME_TYPE, SPREADSHEET_MIME_TYPE,
};
