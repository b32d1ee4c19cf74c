//! SnapSafe Archive Layer
//!
//! Turns filesystem trees into content-addressed, erasure-coded archives
//! and back:
//! - `ArchiveWriter` streams files into chunks and places shards across
//!   backends with progress reporting
//! - `ArchiveReader` restores entries, materializes file contents and
//!   serves random-access reads through a bounded chunk cache
//! - `Repository` ties a backend manager to the password-derived key

pub mod cache;
pub mod fsutil;
pub mod item;
pub mod reader;
pub mod repository;
pub mod writer;

pub use cache::ChunkCache;
pub use item::{ItemData, ItemType, Progress, Stats};
pub use reader::{restore_items, ArchiveReader, RestoreJob};
pub use repository::Repository;
pub use writer::{ArchiveWriter, SnapshotOptions, StoreJob};
