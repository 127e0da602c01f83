//! Cond-mat paper feed builder.
//!
//! Reads a curated page of arXiv abstract links, fills in title, abstract,
//! authors and date from the arXiv API, keeps everything in a JSON cache
//! between runs, and publishes an RSS 2.0 feed plus a browsable HTML page.

pub mod arxiv;
pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod formula;
pub mod fs;
pub mod http;
pub mod identity;
pub mod reconcile;
pub mod render;
pub mod source;
pub mod sync;
pub mod text;

pub use config::Config;
pub use entry::{Details, Entry, SourceItem};
pub use error::{Result, SyncError};
pub use sync::{run_sync, status, StatusReport, SyncReport};
