//! Filesystem adapters for pipelines: a glob scanner producing resources
//! with lazily read bodies, a change monitor backed by a filesystem watcher,
//! and an idempotent per-representation file writer.

mod scanner;
mod writer;

pub use crate::scanner::FileScanner;
pub use crate::writer::FileWriter;
