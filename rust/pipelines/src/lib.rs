//! Pipelines: lazily realized, dedup-by-path asynchronous streams of
//! resources, with an algebra of combinators and a reload cycle driven by
//! source change monitors.

mod pipeline;
mod source;

pub use crate::pipeline::{OnReload, Pipeline, ResourceSet};
pub use crate::source::{MonitorStream, ResourceStream, Sink, Source};
