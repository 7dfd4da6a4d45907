//! The resource data model: a path together with one or more byte
//! representations, each tagged by media type and language, plus the pure
//! transformer algebra used to rewrite resources inside a pipeline.

mod body;
mod content;
mod resource;
mod transforms;

pub use crate::body::{Body, Payload};
pub use crate::content::{Content, ContentKey, ContentKeyError, ContentUpdate};
pub use crate::resource::{Resource, ResourceError};
pub use crate::transforms::{
    diversify, move_path, replace, replace_parsed, transform, ContentPredicate,
    ContentTransformer, Criterion, PathTransformer, ResourcePredicate, ResourceTransformer,
};
