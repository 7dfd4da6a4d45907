use std::{fmt, sync::Arc};

use common::{
    chrono::{DateTime, Utc},
    indexmap::IndexMap,
    url::Url,
};
use language_tags::LanguageTag;
use media_types::MediaType;
use thiserror::Error;

use crate::content::{Content, ContentKey};

/// An error when constructing or writing a [`Resource`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
    /// A resource must carry at least one representation
    #[error("resource `{0}` has no representations")]
    NoContents(Url),

    /// Two representations resolve to the same write target
    #[error("representations of `{path}` both target `{target}`")]
    DuplicateTarget { path: Url, target: String },
}

/// A path together with one or more byte representations
///
/// The path is an absolute URL (guaranteed by the [`Url`] type); any
/// fragment is dropped because it does not participate in identity, while
/// the query string does. Representations are unique by
/// `(media_type, language)`: inserting a duplicate replaces the earlier one
/// in place, keeping its slot in iteration order.
///
/// Cheap to clone: the representation set is shared, and path moves share it
/// structurally.
#[derive(Clone)]
pub struct Resource {
    path: Url,
    contents: Arc<IndexMap<ContentKey, Content>>,
}

impl Resource {
    pub fn new(
        path: Url,
        contents: impl IntoIterator<Item = Content>,
    ) -> Result<Self, ResourceError> {
        let mut path = path;
        path.set_fragment(None);

        let mut map = IndexMap::new();
        for content in contents {
            map.insert(content.key(), content);
        }
        if map.is_empty() {
            return Err(ResourceError::NoContents(path));
        }

        Ok(Self {
            path,
            contents: Arc::new(map),
        })
    }

    pub fn path(&self) -> &Url {
        &self.path
    }

    /// The representations, in insertion order of the final set
    pub fn contents(&self) -> impl Iterator<Item = &Content> {
        self.contents.values()
    }

    /// The representation with the given key, if any
    pub fn content(&self, media_type: MediaType, language: Option<LanguageTag>) -> Option<&Content> {
        self.contents.get(&(media_type, language))
    }

    /// The same resource at a different path (representations shared)
    pub fn move_to(&self, path: Url) -> Self {
        let mut path = path;
        path.set_fragment(None);
        Self {
            path,
            contents: Arc::clone(&self.contents),
        }
    }

    /// A new resource with the given representations added
    ///
    /// Added representations follow the usual key rule: a duplicate
    /// `(media_type, language)` replaces the existing representation.
    pub fn add_representations(&self, contents: impl IntoIterator<Item = Content>) -> Self {
        let mut map = (*self.contents).clone();
        for content in contents {
            map.insert(content.key(), content);
        }
        Self {
            path: self.path.clone(),
            contents: Arc::new(map),
        }
    }

    /// The most recent modification time across all representations
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.contents
            .values()
            .map(Content::last_modified)
            .max()
            .expect("a resource always has at least one representation")
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Resource")
            .field("path", &self.path.as_str())
            .field("contents", &self.contents.values().collect::<Vec<_>>())
            .finish()
    }
}
