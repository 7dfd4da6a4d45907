use std::{fmt, sync::Arc};

use common::{
    chrono::{DateTime, Utc},
    indexmap::IndexMap,
    serde_json,
};
use language_tags::{LanguageTag, LanguageTagError};
use media_types::{MediaType, MediaTypeError};
use thiserror::Error;

use crate::body::Body;

/// An error when building the key fields of a [`Content`] from strings
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContentKeyError {
    #[error("invalid content media type: {0}")]
    MediaType(#[from] MediaTypeError),

    #[error("invalid content language: {0}")]
    Language(#[from] LanguageTagError),
}

/// The uniqueness key of a representation within a resource
pub type ContentKey = (MediaType, Option<LanguageTag>);

/// One representation of a [`Resource`](crate::Resource)
///
/// Immutable; a representation is identified within its resource by its
/// `(media_type, language)` key. The body may be lazy (see [`Body`]).
#[derive(Clone)]
pub struct Content {
    body: Body,
    media_type: MediaType,
    language: Option<LanguageTag>,
    last_modified: DateTime<Utc>,

    /// Opaque metadata (title, date, front matter fields, …) carried along
    /// for summarizers and templates; never part of the key.
    metadata: Arc<IndexMap<String, serde_json::Value>>,
}

impl Content {
    pub fn new(
        media_type: MediaType,
        language: Option<LanguageTag>,
        last_modified: DateTime<Utc>,
        body: impl Into<Body>,
    ) -> Self {
        Self {
            body: body.into(),
            media_type,
            language,
            last_modified,
            metadata: Arc::new(IndexMap::new()),
        }
    }

    /// The same content with the metadata map replaced
    pub fn with_metadata(self, metadata: IndexMap<String, serde_json::Value>) -> Self {
        Self {
            metadata: Arc::new(metadata),
            ..self
        }
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn language(&self) -> Option<LanguageTag> {
        self.language
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn metadata(&self) -> &IndexMap<String, serde_json::Value> {
        &self.metadata
    }

    /// The `(media_type, language)` uniqueness key
    pub fn key(&self) -> ContentKey {
        (self.media_type, self.language)
    }

    /// A new content with the named fields overridden
    ///
    /// Fields absent from the update are shared with this content; in
    /// particular a kept body shares its memoized payload.
    pub fn replace(&self, update: ContentUpdate) -> Self {
        Self {
            body: update.body.unwrap_or_else(|| self.body.clone()),
            media_type: update.media_type.unwrap_or(self.media_type),
            language: update.language.unwrap_or(self.language),
            last_modified: update.last_modified.unwrap_or(self.last_modified),
            metadata: update
                .metadata
                .map(Arc::new)
                .unwrap_or_else(|| Arc::clone(&self.metadata)),
        }
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter
            .debug_struct("Content")
            .field("media_type", &self.media_type)
            .field("language", &self.language)
            .field("last_modified", &self.last_modified)
            .field("body", &self.body)
            .finish()
    }
}

/// A partial update applied by [`Content::replace`]
///
/// `language` is doubly optional so that an update can set the language,
/// clear it (`Some(None)`), or leave it alone (`None`).
#[derive(Debug, Default, Clone)]
pub struct ContentUpdate {
    pub body: Option<Body>,
    pub media_type: Option<MediaType>,
    pub language: Option<Option<LanguageTag>>,
    pub last_modified: Option<DateTime<Utc>>,
    pub metadata: Option<IndexMap<String, serde_json::Value>>,
}

impl ContentUpdate {
    /// Parse media type and language updates from strings
    ///
    /// Fails fast so that transformers built from string arguments surface
    /// syntax errors at construction rather than mid-stream.
    pub fn parsed(
        media_type: Option<&str>,
        language: Option<&str>,
    ) -> Result<Self, ContentKeyError> {
        Ok(Self {
            media_type: media_type.map(str::parse).transpose()?,
            language: language
                .map(|language| language.parse().map(Some))
                .transpose()?,
            ..Default::default()
        })
    }
}
