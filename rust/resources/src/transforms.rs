//! Pure transformer values applied by pipeline combinators.
//!
//! Transformers and predicates are first-class closure values so that
//! pipelines can compose them without knowing what they do. A [`Criterion`]
//! scopes a content transformation to the representations it should touch
//! and is normalized to a plain predicate at construction time.

use std::sync::Arc;

use common::{eyre::Result, url::Url};
use language_tags::{LanguageTag, LanguageTagError};
use media_types::{MediaType, MediaTypeError};

use crate::content::{Content, ContentKeyError, ContentUpdate};
use crate::resource::Resource;

/// A pure `Resource -> Resource` transformation
pub type ResourceTransformer = Arc<dyn Fn(Resource) -> Result<Resource> + Send + Sync>;

/// A pure `Content -> Content` transformation
pub type ContentTransformer = Arc<dyn Fn(Content) -> Result<Content> + Send + Sync>;

/// A pure path rewrite
pub type PathTransformer = Arc<dyn Fn(&Url) -> Result<Url> + Send + Sync>;

/// A predicate over resources, used by `Pipeline::filter`
pub type ResourcePredicate = Arc<dyn Fn(&Resource) -> bool + Send + Sync>;

/// A predicate over representations
pub type ContentPredicate = Arc<dyn Fn(&Content) -> bool + Send + Sync>;

/// A condition selecting the representations a transformation applies to
pub enum Criterion {
    /// The representation's media type matches a pattern such as `text/*`
    MediaType(MediaType),

    /// The representation's language matches a pattern tag
    Language(LanguageTag),

    /// An arbitrary predicate
    Predicate(ContentPredicate),
}

impl Criterion {
    /// A media type criterion parsed from a pattern string
    pub fn media_type(pattern: &str) -> Result<Self, MediaTypeError> {
        Ok(Criterion::MediaType(pattern.parse()?))
    }

    /// A language criterion parsed from a pattern string
    pub fn language(pattern: &str) -> Result<Self, LanguageTagError> {
        Ok(Criterion::Language(pattern.parse()?))
    }

    pub fn predicate(predicate: impl Fn(&Content) -> bool + Send + Sync + 'static) -> Self {
        Criterion::Predicate(Arc::new(predicate))
    }

    /// Normalize to a single content predicate
    pub fn into_predicate(self) -> ContentPredicate {
        match self {
            Criterion::MediaType(pattern) => {
                Arc::new(move |content| content.media_type().matches(&pattern))
            }
            Criterion::Language(pattern) => Arc::new(move |content| {
                content
                    .language()
                    .map_or(false, |language| language.matches(&pattern))
            }),
            Criterion::Predicate(predicate) => predicate,
        }
    }
}

impl From<MediaType> for Criterion {
    fn from(media_type: MediaType) -> Self {
        Criterion::MediaType(media_type)
    }
}

impl From<LanguageTag> for Criterion {
    fn from(language: LanguageTag) -> Self {
        Criterion::Language(language)
    }
}

/// A transformer applying a path rewrite to each resource
pub fn move_path(transformer: PathTransformer) -> ResourceTransformer {
    Arc::new(move |resource: Resource| {
        let path = transformer(resource.path())?;
        Ok(resource.move_to(path))
    })
}

/// A transformer mapping the matching representations through `transformer`,
/// replacing them; non-matching representations pass through untouched
///
/// The representation count is preserved unless the transformation moves a
/// representation onto an existing `(media_type, language)` key, in which
/// case the resource-level rule applies and the existing one is replaced.
pub fn transform(
    transformer: ContentTransformer,
    criterion: Option<Criterion>,
) -> ResourceTransformer {
    let predicate = criterion.map(Criterion::into_predicate);
    Arc::new(move |resource: Resource| {
        let mut contents = Vec::new();
        for content in resource.contents() {
            if predicate.as_ref().map_or(true, |applies| applies(content)) {
                contents.push(transformer(content.clone())?);
            } else {
                contents.push(content.clone());
            }
        }
        Ok(Resource::new(resource.path().clone(), contents)?)
    })
}

/// A transformer keeping each matching representation and appending the
/// derived one after it
///
/// If the derived representation reuses an existing key the resource-level
/// last-wins rule replaces the earlier entry; callers that intend to replace
/// should use [`transform`] instead.
pub fn diversify(
    transformer: ContentTransformer,
    criterion: Option<Criterion>,
) -> ResourceTransformer {
    let predicate = criterion.map(Criterion::into_predicate);
    Arc::new(move |resource: Resource| {
        let mut contents = Vec::new();
        for content in resource.contents() {
            contents.push(content.clone());
            if predicate.as_ref().map_or(true, |applies| applies(content)) {
                contents.push(transformer(content.clone())?);
            }
        }
        Ok(Resource::new(resource.path().clone(), contents)?)
    })
}

/// A content transformer applying a typed partial update
pub fn replace(update: ContentUpdate) -> ContentTransformer {
    Arc::new(move |content: Content| Ok(content.replace(update.clone())))
}

/// A content transformer applying a partial update given as strings
///
/// Parsing happens here, so invalid media type or language strings fail at
/// transformer construction rather than while the pipeline is draining.
pub fn replace_parsed(
    media_type: Option<&str>,
    language: Option<&str>,
) -> Result<ContentTransformer, ContentKeyError> {
    Ok(replace(ContentUpdate::parsed(media_type, language)?))
}
