//! URL path rewriting helpers.
//!
//! Thin pure functions over resource paths, plus constructors for the path
//! transformers and predicates used with `Pipeline::move_path` and
//! `Pipeline::filter`. Base URLs handed to these helpers must end with a
//! slash and carry no query or fragment.

use std::sync::Arc;

use common::{regex::Regex, url::Url};
use language_tags::LanguageTag;
use resources::{ContentUpdate, PathTransformer, Resource, ResourcePredicate, ResourceTransformer};
use thiserror::Error;

/// An error from a path rewriting helper
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("base URL `{0}` must end with a slash")]
    MustEndWithSlash(Url),

    #[error("base URL `{0}` must not have a query")]
    MustNotHaveQuery(Url),

    #[error("base URL `{0}` must not have a fragment")]
    MustNotHaveFragment(Url),

    #[error("URL `{url}` is not based on `{base}`")]
    NotBasedOn { url: Url, base: Url },
}

/// Validate that a URL can be used as a base
pub fn check_base(base: &Url) -> Result<(), PathError> {
    if base.query().is_some() {
        return Err(PathError::MustNotHaveQuery(base.clone()));
    }
    if base.fragment().is_some() {
        return Err(PathError::MustNotHaveFragment(base.clone()));
    }
    if !base.path().ends_with('/') {
        return Err(PathError::MustEndWithSlash(base.clone()));
    }
    Ok(())
}

/// Whether two URLs share a scheme and authority
fn same_authority(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}

/// Whether `url` is inside `base`
pub fn is_based_on(url: &Url, base: &Url) -> Result<bool, PathError> {
    check_base(base)?;
    Ok(same_authority(url, base) && url.path().starts_with(base.path()))
}

/// The path remainder of `url` under `base`
///
/// The query and fragment of `url` are not part of the remainder.
pub fn remove_base(url: &Url, base: &Url) -> Result<String, PathError> {
    if !is_based_on(url, base)? {
        return Err(PathError::NotBasedOn {
            url: url.clone(),
            base: base.clone(),
        });
    }
    Ok(url.path()[base.path().len()..].to_string())
}

/// A path transformer moving URLs under `from` to the same place under `to`
///
/// URLs not based on `from` pass through unchanged; the query string is
/// preserved.
pub fn rebase(from: &Url, to: &Url) -> Result<PathTransformer, PathError> {
    check_base(from)?;
    check_base(to)?;
    let from = from.clone();
    let to = to.clone();
    Ok(Arc::new(move |url: &Url| {
        if !is_based_on(url, &from)? {
            return Ok(url.clone());
        }
        let remainder = remove_base(url, &from)?;
        let mut rebased = to.join(&remainder)?;
        rebased.set_query(url.query());
        Ok(rebased)
    }))
}

/// A predicate selecting resources whose path has one of the extensions
pub fn having_extension(
    extensions: impl IntoIterator<Item = impl Into<String>>,
) -> ResourcePredicate {
    let extensions: Vec<String> = extensions
        .into_iter()
        .map(|extension| extension.into().to_ascii_lowercase())
        .collect();
    Arc::new(move |resource: &Resource| {
        path_extension(resource.path())
            .map_or(false, |extension| extensions.contains(&extension.to_ascii_lowercase()))
    })
}

/// The extension of the final path segment, if any
fn path_extension(url: &Url) -> Option<&str> {
    let basename = url.path().rsplit('/').next()?;
    match basename.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => Some(extension),
        _ => None,
    }
}

/// A path transformer turning `…/name.ext` into a directory `…/name/`
///
/// Paths already ending with a slash pass through unchanged. With
/// `strip_extension` the extension is removed first, so `…/about.html`
/// becomes `…/about/` rather than `…/about.html/`.
pub fn into_directory(strip_extension: bool) -> PathTransformer {
    Arc::new(move |url: &Url| {
        if url.path().ends_with('/') {
            return Ok(url.clone());
        }
        let mut directory = url.clone();
        let path = url.path();
        let basename = path.rsplit('/').next().unwrap_or_default();
        let stem = match (strip_extension, basename.rsplit_once('.')) {
            (true, Some((stem, ..))) if !stem.is_empty() => stem,
            _ => basename,
        };
        directory.set_path(&[&path[..path.len() - basename.len()], stem, "/"].concat());
        Ok(directory)
    })
}

/// A path transformer applying a regex replacement to the final path segment
pub fn replace_basename(pattern: Regex, replacement: &str) -> PathTransformer {
    let replacement = replacement.to_string();
    Arc::new(move |url: &Url| {
        let path = url.path();
        let basename = path.rsplit('/').next().unwrap_or_default();
        let replaced = pattern.replace(basename, replacement.as_str());
        let mut rewritten = url.clone();
        rewritten.set_path(&[&path[..path.len() - basename.len()], replaced.as_ref()].concat());
        Ok(rewritten)
    })
}

/// Extract the first capture (or whole match) of `pattern` from a URL
///
/// With a `base`, the pattern is applied to the path remainder under the
/// base (a URL outside the base is an error); without one, to the whole URL
/// string.
pub fn extract_from_url(
    url: &Url,
    pattern: &Regex,
    base: Option<&Url>,
) -> Result<Option<String>, PathError> {
    let subject = match base {
        Some(base) => remove_base(url, base)?,
        None => url.to_string(),
    };
    Ok(pattern.captures(&subject).map(|captures| {
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|capture| capture.as_str().to_string())
            .unwrap_or_default()
    }))
}

/// Extract and convert in one step
pub fn extract_from_url_with<T>(
    url: &Url,
    pattern: &Regex,
    base: Option<&Url>,
    convert: impl Fn(&str) -> T,
) -> Result<Option<T>, PathError> {
    Ok(extract_from_url(url, pattern, base)?
        .map(|extracted| convert(&extracted)))
}

/// Where [`detect_language`] looks for a language tag
#[derive(Debug, Clone)]
pub enum LanguageLocation {
    /// Any path segment that parses as an RFC 5646 tag
    PathSegment,

    /// The value of the named query parameter
    QueryParam(String),
}

/// Options for [`detect_language`]
#[derive(Debug, Clone)]
pub struct DetectLanguage {
    pub location: LanguageLocation,

    /// Remove the detected segment or parameter from the path
    pub strip: bool,
}

impl Default for DetectLanguage {
    fn default() -> Self {
        Self {
            location: LanguageLocation::PathSegment,
            strip: false,
        }
    }
}

/// A transformer detecting a language from the resource path
///
/// When a tag is found, every representation lacking a language gets it and
/// representations whose language differs are overridden; with `strip`, the
/// detected segment or parameter is removed from the path.
pub fn detect_language(options: DetectLanguage) -> ResourceTransformer {
    Arc::new(move |resource: Resource| {
        let (language, stripped) = match &options.location {
            LanguageLocation::PathSegment => detect_in_path(resource.path()),
            LanguageLocation::QueryParam(name) => detect_in_query(resource.path(), name),
        };
        let Some(language) = language else {
            return Ok(resource);
        };

        let resource = if options.strip {
            resource.move_to(stripped)
        } else {
            resource
        };

        let update = ContentUpdate {
            language: Some(Some(language)),
            ..Default::default()
        };
        let contents: Vec<_> = resource
            .contents()
            .map(|content| {
                if content.language() == Some(language) {
                    content.clone()
                } else {
                    content.replace(update.clone())
                }
            })
            .collect();
        Ok(Resource::new(resource.path().clone(), contents)?)
    })
}

/// Find the first path segment parseable as a language tag
fn detect_in_path(url: &Url) -> (Option<LanguageTag>, Url) {
    let segments: Vec<&str> = url.path().split('/').collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if let Ok(language) = segment.parse::<LanguageTag>() {
            let mut remaining = segments.clone();
            remaining.remove(index);
            let mut stripped = url.clone();
            stripped.set_path(&remaining.join("/"));
            return (Some(language), stripped);
        }
    }
    (None, url.clone())
}

/// Read a language tag from the named query parameter
fn detect_in_query(url: &Url, name: &str) -> (Option<LanguageTag>, Url) {
    let Some(language) = url
        .query_pairs()
        .find(|(key, ..)| key.as_ref() == name)
        .and_then(|(.., value)| value.parse::<LanguageTag>().ok())
    else {
        return (None, url.clone());
    };

    let mut stripped = url.clone();
    let remaining: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, ..)| key.as_ref() != name)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if remaining.is_empty() {
        stripped.set_query(None);
    } else {
        stripped
            .query_pairs_mut()
            .clear()
            .extend_pairs(remaining)
            .finish();
    }
    (Some(language), stripped)
}
