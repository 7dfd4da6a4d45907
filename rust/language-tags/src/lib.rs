//! Language tags for tagging the natural language of content.
//!
//! Implements the `language[-script][-region]` subset of RFC 5646 that is
//! used to key alternate representations of a resource. Tags are interned:
//! two tags with the same canonical form are the same identity, so equality
//! and hashing are pointer-sized operations.

use std::{
    collections::HashMap,
    fmt::{self, Display},
    hash::{Hash, Hasher},
    str::FromStr,
    sync::RwLock,
};

use common::{once_cell::sync::Lazy, serde::Serializer};
use thiserror::Error;

/// An error when constructing or parsing a [`LanguageTag`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LanguageTagError {
    /// The language subtag is not 2 or 3 ASCII letters (ISO 639)
    #[error("invalid language subtag `{0}`: expected two or three ASCII letters")]
    InvalidLanguage(String),

    /// The script subtag is not 4 ASCII letters (ISO 15924)
    #[error("invalid script subtag `{0}`: expected four ASCII letters")]
    InvalidScript(String),

    /// The region subtag is not 2 or 3 ASCII letters (ISO 3166-1)
    #[error("invalid region subtag `{0}`: expected two or three ASCII letters")]
    InvalidRegion(String),

    /// The string as a whole does not have the shape `language[-script][-region]`
    #[error("invalid language tag string `{0}`")]
    InvalidTagString(String),
}

/// The interned representation of a tag
///
/// Subtags are stored lowercase; `text` holds the canonical textual form
/// (lowercase language, TitleCase script, UPPERCASE region).
#[derive(Debug)]
struct TagRepr {
    language: String,
    script: Option<String>,
    region: Option<String>,
    text: String,
}

/// The process-wide intern table
///
/// Entries are leaked and never removed, so `&'static` references handed out
/// remain valid for the life of the process. The reader-writer guard makes
/// interning safe from multiple threads; lookups take the read half only.
static TAGS: Lazy<RwLock<HashMap<String, &'static TagRepr>>> = Lazy::new(Default::default);

/// A language tag such as `en`, `ko-Kore`, or `pt-BR`
///
/// A cheap `Copy` handle onto an interned representation. Because tags are
/// interned, `==` is pointer equality and implies structural equality.
#[derive(Clone, Copy)]
pub struct LanguageTag(&'static TagRepr);

impl LanguageTag {
    /// Get the interned tag for the given subtags
    ///
    /// Validates each subtag against its character class and canonicalizes
    /// case, so `get("KO", Some("KORE"), None)` and `get("ko", Some("Kore"), None)`
    /// return the same instance.
    pub fn get(
        language: &str,
        script: Option<&str>,
        region: Option<&str>,
    ) -> Result<Self, LanguageTagError> {
        if !(2..=3).contains(&language.len()) || !language.bytes().all(|b| b.is_ascii_alphabetic())
        {
            return Err(LanguageTagError::InvalidLanguage(language.to_string()));
        }
        if let Some(script) = script {
            if script.len() != 4 || !script.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(LanguageTagError::InvalidScript(script.to_string()));
            }
        }
        if let Some(region) = region {
            if !(2..=3).contains(&region.len()) || !region.bytes().all(|b| b.is_ascii_alphabetic())
            {
                return Err(LanguageTagError::InvalidRegion(region.to_string()));
            }
        }

        Ok(Self::intern(
            language.to_ascii_lowercase(),
            script.map(str::to_ascii_lowercase),
            region.map(str::to_ascii_lowercase),
        ))
    }

    /// Look up, or create, the interned representation for already validated,
    /// lowercased subtags
    fn intern(language: String, script: Option<String>, region: Option<String>) -> Self {
        let key = [
            language.as_str(),
            script.as_deref().unwrap_or_default(),
            region.as_deref().unwrap_or_default(),
        ]
        .join("-");

        let existing = TAGS.read().expect("intern table poisoned").get(&key).copied();
        if let Some(repr) = existing {
            return LanguageTag(repr);
        }

        let mut table = TAGS.write().expect("intern table poisoned");
        let repr = table.entry(key).or_insert_with(|| {
            let text = Self::textual(&language, script.as_deref(), region.as_deref());
            Box::leak(Box::new(TagRepr {
                language,
                script,
                region,
                text,
            }))
        });
        LanguageTag(*repr)
    }

    /// The canonical textual form for lowercased subtags
    fn textual(language: &str, script: Option<&str>, region: Option<&str>) -> String {
        let mut text = language.to_string();
        if let Some(script) = script {
            text.push('-');
            text.push_str(&script[..1].to_ascii_uppercase());
            text.push_str(&script[1..]);
        }
        if let Some(region) = region {
            text.push('-');
            text.push_str(&region.to_ascii_uppercase());
        }
        text
    }

    /// The primary language subtag (lowercase)
    pub fn language(&self) -> &'static str {
        &self.0.language
    }

    /// The script subtag (lowercase), if any
    pub fn script(&self) -> Option<&'static str> {
        self.0.script.as_deref()
    }

    /// The region subtag (lowercase), if any
    pub fn region(&self) -> Option<&'static str> {
        self.0.region.as_deref()
    }

    /// Whether this tag matches a pattern tag
    ///
    /// The pattern's language must equal this tag's language; a script or
    /// region absent from the pattern acts as a wildcard. So `ko-KR` matches
    /// the patterns `ko` and `ko-KR` but not `ko-Kore`.
    pub fn matches(&self, pattern: &LanguageTag) -> bool {
        self.language() == pattern.language()
            && pattern.script().map_or(true, |script| self.script() == Some(script))
            && pattern.region().map_or(true, |region| self.region() == Some(region))
    }

    /// The less specific forms of this tag
    ///
    /// Expands the two script choices (present, dropped) against the two
    /// region choices, in the order: drop script, drop region, drop both.
    /// When `include_self` is true the tag itself comes first. The result
    /// always ends with the bare language tag.
    pub fn reduce(&self, include_self: bool) -> Vec<LanguageTag> {
        let mut tags = Vec::new();
        for region in [self.region(), None] {
            for script in [self.script(), None] {
                let tag = Self::get(self.language(), script, region)
                    .expect("subtags were validated when this tag was interned");
                if (tag == *self && !include_self) || tags.contains(&tag) {
                    continue;
                }
                tags.push(tag);
            }
        }
        tags
    }
}

impl PartialEq for LanguageTag {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for LanguageTag {}

impl Hash for LanguageTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0 as *const TagRepr as usize).hash(state);
    }
}

impl fmt::Debug for LanguageTag {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "LanguageTag({})", self.0.text)
    }
}

impl Display for LanguageTag {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str(&self.0.text)
    }
}

impl FromStr for LanguageTag {
    type Err = LanguageTagError;

    /// Parse the textual form `language[-script][-region]`
    ///
    /// The script segment is exactly four letters and the region segment two
    /// or three; underscores, empty segments and extra segments are rejected.
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = string.split('-').collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(LanguageTagError::InvalidTagString(string.to_string()));
        }
        match segments.as_slice() {
            [language] => Self::get(language, None, None),
            [language, subtag] => {
                if subtag.len() == 4 {
                    Self::get(language, Some(subtag), None)
                } else {
                    Self::get(language, None, Some(subtag))
                }
            }
            [language, script, region] => Self::get(language, Some(script), Some(region)),
            _ => Err(LanguageTagError::InvalidTagString(string.to_string())),
        }
    }
}

impl common::serde::Serialize for LanguageTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
