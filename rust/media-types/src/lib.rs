//! Media types for tagging the byte representations of a resource.
//!
//! Parses IANA `type/subtype[;name=value]*` strings, normalizes case, and
//! interns the result so that equality is identity. Because `*` is a valid
//! token character, ranges such as `text/*` parse like any other media type
//! and act as patterns for [`MediaType::matches`].

use std::{
    collections::HashMap,
    fmt::{self, Display},
    hash::{Hash, Hasher},
    str::FromStr,
    sync::RwLock,
};

use common::{itertools::Itertools, once_cell::sync::Lazy, serde::Serializer};
use thiserror::Error;

/// An error when constructing or parsing a [`MediaType`]
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaTypeError {
    /// The string does not have the shape `type/subtype[;name=value]*`
    #[error("invalid media type string `{0}`")]
    InvalidMediaTypeString(String),

    /// A parameter name is not an RFC token
    #[error("invalid media type parameter name `{0}`")]
    InvalidParameterName(String),
}

/// The interned representation of a media type
///
/// `type_` and `subtype` and parameter names are stored lowercase.
/// Parameters keep the order they were supplied in, which is the order used
/// for serialization; comparison is order-independent via the intern key.
#[derive(Debug)]
struct MediaTypeRepr {
    type_: String,
    subtype: String,
    parameters: Vec<(String, String)>,
}

static TYPES: Lazy<RwLock<HashMap<String, &'static MediaTypeRepr>>> = Lazy::new(Default::default);

/// A media type such as `text/html` or `text/plain; charset=utf-8`
///
/// A cheap `Copy` handle onto an interned representation; `==` is pointer
/// equality and implies structural equality.
#[derive(Clone, Copy)]
pub struct MediaType(&'static MediaTypeRepr);

impl MediaType {
    /// The type, e.g. `text` (lowercase)
    pub fn type_(&self) -> &'static str {
        &self.0.type_
    }

    /// The subtype, e.g. `html` (lowercase)
    pub fn subtype(&self) -> &'static str {
        &self.0.subtype
    }

    /// The `type/subtype` essence, without parameters
    pub fn essence(&self) -> String {
        [self.type_(), "/", self.subtype()].concat()
    }

    /// The parameters, in serialization order
    pub fn parameters(&self) -> &'static [(String, String)] {
        &self.0.parameters
    }

    /// The value of the named parameter (name compared case-insensitively)
    pub fn parameter(&self, name: &str) -> Option<&'static str> {
        let name = name.to_ascii_lowercase();
        self.0
            .parameters
            .iter()
            .find(|(existing, ..)| *existing == name)
            .map(|(.., value)| value.as_str())
    }

    /// A new media type with the parameter set (replacing any existing value)
    pub fn with_parameter(&self, name: &str, value: &str) -> Result<Self, MediaTypeError> {
        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(MediaTypeError::InvalidParameterName(name.to_string()));
        }
        let name = name.to_ascii_lowercase();
        let mut parameters = self.0.parameters.clone();
        match parameters.iter_mut().find(|(existing, ..)| *existing == name) {
            Some(parameter) => parameter.1 = value.to_string(),
            None => parameters.push((name, value.to_string())),
        }
        Ok(Self::intern(
            self.type_().to_string(),
            self.subtype().to_string(),
            parameters,
        ))
    }

    /// Whether this media type matches a pattern
    ///
    /// The pattern's type and subtype must be equal or `*`, and every
    /// parameter of the pattern must be present with an equal value. So
    /// `text/html; charset=utf-8` matches `text/*` and `text/html` but not
    /// `text/html; charset=ascii`.
    pub fn matches(&self, pattern: &MediaType) -> bool {
        (pattern.type_() == "*" || self.type_() == pattern.type_())
            && (pattern.subtype() == "*" || self.subtype() == pattern.subtype())
            && pattern
                .parameters()
                .iter()
                .all(|(name, value)| self.parameter(name) == Some(value.as_str()))
    }

    /// The fallback type for content of unknown provenance
    pub fn octet_stream() -> Self {
        Self::intern("application".to_string(), "octet-stream".to_string(), Vec::new())
    }

    /// The media type conventionally associated with a file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.to_ascii_lowercase();
        let name = match extension.as_str() {
            // Extensions whose guessed type is ambiguous or archaic
            "html" | "htm" => "text/html",
            "js" | "mjs" => "text/javascript",
            "md" | "markdown" => "text/markdown",
            _ => mime_guess::from_ext(&extension).first_raw()?,
        };
        name.parse().ok()
    }

    /// The conventional file extension for this media type, if any
    pub fn extension(&self) -> Option<&'static str> {
        match self.essence().as_str() {
            // `mime_guess` lists `htm` before `html`, `jpe` before `jpg`, etc.
            "text/html" => Some("html"),
            "text/javascript" | "application/javascript" => Some("js"),
            "text/markdown" => Some("md"),
            "text/plain" => Some("txt"),
            "image/jpeg" => Some("jpg"),
            "application/xml" | "text/xml" => Some("xml"),
            essence => mime_guess::get_mime_extensions_str(essence)
                .and_then(|extensions| extensions.last())
                .copied(),
        }
    }

    /// Look up, or create, the interned representation
    ///
    /// The intern key sorts parameters by name so that two types differing
    /// only in parameter order are the same instance (serialization order is
    /// then that of whichever was interned first).
    fn intern(type_: String, subtype: String, parameters: Vec<(String, String)>) -> Self {
        let key = [
            type_.as_str(),
            "/",
            subtype.as_str(),
            &parameters
                .iter()
                .sorted_by(|a, b| a.0.cmp(&b.0))
                .map(|(name, value)| [";", name, "=", value].concat())
                .collect::<String>(),
        ]
        .concat();

        let existing = TYPES.read().expect("intern table poisoned").get(&key).copied();
        if let Some(repr) = existing {
            return MediaType(repr);
        }

        let mut table = TYPES.write().expect("intern table poisoned");
        let repr = table.entry(key).or_insert_with(|| {
            Box::leak(Box::new(MediaTypeRepr {
                type_,
                subtype,
                parameters,
            }))
        });
        MediaType(*repr)
    }
}

impl PartialEq for MediaType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.0, other.0)
    }
}

impl Eq for MediaType {}

impl Hash for MediaType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.0 as *const MediaTypeRepr as usize).hash(state);
    }
}

impl fmt::Debug for MediaType {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "MediaType({self})")
    }
}

impl Display for MediaType {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}/{}", self.type_(), self.subtype())?;
        for (name, value) in self.parameters() {
            if !value.is_empty() && value.bytes().all(is_token_byte) {
                write!(formatter, "; {name}={value}")?;
            } else {
                write!(formatter, "; {name}=\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))?;
            }
        }
        Ok(())
    }
}

impl FromStr for MediaType {
    type Err = MediaTypeError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let invalid = || MediaTypeError::InvalidMediaTypeString(string.to_string());
        let bytes = string.as_bytes();
        let mut pos = 0;

        let type_ = take_token(bytes, &mut pos).ok_or_else(invalid)?;
        if bytes.get(pos) != Some(&b'/') {
            return Err(invalid());
        }
        pos += 1;
        let subtype = take_token(bytes, &mut pos).ok_or_else(invalid)?;

        let mut parameters: Vec<(String, String)> = Vec::new();
        loop {
            skip_whitespace(bytes, &mut pos);
            if pos == bytes.len() {
                break;
            }
            if bytes[pos] != b';' {
                return Err(invalid());
            }
            pos += 1;
            skip_whitespace(bytes, &mut pos);

            let name = take_token(bytes, &mut pos)
                .ok_or_else(invalid)?
                .to_ascii_lowercase();
            if bytes.get(pos) != Some(&b'=') {
                return Err(invalid());
            }
            pos += 1;
            let value = if bytes.get(pos) == Some(&b'"') {
                take_quoted(bytes, &mut pos).ok_or_else(invalid)?
            } else {
                take_token(bytes, &mut pos).ok_or_else(invalid)?
            };

            // A repeated name overrides the earlier value
            match parameters.iter_mut().find(|(existing, ..)| *existing == name) {
                Some(parameter) => parameter.1 = value,
                None => parameters.push((name, value)),
            }
        }

        Ok(Self::intern(
            type_.to_ascii_lowercase(),
            subtype.to_ascii_lowercase(),
            parameters,
        ))
    }
}

impl common::serde::Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Whether a byte is an RFC 7230 `tchar`
fn is_token_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

fn skip_whitespace(bytes: &[u8], pos: &mut usize) {
    while *pos < bytes.len() && matches!(bytes[*pos], b' ' | b'\t') {
        *pos += 1;
    }
}

/// Take a non-empty token, case preserved
fn take_token(bytes: &[u8], pos: &mut usize) -> Option<String> {
    let start = *pos;
    while *pos < bytes.len() && is_token_byte(bytes[*pos]) {
        *pos += 1;
    }
    (*pos > start).then(|| String::from_utf8(bytes[start..*pos].to_vec()).expect("tokens are ASCII"))
}

/// Take a quoted-string (cursor on the opening quote), unescaping `\"` and `\\`
fn take_quoted(bytes: &[u8], pos: &mut usize) -> Option<String> {
    *pos += 1;
    let mut value = Vec::new();
    while *pos < bytes.len() {
        match bytes[*pos] {
            b'"' => {
                *pos += 1;
                return String::from_utf8(value).ok();
            }
            b'\\' if *pos + 1 < bytes.len() => {
                value.push(bytes[*pos + 1]);
                *pos += 2;
            }
            byte => {
                value.push(byte);
                *pos += 1;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn media_type(string: &str) -> MediaType {
        string.parse().expect("should parse")
    }

    #[test]
    fn normalizes_case_and_interns() {
        assert_eq!(media_type("Text/HTML"), media_type("text/html"));
        assert_eq!(media_type("text/html").to_string(), "text/html");
        assert_eq!(
            media_type("text/plain; Charset=utf-8"),
            media_type("text/plain;charset=utf-8")
        );
    }

    #[test]
    fn compares_parameters_order_independently() {
        assert_eq!(
            media_type("multipart/form-data; a=1; b=2"),
            media_type("multipart/form-data; b=2; a=1")
        );
    }

    #[test]
    fn parses_quoted_parameter_values() {
        let with_quotes = media_type(r#"text/plain; title="a; \"b\"""#);
        assert_eq!(with_quotes.parameter("title"), Some(r#"a; "b""#));
        assert_eq!(with_quotes.to_string(), r#"text/plain; title="a; \"b\"""#);
    }

    #[test]
    fn rejects_malformed_strings() {
        for string in ["", "text", "text/", "/html", "text/html;", "text/html; charset", "te xt/html"] {
            assert!(matches!(
                string.parse::<MediaType>(),
                Err(MediaTypeError::InvalidMediaTypeString(..))
            ));
        }
    }

    #[test]
    fn with_parameter_replaces_or_appends() {
        let plain = media_type("text/plain");
        let utf8 = plain.with_parameter("charset", "utf-8").unwrap();
        assert_eq!(utf8, media_type("text/plain; charset=utf-8"));
        let ascii = utf8.with_parameter("Charset", "ascii").unwrap();
        assert_eq!(ascii, media_type("text/plain; charset=ascii"));
        assert!(plain.with_parameter("char set", "x").is_err());
    }

    #[test]
    fn matches_supports_wildcards_and_parameters() {
        let html = media_type("text/html; charset=utf-8");
        assert!(html.matches(&media_type("text/html")));
        assert!(html.matches(&media_type("text/*")));
        assert!(html.matches(&media_type("*/*")));
        assert!(html.matches(&media_type("text/html; charset=utf-8")));
        assert!(!html.matches(&media_type("text/html; charset=ascii")));
        assert!(!html.matches(&media_type("image/*")));
    }

    #[test]
    fn maps_extensions_both_ways() {
        assert_eq!(MediaType::from_extension("html"), Some(media_type("text/html")));
        assert_eq!(MediaType::from_extension("PNG"), Some(media_type("image/png")));
        assert_eq!(media_type("text/html").extension(), Some("html"));
        assert_eq!(media_type("image/png").extension(), Some("png"));
        assert_eq!(media_type("text/markdown").extension(), Some("md"));
    }
}
