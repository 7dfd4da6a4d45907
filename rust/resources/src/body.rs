use std::{fmt, future::Future, sync::Arc};

use common::{
    eyre::Result,
    futures::future::BoxFuture,
    tokio::sync::OnceCell,
};

/// The materialized value of a [`Body`]: bytes or text
#[derive(Clone, PartialEq, Eq)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
}

impl Payload {
    /// The payload as bytes (text as UTF-8)
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Bytes(bytes) => bytes,
            Payload::Text(text) => text.as_bytes(),
        }
    }

    /// The payload as text, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Bytes(..) => None,
            Payload::Text(text) => Some(text),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Payload::Bytes(bytes) => write!(formatter, "Payload::Bytes({} bytes)", bytes.len()),
            Payload::Text(text) => write!(formatter, "Payload::Text({} chars)", text.len()),
        }
    }
}

/// A deferred producer of a [`Payload`]
type Thunk = Arc<dyn Fn() -> BoxFuture<'static, Result<Payload>> + Send + Sync>;

enum BodyInner {
    /// A payload available up front
    Eager(Payload),

    /// A payload produced on first access
    ///
    /// The cell memoizes the materialized payload for the lifetime of the
    /// body; concurrent first accesses share a single thunk invocation.
    Lazy { thunk: Thunk, cell: OnceCell<Payload> },
}

/// The body of a [`Content`](crate::Content): an eager payload, or an async
/// thunk materialized at most once
///
/// Cheap to clone; clones (including those made by `Content::replace` when
/// the body is kept) share the same memoized payload.
#[derive(Clone)]
pub struct Body(Arc<BodyInner>);

impl Body {
    /// A body holding bytes
    pub fn bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Body(Arc::new(BodyInner::Eager(Payload::Bytes(bytes.into()))))
    }

    /// A body holding text
    pub fn text(text: impl Into<String>) -> Self {
        Body(Arc::new(BodyInner::Eager(Payload::Text(text.into()))))
    }

    /// A body produced lazily by an async thunk
    ///
    /// The thunk is invoked on the first call to [`Body::get`] and its
    /// result cached; on failure the error is returned and a later call may
    /// invoke the thunk again.
    pub fn thunk<F, Fut>(thunk: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload>> + Send + 'static,
    {
        Body(Arc::new(BodyInner::Lazy {
            thunk: Arc::new(move || Box::pin(thunk())),
            cell: OnceCell::new(),
        }))
    }

    /// Get the payload, materializing it on first access
    pub async fn get(&self) -> Result<&Payload> {
        match &*self.0 {
            BodyInner::Eager(payload) => Ok(payload),
            BodyInner::Lazy { thunk, cell } => cell.get_or_try_init(|| thunk()).await,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        match &*self.0 {
            BodyInner::Eager(payload) => write!(formatter, "Body({payload:?})"),
            BodyInner::Lazy { cell, .. } => match cell.get() {
                Some(payload) => write!(formatter, "Body(lazy, {payload:?})"),
                None => write!(formatter, "Body(lazy, unresolved)"),
            },
        }
    }
}

impl From<&str> for Body {
    fn from(text: &str) -> Self {
        Body::text(text)
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::text(text)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::bytes(bytes)
    }
}
