use common::{async_trait::async_trait, eyre::Result, futures::stream::BoxStream};
use resources::Resource;

/// A pull-based stream of resources
pub type ResourceStream = BoxStream<'static, Result<Resource>>;

/// A pull-based stream of change events
///
/// Each item is an opaque signal that the underlying state may have changed.
/// The stream may be finite or infinite; its end means no further changes
/// will ever be signalled.
pub type MonitorStream = BoxStream<'static, ()>;

/// An asynchronous producer of resources
///
/// Sources may be arbitrarily slow and must be restartable: every call to
/// [`Source::resources`] yields a fresh iteration over the current state.
pub trait Source: Send + Sync + 'static {
    /// A fresh iteration over the source's resources
    fn resources(&self) -> ResourceStream;

    /// The source's change monitor, if it has one
    ///
    /// Taken at most once, when the source is wrapped in a pipeline.
    fn monitor(&self) -> Option<MonitorStream> {
        None
    }
}

/// An asynchronous consumer of resources
///
/// Sinks should be idempotent per resource identity and representation
/// timestamps, so that feeding them the same realized pipeline twice does
/// no duplicate work.
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, resource: &Resource) -> Result<()>;
}
