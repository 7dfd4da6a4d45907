use std::{
    collections::{HashMap, HashSet},
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use common::{
    async_stream::try_stream,
    chrono::{DateTime, Utc},
    eyre::{Report, Result},
    futures::{
        future::{self, BoxFuture},
        stream::{self, FuturesUnordered},
        StreamExt, TryStreamExt,
    },
    tokio::{
        self,
        sync::{broadcast, Mutex},
        task::JoinHandle,
    },
    tokio_stream::wrappers::BroadcastStream,
    tracing,
    url::Url,
};
use resources::{
    diversify, move_path, transform, ContentTransformer, Criterion, PathTransformer, Resource,
    ResourcePredicate, ResourceTransformer,
};

use crate::source::{MonitorStream, ResourceStream, Source};

/// An invalidation counter owned by a watched source stage
type Epoch = Arc<AtomicU64>;

/// A summarizer invoked by [`Pipeline::add_summaries`] with a view of the
/// pipeline it summarizes
type Summarizer = Arc<dyn Fn(Pipeline) -> BoxFuture<'static, Result<Vec<Resource>>> + Send + Sync>;

/// A callback awaited between a change event and the reload pass
pub type OnReload = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A realized buffer, valid while the epoch snapshot it was filled under
/// still matches
struct Buffer {
    resources: Vec<Resource>,
    snapshot: u64,
}

enum StageKind {
    /// Resources known up front
    Eager(Vec<Resource>),

    /// An external source of resources
    Source(Arc<dyn Source>),

    /// A combinator applied to an upstream pipeline
    Derived { upstream: Pipeline, op: Op },
}

enum Op {
    Map(Vec<ResourceTransformer>),
    Filter(Vec<ResourcePredicate>),
    Union(Pipeline),
    Prepend(Vec<Resource>),
    Summaries {
        summarizer: Summarizer,
        filter: Option<ResourcePredicate>,
    },
}

/// One stage of a pipeline chain
///
/// Owns its one-shot buffer and, for watched source stages, the monitor
/// watcher task that invalidates it.
struct Stage {
    kind: StageKind,

    buffer: Arc<Mutex<Option<Buffer>>>,

    /// The epochs of every watched source at or below this stage; a buffer
    /// is valid while the sum of their values is unchanged
    epochs: Vec<Epoch>,

    /// Reload notifiers of every watched source at or below this stage,
    /// held weakly so that a monitor ending closes subscriptions
    notifiers: Vec<Weak<broadcast::Sender<()>>>,

    /// The monitor watcher task of a watched source stage
    watcher: Option<JoinHandle<()>>,
}

impl Drop for Stage {
    fn drop(&mut self) {
        if let Some(watcher) = &self.watcher {
            watcher.abort();
        }
    }
}

/// A lazily realized, dedup-by-path stream of resources
///
/// A cheap-clone handle; combinators return new pipelines referencing this
/// one as upstream, forming a DAG of owning references. Within one
/// realization the emission order is the upstream order with first-seen
/// dedup by path; later iterations replay the realized buffer until a
/// monitor event invalidates it.
#[derive(Clone)]
pub struct Pipeline {
    stage: Arc<Stage>,
}

impl Pipeline {
    fn new(
        kind: StageKind,
        epochs: Vec<Epoch>,
        notifiers: Vec<Weak<broadcast::Sender<()>>>,
        watcher: Option<JoinHandle<()>>,
    ) -> Self {
        Pipeline {
            stage: Arc::new(Stage {
                kind,
                buffer: Arc::new(Mutex::new(None)),
                epochs,
                notifiers,
                watcher,
            }),
        }
    }

    /// A pipeline over resources known up front
    pub fn from_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        Self::new(
            StageKind::Eager(resources.into_iter().collect()),
            Vec::new(),
            Vec::new(),
            None,
        )
    }

    /// A pipeline over an already-created stream
    ///
    /// The stream is drained at most once; because the first realization is
    /// buffered this only matters when that realization is cancelled midway,
    /// in which case the next iteration sees an empty remainder.
    pub fn from_stream(stream: ResourceStream) -> Self {
        struct OnceStream(std::sync::Mutex<Option<ResourceStream>>);

        impl Source for OnceStream {
            fn resources(&self) -> ResourceStream {
                match self.0.lock().expect("stream lock poisoned").take() {
                    Some(stream) => stream,
                    None => stream::empty().boxed(),
                }
            }
        }

        Self::new(
            StageKind::Source(Arc::new(OnceStream(std::sync::Mutex::new(Some(stream))))),
            Vec::new(),
            Vec::new(),
            None,
        )
    }

    /// A pipeline over an external source
    ///
    /// If the source has a monitor, a watcher task is spawned that bumps
    /// this stage's epoch on every event (invalidating the buffers of this
    /// stage and everything derived from it) and forwards the event to
    /// reload subscribers. The task ends when the monitor ends and is
    /// aborted when the pipeline stage is dropped.
    pub fn from_source(source: impl Source) -> Self {
        let monitor = source.monitor();
        let kind = StageKind::Source(Arc::new(source));

        let Some(monitor) = monitor else {
            return Self::new(kind, Vec::new(), Vec::new(), None);
        };

        let epoch: Epoch = Arc::new(AtomicU64::new(0));
        let (notifier, ..) = broadcast::channel(16);
        let notifier = Arc::new(notifier);

        let weak = Arc::downgrade(&notifier);
        let watcher = Self::spawn_watcher(monitor, Arc::clone(&epoch), notifier);

        Self::new(kind, vec![epoch], vec![weak], Some(watcher))
    }

    /// Consume a monitor: bump the epoch and notify reload subscribers on
    /// each event
    fn spawn_watcher(
        mut monitor: MonitorStream,
        epoch: Epoch,
        notifier: Arc<broadcast::Sender<()>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::trace!("starting source monitor watcher");
            while monitor.next().await.is_some() {
                epoch.fetch_add(1, Ordering::SeqCst);
                tracing::debug!("source change event; pipeline buffers invalidated");
                // No reload subscriber is fine
                let _ = notifier.send(());
            }
            tracing::trace!("source monitor ended");
            // Dropping `notifier` here closes reload subscriptions
        })
    }

    /// A new pipeline derived from this one
    fn derive(&self, op: Op) -> Self {
        let mut epochs = self.stage.epochs.clone();
        let mut notifiers = self.stage.notifiers.clone();
        if let Op::Union(other) = &op {
            for epoch in &other.stage.epochs {
                if !epochs.iter().any(|existing| Arc::ptr_eq(existing, epoch)) {
                    epochs.push(Arc::clone(epoch));
                }
            }
            for notifier in &other.stage.notifiers {
                if !notifiers
                    .iter()
                    .any(|existing| Weak::ptr_eq(existing, notifier))
                {
                    notifiers.push(Weak::clone(notifier));
                }
            }
        }
        Self::new(
            StageKind::Derived {
                upstream: self.clone(),
                op,
            },
            epochs,
            notifiers,
            None,
        )
    }

    /// Concatenate another pipeline after this one
    ///
    /// Dedup applies across the union: a path already emitted by this
    /// pipeline suppresses the other's resource at the same path.
    pub fn union(&self, other: &Pipeline) -> Pipeline {
        self.derive(Op::Union(other.clone()))
    }

    /// Prepend a resource, replacing any existing resource at the same path
    pub fn add(&self, resource: Resource) -> Pipeline {
        self.derive(Op::Prepend(vec![resource]))
    }

    /// Prepend the resources produced by a summarizer
    ///
    /// The summarizer is invoked, at realization time, with a view of this
    /// pipeline (filtered by `filter` when given) and its resources are
    /// prepended like [`Pipeline::add`], so they replace any existing
    /// resources at the same paths.
    pub fn add_summaries<F, Fut>(&self, summarizer: F, filter: Option<ResourcePredicate>) -> Pipeline
    where
        F: Fn(Pipeline) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Resource>>> + Send + 'static,
    {
        let summarizer: Summarizer = Arc::new(move |pipeline| Box::pin(summarizer(pipeline)));
        self.derive(Op::Summaries { summarizer, filter })
    }

    /// Apply resource transformers, in order, to each resource
    pub fn map(&self, transformers: impl IntoIterator<Item = ResourceTransformer>) -> Pipeline {
        self.derive(Op::Map(transformers.into_iter().collect()))
    }

    /// Drop resources failing any of the predicates
    pub fn filter(&self, predicates: impl IntoIterator<Item = ResourcePredicate>) -> Pipeline {
        self.derive(Op::Filter(predicates.into_iter().collect()))
    }

    /// Shorthand for `map` with a path transformer
    pub fn move_path(&self, transformer: PathTransformer) -> Pipeline {
        self.map([move_path(transformer)])
    }

    /// Shorthand for `map` with an in-place content transformation
    pub fn transform(
        &self,
        transformer: ContentTransformer,
        criterion: Option<Criterion>,
    ) -> Pipeline {
        self.map([transform(transformer, criterion)])
    }

    /// Shorthand for `map` with an additive content transformation
    pub fn diversify(
        &self,
        transformer: ContentTransformer,
        criterion: Option<Criterion>,
    ) -> Pipeline {
        self.map([diversify(transformer, criterion)])
    }

    /// The sum of the invalidation epochs below this stage
    fn snapshot(&self) -> u64 {
        self.stage
            .epochs
            .iter()
            .map(|epoch| epoch.load(Ordering::SeqCst))
            .sum()
    }

    /// Iterate this pipeline's resources
    ///
    /// The first iteration (and the first after an invalidation) drains the
    /// upstream, skipping resources whose path was already emitted in this
    /// realization, emitting to the consumer while filling the buffer.
    /// Later iterations replay the buffer. The stage's buffer lock is held
    /// for the whole drain, so a pipeline is consumed by at most one task
    /// at a time.
    pub fn resources(&self) -> ResourceStream {
        let pipeline = self.clone();
        try_stream! {
            let mut guard = pipeline.stage.buffer.clone().lock_owned().await;
            let snapshot = pipeline.snapshot();

            if let Some(buffer) = guard.as_ref() {
                if buffer.snapshot == snapshot {
                    for resource in buffer.resources.clone() {
                        yield resource;
                    }
                    return;
                }
                tracing::debug!("pipeline buffer stale; re-draining upstream");
            }

            let mut seen: HashSet<Url> = HashSet::new();
            let mut realized: Vec<Resource> = Vec::new();
            let mut upstream = pipeline.upstream();
            while let Some(resource) = upstream.try_next().await? {
                if !seen.insert(resource.path().clone()) {
                    tracing::trace!(path = %resource.path(), "skipping resource at duplicate path");
                    continue;
                }
                realized.push(resource.clone());
                yield resource;
            }

            *guard = Some(Buffer { resources: realized, snapshot });
        }
        .boxed()
    }

    /// The raw upstream stream for this stage, before dedup and buffering
    fn upstream(&self) -> ResourceStream {
        match &self.stage.kind {
            StageKind::Eager(resources) => {
                stream::iter(resources.clone().into_iter().map(Ok)).boxed()
            }
            StageKind::Source(source) => source.resources(),
            StageKind::Derived { upstream, op } => match op {
                Op::Map(transformers) => {
                    let transformers = transformers.clone();
                    upstream
                        .resources()
                        .map(move |resource| {
                            let mut resource = resource?;
                            for transformer in &transformers {
                                resource = transformer(resource)?;
                            }
                            Ok(resource)
                        })
                        .boxed()
                }
                Op::Filter(predicates) => {
                    let predicates = predicates.clone();
                    upstream
                        .resources()
                        .try_filter(move |resource| {
                            future::ready(predicates.iter().all(|predicate| predicate(resource)))
                        })
                        .boxed()
                }
                Op::Union(other) => upstream.resources().chain(other.resources()).boxed(),
                Op::Prepend(resources) => stream::iter(resources.clone().into_iter().map(Ok))
                    .chain(upstream.resources())
                    .boxed(),
                Op::Summaries { summarizer, filter } => {
                    let upstream = upstream.clone();
                    let summarizer = Arc::clone(summarizer);
                    let filter = filter.clone();
                    try_stream! {
                        let view = match filter {
                            Some(predicate) => upstream.filter([predicate]),
                            None => upstream.clone(),
                        };
                        for resource in summarizer(view).await? {
                            yield resource;
                        }
                        let mut rest = upstream.resources();
                        while let Some(resource) = rest.try_next().await? {
                            yield resource;
                        }
                    }
                    .boxed()
                }
            },
        }
    }

    /// Invoke a callback for every resource
    ///
    /// Callbacks are invoked sequentially in emission order; the futures
    /// they return are awaited concurrently after the drain completes. The
    /// first error (a stream error that stopped iteration, or the first
    /// failing callback) is returned; sibling callback errors are logged.
    pub async fn for_each<F, Fut>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(Resource, usize) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.for_each_inner(&mut callback).await
    }

    async fn for_each_inner<F, Fut>(&self, callback: &mut F) -> Result<()>
    where
        F: FnMut(Resource, usize) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut pending = FuturesUnordered::new();
        let mut first_error: Option<Report> = None;

        {
            let mut stream = self.resources();
            let mut index = 0;
            while let Some(next) = stream.next().await {
                match next {
                    Ok(resource) => {
                        pending.push(callback(resource, index));
                        index += 1;
                    }
                    Err(error) => {
                        first_error = Some(error);
                        break;
                    }
                }
            }
        }

        while let Some(result) = pending.next().await {
            if let Err(error) = result {
                if first_error.is_none() {
                    first_error = Some(error);
                } else {
                    tracing::warn!("while awaiting a pipeline callback: {error}");
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    /// Invoke a callback for every resource, re-running on change events
    ///
    /// Runs an initial pass; then, for every event from the monitors of the
    /// sources below this pipeline, awaits `on_reload` (when given) and runs
    /// another pass over the freshly re-drained stream. Returns when every
    /// monitor has ended, or immediately after the initial pass when there
    /// is no monitor.
    pub async fn for_each_with_reloading<F, Fut>(
        &self,
        mut callback: F,
        on_reload: Option<OnReload>,
    ) -> Result<()>
    where
        F: FnMut(Resource, usize) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        // Subscribe before the initial pass so changes during it are caught
        let changes = self.changes();

        self.for_each_inner(&mut callback).await?;

        let Some(mut changes) = changes else {
            return Ok(());
        };
        while changes.next().await.is_some() {
            tracing::debug!("reloading pipeline after change event");
            if let Some(on_reload) = &on_reload {
                on_reload().await?;
            }
            self.for_each_inner(&mut callback).await?;
        }

        Ok(())
    }

    /// The merged reload events of every live monitor below this pipeline
    fn changes(&self) -> Option<MonitorStream> {
        let subscriptions: Vec<BroadcastStream<()>> = self
            .stage
            .notifiers
            .iter()
            .filter_map(Weak::upgrade)
            .map(|notifier| BroadcastStream::new(notifier.subscribe()))
            .collect();
        if subscriptions.is_empty() {
            return None;
        }
        // A lagged subscription coalesces the missed events into one
        Some(stream::select_all(subscriptions).map(|_| ()).boxed())
    }

    /// Group resources by a key, excluding those whose key is absent
    pub async fn group_by<K, F>(&self, key: F) -> Result<HashMap<K, ResourceSet>>
    where
        K: Eq + Hash,
        F: Fn(&Resource) -> Option<K>,
    {
        let mut groups: HashMap<K, ResourceSet> = HashMap::new();
        let mut stream = self.resources();
        while let Some(resource) = stream.try_next().await? {
            if let Some(key) = key(&resource) {
                groups.entry(key).or_default().resources.push(resource);
            }
        }
        Ok(groups)
    }

    /// The most recent modification time across all resources, if any
    pub async fn last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        let mut stream = self.resources();
        let mut latest = None;
        while let Some(resource) = stream.try_next().await? {
            let modified = Some(resource.last_modified());
            if modified > latest {
                latest = modified;
            }
        }
        Ok(latest)
    }
}

/// The resources sharing one `group_by` key
#[derive(Debug, Default, Clone)]
pub struct ResourceSet {
    resources: Vec<Resource>,
}

impl ResourceSet {
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// The most recent modification time across the set's members
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.resources
            .iter()
            .map(Resource::last_modified)
            .max()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use common::{
        chrono::TimeZone,
        eyre::{bail, eyre},
        tokio,
    };
    use resources::{replace, Content, ContentUpdate, Criterion};

    use super::*;

    fn when(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().unwrap()
    }

    fn resource(path: &str, language: Option<&str>, seconds: i64, body: &str) -> Resource {
        let content = Content::new(
            "text/html".parse().unwrap(),
            language.map(|language| language.parse().unwrap()),
            when(seconds),
            body,
        );
        Resource::new(Url::parse(path).unwrap(), [content]).unwrap()
    }

    /// A source that counts how often it is drained
    struct Counted {
        resources: Vec<Resource>,
        drains: Arc<AtomicUsize>,
    }

    impl Source for Counted {
        fn resources(&self) -> ResourceStream {
            self.drains.fetch_add(1, Ordering::SeqCst);
            stream::iter(self.resources.clone().into_iter().map(Ok)).boxed()
        }
    }

    async fn paths(pipeline: &Pipeline) -> Vec<String> {
        pipeline
            .resources()
            .map_ok(|resource| resource.path().to_string())
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn deduplicates_by_path_first_wins() {
        let pipeline = Pipeline::from_resources([
            resource("https://x/a", Some("en"), 1, "A"),
            resource("https://x/b", Some("ko"), 1, "B"),
            resource("https://x/a", Some("en"), 9, "A-newer"),
        ]);

        let emitted: Vec<Resource> = pipeline.resources().try_collect().await.unwrap();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].path().as_str(), "https://x/a");
        assert_eq!(emitted[1].path().as_str(), "https://x/b");
        // The duplicate was discarded, not merged
        assert_eq!(emitted[0].last_modified(), when(1));
    }

    #[tokio::test]
    async fn buffers_after_the_first_realization() {
        let drains = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::from_source(Counted {
            resources: vec![resource("https://x/a", None, 1, "A")],
            drains: Arc::clone(&drains),
        });

        let first = paths(&pipeline).await;
        let second = paths(&pipeline).await;
        assert_eq!(first, second);
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn derived_pipelines_replay_their_upstream_buffer() {
        let drains = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::from_source(Counted {
            resources: vec![resource("https://x/a", None, 1, "A")],
            drains: Arc::clone(&drains),
        });
        let mapped = pipeline.map([]);

        paths(&mapped).await;
        paths(&pipeline).await;
        assert_eq!(drains.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn add_replaces_the_resource_at_the_same_path() {
        let pipeline = Pipeline::from_resources([
            resource("https://x/a", None, 1, "old"),
            resource("https://x/b", None, 1, "B"),
        ])
        .add(resource("https://x/a", None, 2, "new"));

        let emitted: Vec<Resource> = pipeline.resources().try_collect().await.unwrap();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].path().as_str(), "https://x/a");
        assert_eq!(emitted[0].last_modified(), when(2));
        assert_eq!(emitted[1].path().as_str(), "https://x/b");
    }

    #[tokio::test]
    async fn union_deduplicates_across_both_sides() {
        let left = Pipeline::from_resources([
            resource("https://x/a", None, 1, "left-a"),
            resource("https://x/b", None, 1, "left-b"),
        ]);
        let right = Pipeline::from_resources([
            resource("https://x/b", None, 9, "right-b"),
            resource("https://x/c", None, 1, "right-c"),
        ]);

        let unioned = left.union(&right);
        assert_eq!(
            paths(&unioned).await,
            vec!["https://x/a", "https://x/b", "https://x/c"]
        );
        let emitted: Vec<Resource> = unioned.resources().try_collect().await.unwrap();
        assert_eq!(emitted[1].last_modified(), when(1));
    }

    #[tokio::test]
    async fn mapping_twice_equals_mapping_the_composition() {
        let base = || {
            Pipeline::from_resources([resource("https://x/a", None, 1, "A")])
        };
        let double: ResourceTransformer = Arc::new(|resource: Resource| {
            Ok(resource.move_to(Url::parse(&[resource.path().as_str(), "0"].concat())?))
        });

        let chained = base().map([double.clone()]).map([double.clone()]);
        let composed = base().map([double.clone(), double]);
        assert_eq!(paths(&chained).await, paths(&composed).await);
        assert_eq!(paths(&chained).await, vec!["https://x/a00"]);
    }

    #[tokio::test]
    async fn filter_drops_resources_failing_any_predicate() {
        let pipeline = Pipeline::from_resources([
            resource("https://x/a.html", None, 1, "A"),
            resource("https://x/b.css", None, 1, "B"),
        ]);
        let html_only: ResourcePredicate =
            Arc::new(|resource: &Resource| resource.path().path().ends_with(".html"));

        assert_eq!(paths(&pipeline.filter([html_only])).await, vec!["https://x/a.html"]);
    }

    #[tokio::test]
    async fn diversify_adds_a_representation_through_the_pipeline() {
        let translate = replace(ContentUpdate::parsed(None, Some("ko")).unwrap());
        let pipeline = Pipeline::from_resources([resource("https://x/foo", Some("en"), 1, "hi")])
            .diversify(translate, Some(Criterion::media_type("text/html").unwrap()));

        let emitted: Vec<Resource> = pipeline.resources().try_collect().await.unwrap();
        assert_eq!(emitted.len(), 1);
        let languages: Vec<String> = emitted[0]
            .contents()
            .map(|content| content.language().unwrap().to_string())
            .collect();
        assert_eq!(languages, vec!["en", "ko"]);
    }

    #[tokio::test]
    async fn summaries_are_prepended_and_see_a_filtered_view() {
        let pipeline = Pipeline::from_resources([
            resource("https://x/post1", None, 1, "one"),
            resource("https://x/feed", None, 1, "stale"),
            resource("https://x/about", None, 1, "about"),
        ]);

        let posts_only: ResourcePredicate =
            Arc::new(|resource: &Resource| resource.path().path().starts_with("/post"));
        let summarized = pipeline.add_summaries(
            |view: Pipeline| async move {
                let seen: Vec<Resource> = view.resources().try_collect().await?;
                assert_eq!(seen.len(), 1);
                Ok(vec![resource(
                    "https://x/feed",
                    None,
                    2,
                    "fresh",
                )])
            },
            Some(posts_only),
        );

        let emitted: Vec<Resource> = summarized.resources().try_collect().await.unwrap();
        assert_eq!(emitted.len(), 3);
        // The summary pre-empts the stale resource at the same path
        assert_eq!(emitted[0].path().as_str(), "https://x/feed");
        assert_eq!(emitted[0].last_modified(), when(2));
    }

    #[tokio::test]
    async fn group_by_excludes_absent_keys() {
        let pipeline = Pipeline::from_resources([
            resource("https://x/posts/1", None, 1, "1"),
            resource("https://x/posts/2", None, 5, "2"),
            resource("https://x/about", None, 9, "about"),
        ]);

        let groups = pipeline
            .group_by(|resource: &Resource| {
                resource
                    .path()
                    .path()
                    .starts_with("/posts/")
                    .then(|| "posts".to_string())
            })
            .await
            .unwrap();

        assert_eq!(groups.len(), 1);
        let posts = &groups["posts"];
        assert_eq!(posts.len(), 2);
        assert_eq!(posts.last_modified(), Some(when(5)));
    }

    #[tokio::test]
    async fn last_modified_is_none_for_an_empty_pipeline() {
        assert_eq!(Pipeline::from_resources([]).last_modified().await.unwrap(), None);
        let pipeline = Pipeline::from_resources([
            resource("https://x/a", None, 3, "A"),
            resource("https://x/b", None, 7, "B"),
        ]);
        assert_eq!(pipeline.last_modified().await.unwrap(), Some(when(7)));
    }

    #[tokio::test]
    async fn for_each_awaits_scheduled_callbacks_and_returns_the_first_error() {
        let pipeline = Pipeline::from_resources([
            resource("https://x/a", None, 1, "A"),
            resource("https://x/b", None, 1, "B"),
            resource("https://x/c", None, 1, "C"),
        ]);

        let completed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completed);
        let outcome = pipeline
            .for_each(move |resource, index| {
                let seen = Arc::clone(&seen);
                let failing = resource.path().path() == "/b";
                async move {
                    if failing {
                        bail!("callback failed at index {index}");
                    }
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        assert!(outcome.is_err());
        // The sibling callbacks were still awaited
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn a_failing_transformer_surfaces_at_the_terminal() {
        let failing: ResourceTransformer =
            Arc::new(|_resource: Resource| Err(eyre!("bad transform")));
        let pipeline =
            Pipeline::from_resources([resource("https://x/a", None, 1, "A")]).map([failing]);

        let outcome: Result<Vec<Resource>> = pipeline.resources().try_collect().await;
        assert!(outcome.is_err());
    }
}
