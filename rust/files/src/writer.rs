use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use common::{
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    eyre::Result,
    futures::future::BoxFuture,
    tokio, tracing,
    url::Url,
};
use path_utils::{check_base, remove_base, PathError};
use pipelines::Sink;
use resources::{Content, Resource, ResourceError};

/// A callback invoked after each representation is written
type OnWrite = Arc<dyn Fn(&Url, &Content, &Path) + Send + Sync>;

/// A sink writing each resource's representations under a target directory
///
/// The resource path is rewritten by stripping the logical base URL and
/// resolving the remainder against the target directory; that rewritten path
/// acts as a directory. The default representation (the first language-less
/// one, or the first) is written as `index.<ext>`; language variants as
/// `index.<lang>.<ext>`.
///
/// Writes are idempotent: a representation is skipped when the existing
/// file's mtime is at or after its `last_modified`, unless `rewrite_always`
/// is set. The `on_write` callback fires only for actual writes.
#[derive(Clone)]
pub struct FileWriter {
    dest: PathBuf,
    base: Url,
    rewrite_always: bool,
    on_write: Option<OnWrite>,
}

impl FileWriter {
    /// A writer targeting `dest` for resources based on `base`
    ///
    /// The base must end with a slash and carry no query or fragment.
    pub fn new(dest: impl Into<PathBuf>, base: Url) -> Result<Self, PathError> {
        check_base(&base)?;
        Ok(Self {
            dest: dest.into(),
            base,
            rewrite_always: false,
            on_write: None,
        })
    }

    /// Write every representation even when the existing file is newer
    pub fn rewrite_always(mut self, rewrite_always: bool) -> Self {
        self.rewrite_always = rewrite_always;
        self
    }

    /// Invoke a callback after each write with the resource path, the
    /// representation, and the target file
    ///
    /// The callback is best-effort: it cannot fail the write.
    pub fn on_write(mut self, callback: impl Fn(&Url, &Content, &Path) + Send + Sync + 'static) -> Self {
        self.on_write = Some(Arc::new(callback));
        self
    }

    /// The target file for a representation under a resource directory
    fn target(&self, directory: &Path, content: &Content, default: bool) -> PathBuf {
        let extension = content
            .media_type()
            .extension()
            .unwrap_or_else(|| content.media_type().subtype());
        let filename = match (default, content.language()) {
            (false, Some(language)) => ["index.", &language.to_string(), ".", extension].concat(),
            _ => ["index.", extension].concat(),
        };
        directory.join(filename)
    }

    /// Write one resource
    pub async fn write(&self, resource: &Resource) -> Result<()> {
        let remainder = remove_base(resource.path(), &self.base)?;
        let directory = self.dest.join(remainder.trim_start_matches('/'));

        // The first language-less representation is the default, falling
        // back to the first
        let default = resource
            .contents()
            .find(|content| content.language().is_none())
            .or_else(|| resource.contents().next())
            .map(Content::key);

        // Resolve every target up front so that a filename collision fails
        // before anything is written
        let mut targets: Vec<(PathBuf, &Content)> = Vec::new();
        for content in resource.contents() {
            let target = self.target(&directory, content, Some(content.key()) == default);
            if targets.iter().any(|(existing, ..)| *existing == target) {
                return Err(ResourceError::DuplicateTarget {
                    path: resource.path().clone(),
                    target: target.display().to_string(),
                }
                .into());
            }
            targets.push((target, content));
        }

        tokio::fs::create_dir_all(&directory).await?;

        for (target, content) in targets {
            if !self.rewrite_always {
                if let Ok(metadata) = tokio::fs::metadata(&target).await {
                    if let Ok(existing) = metadata.modified() {
                        if DateTime::<Utc>::from(existing) >= content.last_modified() {
                            tracing::trace!("skipping up-to-date `{}`", target.display());
                            continue;
                        }
                    }
                }
            }

            let payload = content.body().get().await?;
            tokio::fs::write(&target, payload.as_bytes()).await?;
            tracing::debug!("wrote `{}`", target.display());

            if let Some(on_write) = &self.on_write {
                on_write(resource.path(), content, &target);
            }
        }

        Ok(())
    }

    /// Adapt this writer into a `Pipeline::for_each` callback
    pub fn callback(self) -> impl FnMut(Resource, usize) -> BoxFuture<'static, Result<()>> {
        let writer = Arc::new(self);
        move |resource, _index| {
            let writer = Arc::clone(&writer);
            Box::pin(async move { writer.write(&resource).await })
        }
    }
}

#[async_trait]
impl Sink for FileWriter {
    async fn write(&self, resource: &Resource) -> Result<()> {
        FileWriter::write(self, resource).await
    }
}
