use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use common::{
    async_stream::try_stream,
    chrono::{DateTime, Utc},
    eyre::{eyre, Result},
    futures::StreamExt,
    glob,
    tokio::{self, sync::mpsc},
    tokio_stream::wrappers::ReceiverStream,
    tracing,
    url::Url,
};
use media_types::MediaType;
use pipelines::{MonitorStream, ResourceStream, Source};
use resources::{Body, Content, Payload, Resource};

/// A source producing one resource per file matching a glob pattern
///
/// Paths are `file://` URLs of the absolute file path. Each resource has a
/// single representation: media type inferred from the file extension, no
/// language, `last_modified` from the file mtime, and a body that reads the
/// file lazily. Each drain globs afresh, so the scanner is restartable.
#[derive(Debug, Clone)]
pub struct FileScanner {
    root: PathBuf,
    pattern: String,
    watch: bool,
}

impl FileScanner {
    /// Scan for files matching `pattern` under the `root` directory
    pub fn new(root: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            pattern: pattern.into(),
            watch: false,
        }
    }

    /// Monitor the root directory for changes
    pub fn watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    /// Read a matched file into a resource
    fn scan_file(path: &Path) -> Result<Resource> {
        let metadata = std::fs::metadata(path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();

        let media_type = path
            .extension()
            .and_then(|extension| extension.to_str())
            .and_then(MediaType::from_extension)
            .unwrap_or_else(MediaType::octet_stream);

        let url = Url::from_file_path(path)
            .map_err(|()| eyre!("file path `{}` is not absolute", path.display()))?;

        let body_path = path.to_path_buf();
        let body = Body::thunk(move || {
            let path = body_path.clone();
            async move { Ok(Payload::Bytes(tokio::fs::read(&path).await?)) }
        });

        Ok(Resource::new(
            url,
            [Content::new(media_type, None, modified, body)],
        )?)
    }
}

impl Source for FileScanner {
    fn resources(&self) -> ResourceStream {
        let root = self.root.clone();
        let pattern = self.pattern.clone();
        try_stream! {
            let root = root.canonicalize()?;
            let pattern = root.join(&pattern).to_string_lossy().into_owned();
            tracing::debug!("scanning `{pattern}`");
            for entry in glob::glob(&pattern)? {
                let path = entry?;
                if !path.is_file() {
                    continue;
                }
                yield Self::scan_file(&path)?;
            }
        }
        .boxed()
    }

    fn monitor(&self) -> Option<MonitorStream> {
        if !self.watch {
            return None;
        }

        let root = self.root.clone();
        let (sender, receiver) = mpsc::channel(100);

        // Standard thread to run the blocking watcher; it ends when the
        // monitor stream is dropped
        std::thread::spawn(move || -> Result<()> {
            use notify::{watcher, DebouncedEvent, RecursiveMode, Watcher};

            let (watcher_sender, watcher_receiver) = std::sync::mpsc::channel();
            let mut watcher = watcher(watcher_sender, Duration::from_millis(100))?;
            watcher.watch(&root, RecursiveMode::Recursive)?;

            tracing::trace!("starting file watcher at `{}`", root.display());
            loop {
                // Use `recv_timeout` so the check that ends this thread runs
                // even when the directory is quiet
                match watcher_receiver.recv_timeout(Duration::from_millis(100)) {
                    Ok(event) => {
                        let relevant = matches!(
                            event,
                            DebouncedEvent::Create(..)
                                | DebouncedEvent::Write(..)
                                | DebouncedEvent::Remove(..)
                                | DebouncedEvent::Rename(..)
                        );
                        if relevant && sender.blocking_send(()).is_err() {
                            break;
                        }
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                        if sender.is_closed() {
                            break;
                        }
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::trace!("ending file watcher at `{}`", root.display());

            Ok(())
        });

        Some(ReceiverStream::new(receiver).boxed())
    }
}
