//! Scanner → pipeline → writer, the way a site build wires them together.

use std::sync::Arc;

use common::{tempfile, tokio, url::Url};
use files::{FileScanner, FileWriter};
use path_utils::{having_extension, into_directory, rebase};
use pipelines::Pipeline;
use resources::{replace, ContentUpdate, Criterion};

#[tokio::test]
async fn builds_a_site_from_sources_to_output_files() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("index.html"), "<h1>Home</h1>").unwrap();
    std::fs::write(source.path().join("about.html"), "<h1>About</h1>").unwrap();
    std::fs::write(source.path().join("notes.txt"), "not published").unwrap();

    let dest = tempfile::tempdir().unwrap();
    let site = Url::parse("https://example.com/").unwrap();
    let scanned = Url::from_directory_path(source.path().canonicalize().unwrap()).unwrap();

    let writer = FileWriter::new(dest.path(), site.clone()).unwrap();
    let pipeline = Pipeline::from_source(FileScanner::new(source.path(), "*"))
        .filter([having_extension(["html"])])
        .move_path(rebase(&scanned, &site).unwrap())
        .move_path(into_directory(true))
        .diversify(
            replace(ContentUpdate::parsed(None, Some("ko")).unwrap()),
            Some(Criterion::media_type("text/html").unwrap()),
        );

    pipeline.for_each(writer.callback()).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(dest.path().join("index/index.html")).unwrap(),
        "<h1>Home</h1>"
    );
    assert_eq!(
        std::fs::read_to_string(dest.path().join("about/index.html")).unwrap(),
        "<h1>About</h1>"
    );
    // The diversified variant shares the original body
    assert_eq!(
        std::fs::read_to_string(dest.path().join("about/index.ko.html")).unwrap(),
        "<h1>About</h1>"
    );
    assert!(!dest.path().join("notes").exists());
    assert!(!dest.path().join("notes.txt").exists());

    // A second pass over the realized pipeline rewrites nothing
    let writes = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = Arc::clone(&writes);
    let observing = FileWriter::new(dest.path(), site)
        .unwrap()
        .on_write(move |_path, _content, _target| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
    pipeline.for_each(observing.callback()).await.unwrap();
    assert_eq!(writes.load(std::sync::atomic::Ordering::SeqCst), 0);
}
