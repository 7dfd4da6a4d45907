use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use common::{
    chrono::{TimeZone, Utc},
    tempfile, tokio,
    url::Url,
};
use files::FileWriter;
use path_utils::PathError;
use resources::{Content, Resource, ResourceError};

fn content(media_type: &str, language: Option<&str>, body: &str) -> Content {
    Content::new(
        media_type.parse().unwrap(),
        language.map(|language| language.parse().unwrap()),
        Utc.timestamp_opt(1_000, 0).single().unwrap(),
        body,
    )
}

fn base() -> Url {
    Url::parse("https://site/").unwrap()
}

#[tokio::test]
async fn writes_the_default_and_language_variants() {
    let dest = tempfile::tempdir().unwrap();
    let writer = FileWriter::new(dest.path(), base()).unwrap();

    let resource = Resource::new(
        Url::parse("https://site/docs/about/").unwrap(),
        [
            content("text/html", None, "<p>en</p>"),
            content("text/html", Some("ko"), "<p>ko</p>"),
        ],
    )
    .unwrap();
    writer.write(&resource).await.unwrap();

    let directory = dest.path().join("docs/about");
    assert_eq!(
        std::fs::read_to_string(directory.join("index.html")).unwrap(),
        "<p>en</p>"
    );
    assert_eq!(
        std::fs::read_to_string(directory.join("index.ko.html")).unwrap(),
        "<p>ko</p>"
    );
}

#[tokio::test]
async fn skips_up_to_date_files_unless_rewriting_always() {
    let dest = tempfile::tempdir().unwrap();
    let writes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&writes);
    let writer = FileWriter::new(dest.path(), base())
        .unwrap()
        .on_write(move |_path, _content, _target| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let resource = Resource::new(
        Url::parse("https://site/page/").unwrap(),
        [content("text/html", None, "<p>once</p>")],
    )
    .unwrap();

    writer.write(&resource).await.unwrap();
    assert_eq!(writes.load(Ordering::SeqCst), 1);

    // Unchanged timestamps: the file on disk is newer, so nothing happens
    writer.write(&resource).await.unwrap();
    assert_eq!(writes.load(Ordering::SeqCst), 1);

    // Forcing the rewrite writes (and reports) again
    let forcing = writer.clone().rewrite_always(true);
    forcing.write(&resource).await.unwrap();
    assert_eq!(writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn rejects_resources_outside_the_base() {
    let dest = tempfile::tempdir().unwrap();
    let writer = FileWriter::new(dest.path(), base()).unwrap();

    let foreign = Resource::new(
        Url::parse("https://elsewhere/page/").unwrap(),
        [content("text/html", None, "x")],
    )
    .unwrap();

    let error = writer.write(&foreign).await.unwrap_err();
    assert!(error.downcast_ref::<PathError>().is_some());
}

#[tokio::test]
async fn rejects_representations_sharing_a_target_file() {
    let dest = tempfile::tempdir().unwrap();
    let writer = FileWriter::new(dest.path(), base()).unwrap();

    // Both media types map to the `js` extension and neither has a language
    let resource = Resource::new(
        Url::parse("https://site/app/").unwrap(),
        [
            content("text/javascript", None, "modern"),
            content("application/javascript", None, "legacy"),
        ],
    )
    .unwrap();

    let error = writer.write(&resource).await.unwrap_err();
    assert!(matches!(
        error.downcast_ref::<ResourceError>(),
        Some(ResourceError::DuplicateTarget { .. })
    ));
    // Nothing was written
    assert!(!dest.path().join("app").join("index.js").exists());
}

#[test]
fn bases_must_be_well_formed() {
    assert!(matches!(
        FileWriter::new("/tmp/out", Url::parse("https://site/sub").unwrap()),
        Err(PathError::MustEndWithSlash(..))
    ));
    assert!(matches!(
        FileWriter::new("/tmp/out", Url::parse("https://site/?q=1").unwrap()),
        Err(PathError::MustNotHaveQuery(..))
    ));
}
