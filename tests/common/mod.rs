// Each test binary uses its own slice of these helpers.
#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::sync::LazyLock;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio::sync::Mutex;
use tower::ServiceExt;

use tinyopds::config::Config;
use tinyopds::db::{DbPool, create_test_pool};
use tinyopds::state::AppState;

/// Global lock to serialize scanner tests (the scan lock is a process-wide
/// AtomicBool).
pub static SCAN_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Build a minimal Config pointing at the given temp directories.
pub fn test_config(lib_dir: &Path, covers_dir: &Path) -> Config {
    let toml_str = format!(
        r#"
[server]
name = "Test Library"

[library]
path = {lib_dir:?}

[covers]
covers_path = {covers_dir:?}

[auth]
use_http_auth = false
"#
    );
    toml::from_str(&toml_str).expect("test config should parse")
}

/// Config with HTTP Basic auth enabled.
pub fn test_config_with_auth(lib_dir: &Path, covers_dir: &Path, credentials: &str) -> Config {
    let toml_str = format!(
        r#"
[server]
name = "Test Library"

[library]
path = {lib_dir:?}

[covers]
covers_path = {covers_dir:?}

[auth]
use_http_auth = true
credentials = "{credentials}"
ban_clients = true
wrong_attempts_count = 3
"#
    );
    toml::from_str(&toml_str).expect("test config should parse")
}

pub async fn test_state(config: Config) -> AppState {
    let pool = create_test_pool().await;
    AppState::new(config, pool)
}

pub fn test_router(state: AppState) -> Router {
    tinyopds::build_router(state)
}

/// GET a path and return (status, body-as-string).
pub async fn get(router: &Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

/// GET a path with extra request headers.
pub async fn get_with_headers(
    router: &Router,
    uri: &str,
    headers: &[(&str, &str)],
) -> (StatusCode, String) {
    let mut builder = Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

/// Write a minimal FB2 file into the library directory.
pub fn write_fb2(
    dir: &Path,
    file_name: &str,
    title: &str,
    author_first: &str,
    author_last: &str,
    sequence: Option<(&str, i32)>,
    version: &str,
) {
    let sequence_tag = match sequence {
        Some((name, number)) => format!(r#"<sequence name="{name}" number="{number}"/>"#),
        None => String::new(),
    };
    let content = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0">
  <description>
    <title-info>
      <genre>prose_classic</genre>
      <author>
        <first-name>{author_first}</first-name>
        <last-name>{author_last}</last-name>
      </author>
      <book-title>{title}</book-title>
      <lang>ru</lang>
      {sequence_tag}
    </title-info>
    <document-info>
      <date>2008-01-15</date>
      <version>{version}</version>
    </document-info>
  </description>
  <body><p>Text.</p></body>
</FictionBook>"#
    );
    std::fs::write(dir.join(file_name), content).unwrap();
}

/// Build an in-memory EPUB with the given title/author.
pub fn make_epub_bytes(title: &str, author: &str) -> Vec<u8> {
    let opf = format!(
        r#"<package xmlns:dc="http://purl.org/dc/elements/1.1/">
  <metadata>
    <dc:title>{title}</dc:title>
    <dc:creator opf:role="aut">{author}</dc:creator>
    <dc:language>en</dc:language>
  </metadata>
  <manifest/>
</package>"#
    );
    let cursor = std::io::Cursor::new(Vec::new());
    let mut zip = zip::ZipWriter::new(cursor);
    let opts =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    zip.start_file("META-INF/container.xml", opts).unwrap();
    zip.write_all(
        br#"<container><rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles></container>"#,
    )
    .unwrap();
    zip.start_file("content.opf", opts).unwrap();
    zip.write_all(opf.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

/// Write a ZIP archive of EPUBs into the library directory.
pub fn write_epub_archive(dir: &Path, archive_name: &str, titles: &[(&str, &str, &str)]) {
    let file = std::fs::File::create(dir.join(archive_name)).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let opts =
        zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (inner_name, title, author) in titles {
        zip.start_file(*inner_name, opts).unwrap();
        zip.write_all(&make_epub_bytes(title, author)).unwrap();
    }
    zip.finish().unwrap();
}

/// Run a full library scan against the state's configured root.
pub async fn scan(state: &AppState) -> tinyopds::ingest::scanner::ScanStats {
    tinyopds::ingest::scanner::run_scan(state)
        .await
        .expect("scan should succeed")
}

pub async fn book_count(pool: &DbPool) -> i64 {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books")
        .fetch_one(pool)
        .await
        .unwrap();
    row.0
}
