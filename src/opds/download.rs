use std::io::{Cursor, Read, Write};

use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::db::models::split_archive_path;
use crate::db::queries::{books, downloads};
use crate::error::AppError;
use crate::state::AppState;

/// GET /download/{book_id}/{fb2|epub}
///
/// FB2 books are delivered wrapped in ZIP (`application/fb2+zip`); EPUB
/// books are already ZIP containers and go out as-is.
pub async fn download(
    State(state): State<AppState>,
    Path((book_id, format)): Path<(String, String)>,
    request: Request,
) -> Response {
    let book = match books::get_by_id(&state.db, &book_id).await {
        Ok(Some(b)) => b,
        Ok(None) => return AppError::NotFound(format!("book {book_id}")).into_response(),
        Err(e) => return AppError::Db(e).into_response(),
    };

    if book.book_type != format {
        return AppError::NotFound(format!("{format} edition of {book_id}")).into_response();
    }

    let root = state.config.library.path.clone();
    let file_path = book.file_path.clone();
    let data = tokio::task::spawn_blocking(move || read_book_file(&root, &file_path)).await;
    let data = match data {
        Ok(Ok(d)) => d,
        _ => {
            tracing::warn!("Failed to read book {book_id} ({})", book.file_path);
            return AppError::NotFound(format!("file for {book_id}")).into_response();
        }
    };

    // Record the download event before the body goes out.
    let fingerprint = client_fingerprint(&super::auth::client_key(&request), request.headers());
    let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Err(e) = downloads::record(&state.db, &book.id, &fingerprint, &ts).await {
        tracing::warn!("Failed to record download for {}: {e}", book.id);
    }
    state.server_stats.record_book_served();

    let safe_name = title_to_filename(&book.title, &book.book_type, &book.file_name);
    match book.book_type() {
        crate::db::models::BookType::Fb2 => match wrap_in_zip(&book.file_name, &data) {
            Ok(zipped) => file_response(
                &zipped,
                &format!("{safe_name}.zip"),
                "application/fb2+zip",
            ),
            Err(e) => AppError::Internal(format!("zip: {e}")).into_response(),
        },
        crate::db::models::BookType::Epub => {
            file_response(&data, &safe_name, "application/epub+zip")
        }
    }
}

/// Stable per-client fingerprint for download statistics: a hash of the
/// remote address and the User-Agent header.
pub fn client_fingerprint(client: &str, headers: &HeaderMap) -> String {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let mut hasher = Sha256::new();
    hasher.update(client.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

/// Read a book file from disk. Handles both plain files and the composite
/// `archive.zip@inner/path` form.
pub fn read_book_file(
    root: &std::path::Path,
    file_path: &str,
) -> Result<Vec<u8>, std::io::Error> {
    match split_archive_path(file_path) {
        None => std::fs::read(root.join(file_path)),
        Some((archive, inner)) => {
            let file = std::fs::File::open(root.join(archive))?;
            let reader = std::io::BufReader::new(file);
            let mut zip = zip::ZipArchive::new(reader).map_err(std::io::Error::other)?;
            let mut entry = zip
                .by_name(inner)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::NotFound, e))?;
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            Ok(data)
        }
    }
}

/// Wrap file bytes into a new ZIP archive in memory.
pub fn wrap_in_zip(filename: &str, data: &[u8]) -> Result<Vec<u8>, zip::result::ZipError> {
    let buf = Cursor::new(Vec::new());
    let mut zip_writer = zip::ZipWriter::new(buf);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    zip_writer.start_file(filename, options)?;
    zip_writer.write_all(data)?;
    let cursor = zip_writer.finish()?;
    Ok(cursor.into_inner())
}

/// Build a safe download filename from the book title and format
/// extension. Falls back to the stored filename when nothing survives
/// sanitization.
pub fn title_to_filename(title: &str, format: &str, original_filename: &str) -> String {
    let safe: String = title
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '\'' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut result = String::new();
    let mut prev_underscore = true; // trim leading
    for c in safe.chars() {
        if c == '_' {
            if !prev_underscore {
                result.push('_');
            }
            prev_underscore = true;
        } else {
            result.push(c);
            prev_underscore = false;
        }
    }
    while result.ends_with('_') {
        result.pop();
    }

    if result.is_empty() {
        original_filename.to_string()
    } else {
        format!("{result}.{format}")
    }
}

/// Build an HTTP response for a file download.
pub fn file_response(data: &[u8], filename: &str, mime: &str) -> Response {
    let content_disposition = format!("attachment; filename=\"{filename}\"");
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format!("{mime}; name=\"{filename}\"")),
            (header::CONTENT_DISPOSITION, content_disposition),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data.to_vec(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_zip_with_file(path: &std::path::Path, name: &str, data: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let opts = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file(name, opts).unwrap();
        zip.write_all(data).unwrap();
        zip.finish().unwrap();
    }

    #[test]
    fn test_wrap_in_zip_roundtrip() {
        let bytes = b"hello-book";
        let zipped = wrap_in_zip("book.fb2", bytes).unwrap();
        let reader = Cursor::new(zipped);
        let mut archive = zip::ZipArchive::new(reader).unwrap();
        assert_eq!(archive.len(), 1);
        let mut file = archive.by_name("book.fb2").unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_title_to_filename_sanitization_and_fallback() {
        assert_eq!(
            title_to_filename("  A  Title / Name ", "fb2", "orig.fb2"),
            "A_Title_Name.fb2"
        );
        assert_eq!(title_to_filename("***", "epub", "orig.epub"), "orig.epub");
        assert_eq!(
            title_to_filename("Война и мир", "fb2", "orig.fb2"),
            "Война_и_мир.fb2"
        );
    }

    #[test]
    fn test_read_book_file_plain() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("book.fb2"), b"plain-data").unwrap();

        let data = read_book_file(dir.path(), "sub/book.fb2").unwrap();
        assert_eq!(data, b"plain-data");
    }

    #[test]
    fn test_read_book_file_from_archive() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("books.zip");
        make_zip_with_file(&zip_path, "inside.fb2", b"zip-data");

        let data = read_book_file(dir.path(), "books.zip@inside.fb2").unwrap();
        assert_eq!(data, b"zip-data");
    }

    #[test]
    fn test_read_book_file_missing_entry() {
        let dir = tempdir().unwrap();
        let zip_path = dir.path().join("books.zip");
        make_zip_with_file(&zip_path, "inside.fb2", b"zip-data");

        let err = read_book_file(dir.path(), "books.zip@missing.fb2").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn test_client_fingerprint_deterministic() {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "FBReader/3.1".parse().unwrap());
        let a = client_fingerprint("10.0.0.5", &headers);
        let b = client_fingerprint("10.0.0.5", &headers);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let c = client_fingerprint("10.0.0.6", &headers);
        assert_ne!(a, c);
    }

    #[test]
    fn test_file_response_headers() {
        let resp = file_response(b"abc", "book.fb2.zip", "application/fb2+zip");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "attachment; filename=\"book.fb2.zip\""
        );
        assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "3");
    }
}
