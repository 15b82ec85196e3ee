use std::io::Cursor;

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use image::imageops::FilterType;

use crate::db::models::{Book, BookType};
use crate::db::queries::books;
use crate::error::AppError;
use crate::parsers;
use crate::state::AppState;

const THUMB_SIZE: u32 = 200;
const NOCOVER_SVG: &[u8] = include_bytes!("../../static/images/nocover.svg");

/// GET /cover/{id}.jpeg — full-size cover image.
pub async fn cover(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    serve_cover(&state, &file, false).await
}

/// GET /thumbnail/{id}.jpeg — thumbnail cover image.
pub async fn thumbnail(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    serve_cover(&state, &file, true).await
}

/// Strip the `.jpeg` suffix the routes carry.
fn book_id_from_file(file: &str) -> Option<&str> {
    let id = file.strip_suffix(".jpeg").or_else(|| file.strip_suffix(".jpg"))?;
    if id.is_empty() { None } else { Some(id) }
}

async fn serve_cover(state: &AppState, file: &str, as_thumbnail: bool) -> Response {
    let Some(book_id) = book_id_from_file(file) else {
        return AppError::NotFound(file.to_string()).into_response();
    };
    let book = match books::get_by_id(&state.db, book_id).await {
        Ok(Some(b)) => b,
        Ok(None) => return AppError::NotFound(format!("book {book_id}")).into_response(),
        Err(e) => return AppError::Db(e).into_response(),
    };

    if !book.has_cover {
        return image_response(NOCOVER_SVG, "image/svg+xml");
    }

    let covers_dir = state.config.covers.covers_path.clone();
    let root = state.config.library.path.clone();
    let max_dimension = state.config.covers.cover_max_dimension_px;
    let quality = state.config.covers.cover_jpeg_quality;
    let book_id_owned = book_id.to_string();

    // Disk cache first, then re-extraction from the book file. Everything
    // image-shaped runs off the async threads.
    let jpeg = tokio::task::spawn_blocking(move || {
        let cache_path = covers_dir.join(format!("{book_id_owned}.jpg"));
        if let Ok(data) = std::fs::read(&cache_path) {
            return Some(data);
        }

        let raw = extract_book_cover(&root, &book)?;
        let jpeg = to_jpeg_capped(&raw, max_dimension, quality).ok()?;
        let _ = std::fs::create_dir_all(&covers_dir);
        let _ = std::fs::write(&cache_path, &jpeg);
        Some(jpeg)
    })
    .await;

    let jpeg = match jpeg {
        Ok(Some(data)) => data,
        _ => return image_response(NOCOVER_SVG, "image/svg+xml"),
    };

    state.server_stats.record_image_served();

    if as_thumbnail {
        match to_jpeg_resized(&jpeg, THUMB_SIZE, state.config.covers.cover_jpeg_quality) {
            Ok(thumb) => image_response(&thumb, "image/jpeg"),
            Err(_) => image_response(&jpeg, "image/jpeg"),
        }
    } else {
        image_response(&jpeg, "image/jpeg")
    }
}

/// Extract raw cover bytes from the book file on disk (plain or archived).
fn extract_book_cover(root: &std::path::Path, book: &Book) -> Option<Vec<u8>> {
    let data = super::download::read_book_file(root, &book.file_path).ok()?;
    match book.book_type() {
        BookType::Fb2 => parsers::fb2::extract_cover(&data).map(|(bytes, _)| bytes),
        BookType::Epub => parsers::epub::extract_cover(Cursor::new(data)).map(|(bytes, _)| bytes),
    }
}

/// Re-encode an image as JPEG, downscaling so neither side exceeds
/// `max_dimension`.
fn to_jpeg_capped(data: &[u8], max_dimension: u32, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(data)?;
    let img = if img.width() > max_dimension || img.height() > max_dimension {
        img.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        img
    };
    encode_jpeg(&img, quality)
}

fn to_jpeg_resized(data: &[u8], size: u32, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(data)?;
    let resized = img.resize(size, size, FilterType::Lanczos3);
    encode_jpeg(&resized, quality)
}

fn encode_jpeg(img: &image::DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
    img.write_with_encoder(encoder)?;
    Ok(buf.into_inner())
}

fn image_response(data: &[u8], mime: &str) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_LENGTH, data.len().to_string()),
        ],
        data.to_vec(),
    )
        .into_response()
}
