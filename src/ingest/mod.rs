pub mod aliases;
pub mod dedup;
pub mod scanner;
pub mod watcher;

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::models::{BookType, NewBook};
use crate::db::queries::{authors, books, genres, sequences};
use crate::db;
use crate::parsers::{self, ParsedBook};
use crate::search::soundex;

use aliases::AliasTable;

/// Genre taxonomy index used for write-time validation: unknown tags are
/// soundex-normalized to a close taxonomy tag when one exists, otherwise
/// preserved verbatim.
pub struct GenreIndex {
    tags: HashMap<String, ()>,
    by_soundex: HashMap<String, String>,
}

impl GenreIndex {
    pub fn from_embedded() -> Self {
        let mut tags = HashMap::new();
        let mut by_soundex = HashMap::new();
        for genre in crate::db::queries::genres::embedded_taxonomy() {
            by_soundex
                .entry(soundex::encode(&genre.tag))
                .or_insert_with(|| genre.tag.clone());
            tags.insert(genre.tag, ());
        }
        Self { tags, by_soundex }
    }

    /// Validate a raw genre tag against the taxonomy.
    pub fn normalize(&self, raw: &str) -> String {
        let tag = raw.trim().to_lowercase();
        if self.tags.contains_key(&tag) {
            return tag;
        }
        if let Some(known) = self.by_soundex.get(&soundex::encode(&tag)) {
            return known.clone();
        }
        tag
    }
}

impl Default for GenreIndex {
    fn default() -> Self {
        Self::from_embedded()
    }
}

/// Build a store candidate from parser output plus file facts. Applies name
/// normalization, alias resolution, genre validation and id derivation.
pub fn build_candidate(
    parsed: ParsedBook,
    file_path: &str,
    file_name: &str,
    book_type: BookType,
    document_size: i64,
    alias_table: &AliasTable,
    genre_index: &GenreIndex,
    use_aliases: bool,
) -> NewBook {
    let title = if parsed.title.trim().is_empty() {
        file_stem(file_name)
    } else {
        parsed.title.clone()
    };

    let mut author_names: Vec<String> = parsed
        .authors
        .iter()
        .map(|name| parsers::normalize_person_name(name))
        .filter(|name| !name.is_empty())
        .collect();
    author_names.dedup();
    if author_names.is_empty() {
        author_names.push("Unknown".to_string());
    }

    // Aliases apply only when the book has at least one Cyrillic author.
    let book_has_cyrillic = author_names.iter().any(|name| parsers::has_cyrillic(name));
    if use_aliases {
        author_names = author_names
            .iter()
            .map(|name| alias_table.resolve(name, book_has_cyrillic))
            .collect();
        author_names.dedup();
    }

    let translators: Vec<String> = parsed
        .translators
        .iter()
        .map(|name| parsers::normalize_person_name(name))
        .filter(|name| !name.is_empty())
        .collect();

    let mut genre_tags: Vec<String> = parsed
        .genres
        .iter()
        .map(|tag| genre_index.normalize(tag))
        .filter(|tag| !tag.is_empty())
        .collect();
    genre_tags.sort_unstable();
    genre_tags.dedup();

    let mut seen_sequences: Vec<(String, i64)> = Vec::new();
    for (name, number) in parsed.sequences {
        if !name.is_empty() && !seen_sequences.iter().any(|(n, _)| *n == name) {
            seen_sequences.push((name, number.max(0)));
        }
    }

    let id = match parsed.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => derive_book_id(file_path),
    };

    NewBook {
        id,
        title_normalized: parsers::normalize_title(&title),
        title,
        annotation: parsed.annotation,
        language: parsed.language,
        book_date: parsed.book_date,
        document_date: parsed.document_date,
        added_date: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        doc_version: parsed.doc_version,
        book_type,
        file_path: file_path.to_string(),
        file_name: file_name.to_string(),
        document_size,
        has_cover: parsed.has_cover,
        authors: author_names,
        translators,
        genres: genre_tags,
        sequences: seen_sequences,
    }
}

/// Deterministic id for books without an embedded publisher id: a
/// name-based UUID over the relative file path, so repeated scans mint the
/// same id.
pub fn derive_book_id(file_path: &str) -> String {
    Uuid::new_v5(&db::UUID_NAMESPACE, file_path.as_bytes()).to_string()
}

fn file_stem(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string()
}

/// Insert a candidate with all its join rows, inside the caller's
/// transaction.
pub async fn insert_book(conn: &mut SqliteConnection, book: &NewBook) -> Result<(), sqlx::Error> {
    books::insert(conn, book).await?;

    for (position, name) in book.authors.iter().enumerate() {
        let author_id = authors::ensure(conn, name).await?;
        authors::link_book(conn, &book.id, author_id, position as i64).await?;
    }
    for tag in &book.genres {
        genres::link_book(conn, &book.id, tag).await?;
    }
    for (name, number) in &book.sequences {
        let sequence_id = sequences::ensure(conn, name).await?;
        sequences::link_book(conn, &book.id, sequence_id, *number).await?;
    }
    Ok(())
}

/// Replace a stored book with a better version of the same logical book.
pub async fn replace_book(
    conn: &mut SqliteConnection,
    old_id: &str,
    book: &NewBook,
) -> Result<(), sqlx::Error> {
    books::delete(conn, old_id).await?;
    insert_book(conn, book).await?;
    authors::delete_orphans(conn).await?;
    sequences::delete_orphans(conn).await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("scan already running")]
    AlreadyRunning,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("internal error: {0}")]
    Internal(String),
}
