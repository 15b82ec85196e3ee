use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::db::models::{Book, NewBook};

/// Insert the book row itself. Author/genre/sequence links are written by
/// the ingest pipeline inside the same transaction.
pub async fn insert(conn: &mut SqliteConnection, book: &NewBook) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO books (id, title, title_normalized, annotation, language, \
         book_date, document_date, added_date, doc_version, book_type, file_path, \
         file_name, document_size, has_cover, translators) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&book.id)
    .bind(&book.title)
    .bind(&book.title_normalized)
    .bind(&book.annotation)
    .bind(&book.language)
    .bind(&book.book_date)
    .bind(&book.document_date)
    .bind(&book.added_date)
    .bind(book.doc_version)
    .bind(book.book_type.as_str())
    .bind(&book.file_path)
    .bind(&book.file_name)
    .bind(book.document_size)
    .bind(book.has_cover)
    .bind(book.translators.join(", "))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Delete a book row; join rows cascade.
pub async fn delete(conn: &mut SqliteConnection, id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM books WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete_by_file_path(
    conn: &mut SqliteConnection,
    file_path: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM books WHERE file_path = ?")
        .bind(file_path)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Delete every book stored inside the given archive (composite paths of the
/// form `archive@inner`).
pub async fn delete_by_archive(
    conn: &mut SqliteConnection,
    archive_path: &str,
) -> Result<u64, sqlx::Error> {
    let pattern = format!("{archive_path}@%");
    let result = sqlx::query("DELETE FROM books WHERE file_path LIKE ?")
        .bind(&pattern)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn get_by_id(pool: &DbPool, id: &str) -> Result<Option<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>("SELECT * FROM books WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn path_exists(pool: &DbPool, file_path: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM books WHERE file_path = ?")
        .bind(file_path)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Duplicate-detection lookup: books sharing a normalized title and a
/// primary (position 0) author.
pub async fn find_by_title_and_author(
    pool: &DbPool,
    title_normalized: &str,
    author_name: &str,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id AND ba.position = 0 \
         JOIN authors a ON a.id = ba.author_id \
         WHERE b.title_normalized = ? AND a.name = ?",
    )
    .bind(title_normalized)
    .bind(author_name)
    .fetch_all(pool)
    .await
}

pub async fn count_all(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn count_by_type(pool: &DbPool, book_type: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books WHERE book_type = ?")
        .bind(book_type)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

pub async fn count_added_since(pool: &DbPool, since: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM books WHERE added_date >= ?")
        .bind(since)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// New books ordered by insertion time, newest first.
pub async fn recent_by_date(
    pool: &DbPool,
    since: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT * FROM books WHERE added_date >= ? \
         ORDER BY added_date DESC, title_normalized LIMIT ? OFFSET ?",
    )
    .bind(since)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// New books in alphabetical order.
pub async fn recent_by_title(
    pool: &DbPool,
    since: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT * FROM books WHERE added_date >= ? \
         ORDER BY title_normalized LIMIT ? OFFSET ?",
    )
    .bind(since)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn by_author_alphabetic(
    pool: &DbPool,
    author_name: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         WHERE a.name = ? ORDER BY b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(author_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn by_author_by_date(
    pool: &DbPool,
    author_name: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         WHERE a.name = ? ORDER BY b.added_date DESC, b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(author_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Books by the author that do not belong to any sequence.
pub async fn by_author_without_sequence(
    pool: &DbPool,
    author_name: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         WHERE a.name = ? \
         AND NOT EXISTS (SELECT 1 FROM book_sequences bs WHERE bs.book_id = b.id) \
         ORDER BY b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(author_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Books by the author inside one named sequence, in series order.
pub async fn by_author_in_sequence(
    pool: &DbPool,
    author_name: &str,
    sequence_name: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         JOIN book_sequences bs ON bs.book_id = b.id \
         JOIN sequences s ON s.id = bs.sequence_id \
         WHERE a.name = ? AND s.name = ? \
         ORDER BY bs.number_in_sequence, b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(author_name)
    .bind(sequence_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_by_author_with_sequence(
    pool: &DbPool,
    author_name: &str,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT b.id) FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         JOIN book_sequences bs ON bs.book_id = b.id \
         WHERE a.name = ?",
    )
    .bind(author_name)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn count_by_author_without_sequence(
    pool: &DbPool,
    author_name: &str,
) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT b.id) FROM books b \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         WHERE a.name = ? \
         AND NOT EXISTS (SELECT 1 FROM book_sequences bs WHERE bs.book_id = b.id)",
    )
    .bind(author_name)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// Books in a named sequence, ordered by their number in it.
pub async fn by_sequence(
    pool: &DbPool,
    sequence_name: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN book_sequences bs ON bs.book_id = b.id \
         JOIN sequences s ON s.id = bs.sequence_id \
         WHERE s.name = ? \
         ORDER BY bs.number_in_sequence, b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(sequence_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn by_genre(
    pool: &DbPool,
    genre_tag: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN book_genres bg ON bg.book_id = b.id \
         WHERE bg.genre_tag = ? \
         ORDER BY b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(genre_tag)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Full-text search over title, annotation and author names. The caller is
/// responsible for quoting the MATCH expression.
pub async fn fts_search(
    pool: &DbPool,
    match_expr: &str,
    limit: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN books_fts ON books_fts.rowid = b.rowid \
         WHERE books_fts MATCH ? LIMIT ?",
    )
    .bind(match_expr)
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Every `(id, file_path)` pair, for the remove-missing sweep.
pub async fn all_paths(pool: &DbPool) -> Result<Vec<(String, String)>, sqlx::Error> {
    sqlx::query_as("SELECT id, file_path FROM books ORDER BY file_path")
        .fetch_all(pool)
        .await
}
