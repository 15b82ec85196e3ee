use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::db::models::Sequence;
use crate::search::soundex;

/// Find or create a sequence by name; fills the soundex column on creation.
pub async fn ensure(conn: &mut SqliteConnection, name: &str) -> Result<i64, sqlx::Error> {
    let code = soundex::encode(name);
    sqlx::query("INSERT OR IGNORE INTO sequences (name, name_soundex) VALUES (?, ?)")
        .bind(name)
        .bind(&code)
        .execute(&mut *conn)
        .await?;
    let row: (i64,) = sqlx::query_as("SELECT id FROM sequences WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.0)
}

pub async fn link_book(
    conn: &mut SqliteConnection,
    book_id: &str,
    sequence_id: i64,
    number_in_sequence: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO book_sequences (book_id, sequence_id, number_in_sequence) \
         VALUES (?, ?, ?)",
    )
    .bind(book_id)
    .bind(sequence_id)
    .bind(number_in_sequence)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Remove sequences that no longer have any book links.
pub async fn delete_orphans(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM sequences WHERE id NOT IN (SELECT DISTINCT sequence_id FROM book_sequences)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn find_by_name(pool: &DbPool, name: &str) -> Result<Option<Sequence>, sqlx::Error> {
    sqlx::query_as::<_, Sequence>("SELECT * FROM sequences WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await
}

/// Number of books in one sequence.
pub async fn book_count(pool: &DbPool, name: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT bs.book_id) FROM sequences s \
         JOIN book_sequences bs ON bs.sequence_id = s.id WHERE s.name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn names_all(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM sequences ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sequences")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// `(sequence_name, number_in_sequence)` pairs for one book.
pub async fn for_book(pool: &DbPool, book_id: &str) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT s.name, bs.number_in_sequence FROM sequences s \
         JOIN book_sequences bs ON bs.sequence_id = s.id \
         WHERE bs.book_id = ? ORDER BY s.name",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await
}

/// Sequences an author has books in, with per-sequence book counts.
pub async fn for_author(
    pool: &DbPool,
    author_name: &str,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT s.name, COUNT(DISTINCT b.id) FROM sequences s \
         JOIN book_sequences bs ON bs.sequence_id = s.id \
         JOIN books b ON b.id = bs.book_id \
         JOIN book_authors ba ON ba.book_id = b.id \
         JOIN authors a ON a.id = ba.author_id \
         WHERE a.name = ? GROUP BY s.id ORDER BY s.name",
    )
    .bind(author_name)
    .fetch_all(pool)
    .await
}
