use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::db::models::Author;
use crate::search::{soundex, translit};

/// Find or create an author by canonical name. The soundex and translit
/// columns are filled in automatically when the row is created.
pub async fn ensure(conn: &mut SqliteConnection, name: &str) -> Result<i64, sqlx::Error> {
    let code = soundex::encode(name);
    let latin = translit::front(name, translit::Table::Iso9);
    sqlx::query(
        "INSERT OR IGNORE INTO authors (name, name_soundex, name_translit) VALUES (?, ?, ?)",
    )
    .bind(name)
    .bind(&code)
    .bind(&latin)
    .execute(&mut *conn)
    .await?;
    // INSERT OR IGNORE reports no id on conflict; query back by name.
    let row: (i64,) = sqlx::query_as("SELECT id FROM authors WHERE name = ?")
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(row.0)
}

pub async fn link_book(
    conn: &mut SqliteConnection,
    book_id: &str,
    author_id: i64,
    position: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO book_authors (book_id, author_id, position) VALUES (?, ?, ?)",
    )
    .bind(book_id)
    .bind(author_id)
    .bind(position)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Remove authors that no longer have any book links.
pub async fn delete_orphans(conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM authors WHERE id NOT IN (SELECT DISTINCT author_id FROM book_authors)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Phonetic search stage: match against the stored soundex column.
pub async fn find_by_soundex(pool: &DbPool, code: &str) -> Result<Vec<Author>, sqlx::Error> {
    sqlx::query_as::<_, Author>(
        "SELECT * FROM authors WHERE name_soundex = ? ORDER BY name",
    )
    .bind(code)
    .fetch_all(pool)
    .await
}

/// All canonical names. Sorted by the caller with the culture-aware
/// comparator; the SQL order is just a stable baseline.
pub async fn names_all(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM authors ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM authors")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}

/// Authors of one book in file order.
pub async fn for_book(pool: &DbPool, book_id: &str) -> Result<Vec<Author>, sqlx::Error> {
    sqlx::query_as::<_, Author>(
        "SELECT a.* FROM authors a \
         JOIN book_authors ba ON ba.author_id = a.id \
         WHERE ba.book_id = ? ORDER BY ba.position",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await
}

/// Number of books linked to one author.
pub async fn book_count(pool: &DbPool, name: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(DISTINCT ba.book_id) FROM authors a \
         JOIN book_authors ba ON ba.author_id = a.id WHERE a.name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn exists(pool: &DbPool, name: &str) -> Result<bool, sqlx::Error> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM authors WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}
