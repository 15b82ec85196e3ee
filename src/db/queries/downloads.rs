use crate::db::DbPool;
use crate::db::models::Book;

/// Record one download event. Every acquisition response writes one row.
pub async fn record(
    pool: &DbPool,
    book_id: &str,
    client_fingerprint: &str,
    ts: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO downloads (book_id, client_fingerprint, ts) VALUES (?, ?, ?)")
        .bind(book_id)
        .bind(client_fingerprint)
        .bind(ts)
        .execute(pool)
        .await?;
    Ok(())
}

/// Unique-downloads view, newest first: one row per book, keyed by the
/// latest download timestamp.
pub async fn unique_by_date(
    pool: &DbPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN (SELECT book_id, MAX(ts) AS last_ts FROM downloads GROUP BY book_id) d \
           ON d.book_id = b.id \
         ORDER BY d.last_ts DESC, b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Unique-downloads view in title order.
pub async fn unique_by_title(
    pool: &DbPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    sqlx::query_as::<_, Book>(
        "SELECT b.* FROM books b \
         JOIN (SELECT book_id, MAX(ts) AS last_ts FROM downloads GROUP BY book_id) d \
           ON d.book_id = b.id \
         ORDER BY b.title_normalized LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count_unique(pool: &DbPool) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(DISTINCT book_id) FROM downloads")
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
