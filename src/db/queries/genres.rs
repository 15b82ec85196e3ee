use sqlx::SqliteConnection;

use crate::db::DbPool;
use crate::db::models::Genre;

/// Embedded FB2 genre taxonomy: `tag|english|translation|parent` per line.
const GENRES_DATA: &str = include_str!("../../data/genres.txt");

/// Parse the embedded taxonomy file.
pub fn embedded_taxonomy() -> Vec<Genre> {
    GENRES_DATA
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.splitn(4, '|');
            let tag = parts.next()?.trim();
            let english = parts.next()?.trim();
            let translation = parts.next().unwrap_or("").trim();
            let parent = parts.next().unwrap_or("").trim();
            if tag.is_empty() {
                return None;
            }
            Some(Genre {
                tag: tag.to_string(),
                english_name: english.to_string(),
                translation: translation.to_string(),
                parent_tag: if parent.is_empty() {
                    None
                } else {
                    Some(parent.to_string())
                },
            })
        })
        .collect()
}

/// Seed the genres table from the embedded taxonomy. Idempotent.
pub async fn seed_embedded(pool: &DbPool) -> Result<(), sqlx::Error> {
    for genre in embedded_taxonomy() {
        sqlx::query(
            "INSERT OR IGNORE INTO genres (tag, english_name, translation, parent_tag) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&genre.tag)
        .bind(&genre.english_name)
        .bind(&genre.translation)
        .bind(&genre.parent_tag)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn get_by_tag(pool: &DbPool, tag: &str) -> Result<Option<Genre>, sqlx::Error> {
    sqlx::query_as::<_, Genre>("SELECT * FROM genres WHERE tag = ?")
        .bind(tag)
        .fetch_optional(pool)
        .await
}

pub async fn link_book(
    conn: &mut SqliteConnection,
    book_id: &str,
    genre_tag: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO book_genres (book_id, genre_tag) VALUES (?, ?)")
        .bind(book_id)
        .bind(genre_tag)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Genres of one book. Tags preserved verbatim at write time (outside the
/// taxonomy) still come back, with the tag standing in as label.
pub async fn for_book(pool: &DbPool, book_id: &str) -> Result<Vec<Genre>, sqlx::Error> {
    sqlx::query_as::<_, Genre>(
        "SELECT bg.genre_tag AS tag, \
                IFNULL(g.english_name, bg.genre_tag) AS english_name, \
                IFNULL(g.translation, '') AS translation, \
                g.parent_tag \
         FROM book_genres bg LEFT JOIN genres g ON g.tag = bg.genre_tag \
         WHERE bg.book_id = ? ORDER BY bg.genre_tag",
    )
    .bind(book_id)
    .fetch_all(pool)
    .await
}

/// Direct book counts per genre tag; only tags that actually have books.
pub async fn with_book_counts(pool: &DbPool) -> Result<Vec<(Genre, i64)>, sqlx::Error> {
    let rows: Vec<(String, String, String, Option<String>, i64)> = sqlx::query_as(
        "SELECT bg.genre_tag, \
                IFNULL(g.english_name, bg.genre_tag), \
                IFNULL(g.translation, ''), \
                g.parent_tag, \
                COUNT(DISTINCT bg.book_id) \
         FROM book_genres bg LEFT JOIN genres g ON g.tag = bg.genre_tag \
         GROUP BY bg.genre_tag ORDER BY bg.genre_tag",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(tag, english_name, translation, parent_tag, count)| {
            (
                Genre {
                    tag,
                    english_name,
                    translation,
                    parent_tag,
                },
                count,
            )
        })
        .collect())
}
