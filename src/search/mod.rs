pub mod sort;
pub mod soundex;
pub mod translit;

use crate::db::DbPool;
use crate::db::models::Book;
use crate::db::queries::{authors, books};
use crate::parsers::normalize_title;
use crate::stats::StatsCache;

use sort::SortOrder;

/// Which stage of the author pipeline produced a result. Reported to the
/// caller alongside the hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStage {
    ExactMatch,
    PartialMatch,
    Transliteration,
    Soundex,
}

impl SearchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStage::ExactMatch => "exact match",
            SearchStage::PartialMatch => "partial match",
            SearchStage::Transliteration => "transliteration",
            SearchStage::Soundex => "soundex",
        }
    }
}

/// Four-stage author search: exact, partial, transliterated exact/partial,
/// then phonetic. Stops at the first non-empty stage. Matching folds case
/// in Rust (SQLite NOCASE only folds ASCII, which would break Cyrillic
/// queries); the phonetic stage goes through the stored soundex column.
pub async fn authors_open_search(
    pool: &DbPool,
    stats: &StatsCache,
    query: &str,
    order: SortOrder,
) -> Result<(Vec<String>, Option<SearchStage>), sqlx::Error> {
    let query = query.trim();
    if query.is_empty() {
        return Ok((Vec::new(), None));
    }

    let names = stats.authors_list(pool, order).await?;
    let folded = query.to_lowercase();

    let exact: Vec<String> = names
        .iter()
        .filter(|name| name.to_lowercase() == folded)
        .cloned()
        .collect();
    if !exact.is_empty() {
        return Ok((exact, Some(SearchStage::ExactMatch)));
    }

    let partial: Vec<String> = names
        .iter()
        .filter(|name| name.to_lowercase().contains(&folded))
        .cloned()
        .collect();
    if !partial.is_empty() {
        return Ok((partial, Some(SearchStage::PartialMatch)));
    }

    // Transliterate and run the same two stages again. The query is tried
    // both ways: back-translated into Cyrillic, and matched against the
    // ISO 9 form of each stored name (with the common -ij/-yj surname
    // endings folded, so "Dostoevsky" finds "Dostoevskij").
    for translated in [
        translit::back(query, translit::Table::Gost),
        translit::front(query, translit::Table::Iso9),
    ] {
        if translated == query {
            continue;
        }
        let folded = translated.to_lowercase();
        let hits: Vec<String> = names
            .iter()
            .filter(|name| {
                let name = name.to_lowercase();
                name == folded || name.contains(&folded)
            })
            .cloned()
            .collect();
        if !hits.is_empty() {
            return Ok((hits, Some(SearchStage::Transliteration)));
        }
    }
    let query_latin = fold_latin_endings(&folded);
    let latin_hits: Vec<String> = names
        .iter()
        .filter(|name| {
            let latin = fold_latin_endings(
                &translit::front(name, translit::Table::Iso9).to_lowercase(),
            );
            latin == query_latin || latin.contains(&query_latin)
        })
        .cloned()
        .collect();
    if !latin_hits.is_empty() {
        return Ok((latin_hits, Some(SearchStage::Transliteration)));
    }

    let code = soundex::encode(query);
    let mut phonetic: Vec<String> = authors::find_by_soundex(pool, &code)
        .await?
        .into_iter()
        .map(|author| author.name)
        .collect();
    if !phonetic.is_empty() {
        sort::sort_dedup(&mut phonetic, order);
        return Ok((phonetic, Some(SearchStage::Soundex)));
    }

    Ok((Vec::new(), None))
}

/// Full-text book-title search with a transliteration fallback. Results are
/// ranked exact > prefix > word boundary > contains, then culture-aware
/// sorted within each rank.
pub async fn titles_open_search(
    pool: &DbPool,
    query: &str,
    order: SortOrder,
    limit: i64,
) -> Result<Vec<Book>, sqlx::Error> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let mut hits = books::fts_search(pool, &fts_quote(query), limit).await?;
    let mut effective_query = query.to_string();
    if hits.is_empty() {
        let back = translit::back(query, translit::Table::Gost);
        if back != query {
            hits = books::fts_search(pool, &fts_quote(&back), limit).await?;
            effective_query = back;
        }
    }

    dedup_books(&mut hits);
    rank_titles(&mut hits, &effective_query, order);
    Ok(hits)
}

/// Fold romanized Russian surname endings to a single form so that
/// "-ij", "-yj" and "-iy" spellings all compare equal to "-y".
fn fold_latin_endings(s: &str) -> String {
    s.split_whitespace()
        .map(|token| {
            for ending in ["ij", "yj", "iy", "jj"] {
                if token.len() > ending.len()
                    && let Some(stem) = token.strip_suffix(ending)
                {
                    return format!("{stem}y");
                }
            }
            token.to_string()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote a user query into an FTS5 MATCH expression: each token becomes a
/// quoted string, joined by implicit AND.
fn fts_quote(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedup_books(hits: &mut Vec<Book>) {
    let mut seen = std::collections::HashSet::new();
    hits.retain(|book| seen.insert(book.id.clone()));
}

fn title_rank(title_normalized: &str, query_normalized: &str) -> u8 {
    if title_normalized == query_normalized {
        0
    } else if title_normalized.starts_with(query_normalized) {
        1
    } else if title_normalized.contains(&format!(" {query_normalized}")) {
        2
    } else {
        3
    }
}

fn rank_titles(hits: &mut [Book], query: &str, order: SortOrder) {
    let q = normalize_title(query);
    hits.sort_by(|a, b| {
        title_rank(&a.title_normalized, &q)
            .cmp(&title_rank(&b.title_normalized, &q))
            .then_with(|| sort::compare(&a.title_normalized, &b.title_normalized, order))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::db::models::{BookType, NewBook};
    use crate::ingest::insert_book;

    fn make_book(id: &str, title: &str, author: &str) -> NewBook {
        NewBook {
            id: id.to_string(),
            title: title.to_string(),
            title_normalized: normalize_title(title),
            annotation: String::new(),
            language: "ru".to_string(),
            book_date: String::new(),
            document_date: String::new(),
            added_date: "2026-01-01T00:00:00Z".to_string(),
            doc_version: 1.0,
            book_type: BookType::Fb2,
            file_path: format!("{id}.fb2"),
            file_name: format!("{id}.fb2"),
            document_size: 1,
            has_cover: false,
            authors: vec![author.to_string()],
            translators: vec![],
            genres: vec![],
            sequences: vec![],
        }
    }

    async fn store(pool: &DbPool, book: &NewBook) {
        let mut tx = pool.begin().await.unwrap();
        insert_book(&mut tx, book).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_author_exact_stage() {
        let pool = create_test_pool().await;
        store(&pool, &make_book("b1", "T", "Doe John")).await;
        let stats = StatsCache::new();

        let (hits, stage) =
            authors_open_search(&pool, &stats, "doe john", SortOrder::LatinFirst)
                .await
                .unwrap();
        assert_eq!(hits, vec!["Doe John".to_string()]);
        assert_eq!(stage, Some(SearchStage::ExactMatch));
    }

    #[tokio::test]
    async fn test_author_partial_stage() {
        let pool = create_test_pool().await;
        store(&pool, &make_book("b1", "T", "Doe John")).await;
        let stats = StatsCache::new();

        let (hits, stage) = authors_open_search(&pool, &stats, "doe", SortOrder::LatinFirst)
            .await
            .unwrap();
        assert_eq!(hits, vec!["Doe John".to_string()]);
        assert_eq!(stage, Some(SearchStage::PartialMatch));
    }

    #[tokio::test]
    async fn test_author_transliteration_stage() {
        let pool = create_test_pool().await;
        store(
            &pool,
            &make_book("b1", "T", "Достоевский Фёдор Михайлович"),
        )
        .await;
        let stats = StatsCache::new();

        let (hits, stage) =
            authors_open_search(&pool, &stats, "Dostoevsky", SortOrder::CyrillicFirst)
                .await
                .unwrap();
        assert_eq!(hits, vec!["Достоевский Фёдор Михайлович".to_string()]);
        assert_eq!(stage, Some(SearchStage::Transliteration));

        // The reversible GOST spelling hits the same stage.
        let (hits, stage) =
            authors_open_search(&pool, &stats, "Dostoevskijj", SortOrder::CyrillicFirst)
                .await
                .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(stage, Some(SearchStage::Transliteration));
    }

    #[tokio::test]
    async fn test_author_soundex_stage() {
        let pool = create_test_pool().await;
        store(&pool, &make_book("b1", "T", "Smith Jane")).await;
        let stats = StatsCache::new();

        // "Smyth" is neither an exact, partial nor transliterated hit, but
        // shares the soundex code with "Smith".
        let (hits, stage) = authors_open_search(&pool, &stats, "Smyth J", SortOrder::LatinFirst)
            .await
            .unwrap();
        assert_eq!(hits, vec!["Smith Jane".to_string()]);
        assert_eq!(stage, Some(SearchStage::Soundex));
    }

    #[tokio::test]
    async fn test_author_search_case_insensitive_equivalence() {
        let pool = create_test_pool().await;
        store(&pool, &make_book("b1", "T", "Тёмный Властелин")).await;
        let stats = StatsCache::new();

        let (upper, _) =
            authors_open_search(&pool, &stats, "ТЁМНЫЙ", SortOrder::CyrillicFirst)
                .await
                .unwrap();
        let (lower, _) =
            authors_open_search(&pool, &stats, "тёмный", SortOrder::CyrillicFirst)
                .await
                .unwrap();
        assert_eq!(upper, lower);
        assert!(!upper.is_empty());
    }

    #[tokio::test]
    async fn test_title_fts_and_ranking() {
        let pool = create_test_pool().await;
        store(&pool, &make_book("b1", "Война и мир", "Толстой Лев")).await;
        store(&pool, &make_book("b2", "Война", "Толстой Лев")).await;
        store(&pool, &make_book("b3", "Первая война", "Толстой Лев")).await;

        let hits = titles_open_search(&pool, "Война", SortOrder::CyrillicFirst, 100)
            .await
            .unwrap();
        let titles: Vec<&str> = hits.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(titles, vec!["Война", "Война и мир", "Первая война"]);
    }

    #[tokio::test]
    async fn test_title_search_translit_fallback() {
        let pool = create_test_pool().await;
        store(&pool, &make_book("b1", "Война и мир", "Толстой Лев")).await;

        let hits = titles_open_search(&pool, "vojjna", SortOrder::CyrillicFirst, 100)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].title, "Война и мир");
    }

    #[test]
    fn test_fts_quote_escapes() {
        assert_eq!(fts_quote("war peace"), "\"war\" \"peace\"");
        assert_eq!(fts_quote("o\"brien"), "\"o\"\"brien\"");
    }
}
