//! Memoization for the expensive COUNT/DISTINCT queries behind the OPDS
//! root page and the navigation indexes.
//!
//! One mutex guards all memoized fields. Slow-moving values live for an
//! hour; the new-books count for five minutes. Any write through the store
//! invalidates everything, and reads repopulate lazily.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::db::DbPool;
use crate::db::models::Genre;
use crate::db::queries::{authors, books, downloads, genres, sequences};
use crate::search::sort::{self, SortOrder};

const SLOW_TTL: Duration = Duration::from_secs(60 * 60);
const FAST_TTL: Duration = Duration::from_secs(5 * 60);

/// Library-wide counters shown on the OPDS root page.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct LibraryTotals {
    pub books: i64,
    pub fb2: i64,
    pub epub: i64,
    pub authors: i64,
    pub sequences: i64,
    pub unique_downloads: i64,
}

struct Cached<T> {
    value: T,
    at: Instant,
}

impl<T> Cached<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            at: Instant::now(),
        }
    }

    fn fresh(&self, ttl: Duration) -> bool {
        self.at.elapsed() < ttl
    }
}

#[derive(Default)]
struct Inner {
    totals: Option<Cached<LibraryTotals>>,
    /// Keyed by the cutoff timestamp so a period change recomputes.
    new_books: Option<(String, Cached<i64>)>,
    authors_list: Option<(SortOrder, Cached<Arc<Vec<String>>>)>,
    sequences_list: Option<(SortOrder, Cached<Arc<Vec<String>>>)>,
    genre_counts: Option<Cached<Arc<Vec<(Genre, i64)>>>>,
}

pub struct StatsCache {
    inner: Mutex<Inner>,
}

impl StatsCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Drop every memoized value. Called after any store write.
    pub async fn invalidate(&self) {
        let mut inner = self.inner.lock().await;
        *inner = Inner::default();
    }

    /// Precompute everything once at startup.
    pub async fn warm_up(
        &self,
        pool: &DbPool,
        new_books_since: &str,
        order: SortOrder,
    ) -> Result<(), sqlx::Error> {
        self.totals(pool).await?;
        self.new_books_count(pool, new_books_since).await?;
        self.authors_list(pool, order).await?;
        self.sequences_list(pool, order).await?;
        self.genre_counts(pool).await?;
        Ok(())
    }

    pub async fn totals(&self, pool: &DbPool) -> Result<LibraryTotals, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        if let Some(cached) = &inner.totals
            && cached.fresh(SLOW_TTL)
        {
            return Ok(cached.value);
        }

        let totals = LibraryTotals {
            books: books::count_all(pool).await?,
            fb2: books::count_by_type(pool, "fb2").await?,
            epub: books::count_by_type(pool, "epub").await?,
            authors: authors::count(pool).await?,
            sequences: sequences::count(pool).await?,
            unique_downloads: downloads::count_unique(pool).await?,
        };
        inner.totals = Some(Cached::new(totals));
        Ok(totals)
    }

    /// Count of books added since the cutoff. Short TTL: this is the only
    /// value that visibly moves while a scan runs.
    pub async fn new_books_count(&self, pool: &DbPool, since: &str) -> Result<i64, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        if let Some((key, cached)) = &inner.new_books
            && key == since
            && cached.fresh(FAST_TTL)
        {
            return Ok(cached.value);
        }

        let count = books::count_added_since(pool, since).await?;
        inner.new_books = Some((since.to_string(), Cached::new(count)));
        Ok(count)
    }

    /// All canonical author names, culture-aware sorted.
    pub async fn authors_list(
        &self,
        pool: &DbPool,
        order: SortOrder,
    ) -> Result<Arc<Vec<String>>, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        if let Some((cached_order, cached)) = &inner.authors_list
            && *cached_order == order
            && cached.fresh(SLOW_TTL)
        {
            return Ok(Arc::clone(&cached.value));
        }

        let mut names = authors::names_all(pool).await?;
        sort::sort_dedup(&mut names, order);
        let list = Arc::new(names);
        inner.authors_list = Some((order, Cached::new(Arc::clone(&list))));
        Ok(list)
    }

    /// All sequence names, culture-aware sorted.
    pub async fn sequences_list(
        &self,
        pool: &DbPool,
        order: SortOrder,
    ) -> Result<Arc<Vec<String>>, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        if let Some((cached_order, cached)) = &inner.sequences_list
            && *cached_order == order
            && cached.fresh(SLOW_TTL)
        {
            return Ok(Arc::clone(&cached.value));
        }

        let mut names = sequences::names_all(pool).await?;
        sort::sort_dedup(&mut names, order);
        let list = Arc::new(names);
        inner.sequences_list = Some((order, Cached::new(Arc::clone(&list))));
        Ok(list)
    }

    /// Genres that actually have books, with direct book counts.
    pub async fn genre_counts(
        &self,
        pool: &DbPool,
    ) -> Result<Arc<Vec<(Genre, i64)>>, sqlx::Error> {
        let mut inner = self.inner.lock().await;
        if let Some(cached) = &inner.genre_counts
            && cached.fresh(SLOW_TTL)
        {
            return Ok(Arc::clone(&cached.value));
        }

        let list = Arc::new(genres::with_book_counts(pool).await?);
        inner.genre_counts = Some(Cached::new(Arc::clone(&list)));
        Ok(list)
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::db::models::{BookType, NewBook};
    use crate::ingest::insert_book;

    fn make_book(id: &str, title: &str) -> NewBook {
        NewBook {
            id: id.to_string(),
            title: title.to_string(),
            title_normalized: title.to_lowercase(),
            annotation: String::new(),
            language: "en".to_string(),
            book_date: String::new(),
            document_date: String::new(),
            added_date: "2026-01-01T00:00:00Z".to_string(),
            doc_version: 1.0,
            book_type: BookType::Fb2,
            file_path: format!("{id}.fb2"),
            file_name: format!("{id}.fb2"),
            document_size: 1,
            has_cover: false,
            authors: vec!["Doe John".to_string()],
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
    async fn test_totals_memoized_until_invalidated() {
        let pool = create_test_pool().await;
        let cache = StatsCache::new();

        assert_eq!(cache.totals(&pool).await.unwrap().books, 0);

        store(&pool, &make_book("b1", "One")).await;
        // Still the memoized value
        assert_eq!(cache.totals(&pool).await.unwrap().books, 0);

        cache.invalidate().await;
        let totals = cache.totals(&pool).await.unwrap();
        assert_eq!(totals.books, 1);
        assert_eq!(totals.fb2, 1);
        assert_eq!(totals.authors, 1);
    }

    #[tokio::test]
    async fn test_new_books_count_recomputes_on_cutoff_change() {
        let pool = create_test_pool().await;
        let cache = StatsCache::new();
        store(&pool, &make_book("b1", "One")).await;

        assert_eq!(
            cache
                .new_books_count(&pool, "2025-12-01T00:00:00Z")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            cache
                .new_books_count(&pool, "2026-06-01T00:00:00Z")
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_author_list_sorted_and_shared() {
        let pool = create_test_pool().await;
        store(&pool, &make_book("b1", "One")).await;
        let mut second = make_book("b2", "Two");
        second.authors = vec!["Авдеев Пётр".to_string()];
        store(&pool, &second).await;

        let cache = StatsCache::new();
        let latin_first = cache
            .authors_list(&pool, SortOrder::LatinFirst)
            .await
            .unwrap();
        assert_eq!(
            *latin_first,
            vec!["Doe John".to_string(), "Авдеев Пётр".to_string()]
        );

        let cyrillic_first = cache
            .authors_list(&pool, SortOrder::CyrillicFirst)
            .await
            .unwrap();
        assert_eq!(
            *cyrillic_first,
            vec!["Авдеев Пётр".to_string(), "Doe John".to_string()]
        );
    }

    #[tokio::test]
    async fn test_warm_up_populates_everything() {
        let pool = create_test_pool().await;
        let cache = StatsCache::new();
        cache
            .warm_up(&pool, "2026-01-01T00:00:00Z", SortOrder::CyrillicFirst)
            .await
            .unwrap();
        let inner = cache.inner.lock().await;
        assert!(inner.totals.is_some());
        assert!(inner.new_books.is_some());
        assert!(inner.authors_list.is_some());
        assert!(inner.sequences_list.is_some());
        assert!(inner.genre_counts.is_some());
    }
}
