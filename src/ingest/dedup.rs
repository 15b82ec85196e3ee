//! Duplicate detection and version selection.
//!
//! The detector is authoritative: callers never pre-check for duplicates.
//! It sees both the store and the in-flight batch, so a file ingested twice
//! within one scan resolves the same way as across scans.

use crate::db::DbPool;
use crate::db::models::{Book, BookType, NewBook, split_archive_path};
use crate::db::queries::books;

/// What to do with a candidate book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    InsertNew,
    /// Replace a book already in the store.
    ReplaceStored(String),
    /// Replace an insert still waiting in the current batch.
    ReplacePending(usize),
    /// Candidate lost version selection (or is an archived duplicate).
    Reject,
}

/// One write queued for the next batch flush.
#[derive(Debug, Clone)]
pub enum PendingOp {
    Insert(NewBook),
    Replace { old_id: String, book: NewBook },
}

impl PendingOp {
    pub fn book(&self) -> &NewBook {
        match self {
            PendingOp::Insert(book) => book,
            PendingOp::Replace { book, .. } => book,
        }
    }
}

/// Batch buffer with the indexes duplicate detection needs.
#[derive(Debug, Default)]
pub struct PendingBatch {
    ops: Vec<PendingOp>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn push_insert(&mut self, book: NewBook) {
        self.ops.push(PendingOp::Insert(book));
    }

    pub fn push_replace(&mut self, old_id: String, book: NewBook) {
        self.ops.push(PendingOp::Replace { old_id, book });
    }

    /// Swap the candidate into a queued op that it beat. A replace keeps its
    /// original stored victim.
    pub fn replace_at(&mut self, index: usize, book: NewBook) {
        match &mut self.ops[index] {
            PendingOp::Insert(slot) => *slot = book,
            PendingOp::Replace { book: slot, .. } => *slot = book,
        }
    }

    pub fn take_ops(&mut self) -> Vec<PendingOp> {
        std::mem::take(&mut self.ops)
    }

    fn find_by_id(&self, id: &str) -> Option<usize> {
        self.ops.iter().position(|op| op.book().id == id)
    }

    fn find_by_key(&self, title_normalized: &str, primary_author: &str) -> Option<usize> {
        self.ops.iter().position(|op| {
            let book = op.book();
            book.title_normalized == title_normalized && book.primary_author() == primary_author
        })
    }
}

/// Snapshot of the fields version selection needs, taken from either a
/// stored row or a pending candidate.
struct Snapshot<'a> {
    book_type: BookType,
    doc_version: f64,
    document_size: i64,
    file_path: &'a str,
    file_name: &'a str,
}

impl<'a> From<&'a Book> for Snapshot<'a> {
    fn from(book: &'a Book) -> Self {
        Snapshot {
            book_type: book.book_type(),
            doc_version: book.doc_version,
            document_size: book.document_size,
            file_path: &book.file_path,
            file_name: &book.file_name,
        }
    }
}

impl<'a> From<&'a NewBook> for Snapshot<'a> {
    fn from(book: &'a NewBook) -> Self {
        Snapshot {
            book_type: book.book_type,
            doc_version: book.doc_version,
            document_size: book.document_size,
            file_path: &book.file_path,
            file_name: &book.file_name,
        }
    }
}

enum Verdict {
    CandidateWins,
    ExistingWins,
}

/// Version selection between a candidate and a colliding book of the same
/// logical identity.
fn select_version(existing: &Snapshot<'_>, candidate: &NewBook) -> Verdict {
    // The same file carried inside a different archive is never a better
    // version.
    let existing_archived = split_archive_path(existing.file_path).is_some();
    let candidate_archived = split_archive_path(&candidate.file_path).is_some();
    if existing_archived
        && candidate_archived
        && existing.file_name == candidate.file_name
        && existing.file_path != candidate.file_path
    {
        return Verdict::ExistingWins;
    }

    match (existing.book_type, candidate.book_type) {
        // FB2 displaces EPUB holding the same identity; EPUB never
        // displaces a present FB2.
        (BookType::Epub, BookType::Fb2) => Verdict::CandidateWins,
        (BookType::Fb2, BookType::Epub) => Verdict::ExistingWins,
        // Same format: higher version wins, ties break on larger content.
        _ => {
            if candidate.doc_version > existing.doc_version {
                Verdict::CandidateWins
            } else if candidate.doc_version < existing.doc_version {
                Verdict::ExistingWins
            } else if candidate.document_size > existing.document_size {
                Verdict::CandidateWins
            } else {
                Verdict::ExistingWins
            }
        }
    }
}

/// Decide what to do with a candidate, consulting the store and the pending
/// batch. Key strength order: exact id, then (normalized title, primary
/// author). Cross-format collisions on the weak key coexist as distinct
/// books.
pub async fn decide(
    pool: &DbPool,
    pending: &PendingBatch,
    candidate: &NewBook,
) -> Result<Decision, sqlx::Error> {
    // 1. Exact id match.
    if let Some(index) = pending.find_by_id(&candidate.id) {
        let existing = Snapshot::from(pending.ops[index].book());
        return Ok(match select_version(&existing, candidate) {
            Verdict::CandidateWins => Decision::ReplacePending(index),
            Verdict::ExistingWins => Decision::Reject,
        });
    }
    if let Some(existing) = books::get_by_id(pool, &candidate.id).await? {
        return Ok(match select_version(&Snapshot::from(&existing), candidate) {
            Verdict::CandidateWins => Decision::ReplaceStored(existing.id),
            Verdict::ExistingWins => Decision::Reject,
        });
    }

    // 2. (normalized title, primary author) match.
    if let Some(index) =
        pending.find_by_key(&candidate.title_normalized, candidate.primary_author())
    {
        let other = pending.ops[index].book();
        if other.book_type == candidate.book_type {
            let existing = Snapshot::from(other);
            return Ok(match select_version(&existing, candidate) {
                Verdict::CandidateWins => Decision::ReplacePending(index),
                Verdict::ExistingWins => Decision::Reject,
            });
        }
        return Ok(Decision::InsertNew);
    }
    let matches = books::find_by_title_and_author(
        pool,
        &candidate.title_normalized,
        candidate.primary_author(),
    )
    .await?;
    for existing in &matches {
        if existing.book_type() == candidate.book_type {
            return Ok(match select_version(&Snapshot::from(existing), candidate) {
                Verdict::CandidateWins => Decision::ReplaceStored(existing.id.clone()),
                Verdict::ExistingWins => Decision::Reject,
            });
        }
        // Different formats of the same logical book coexist.
    }

    Ok(Decision::InsertNew)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::ingest::insert_book;

    fn make_book(id: &str, title: &str, author: &str) -> NewBook {
        NewBook {
            id: id.to_string(),
            title: title.to_string(),
            title_normalized: crate::parsers::normalize_title(title),
            annotation: String::new(),
            language: "en".to_string(),
            book_date: String::new(),
            document_date: String::new(),
            added_date: "2026-01-01T00:00:00Z".to_string(),
            doc_version: 1.0,
            book_type: BookType::Fb2,
            file_path: format!("{id}.fb2"),
            file_name: format!("{id}.fb2"),
            document_size: 100,
            has_cover: false,
            authors: vec![author.to_string()],
            translators: vec![],
            genres: vec![],
            sequences: vec![],
        }
    }

    async fn store(pool: &crate::db::DbPool, book: &NewBook) {
        let mut tx = pool.begin().await.unwrap();
        insert_book(&mut tx, book).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_book_inserts() {
        let pool = create_test_pool().await;
        let candidate = make_book("b1", "Title", "Doe John");
        let decision = decide(&pool, &PendingBatch::new(), &candidate)
            .await
            .unwrap();
        assert_eq!(decision, Decision::InsertNew);
    }

    #[tokio::test]
    async fn test_higher_version_replaces_stored() {
        let pool = create_test_pool().await;
        let mut old = make_book("b1", "Title", "Doe John");
        old.doc_version = 1.1;
        store(&pool, &old).await;

        let mut newer = make_book("b1", "Title", "Doe John");
        newer.doc_version = 1.2;
        newer.file_path = "other.fb2".to_string();
        let decision = decide(&pool, &PendingBatch::new(), &newer).await.unwrap();
        assert_eq!(decision, Decision::ReplaceStored("b1".to_string()));

        let mut lower = make_book("b1", "Title", "Doe John");
        lower.doc_version = 1.0;
        let decision = decide(&pool, &PendingBatch::new(), &lower).await.unwrap();
        assert_eq!(decision, Decision::Reject);
    }

    #[tokio::test]
    async fn test_version_tie_breaks_on_size() {
        let pool = create_test_pool().await;
        let old = make_book("b1", "Title", "Doe John");
        store(&pool, &old).await;

        let mut bigger = make_book("b1", "Title", "Doe John");
        bigger.document_size = 5000;
        let decision = decide(&pool, &PendingBatch::new(), &bigger).await.unwrap();
        assert_eq!(decision, Decision::ReplaceStored("b1".to_string()));

        let same = make_book("b1", "Title", "Doe John");
        let decision = decide(&pool, &PendingBatch::new(), &same).await.unwrap();
        assert_eq!(decision, Decision::Reject);
    }

    #[tokio::test]
    async fn test_title_author_key_detects_duplicates() {
        let pool = create_test_pool().await;
        let old = make_book("b1", "War  and Peace", "Tolstoy Leo");
        store(&pool, &old).await;

        let mut dup = make_book("b2", "war and peace", "Tolstoy Leo");
        dup.doc_version = 2.0;
        let decision = decide(&pool, &PendingBatch::new(), &dup).await.unwrap();
        assert_eq!(decision, Decision::ReplaceStored("b1".to_string()));
    }

    #[tokio::test]
    async fn test_epub_never_displaces_fb2() {
        let pool = create_test_pool().await;
        let fb2 = make_book("b1", "Title", "Doe John");
        store(&pool, &fb2).await;

        let mut epub = make_book("b1", "Title", "Doe John");
        epub.book_type = BookType::Epub;
        epub.doc_version = 9.0;
        let decision = decide(&pool, &PendingBatch::new(), &epub).await.unwrap();
        assert_eq!(decision, Decision::Reject);
    }

    #[tokio::test]
    async fn test_cross_format_title_collision_coexists() {
        let pool = create_test_pool().await;
        let fb2 = make_book("b1", "Title", "Doe John");
        store(&pool, &fb2).await;

        let mut epub = make_book("b2", "Title", "Doe John");
        epub.book_type = BookType::Epub;
        let decision = decide(&pool, &PendingBatch::new(), &epub).await.unwrap();
        assert_eq!(decision, Decision::InsertNew);
    }

    #[tokio::test]
    async fn test_archived_duplicate_rejected() {
        let pool = create_test_pool().await;
        let mut stored = make_book("b1", "Title", "Doe John");
        stored.file_path = "first.zip@book.fb2".to_string();
        stored.file_name = "book.fb2".to_string();
        store(&pool, &stored).await;

        let mut dup = make_book("b1", "Title", "Doe John");
        dup.file_path = "second.zip@book.fb2".to_string();
        dup.file_name = "book.fb2".to_string();
        dup.doc_version = 9.9;
        let decision = decide(&pool, &PendingBatch::new(), &dup).await.unwrap();
        assert_eq!(decision, Decision::Reject);
    }

    #[tokio::test]
    async fn test_pending_batch_visible_to_detector() {
        let pool = create_test_pool().await;
        let mut batch = PendingBatch::new();
        batch.push_insert(make_book("b1", "Title", "Doe John"));

        let twin = make_book("b1", "Title", "Doe John");
        let decision = decide(&pool, &batch, &twin).await.unwrap();
        assert_eq!(decision, Decision::Reject);

        let mut newer = make_book("b1", "Title", "Doe John");
        newer.doc_version = 2.0;
        let decision = decide(&pool, &batch, &newer).await.unwrap();
        assert_eq!(decision, Decision::ReplacePending(0));
    }
}
