use std::fs;
use std::io::{BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::models::{BookType, join_archive_path, split_archive_path};
use crate::db::queries::{authors, books, sequences};
use crate::parsers::{self, ParsedBook};
use crate::state::AppState;

use super::dedup::{self, Decision, PendingBatch, PendingOp};
use super::{ScanError, build_candidate};

/// Global scan lock — prevents overlapping scans.
static SCAN_LOCK: AtomicBool = AtomicBool::new(false);

/// Books written per transaction during a scan.
pub const BATCH_SIZE: usize = 500;

/// Returns `true` if a scan is currently in progress.
pub fn is_scanning() -> bool {
    SCAN_LOCK.load(Ordering::SeqCst)
}

/// Statistics collected during a scan run.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ScanStats {
    pub books_found: u64,
    pub skipped: u64,
    pub invalid: u64,
    pub duplicates: u64,
    pub replaced: u64,
    pub errors: u64,
}

/// Progress snapshot emitted to observers on each batch flush.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScanProgress {
    pub books_found: u64,
    pub skipped: u64,
    pub invalid: u64,
    pub duplicates: u64,
    pub elapsed_secs: f64,
    pub rate: f64,
}

impl ScanProgress {
    fn from_stats(stats: &ScanStats, started: Instant) -> Self {
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            stats.books_found as f64 / elapsed
        } else {
            0.0
        };
        Self {
            books_found: stats.books_found,
            skipped: stats.skipped,
            invalid: stats.invalid,
            duplicates: stats.duplicates,
            elapsed_secs: elapsed,
            rate,
        }
    }
}

/// Shared scanner handle: cooperative stop flag plus the progress channel
/// any front-end can subscribe to.
pub struct ScannerControl {
    stop: AtomicBool,
    progress: broadcast::Sender<ScanProgress>,
}

impl ScannerControl {
    pub fn new() -> Self {
        let (progress, _) = broadcast::channel(16);
        Self {
            stop: AtomicBool::new(false),
            progress,
        }
    }

    /// Request a cooperative stop. Idempotent: calling it while stopped is
    /// a no-op.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn clear_stop(&self) {
        self.stop.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgress> {
        self.progress.subscribe()
    }

    fn emit(&self, progress: ScanProgress) {
        let _ = self.progress.send(progress);
    }
}

impl Default for ScannerControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a full scan of the library directory.
pub async fn run_scan(state: &AppState) -> Result<ScanStats, ScanError> {
    if SCAN_LOCK
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ScanError::AlreadyRunning);
    }

    state.scanner.clear_stop();
    let result = do_scan(state).await;

    SCAN_LOCK.store(false, Ordering::SeqCst);
    result
}

async fn do_scan(state: &AppState) -> Result<ScanStats, ScanError> {
    let root = state.config.library.path.clone();
    info!("Starting library scan: {}", root.display());

    let started = Instant::now();
    let mut stats = ScanStats::default();
    let mut batch = PendingBatch::new();

    let walk_root = root.clone();
    let entries = tokio::task::spawn_blocking(move || collect_entries(&walk_root))
        .await
        .map_err(|e| ScanError::Internal(e.to_string()))??;
    info!("Found {} entries to process", entries.len());

    for entry in entries {
        if state.scanner.stop_requested() {
            info!("Scan stopped by request");
            break;
        }

        let result = match &entry {
            ScanEntry::File {
                path,
                rel_path,
                file_name,
                book_type,
                size,
            } => {
                process_file(
                    state, &mut batch, &mut stats, path, rel_path, file_name, *book_type, *size,
                )
                .await
            }
            ScanEntry::Zip { path, rel_path } => {
                process_zip(state, &mut batch, &mut stats, path, rel_path, started).await
            }
        };
        if let Err(e) = result {
            debug!("Error processing {:?}: {e}", entry.path());
            stats.errors += 1;
        }

        if batch.len() >= BATCH_SIZE {
            flush_batch(state, &mut batch, &mut stats, started).await;
        }
    }

    flush_batch(state, &mut batch, &mut stats, started).await;

    info!(
        "Scan complete: found={}, skipped={}, invalid={}, duplicates={}, replaced={}, errors={}",
        stats.books_found,
        stats.skipped,
        stats.invalid,
        stats.duplicates,
        stats.replaced,
        stats.errors
    );

    Ok(stats)
}

/// Entries discovered during the filesystem walk.
enum ScanEntry {
    File {
        path: PathBuf,
        rel_path: String,
        file_name: String,
        book_type: BookType,
        size: i64,
    },
    Zip {
        path: PathBuf,
        rel_path: String,
    },
}

impl ScanEntry {
    fn path(&self) -> &Path {
        match self {
            ScanEntry::File { path, .. } => path,
            ScanEntry::Zip { path, .. } => path,
        }
    }
}

fn collect_entries(root: &Path) -> Result<Vec<ScanEntry>, ScanError> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(true).into_iter().flatten() {
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = match entry.path().extension() {
            Some(e) => e.to_string_lossy().to_lowercase(),
            None => continue,
        };

        let rel = rel_path(root, entry.path());
        if ext == "zip" {
            entries.push(ScanEntry::Zip {
                path: entry.path().to_path_buf(),
                rel_path: rel,
            });
        } else if let Some(book_type) = BookType::from_extension(&ext) {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let size = entry.metadata().map(|m| m.len() as i64).unwrap_or(0);
            entries.push(ScanEntry::File {
                path: entry.path().to_path_buf(),
                rel_path: rel,
                file_name,
                book_type,
                size,
            });
        }
    }

    Ok(entries)
}

/// Process a single book file on disk.
#[allow(clippy::too_many_arguments)]
async fn process_file(
    state: &AppState,
    batch: &mut PendingBatch,
    stats: &mut ScanStats,
    path: &Path,
    rel_path: &str,
    file_name: &str,
    book_type: BookType,
    size: i64,
) -> Result<(), ScanError> {
    if books::path_exists(&state.db, rel_path).await? {
        stats.skipped += 1;
        return Ok(());
    }

    let parsed = {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || parse_file(&path, book_type))
            .await
            .map_err(|e| ScanError::Internal(e.to_string()))?
    };
    let parsed = match parsed {
        Ok(p) => p,
        Err(e) => {
            count_invalid(stats, rel_path, &e);
            return Ok(());
        }
    };

    // An in-progress parse may finish after a stop request; its result is
    // discarded.
    if state.scanner.stop_requested() {
        return Ok(());
    }

    enqueue_candidate(state, batch, stats, parsed, rel_path, file_name, book_type, size).await
}

/// Process a ZIP archive containing book files.
async fn process_zip(
    state: &AppState,
    batch: &mut PendingBatch,
    stats: &mut ScanStats,
    zip_path: &Path,
    rel_zip: &str,
    started: Instant,
) -> Result<(), ScanError> {
    let zip_entries = {
        let path = zip_path.to_path_buf();
        tokio::task::spawn_blocking(move || read_zip_entries(&path))
            .await
            .map_err(|e| ScanError::Internal(e.to_string()))??
    };

    for ze in zip_entries {
        if state.scanner.stop_requested() {
            break;
        }

        let composite = join_archive_path(rel_zip, &ze.inner_path);
        if books::path_exists(&state.db, &composite).await? {
            stats.skipped += 1;
            continue;
        }

        let parsed = {
            let data = ze.data;
            let book_type = ze.book_type;
            tokio::task::spawn_blocking(move || parse_bytes(&data, book_type))
                .await
                .map_err(|e| ScanError::Internal(e.to_string()))?
        };
        let parsed = match parsed {
            Ok(p) => p,
            Err(e) => {
                count_invalid(stats, &composite, &e);
                continue;
            }
        };

        if state.scanner.stop_requested() {
            break;
        }

        enqueue_candidate(
            state,
            batch,
            stats,
            parsed,
            &composite,
            &ze.file_name,
            ze.book_type,
            ze.size,
        )
        .await?;

        if batch.len() >= BATCH_SIZE {
            flush_batch(state, batch, stats, started).await;
        }
    }

    Ok(())
}

fn count_invalid(stats: &mut ScanStats, path: &str, error: &ScanError) {
    match error {
        ScanError::Io(e) => warn!("I/O error reading {path}: {e}"),
        _ => debug!("Invalid book {path}: {error}"),
    }
    stats.invalid += 1;
}

/// Run duplicate detection and queue the resulting write.
#[allow(clippy::too_many_arguments)]
async fn enqueue_candidate(
    state: &AppState,
    batch: &mut PendingBatch,
    stats: &mut ScanStats,
    parsed: ParsedBook,
    rel_path: &str,
    file_name: &str,
    book_type: BookType,
    size: i64,
) -> Result<(), ScanError> {
    let candidate = build_candidate(
        parsed,
        rel_path,
        file_name,
        book_type,
        size,
        &state.aliases,
        &state.genres,
        state.config.opds.use_authors_aliases,
    );

    match dedup::decide(&state.db, batch, &candidate).await? {
        Decision::InsertNew => {
            batch.push_insert(candidate);
            stats.books_found += 1;
        }
        Decision::ReplaceStored(old_id) => {
            batch.push_replace(old_id, candidate);
            stats.books_found += 1;
            stats.replaced += 1;
        }
        Decision::ReplacePending(index) => {
            batch.replace_at(index, candidate);
            stats.replaced += 1;
        }
        Decision::Reject => {
            stats.duplicates += 1;
        }
    }
    Ok(())
}

/// Write all queued ops in one transaction, then publish progress.
/// A store failure rolls the whole batch back; the scan continues.
async fn flush_batch(
    state: &AppState,
    batch: &mut PendingBatch,
    stats: &mut ScanStats,
    started: Instant,
) {
    let ops = batch.take_ops();
    if ops.is_empty() {
        return;
    }

    if let Err(e) = write_ops(state, &ops).await {
        tracing::error!("Batch write failed, {} books dropped: {e}", ops.len());
        stats.errors += 1;
    }

    state.stats.invalidate().await;
    state
        .scanner
        .emit(ScanProgress::from_stats(stats, started));
}

async fn write_ops(state: &AppState, ops: &[PendingOp]) -> Result<(), sqlx::Error> {
    let mut tx = state.db.begin().await?;
    for op in ops {
        match op {
            PendingOp::Insert(book) => super::insert_book(&mut tx, book).await?,
            PendingOp::Replace { old_id, book } => {
                super::replace_book(&mut tx, old_id, book).await?
            }
        }
    }
    tx.commit().await
}

/// Parse a book file from disk.
pub fn parse_file(path: &Path, book_type: BookType) -> Result<ParsedBook, ScanError> {
    match book_type {
        BookType::Fb2 => {
            let file = fs::File::open(path)?;
            parsers::fb2::parse(BufReader::new(file)).map_err(|e| ScanError::Parse(e.to_string()))
        }
        BookType::Epub => {
            let file = fs::File::open(path)?;
            parsers::epub::parse(file).map_err(|e| ScanError::Parse(e.to_string()))
        }
    }
}

/// Parse book metadata from in-memory bytes (archive entries).
pub fn parse_bytes(data: &[u8], book_type: BookType) -> Result<ParsedBook, ScanError> {
    match book_type {
        BookType::Fb2 => parsers::fb2::parse(BufReader::new(Cursor::new(data)))
            .map_err(|e| ScanError::Parse(e.to_string())),
        BookType::Epub => {
            parsers::epub::parse(Cursor::new(data)).map_err(|e| ScanError::Parse(e.to_string()))
        }
    }
}

struct ZipBookEntry {
    inner_path: String,
    file_name: String,
    book_type: BookType,
    size: i64,
    data: Vec<u8>,
}

/// Read all book files from a ZIP archive into memory.
fn read_zip_entries(path: &Path) -> Result<Vec<ZipBookEntry>, ScanError> {
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let mut entry = match archive.by_index(i) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        let ext = Path::new(&name)
            .extension()
            .unwrap_or_default()
            .to_string_lossy()
            .to_lowercase();
        let Some(book_type) = BookType::from_extension(&ext) else {
            continue;
        };

        let size = entry.size() as i64;
        let file_name = Path::new(&name)
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();

        let mut data = Vec::new();
        if let Err(e) = std::io::Read::read_to_end(&mut entry, &mut data) {
            warn!("Failed to read {name} from ZIP: {e}");
            continue;
        }

        entries.push(ZipBookEntry {
            inner_path: name,
            file_name,
            book_type,
            size,
            data,
        });
    }

    Ok(entries)
}

/// Ingest one path incrementally (watcher add events). Handles plain book
/// files and whole archives.
pub async fn ingest_path(state: &AppState, path: &Path) -> Result<ScanStats, ScanError> {
    let root = &state.config.library.path;
    let rel = rel_path(root, path);
    let started = Instant::now();
    let mut stats = ScanStats::default();
    let mut batch = PendingBatch::new();

    let ext = path
        .extension()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase();

    if ext == "zip" {
        process_zip(state, &mut batch, &mut stats, path, &rel, started).await?;
    } else if let Some(book_type) = BookType::from_extension(&ext) {
        let file_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let size = fs::metadata(path).map(|m| m.len() as i64).unwrap_or(0);
        process_file(
            state, &mut batch, &mut stats, path, &rel, &file_name, book_type, size,
        )
        .await?;
    }

    flush_batch(state, &mut batch, &mut stats, started).await;
    Ok(stats)
}

/// Delete every book whose path maps to the given filesystem path (a plain
/// file or a whole archive). Used by the watcher delete queue.
pub async fn remove_path(state: &AppState, path: &Path) -> Result<u64, ScanError> {
    let root = &state.config.library.path;
    let rel = rel_path(root, path);

    let mut tx = state.db.begin().await?;
    let mut removed = books::delete_by_file_path(&mut tx, &rel).await?;
    removed += books::delete_by_archive(&mut tx, &rel).await?;
    if removed > 0 {
        authors::delete_orphans(&mut tx).await?;
        sequences::delete_orphans(&mut tx).await?;
    }
    tx.commit().await?;

    if removed > 0 {
        state.stats.invalidate().await;
        info!("Removed {removed} books for {}", rel);
    }
    Ok(removed)
}

/// Operator-invoked sweep: delete rows whose backing file (or archive) no
/// longer exists on disk.
pub async fn remove_missing(state: &AppState) -> Result<u64, ScanError> {
    let root = state.config.library.path.clone();
    let paths = books::all_paths(&state.db).await?;

    let missing: Vec<String> = tokio::task::spawn_blocking(move || {
        paths
            .into_iter()
            .filter(|(_, file_path)| {
                let on_disk = match split_archive_path(file_path) {
                    Some((archive, _)) => root.join(archive).exists(),
                    None => root.join(file_path).exists(),
                };
                !on_disk
            })
            .map(|(id, _)| id)
            .collect()
    })
    .await
    .map_err(|e| ScanError::Internal(e.to_string()))?;

    if missing.is_empty() {
        return Ok(0);
    }

    let mut tx = state.db.begin().await?;
    let mut removed = 0;
    for id in &missing {
        removed += books::delete(&mut tx, id).await?;
    }
    authors::delete_orphans(&mut tx).await?;
    sequences::delete_orphans(&mut tx).await?;
    tx.commit().await?;

    state.stats.invalidate().await;
    info!("Removed {removed} books with missing files");
    Ok(removed)
}

fn rel_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
