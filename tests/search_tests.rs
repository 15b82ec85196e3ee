mod common;

use common::*;
use tempfile::tempdir;

#[tokio::test]
async fn test_cross_script_author_lookup() {
    let _guard = SCAN_MUTEX.lock().await;
    let lib = tempdir().unwrap();
    let covers = tempdir().unwrap();
    write_fb2(
        lib.path(),
        "idiot.fb2",
        "Идиот",
        "Фёдор Михайлович",
        "Достоевский",
        None,
        "1.0",
    );

    let state = test_state(test_config(lib.path(), covers.path())).await;
    scan(&state).await;
    let router = test_router(state);

    // A Latin query finds the Cyrillic author through the transliteration
    // stage, and the stage is reported in the feed.
    let (status, body) = get(&router, "/search?searchTerm=Dostoevsky&searchType=authors").await;
    assert_eq!(status, 200);
    assert!(body.contains("Достоевский Фёдор Михайлович"));
    assert!(body.contains("Matched via transliteration"));
}

#[tokio::test]
async fn test_search_disambiguation_when_both_match() {
    let _guard = SCAN_MUTEX.lock().await;
    let lib = tempdir().unwrap();
    let covers = tempdir().unwrap();
    // "Pushkin" is both an author name and part of a book title.
    write_fb2(
        lib.path(),
        "eo.fb2",
        "Евгений Онегин",
        "Александр",
        "Пушкин",
        None,
        "1.0",
    );
    write_fb2(
        lib.path(),
        "bio.fb2",
        "Pushkin: A Biography",
        "Henri",
        "Troyat",
        None,
        "1.0",
    );

    let state = test_state(test_config(lib.path(), covers.path())).await;
    scan(&state).await;
    let router = test_router(state);

    let (status, body) = get(&router, "/search?searchTerm=Pushkin").await;
    assert_eq!(status, 200);
    // Ampersands inside href attributes come out XML-escaped.
    assert!(body.contains("searchType=authors&amp;searchTerm=Pushkin"));
    assert!(body.contains("searchType=books&amp;searchTerm=Pushkin"));
    assert_eq!(body.matches("<entry>").count(), 2);
}

#[tokio::test]
async fn test_search_delegates_when_only_books_match() {
    let _guard = SCAN_MUTEX.lock().await;
    let lib = tempdir().unwrap();
    let covers = tempdir().unwrap();
    write_fb2(
        lib.path(),
        "w.fb2",
        "Winter Stories",
        "John",
        "Doe",
        None,
        "1.0",
    );

    let state = test_state(test_config(lib.path(), covers.path())).await;
    scan(&state).await;
    let router = test_router(state);

    let (status, body) = get(&router, "/search?searchTerm=Winter").await;
    assert_eq!(status, 200);
    assert!(body.contains("Winter Stories"));
    assert!(body.contains("tag:book:"));
}

#[tokio::test]
async fn test_search_by_title_with_translit_fallback() {
    let _guard = SCAN_MUTEX.lock().await;
    let lib = tempdir().unwrap();
    let covers = tempdir().unwrap();
    write_fb2(
        lib.path(),
        "war.fb2",
        "Война и мир",
        "Лев",
        "Толстой",
        None,
        "1.0",
    );

    let state = test_state(test_config(lib.path(), covers.path())).await;
    scan(&state).await;
    let router = test_router(state);

    let (status, body) = get(&router, "/search?searchTerm=vojjna&searchType=books").await;
    assert_eq!(status, 200);
    assert!(body.contains("Война и мир"));
}

#[tokio::test]
async fn test_search_no_results_is_empty_feed() {
    let lib = tempdir().unwrap();
    let covers = tempdir().unwrap();
    let state = test_state(test_config(lib.path(), covers.path())).await;
    let router = test_router(state);

    let (status, body) = get(&router, "/search?searchTerm=zzzz").await;
    assert_eq!(status, 200);
    assert!(body.contains("<feed"));
    assert!(!body.contains("<entry>"));
}

#[tokio::test]
async fn test_soundex_stage_catches_typos() {
    let _guard = SCAN_MUTEX.lock().await;
    let lib = tempdir().unwrap();
    let covers = tempdir().unwrap();
    write_fb2(lib.path(), "s.fb2", "Tales", "Jane", "Smith", None, "1.0");

    let state = test_state(test_config(lib.path(), covers.path())).await;
    scan(&state).await;
    let router = test_router(state);

    let (status, body) = get(&router, "/search?searchTerm=Smyth%20J&searchType=authors").await;
    assert_eq!(status, 200);
    assert!(body.contains("Smith Jane"));
    assert!(body.contains("Matched via soundex"));
}

#[tokio::test]
async fn test_authorsindex_grouping_above_threshold() {
    let _guard = SCAN_MUTEX.lock().await;
    let lib = tempdir().unwrap();
    let covers = tempdir().unwrap();
    // 120 authors sharing the "A" first letter, two per two-letter prefix.
    for i in 0..60 {
        let b = char::from(b'a' + (i % 26) as u8);
        for suffix in ["ley", "son"] {
            let last = format!("A{b}{suffix}{i}");
            write_fb2(
                lib.path(),
                &format!("{last}{suffix}.fb2"),
                &format!("Book by {last}"),
                "X",
                &last,
                None,
                "1.0",
            );
        }
    }

    let state = test_state(test_config(lib.path(), covers.path())).await;
    let stats = scan(&state).await;
    assert_eq!(stats.books_found, 120);
    let router = test_router(state);

    // Above the threshold: the index groups by the next letter rather than
    // listing every author.
    let (status, body) = get(&router, "/authorsindex").await;
    assert_eq!(status, 200);
    assert!(body.contains("/authorsindex/A"));
    assert!(!body.contains("/author-details/"));

    // Drilling one level down reaches the author leaves.
    let (status, body) = get(&router, "/authorsindex/Aa").await;
    assert_eq!(status, 200);
    assert!(body.contains("/author-details/"));
}
