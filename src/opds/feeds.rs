use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{SecondsFormat, Utc};

use crate::config::structure;
use crate::db::models::{Book, Genre};
use crate::db::queries::{authors, books, downloads, sequences};
use crate::search::{self, SearchStage, sort::SortOrder};
use crate::state::AppState;

use super::xml::{self, FeedBuilder};

/// Books and index items per page.
pub const PAGE_SIZE: i64 = 100;

/// Alphabet navigation switches to grouping above this many names.
pub const GROUP_THRESHOLD: usize = 100;

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn enc(s: &str) -> String {
    urlencoding::encode(s).to_string()
}

fn atom_response(body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, xml::ATOM_XML)],
        body,
    )
        .into_response()
}

fn xml_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "XML error").into_response()
}

/// Begin a feed with the fixed link set every catalog page carries.
fn begin(state: &AppState, id: &str, title: &str, subtitle: &str, self_href: &str) -> FeedBuilder {
    let prefix = state.config.route_prefix();
    let mut fb = FeedBuilder::new();
    let _ = fb.begin_feed(
        id,
        title,
        subtitle,
        &now(),
        self_href,
        &format!("{prefix}/"),
    );
    let _ = fb.write_search_links(
        &format!("{prefix}/opensearch.xml"),
        &format!("{prefix}/search?searchTerm={{searchTerms}}"),
    );
    fb
}

/// Unknown ids, genres and sequences answer 404 with an empty feed.
fn not_found_feed(state: &AppState, title: &str, self_href: &str) -> Response {
    let fb = begin(state, "tag:notfound", title, "", self_href);
    match fb.finish() {
        Ok(body) => (
            StatusCode::NOT_FOUND,
            [(header::CONTENT_TYPE, xml::ATOM_XML)],
            body,
        )
            .into_response(),
        Err(_) => xml_error(),
    }
}

#[derive(serde::Deserialize, Default)]
pub struct PageQuery {
    #[serde(rename = "pageNumber")]
    pub page_number: Option<i64>,
}

impl PageQuery {
    fn page(&self) -> i64 {
        self.page_number.unwrap_or(0).max(0)
    }
}

#[derive(serde::Deserialize, Default)]
pub struct SearchQuery {
    #[serde(rename = "searchTerm", default)]
    pub search_term: String,
    #[serde(rename = "searchType")]
    pub search_type: Option<String>,
    #[serde(rename = "pageNumber")]
    pub page_number: Option<i64>,
}

fn page_href(base: &str, page: i64) -> String {
    let sep = if base.contains('?') { '&' } else { '?' };
    format!("{base}{sep}pageNumber={page}")
}

/// Pagination links: first always, previous when beyond the first page,
/// next when the current page came back full.
fn write_page_links(fb: &mut FeedBuilder, base: &str, page: i64, returned: usize) {
    if page == 0 && (returned as i64) < PAGE_SIZE {
        return; // single page, no pagination block
    }
    let first = page_href(base, 0);
    let prev = (page > 0).then(|| page_href(base, page - 1));
    let next = (returned as i64 >= PAGE_SIZE).then(|| page_href(base, page + 1));
    let _ = fb.write_pagination(Some(first.as_str()), prev.as_deref(), next.as_deref());
}

fn sort_order(state: &AppState) -> SortOrder {
    state.config.opds.sort_order
}

/// GET / — root catalog: counts plus one entry per enabled section.
pub async fn root(State(state): State<AppState>) -> Response {
    let prefix = state.config.route_prefix();
    let totals = state.stats.totals(&state.db).await.unwrap_or_default();
    let new_count = state
        .stats
        .new_books_count(&state.db, &state.new_books_cutoff())
        .await
        .unwrap_or(0);

    let mut fb = begin(
        &state,
        "tag:root",
        &state.config.server.name,
        &format!("{} books in the library", totals.books),
        &format!("{prefix}/"),
    );

    let days = state.config.new_books_days();
    if state.config.structure_has(structure::NEW_DATE) {
        let _ = fb.write_nav_entry(
            "tag:root:newdate",
            "New books (by date)",
            &format!("{prefix}/newdate"),
            &format!("{new_count} books added over the last {days} days"),
            &now(),
        );
    }
    if state.config.structure_has(structure::NEW_TITLE) {
        let _ = fb.write_nav_entry(
            "tag:root:newtitle",
            "New books (alphabetical)",
            &format!("{prefix}/newtitle"),
            &format!("{new_count} books added over the last {days} days"),
            &now(),
        );
    }
    if state.config.structure_has(structure::AUTHORS) {
        let _ = fb.write_nav_entry(
            "tag:root:authors",
            "By authors",
            &format!("{prefix}/authorsindex"),
            &format!("{} authors", totals.authors),
            &now(),
        );
    }
    if state.config.structure_has(structure::SEQUENCES) {
        let _ = fb.write_nav_entry(
            "tag:root:sequences",
            "By series",
            &format!("{prefix}/sequencesindex"),
            &format!("{} series", totals.sequences),
            &now(),
        );
    }
    if state.config.structure_has(structure::GENRES) {
        let _ = fb.write_nav_entry(
            "tag:root:genres",
            "By genres",
            &format!("{prefix}/genres"),
            "Books by genre taxonomy",
            &now(),
        );
    }
    if state.config.structure_has(structure::DOWNSTAT) {
        let _ = fb.write_nav_entry(
            "tag:root:downstat",
            "Downloaded books",
            &format!("{prefix}/downstat/date"),
            &format!("{} unique downloads", totals.unique_downloads),
            &now(),
        );
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /newdate — new books, newest first.
pub async fn new_by_date(State(state): State<AppState>, Query(q): Query<PageQuery>) -> Response {
    new_books_feed(&state, q.page(), true).await
}

/// GET /newtitle — new books, alphabetical.
pub async fn new_by_title(State(state): State<AppState>, Query(q): Query<PageQuery>) -> Response {
    new_books_feed(&state, q.page(), false).await
}

async fn new_books_feed(state: &AppState, page: i64, by_date: bool) -> Response {
    let prefix = state.config.route_prefix();
    let cutoff = state.new_books_cutoff();
    let offset = page * PAGE_SIZE;
    let book_list = if by_date {
        books::recent_by_date(&state.db, &cutoff, PAGE_SIZE, offset).await
    } else {
        books::recent_by_title(&state.db, &cutoff, PAGE_SIZE, offset).await
    }
    .unwrap_or_default();

    let route = if by_date { "newdate" } else { "newtitle" };
    let base = format!("{prefix}/{route}");
    let mut fb = begin(
        state,
        &format!("tag:{route}:{page}"),
        "New books",
        "",
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, book_list.len());
    for book in &book_list {
        write_book_entry(&mut fb, state, book).await;
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /authorsindex and /authorsindex/{prefix} — alphabet navigation.
pub async fn authors_index_root(State(state): State<AppState>) -> Response {
    alphabet_index(&state, IndexKind::Authors, String::new()).await
}

pub async fn authors_index(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Response {
    alphabet_index(&state, IndexKind::Authors, prefix).await
}

/// GET /sequencesindex and /sequencesindex/{prefix}.
pub async fn sequences_index_root(State(state): State<AppState>) -> Response {
    alphabet_index(&state, IndexKind::Sequences, String::new()).await
}

pub async fn sequences_index(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Response {
    alphabet_index(&state, IndexKind::Sequences, prefix).await
}

#[derive(Clone, Copy, PartialEq)]
enum IndexKind {
    Authors,
    Sequences,
}

impl IndexKind {
    fn route(&self) -> &'static str {
        match self {
            IndexKind::Authors => "authorsindex",
            IndexKind::Sequences => "sequencesindex",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            IndexKind::Authors => "Authors",
            IndexKind::Sequences => "Series",
        }
    }
}

/// Group a level of the alphabet index. Returns `(groups, singles)`:
/// groups are `(extended_prefix, count)` where the next character is a
/// letter shared by at least two names; everything else lists directly.
fn split_level(names: &[String], prefix_len: usize) -> (Vec<(String, usize)>, Vec<String>) {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    let mut singles: Vec<String> = Vec::new();

    for name in names {
        let chars: Vec<char> = name.chars().collect();
        if chars.len() <= prefix_len {
            singles.push(name.clone());
            continue;
        }
        let next = chars[prefix_len];
        if !next.is_alphabetic() {
            singles.push(name.clone());
            continue;
        }
        let key: String = chars[..=prefix_len].iter().collect();
        let folded = key.to_lowercase();
        match groups
            .iter_mut()
            .find(|(existing, _)| existing.to_lowercase() == folded)
        {
            Some((_, members)) => members.push(name.clone()),
            None => groups.push((key, vec![name.clone()])),
        }
    }

    let mut grouped = Vec::new();
    for (key, members) in groups {
        if members.len() >= 2 {
            grouped.push((key, members.len()));
        } else {
            singles.extend(members);
        }
    }
    (grouped, singles)
}

async fn alphabet_index(state: &AppState, kind: IndexKind, prefix: String) -> Response {
    let route_prefix = state.config.route_prefix();
    let order = sort_order(state);
    let all_names = match kind {
        IndexKind::Authors => state.stats.authors_list(&state.db, order).await,
        IndexKind::Sequences => state.stats.sequences_list(&state.db, order).await,
    }
    .unwrap_or_default();

    let folded_prefix = prefix.to_lowercase();
    let at_level: Vec<String> = all_names
        .iter()
        .filter(|name| name.to_lowercase().starts_with(&folded_prefix))
        .cloned()
        .collect();

    let self_href = if prefix.is_empty() {
        format!("{route_prefix}/{}", kind.route())
    } else {
        format!("{route_prefix}/{}/{}", kind.route(), enc(&prefix))
    };
    let mut fb = begin(
        state,
        &format!("tag:{}:{prefix}", kind.route()),
        kind.title(),
        "",
        &self_href,
    );

    if at_level.len() > GROUP_THRESHOLD {
        let (groups, singles) = split_level(&at_level, prefix.chars().count());
        for (group_prefix, count) in &groups {
            let _ = fb.write_nav_entry(
                &format!("tag:{}:{group_prefix}", kind.route()),
                group_prefix,
                &format!("{route_prefix}/{}/{}", kind.route(), enc(group_prefix)),
                &format!("{count} {}", kind.title().to_lowercase()),
                &now(),
            );
        }
        for name in &singles {
            write_index_leaf(&mut fb, state, kind, name).await;
        }
    } else {
        for name in &at_level {
            write_index_leaf(&mut fb, state, kind, name).await;
        }
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

async fn write_index_leaf(fb: &mut FeedBuilder, state: &AppState, kind: IndexKind, name: &str) {
    let route_prefix = state.config.route_prefix();
    match kind {
        IndexKind::Authors => {
            let count = authors::book_count(&state.db, name).await.unwrap_or(0);
            let _ = fb.write_nav_entry(
                &format!("tag:author:{name}"),
                name,
                &format!("{route_prefix}/author-details/{}", enc(name)),
                &format!("{count} books"),
                &now(),
            );
        }
        IndexKind::Sequences => {
            let count = sequences::book_count(&state.db, name).await.unwrap_or(0);
            let _ = fb.write_nav_entry(
                &format!("tag:sequence:{name}"),
                name,
                &format!("{route_prefix}/sequence/{}", enc(name)),
                &format!("{count} books"),
                &now(),
            );
        }
    }
}

/// GET /author-details/{name} — intermediate page or redirect, depending
/// on what kinds of books the author has.
pub async fn author_details(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let prefix = state.config.route_prefix();
    if !authors::exists(&state.db, &name).await.unwrap_or(false) {
        return not_found_feed(
            &state,
            &name,
            &format!("{prefix}/author-details/{}", enc(&name)),
        );
    }

    let with_seq = books::count_by_author_with_sequence(&state.db, &name)
        .await
        .unwrap_or(0);
    let without_seq = books::count_by_author_without_sequence(&state.db, &name)
        .await
        .unwrap_or(0);

    if with_seq == 0 || without_seq == 0 {
        let view = if state.config.opds.prefer_date_views {
            "author-by-date"
        } else {
            "author-alphabetic"
        };
        return Redirect::to(&format!("{prefix}/{view}/{}", enc(&name))).into_response();
    }

    let encoded = enc(&name);
    let mut fb = begin(
        &state,
        &format!("tag:author:{name}"),
        &name,
        "",
        &format!("{prefix}/author-details/{encoded}"),
    );
    let entries = [
        (
            "series",
            "Books by series",
            format!("{prefix}/author-series/{encoded}"),
            format!("{with_seq} books in series"),
        ),
        (
            "no-series",
            "Books outside series",
            format!("{prefix}/author-no-series/{encoded}"),
            format!("{without_seq} books without series"),
        ),
        (
            "alphabetic",
            "All books alphabetically",
            format!("{prefix}/author-alphabetic/{encoded}"),
            String::new(),
        ),
        (
            "by-date",
            "All books by date",
            format!("{prefix}/author-by-date/{encoded}"),
            String::new(),
        ),
    ];
    for (key, title, href, content) in &entries {
        let _ = fb.write_nav_entry(
            &format!("tag:author:{name}:{key}"),
            title,
            href,
            content,
            &now(),
        );
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /author-series/{name} — the author's sequences.
pub async fn author_series(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let prefix = state.config.route_prefix();
    let series = sequences::for_author(&state.db, &name)
        .await
        .unwrap_or_default();

    let mut fb = begin(
        &state,
        &format!("tag:author:{name}:series"),
        &format!("{name} — series"),
        "",
        &format!("{prefix}/author-series/{}", enc(&name)),
    );
    for (sequence_name, count) in &series {
        let _ = fb.write_nav_entry(
            &format!("tag:author:{name}:series:{sequence_name}"),
            sequence_name,
            &format!(
                "{prefix}/author-sequence/{}/{}",
                enc(&name),
                enc(sequence_name)
            ),
            &format!("{count} books"),
            &now(),
        );
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /author-no-series/{name}.
pub async fn author_no_series(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
) -> Response {
    let page = q.page();
    let book_list = books::by_author_without_sequence(
        &state.db,
        &name,
        PAGE_SIZE,
        page * PAGE_SIZE,
    )
    .await
    .unwrap_or_default();
    author_books_feed(&state, &name, "author-no-series", page, book_list).await
}

/// GET /author-alphabetic/{name}.
pub async fn author_alphabetic(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
) -> Response {
    let page = q.page();
    let book_list = books::by_author_alphabetic(&state.db, &name, PAGE_SIZE, page * PAGE_SIZE)
        .await
        .unwrap_or_default();
    author_books_feed(&state, &name, "author-alphabetic", page, book_list).await
}

/// GET /author-by-date/{name}.
pub async fn author_by_date(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
) -> Response {
    let page = q.page();
    let book_list = books::by_author_by_date(&state.db, &name, PAGE_SIZE, page * PAGE_SIZE)
        .await
        .unwrap_or_default();
    author_books_feed(&state, &name, "author-by-date", page, book_list).await
}

async fn author_books_feed(
    state: &AppState,
    name: &str,
    route: &str,
    page: i64,
    book_list: Vec<Book>,
) -> Response {
    let prefix = state.config.route_prefix();
    let base = format!("{prefix}/{route}/{}", enc(name));
    let mut fb = begin(
        state,
        &format!("tag:{route}:{name}:{page}"),
        name,
        "",
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, book_list.len());
    for book in &book_list {
        write_book_entry(&mut fb, state, book).await;
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /author-sequence/{name}/{sequence} — intersection view.
pub async fn author_sequence(
    State(state): State<AppState>,
    Path((name, sequence)): Path<(String, String)>,
    Query(q): Query<PageQuery>,
) -> Response {
    let prefix = state.config.route_prefix();
    let page = q.page();
    let book_list = books::by_author_in_sequence(
        &state.db,
        &name,
        &sequence,
        PAGE_SIZE,
        page * PAGE_SIZE,
    )
    .await
    .unwrap_or_default();

    let base = format!("{prefix}/author-sequence/{}/{}", enc(&name), enc(&sequence));
    let mut fb = begin(
        &state,
        &format!("tag:author-sequence:{name}:{sequence}:{page}"),
        &format!("{name} — {sequence}"),
        "",
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, book_list.len());
    for book in &book_list {
        write_book_entry(&mut fb, &state, book).await;
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /sequence/{name} — books of one series, in series order.
pub async fn sequence_books(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<PageQuery>,
) -> Response {
    let prefix = state.config.route_prefix();
    if sequences::find_by_name(&state.db, &name)
        .await
        .unwrap_or(None)
        .is_none()
    {
        return not_found_feed(&state, &name, &format!("{prefix}/sequence/{}", enc(&name)));
    }

    let page = q.page();
    let book_list = books::by_sequence(&state.db, &name, PAGE_SIZE, page * PAGE_SIZE)
        .await
        .unwrap_or_default();

    let base = format!("{prefix}/sequence/{}", enc(&name));
    let mut fb = begin(
        &state,
        &format!("tag:sequence:{name}:{page}"),
        &name,
        "",
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, book_list.len());
    for book in &book_list {
        write_book_entry(&mut fb, &state, book).await;
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /genres — top level of the two-level taxonomy; only genres that
/// actually have books appear.
pub async fn genres_root(State(state): State<AppState>) -> Response {
    let prefix = state.config.route_prefix();
    let counted = state.stats.genre_counts(&state.db).await.unwrap_or_default();

    // Aggregate under the main genre: a child counts toward its parent,
    // a parentless tag is its own main genre.
    let mut mains: Vec<(String, String, i64)> = Vec::new();
    for (genre, count) in counted.iter() {
        let main_tag = genre.parent_tag.clone().unwrap_or_else(|| genre.tag.clone());
        let label = main_label(&state, &counted, &main_tag);
        match mains.iter_mut().find(|(tag, _, _)| *tag == main_tag) {
            Some((_, _, total)) => *total += count,
            None => mains.push((main_tag, label, *count)),
        }
    }
    mains.sort_by(|a, b| a.1.cmp(&b.1));

    let mut fb = begin(
        &state,
        "tag:genres",
        "Genres",
        "",
        &format!("{prefix}/genres"),
    );
    for (tag, label, count) in &mains {
        let _ = fb.write_nav_entry(
            &format!("tag:genres:{tag}"),
            label,
            &format!("{prefix}/genres/{}", enc(tag)),
            &format!("{count} books"),
            &now(),
        );
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

fn main_label(state: &AppState, counted: &[(Genre, i64)], main_tag: &str) -> String {
    let language = &state.config.server.language;
    if let Some((genre, _)) = counted.iter().find(|(g, _)| g.tag == main_tag) {
        return genre.label(language).to_string();
    }
    // Parent has no direct books; its label comes from the taxonomy.
    crate::db::queries::genres::embedded_taxonomy()
        .into_iter()
        .find(|g| g.tag == main_tag)
        .map(|g| g.label(language).to_string())
        .unwrap_or_else(|| main_tag.to_string())
}

/// GET /genres/{main} — subgenres of one main genre.
pub async fn genres_section(
    State(state): State<AppState>,
    Path(main_tag): Path<String>,
) -> Response {
    let prefix = state.config.route_prefix();
    let language = state.config.server.language.clone();
    let counted = state.stats.genre_counts(&state.db).await.unwrap_or_default();

    let children: Vec<(&Genre, i64)> = counted
        .iter()
        .filter(|(g, _)| g.parent_tag.as_deref() == Some(main_tag.as_str()) || g.tag == main_tag)
        .map(|(g, c)| (g, *c))
        .collect();

    if children.is_empty() {
        return not_found_feed(
            &state,
            &main_tag,
            &format!("{prefix}/genres/{}", enc(&main_tag)),
        );
    }

    let title = main_label(&state, &counted, &main_tag);
    let mut fb = begin(
        &state,
        &format!("tag:genres:{main_tag}"),
        &title,
        "",
        &format!("{prefix}/genres/{}", enc(&main_tag)),
    );
    for (genre, count) in &children {
        let _ = fb.write_nav_entry(
            &format!("tag:genre:{}", genre.tag),
            genre.label(&language),
            &format!("{prefix}/genre/{}", enc(&genre.tag)),
            &format!("{count} books"),
            &now(),
        );
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /genre/{tag} — books carrying one genre tag.
pub async fn genre_books(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(q): Query<PageQuery>,
) -> Response {
    let prefix = state.config.route_prefix();
    let page = q.page();
    let book_list = books::by_genre(&state.db, &tag, PAGE_SIZE, page * PAGE_SIZE)
        .await
        .unwrap_or_default();

    if book_list.is_empty() && page == 0 {
        return not_found_feed(&state, &tag, &format!("{prefix}/genre/{}", enc(&tag)));
    }

    let title = crate::db::queries::genres::get_by_tag(&state.db, &tag)
        .await
        .ok()
        .flatten()
        .map(|g| g.label(&state.config.server.language).to_string())
        .unwrap_or_else(|| tag.clone());

    let base = format!("{prefix}/genre/{}", enc(&tag));
    let mut fb = begin(
        &state,
        &format!("tag:genre:{tag}:{page}"),
        &title,
        "",
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, book_list.len());
    for book in &book_list {
        write_book_entry(&mut fb, &state, book).await;
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /search?searchTerm=...&searchType=authors|books
///
/// Without a type, both catalogs are probed; when both match, a two-entry
/// disambiguation feed lets the client choose.
pub async fn open_search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Response {
    let term = q.search_term.trim().to_string();
    let page = q.page_number.unwrap_or(0).max(0);
    let order = sort_order(&state);

    match q.search_type.as_deref() {
        Some("authors") => author_search_feed(&state, &term, page, order).await,
        Some("books") => book_search_feed(&state, &term, page, order).await,
        _ => {
            let (author_hits, _) =
                search::authors_open_search(&state.db, &state.stats, &term, order)
                    .await
                    .unwrap_or((Vec::new(), None));
            let book_hits = search::titles_open_search(&state.db, &term, order, PAGE_SIZE)
                .await
                .unwrap_or_default();

            match (author_hits.is_empty(), book_hits.is_empty()) {
                (false, false) => disambiguation_feed(&state, &term, author_hits.len(), book_hits.len()),
                (false, true) => author_search_feed(&state, &term, page, order).await,
                (true, false) => book_search_feed(&state, &term, page, order).await,
                (true, true) => {
                    let prefix = state.config.route_prefix();
                    let fb = begin(
                        &state,
                        &format!("tag:search:{term}"),
                        &format!("No results for {term}"),
                        "",
                        &format!("{prefix}/search?searchTerm={}", enc(&term)),
                    );
                    match fb.finish() {
                        Ok(body) => atom_response(body),
                        Err(_) => xml_error(),
                    }
                }
            }
        }
    }
}

fn disambiguation_feed(
    state: &AppState,
    term: &str,
    author_count: usize,
    book_count: usize,
) -> Response {
    let prefix = state.config.route_prefix();
    let encoded = enc(term);
    let mut fb = begin(
        state,
        &format!("tag:search:{term}"),
        &format!("Search: {term}"),
        "",
        &format!("{prefix}/search?searchTerm={encoded}"),
    );
    let _ = fb.write_nav_entry(
        "tag:search:authors",
        "Search in authors",
        &format!("{prefix}/search?searchType=authors&searchTerm={encoded}"),
        &format!("{author_count} authors found"),
        &now(),
    );
    let _ = fb.write_nav_entry(
        "tag:search:books",
        "Search in books",
        &format!("{prefix}/search?searchType=books&searchTerm={encoded}"),
        &format!("{book_count} books found"),
        &now(),
    );
    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

async fn author_search_feed(
    state: &AppState,
    term: &str,
    page: i64,
    order: SortOrder,
) -> Response {
    let prefix = state.config.route_prefix();
    let (hits, stage) = search::authors_open_search(&state.db, &state.stats, term, order)
        .await
        .unwrap_or((Vec::new(), None));

    let subtitle = stage
        .map(|s: SearchStage| format!("Matched via {}", s.as_str()))
        .unwrap_or_default();

    let start = (page * PAGE_SIZE) as usize;
    let page_hits: Vec<&String> = hits.iter().skip(start).take(PAGE_SIZE as usize).collect();

    let base = format!("{prefix}/search?searchType=authors&searchTerm={}", enc(term));
    let mut fb = begin(
        state,
        &format!("tag:search:authors:{term}:{page}"),
        &format!("Authors: {term}"),
        &subtitle,
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, page_hits.len());
    for name in page_hits {
        let count = authors::book_count(&state.db, name).await.unwrap_or(0);
        let _ = fb.write_nav_entry(
            &format!("tag:author:{name}"),
            name,
            &format!("{prefix}/author-details/{}", enc(name)),
            &format!("{count} books"),
            &now(),
        );
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

async fn book_search_feed(
    state: &AppState,
    term: &str,
    page: i64,
    order: SortOrder,
) -> Response {
    let prefix = state.config.route_prefix();
    let hits = search::titles_open_search(&state.db, term, order, PAGE_SIZE * 10)
        .await
        .unwrap_or_default();

    let start = (page * PAGE_SIZE) as usize;
    let page_hits: Vec<&Book> = hits.iter().skip(start).take(PAGE_SIZE as usize).collect();

    let base = format!("{prefix}/search?searchType=books&searchTerm={}", enc(term));
    let mut fb = begin(
        state,
        &format!("tag:search:books:{term}:{page}"),
        &format!("Books: {term}"),
        "",
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, page_hits.len());
    for book in page_hits {
        write_book_entry(&mut fb, state, book).await;
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /downstat/date and /downstat/alpha — download history views.
pub async fn downstat_by_date(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Response {
    downstat_feed(&state, q.page(), true).await
}

pub async fn downstat_by_title(
    State(state): State<AppState>,
    Query(q): Query<PageQuery>,
) -> Response {
    downstat_feed(&state, q.page(), false).await
}

async fn downstat_feed(state: &AppState, page: i64, by_date: bool) -> Response {
    let prefix = state.config.route_prefix();
    let offset = page * PAGE_SIZE;
    let book_list = if by_date {
        downloads::unique_by_date(&state.db, PAGE_SIZE, offset).await
    } else {
        downloads::unique_by_title(&state.db, PAGE_SIZE, offset).await
    }
    .unwrap_or_default();

    let route = if by_date { "downstat/date" } else { "downstat/alpha" };
    let base = format!("{prefix}/{route}");
    let mut fb = begin(
        state,
        &format!("tag:{route}:{page}"),
        "Downloaded books",
        "",
        &page_href(&base, page),
    );
    write_page_links(&mut fb, &base, page, book_list.len());
    for book in &book_list {
        write_book_entry(&mut fb, state, book).await;
    }

    match fb.finish() {
        Ok(body) => atom_response(body),
        Err(_) => xml_error(),
    }
}

/// GET /opensearch.xml — OpenSearch description document.
pub async fn opensearch_description(State(state): State<AppState>) -> Response {
    let prefix = state.config.route_prefix();
    let name = &state.config.server.name;
    let body = format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<OpenSearchDescription xmlns="http://a9.com/-/spec/opensearch/1.1/">
    <ShortName>{name}</ShortName>
    <Description>Search the book catalog</Description>
    <Url type="application/atom+xml" template="{prefix}/search?searchTerm={{searchTerms}}" />
    <OutputEncoding>UTF-8</OutputEncoding>
    <InputEncoding>UTF-8</InputEncoding>
</OpenSearchDescription>"#
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, xml::OPENSEARCH_TYPE)],
        body,
    )
        .into_response()
}

/// Write one book acquisition entry.
async fn write_book_entry(fb: &mut FeedBuilder, state: &AppState, book: &Book) {
    let prefix = state.config.route_prefix();
    let language = &state.config.server.language;
    let updated = if book.added_date.is_empty() {
        now()
    } else {
        book.added_date.clone()
    };

    let _ = fb.begin_entry(&format!("tag:book:{}", book.id), &book.title, &updated);

    if let Ok(book_authors) = authors::for_book(&state.db, &book.id).await {
        for author in &book_authors {
            let href = format!("{prefix}/author-details/{}", enc(&author.name));
            let _ = fb.write_author(&author.name, &href);
            let _ = fb.write_related_link(&href, &format!("All books by {}", author.name));
        }
    }

    if let Ok(book_genres) = crate::db::queries::genres::for_book(&state.db, &book.id).await {
        for genre in &book_genres {
            let _ = fb.write_category(&genre.tag, genre.label(language));
        }
    }

    if !book.language.is_empty() {
        let _ = fb.write_dc("language", &book.language);
    }
    let _ = fb.write_dc("format", &book.book_type);

    let book_sequences = sequences::for_book(&state.db, &book.id)
        .await
        .unwrap_or_default();

    let mut content = String::new();
    if !book.annotation.is_empty() {
        content.push_str(&book.annotation);
    }
    if !book.translators.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&format!("Translation: {}", book.translators));
    }
    if !book.book_date.is_empty() {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&format!("Year: {}", book.book_date));
    }
    for (sequence_name, number) in &book_sequences {
        if !content.is_empty() {
            content.push('\n');
        }
        content.push_str(&format!("Series: {sequence_name} #{number}"));
    }
    if !content.is_empty() {
        let _ = fb.write_content_text(&content);
    }

    let _ = fb.write_text_element("format", &book.book_type);
    let _ = fb.write_text_element("size", &book.document_size.to_string());

    if book.has_cover {
        let _ = fb.write_cover_links(&prefix, &book.id);
    }

    let _ = fb.write_acquisition_link(
        &format!("{prefix}/download/{}/{}", book.id, book.book_type),
        book.book_type().download_mime(),
    );

    for (sequence_name, _) in &book_sequences {
        let _ = fb.write_related_link(
            &format!("{prefix}/sequence/{}", enc(sequence_name)),
            &format!("All books in {sequence_name}"),
        );
    }

    let _ = fb.end_entry();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_href() {
        assert_eq!(page_href("/newdate", 2), "/newdate?pageNumber=2");
        assert_eq!(
            page_href("/search?searchType=books&searchTerm=x", 1),
            "/search?searchType=books&searchTerm=x&pageNumber=1"
        );
    }

    #[test]
    fn test_split_level_groups_letters_with_two_plus_names() {
        let names: Vec<String> = vec![
            "Abbot".into(),
            "Abel".into(),
            "Adler".into(),
            "A1 Steak".into(),
            "A".into(),
        ];
        let (groups, singles) = split_level(&names, 1);
        assert_eq!(groups, vec![("Ab".to_string(), 2)]);
        // "Adler" has a unique next letter, "A1" a digit, "A" is too short
        assert_eq!(
            singles,
            vec!["A1 Steak".to_string(), "A".to_string(), "Adler".to_string()]
        );
    }

    #[test]
    fn test_split_level_case_insensitive_grouping() {
        let names: Vec<String> = vec!["ABBOT".into(), "Abel".into()];
        let (groups, singles) = split_level(&names, 1);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].1, 2);
        assert!(singles.is_empty());
    }
}
