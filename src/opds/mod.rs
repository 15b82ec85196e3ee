pub mod auth;
pub mod covers;
pub mod download;
pub mod feeds;
pub mod xml;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use crate::state::AppState;

const FAVICON_SVG: &[u8] = include_bytes!("../../static/images/favicon.svg");
const NOCOVER_SVG: &[u8] = include_bytes!("../../static/images/nocover.svg");

/// Logging and statistics middleware: every handled request is counted,
/// its client remembered, and one line logged.
async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = std::time::Instant::now();
    let client = auth::client_key(&request);
    let method = request.method().clone();
    let uri = request.uri().to_string();

    let response = next.run(request).await;

    state.server_stats.record_request(&client);
    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    tracing::info!("{client} {method} {uri} {status} {elapsed:.1?}");

    response
}

/// GET /favicon.ico and /icons/{name} — embedded static images.
async fn favicon() -> Response {
    svg_response(FAVICON_SVG)
}

async fn icon(axum::extract::Path(name): axum::extract::Path<String>) -> Response {
    match name.as_str() {
        "favicon.svg" => svg_response(FAVICON_SVG),
        "nocover.svg" => svg_response(NOCOVER_SVG),
        _ => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

fn svg_response(data: &[u8]) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/svg+xml")],
        data.to_vec(),
    )
        .into_response()
}

/// Build the catalog router: every feed, search, download and cover route.
pub fn router(state: AppState) -> Router<AppState> {
    // Auth-protected routes (feeds, search, downloads)
    let protected = Router::new()
        .route("/", get(feeds::root))
        .route("/opensearch.xml", get(feeds::opensearch_description))
        // New books
        .route("/newdate", get(feeds::new_by_date))
        .route("/newtitle", get(feeds::new_by_title))
        // Authors
        .route("/authorsindex", get(feeds::authors_index_root))
        .route("/authorsindex/{prefix}", get(feeds::authors_index))
        .route("/author-details/{name}", get(feeds::author_details))
        .route("/author-series/{name}", get(feeds::author_series))
        .route("/author-no-series/{name}", get(feeds::author_no_series))
        .route("/author-alphabetic/{name}", get(feeds::author_alphabetic))
        .route("/author-by-date/{name}", get(feeds::author_by_date))
        .route(
            "/author-sequence/{name}/{sequence}",
            get(feeds::author_sequence),
        )
        // Series
        .route("/sequencesindex", get(feeds::sequences_index_root))
        .route("/sequencesindex/{prefix}", get(feeds::sequences_index))
        .route("/sequence/{name}", get(feeds::sequence_books))
        // Genres
        .route("/genres", get(feeds::genres_root))
        .route("/genres/{main}", get(feeds::genres_section))
        .route("/genre/{tag}", get(feeds::genre_books))
        // OpenSearch
        .route("/search", get(feeds::open_search))
        // Download statistics
        .route("/downstat/date", get(feeds::downstat_by_date))
        .route("/downstat/alpha", get(feeds::downstat_by_title))
        // Acquisition
        .route("/download/{book_id}/{format}", get(download::download))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::basic_auth_layer,
        ))
        .layer(middleware::from_fn_with_state(state, track_requests));

    // Public routes: covers are fetched by reader <img> widgets that don't
    // send credentials, and static icons never need auth.
    Router::new()
        .route("/cover/{file}", get(covers::cover))
        .route("/thumbnail/{file}", get(covers::thumbnail))
        .route("/favicon.ico", get(favicon))
        .route("/icons/{name}", get(icon))
        .merge(protected)
}
