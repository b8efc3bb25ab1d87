use anyhow::Result;
use axum::{extract::{Path, Query, State}, http::StatusCode, routing::get, Json, Router};
use pressdex_core::{build_index, query_and, Document, DocumentStore, InvertedIndex, TokenSequenceBuilder, Tokenizer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer, AllowOrigin};
use tower_http::trace::TraceLayer;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    /// Normalized terms that were ANDed together
    pub terms: Vec<String>,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_key: u64,
    pub external_id: String,
    pub title: String,
    pub url: String,
    pub section: String,
    pub snippet: Option<String>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub index: Arc<InvertedIndex>,
    pub sequencer: TokenSequenceBuilder,
}

/// Opens the store, builds the index once and wires the routes.
pub fn build_app(store_dir: String) -> Result<Router> {
    let store = DocumentStore::open(&store_dir)?;
    tracing::info!(store = %store_dir, "document store opened");
    app_from_store(store)
}

pub fn app_from_store(store: DocumentStore) -> Result<Router> {
    let store = Arc::new(store);
    let sequencer = TokenSequenceBuilder::default();
    let index = Arc::new(build_index(&store, &sequencer)?);
    tracing::info!(num_docs = index.num_docs(), num_terms = index.num_terms(), "index ready");
    Ok(router(AppState { store, index, sequencer }))
}

pub fn router(app_state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/doc/*external_id", get(doc_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let terms = state.sequencer.tokenizer().tokenize(&params.q);
    let keys = if terms.is_empty() { Vec::new() } else { query_and(&terms, &state.index) };
    let total_hits = keys.len();
    let k = params.k.clamp(1, 100);

    let mut results = Vec::new();
    for key in keys.into_iter().take(k) {
        let stored = state.store.get(key).map_err(internal)?;
        if let Some(stored) = stored {
            let Document { external_id, title, url, section, body_text } = stored.document;
            let snippet = snippet(&body_text, &terms);
            results.push(SearchHit { doc_key: key, external_id, title, url, section, snippet });
        }
    }

    let elapsed = start.elapsed();
    Ok(Json(SearchResponse { query: params.q, terms, took_s: elapsed.as_secs_f64(), total_hits, results }))
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(external_id): Path<String>,
) -> Result<Json<Document>, (StatusCode, String)> {
    match state.store.get_by_external_id(&external_id).map_err(internal)? {
        Some(stored) => Ok(Json(stored.document)),
        None => Err((StatusCode::NOT_FOUND, format!("no document with id {external_id}"))),
    }
}

fn internal(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!(error = %e, "store read failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "store read failed".into())
}

/// ~300 chars around the first query term, with terms wrapped in `<em>`.
fn snippet(text: &str, terms: &[String]) -> Option<String> {
    if text.is_empty() { return None; }
    let lower = text.to_lowercase();
    // lowercasing can shift byte offsets for some scripts; only trust hits that land on a boundary
    let first_idx = terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .filter_map(|t| lower.find(t.as_str()))
        .find(|&i| text.is_char_boundary(i));
    let snippet: String = match first_idx {
        Some(idx) => {
            let start = text[..idx].char_indices().rev().take(100).last().map(|(i, _)| i).unwrap_or(idx);
            text[start..].chars().take(300).collect()
        }
        None => text.chars().take(200).collect(),
    };
    Some(highlight_terms(&snippet, terms))
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut s = snippet.to_string();
    for t in terms {
        if t.trim().is_empty() { continue; }
        let pattern = format!(r"\b{}\b", regex::escape(t));
        let Ok(pat) = regex::RegexBuilder::new(&pattern).case_insensitive(true).build() else { continue };
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string();
    }
    s
}
