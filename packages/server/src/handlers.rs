//! HTTP handler functions for the quote grid API.

use std::sync::Arc;

use actix_web::{HttpResponse, web};
use quote_grid_orchestrator::{GridSelection, OrchestratorError};
use quote_grid_server_models::{
    ApiAuthorLink, ApiError, ApiHealth, ApiQuotes, ApiScroll, ApiSelection,
    CreateSelectionRequest, DEFAULT_RANDOM_COUNT, DEFAULT_RANGE_LIMIT, RandomQueryParams,
    RangeQueryParams, ScrollRequest,
};

use crate::AppState;

/// `GET /api/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: !state.session.is_shut_down(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        source: state.session.source().id().to_string(),
    })
}

/// `GET /api/quotes/random`
///
/// Returns `count` quotes: a random sample for small counts, the first
/// `count` in source order for larger ones.
pub async fn random_quotes(
    state: web::Data<AppState>,
    params: web::Query<RandomQueryParams>,
) -> HttpResponse {
    let count = params.count.unwrap_or(DEFAULT_RANDOM_COUNT);

    match state.session.get_random_items(count).await {
        Ok(items) => HttpResponse::Ok().json(ApiQuotes::from(items)),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/quotes/range`
///
/// Returns the quotes at `offset..offset + limit` with an estimated total.
pub async fn quote_range(
    state: web::Data<AppState>,
    params: web::Query<RangeQueryParams>,
) -> HttpResponse {
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(DEFAULT_RANGE_LIMIT);

    match state.session.get_range(offset, limit).await {
        Ok(page) => HttpResponse::Ok().json(page),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/quotes/{id}/link`
///
/// Resolves the author link of a quote previously served by this session.
pub async fn quote_link(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();

    match state.session.enrich_cached(&id).await {
        Ok(Some(link)) => HttpResponse::Ok().json(ApiAuthorLink { id, link }),
        Ok(None) => HttpResponse::NotFound().json(ApiError::new(format!("Unknown quote: {id}"))),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/stats`
pub async fn stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.session.get_stats())
}

/// `GET /api/metadata`
///
/// Walks the source on first call.
pub async fn metadata(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.session.metadata().await)
}

/// `POST /api/selections`
///
/// Starts a tiered selection and returns its id with the immediate batch.
pub async fn create_selection(
    state: web::Data<AppState>,
    body: web::Json<CreateSelectionRequest>,
) -> HttpResponse {
    match GridSelection::start(Arc::clone(&state.session), body.total).await {
        Ok(selection) => {
            let snapshot = selection.snapshot();
            let id = state.selections.insert(selection);
            log::debug!("Created selection {id} of {} positions", snapshot.total);
            HttpResponse::Created().json(ApiSelection { id, snapshot })
        }
        Err(e) => error_response(&e),
    }
}

/// `GET /api/selections/{id}`
pub async fn get_selection(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let id = path.into_inner();

    match state.selections.get(&id) {
        Some(selection) => HttpResponse::Ok().json(ApiSelection {
            snapshot: selection.snapshot(),
            id,
        }),
        None => selection_not_found(&id),
    }
}

/// `POST /api/selections/{id}/scroll`
///
/// Feeds a scroll signal to a virtually scrolled selection.
pub async fn scroll_selection(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<ScrollRequest>>,
) -> HttpResponse {
    let id = path.into_inner();
    let Some(selection) = state.selections.get(&id) else {
        return selection_not_found(&id);
    };
    let viewport_start = body.and_then(|b| b.viewport_start);

    match selection.on_scroll(viewport_start).await {
        Ok(outcome) => {
            let snapshot = selection.snapshot();
            HttpResponse::Ok().json(ApiScroll {
                outcome,
                settled: snapshot.settled,
                complete: snapshot.complete,
            })
        }
        Err(e) => error_response(&e),
    }
}

/// `DELETE /api/selections/{id}`
pub async fn delete_selection(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let id = path.into_inner();

    if state.selections.remove(&id) {
        HttpResponse::NoContent().finish()
    } else {
        selection_not_found(&id)
    }
}

fn selection_not_found(id: &str) -> HttpResponse {
    HttpResponse::NotFound().json(ApiError::new(format!("Unknown selection: {id}")))
}

/// Maps an orchestrator error to a response.
fn error_response(e: &OrchestratorError) -> HttpResponse {
    match e {
        OrchestratorError::InvalidRequest { .. } => {
            HttpResponse::BadRequest().json(ApiError::new(e.to_string()))
        }
        OrchestratorError::SessionClosed => {
            HttpResponse::ServiceUnavailable().json(ApiError::new(e.to_string()))
        }
        OrchestratorError::Source(_)
        | OrchestratorError::Timeout { .. }
        | OrchestratorError::Task(_) => {
            log::error!("Request failed: {e}");
            HttpResponse::InternalServerError().json(ApiError::new("Request failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, http::StatusCode, test};
    use async_trait::async_trait;
    use quote_grid_orchestrator::{OrchestratorConfig, QuoteSession};
    use quote_grid_orchestrator_models::{MetadataSource, PageMetadata};
    use quote_grid_quote_models::Quote;
    use quote_grid_scraper::{QuoteSource, ScrapeError, SourcePage};
    use serde_json::Value;

    use super::*;
    use crate::configure;

    const PAGES: u32 = 6;
    const PER_PAGE: u32 = 10;

    struct StaticSource;

    #[async_trait]
    impl QuoteSource for StaticSource {
        fn id(&self) -> &str {
            "static"
        }

        async fn fetch_page(&self, page: u32) -> Result<SourcePage, ScrapeError> {
            let quotes = if page <= PAGES {
                (0..PER_PAGE)
                    .map(|i| {
                        Quote::new(
                            &format!("quote {page}-{i}"),
                            &format!("author {page}"),
                            Vec::new(),
                            "https://quotes.test/",
                            page,
                            i,
                        )
                    })
                    .collect()
            } else {
                Vec::new()
            };
            Ok(SourcePage {
                quotes,
                has_next: page < PAGES,
                page_number: page,
            })
        }
    }

    fn state() -> web::Data<AppState> {
        let session = QuoteSession::with_metadata(
            Arc::new(StaticSource),
            OrchestratorConfig::default(),
            PageMetadata::new(PAGES, PER_PAGE, PER_PAGE, MetadataSource::Walked),
        );
        web::Data::new(AppState::new(Arc::new(session)))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(App::new().app_data($state.clone()).configure(configure)).await
        };
    }

    #[actix_web::test]
    async fn health_reports_source() {
        let app = app!(state());
        let req = test::TestRequest::get().uri("/api/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["healthy"], true);
        assert_eq!(body["source"], "static");
    }

    #[actix_web::test]
    async fn random_quotes_respects_count() {
        let app = app!(state());
        let req = test::TestRequest::get()
            .uri("/api/quotes/random?count=5")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["count"], 5);
        assert_eq!(body["items"][0]["kind"], "real");
    }

    #[actix_web::test]
    async fn invalid_count_is_bad_request() {
        let app = app!(state());
        for uri in [
            "/api/quotes/random?count=0",
            "/api/quotes/random?count=10001",
            "/api/quotes/range?limit=5000",
            "/api/quotes/range?offset=2000000&limit=1",
        ] {
            let req = test::TestRequest::get().uri(uri).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    #[actix_web::test]
    async fn range_reports_total_and_more() {
        let app = app!(state());
        let req = test::TestRequest::get()
            .uri("/api/quotes/range?offset=55&limit=10")
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["items"].as_array().map(Vec::len), Some(5));
        assert_eq!(body["total"], 60);
        assert_eq!(body["hasMore"], false);
    }

    #[actix_web::test]
    async fn link_for_served_quote() {
        let state = state();
        let app = app!(state);

        let unknown = test::TestRequest::get()
            .uri("/api/quotes/nope/link")
            .to_request();
        assert_eq!(
            test::call_service(&app, unknown).await.status(),
            StatusCode::NOT_FOUND
        );

        let quotes = state.session.fetch_page(1).await.unwrap();
        let req = test::TestRequest::get()
            .uri(&format!("/api/quotes/{}/link", quotes[0].id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["link"]["kind"], "fallback");
        assert_eq!(
            body["link"]["url"],
            "https://www.goodreads.com/search?q=author+1"
        );
    }

    #[actix_web::test]
    async fn selection_lifecycle() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/selections")
            .set_json(CreateSelectionRequest { total: 40 })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let id = created["id"].as_str().unwrap().to_owned();
        assert_eq!(created["complete"], true);
        assert_eq!(created["mode"], "IMMEDIATE");

        let req = test::TestRequest::post()
            .uri(&format!("/api/selections/{id}/scroll"))
            .set_json(ScrollRequest::default())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["outcome"], "notScrollable");

        let req = test::TestRequest::delete()
            .uri(&format!("/api/selections/{id}"))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NO_CONTENT
        );

        let req = test::TestRequest::get()
            .uri(&format!("/api/selections/{id}"))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::NOT_FOUND
        );
        assert!(state.selections.is_empty());
    }

    #[actix_web::test]
    async fn oldest_selection_is_evicted_past_capacity() {
        let session = Arc::clone(&state().session);
        let state = web::Data::new(AppState::with_max_selections(session, 2));
        let app = app!(state);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let req = test::TestRequest::post()
                .uri("/api/selections")
                .set_json(CreateSelectionRequest { total: 10 })
                .to_request();
            let created: Value = test::call_and_read_body_json(&app, req).await;
            ids.push(created["id"].as_str().unwrap().to_owned());
        }
        assert_eq!(state.selections.len(), 2);

        let mut statuses = Vec::new();
        for id in &ids {
            let req = test::TestRequest::get()
                .uri(&format!("/api/selections/{id}"))
                .to_request();
            statuses.push(test::call_service(&app, req).await.status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::NOT_FOUND, StatusCode::OK, StatusCode::OK]
        );
    }

    #[actix_web::test]
    async fn closed_session_is_unavailable() {
        let state = state();
        state.session.shutdown();
        let app = app!(state);

        let req = test::TestRequest::get()
            .uri("/api/quotes/range?limit=5")
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
