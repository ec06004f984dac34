// HTTP surface: pages, health check and the htmx search endpoint

use std::{future::Future, net::SocketAddr, sync::Arc};

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{query::SearchFields, render, search::handle_search_submission, upstream::ResultFetcher};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<dyn ResultFetcher>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    timestamp: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/search", get(search_form))
        .route("/health", get(health))
        .route("/indexprimary", get(legacy_redirect))
        .route("/indexsecondary", get(legacy_redirect))
        .route("/search-results", post(search_results))
        .with_state(state)
}

async fn home() -> Html<String> {
    Html(render::home_page().into_string())
}

async fn search_form() -> Html<String> {
    Html(render::search_page().into_string())
}

async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

// Old per-level pages now share the unified form
async fn legacy_redirect() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/search")]).into_response()
}

async fn search_results(
    State(state): State<AppState>,
    Form(fields): Form<SearchFields>,
) -> Html<String> {
    let fragment = handle_search_submission(state.fetcher.as_ref(), &fields).await;
    Html(fragment.into_string())
}

pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!("server running at http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("graceful shutdown completed");
    Ok(())
}

/// Resolves on Ctrl-C; if the handler cannot be installed it never resolves.
async fn sigint<F>(ctrl_c: F) -> &'static str
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = ctrl_c.await {
        warn!(error = %e, "could not listen for Ctrl-C");
        return std::future::pending().await;
    }
    "SIGINT"
}

async fn shutdown_signal() {
    let ctrl_c = sigint(tokio::signal::ctrl_c());

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        let (Ok(mut term), Ok(mut quit)) =
            (signal(SignalKind::terminate()), signal(SignalKind::quit()))
        else {
            return std::future::pending::<&'static str>().await;
        };
        tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    let received = tokio::select! {
        name = ctrl_c => name,
        name = terminate => name,
    };
    info!(signal = received, "starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        outcome::{LookupOutcome, StudentResult},
        search::fake::FakeFetcher,
    };
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use tower::ServiceExt;

    fn app(fetcher: Arc<FakeFetcher>) -> Router {
        router(AppState { fetcher })
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn submit(form: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/search-results")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_ok_with_timestamp() {
        let response = app(Arc::new(FakeFetcher::new(LookupOutcome::NotFound)))
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        let timestamp = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_legacy_pages_redirect_to_search() {
        for uri in ["/indexprimary", "/indexsecondary"] {
            let response = app(Arc::new(FakeFetcher::new(LookupOutcome::NotFound)))
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::FOUND);
            assert_eq!(response.headers()[header::LOCATION], "/search");
        }
    }

    #[tokio::test]
    async fn test_pages_render() {
        for uri in ["/", "/search"] {
            let response = app(Arc::new(FakeFetcher::new(LookupOutcome::NotFound)))
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_text(response).await.contains(r#"dir="rtl""#));
        }
    }

    #[tokio::test]
    async fn test_search_results_rejects_unselected_level() {
        let fetcher = Arc::new(FakeFetcher::new(LookupOutcome::NotFound));
        let response = app(fetcher.clone())
            .oneshot(submit("grade=0&area=101&seatNumber=1234"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("يرجى اختيار المرحلة التعليمية"));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_search_results_missing_fields_are_validation_errors() {
        let fetcher = Arc::new(FakeFetcher::new(LookupOutcome::NotFound));
        let response = app(fetcher.clone())
            .oneshot(submit("grade=1&area=101"))
            .await
            .unwrap();

        assert!(body_text(response).await.contains("يرجى إدخال رقم جلوس صحيح"));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_search_results_renders_found_record() {
        let fetcher = Arc::new(FakeFetcher::new(LookupOutcome::Found(StudentResult {
            seat_number: "765432".into(),
            student_name: "Mona".into(),
            region: "Giza".into(),
            school: "Al Amal".into(),
            total: Some("280".into()),
            status: Some("ن".into()),
        })));
        let response = app(fetcher.clone())
            .oneshot(submit("grade=2&area=117&seatNumber=765432"))
            .await
            .unwrap();

        let html = body_text(response).await;
        assert!(html.contains("تم العثور على النتيجة"));
        assert!(html.contains("Mona"));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.last_query().unwrap().region().id(), 117);
    }

    #[tokio::test]
    async fn test_sigint_resolves_on_ctrl_c() {
        assert_eq!(sigint(async { Ok::<(), std::io::Error>(()) }).await, "SIGINT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ctrl_c_registration_does_not_trigger_shutdown() {
        let unavailable = async {
            Err::<(), _>(std::io::Error::new(
                std::io::ErrorKind::Other,
                "signal driver unavailable",
            ))
        };
        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(60), sigint(unavailable)).await;
        assert!(waited.is_err(), "shutdown fired without a signal");
    }
}
