//! Request handlers for the three named HTTP operations.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{http::StatusCode, Json};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::AppState;
use crate::db;
use crate::error::{CoreError, CoreResult};
use crate::score_manager;

#[derive(Debug, Serialize)]
struct ReanalyzeAccepted {
    article_id: i64,
    accepted: bool,
}

/// `POST /reanalyze/{article_id}` — start (or join) a re-analysis run.
///
/// Rejects any body containing a `score` field; manual scores have their
/// own dedicated entry point.
#[utoipa::path(
    post,
    path = "/reanalyze/{article_id}",
    params(("article_id" = i64, Path, description = "Article to re-analyze")),
    responses((status = 202, description = "Run accepted or already in flight"))
)]
#[instrument(skip(state, body))]
pub async fn reanalyze(
    State(state): State<AppState>,
    Path(article_id): Path<i64>,
    body: Option<Json<Value>>,
) -> CoreResult<impl IntoResponse> {
    if let Some(Json(payload)) = &body {
        if payload.get("score").is_some() {
            return Err(CoreError::Validation(
                "reanalyze does not accept a `score` field; use /manual-score instead".to_string(),
            ));
        }
    }

    let article = db::find_article(&state.db, article_id)
        .await
        .map_err(CoreError::StorageFailed)?
        .ok_or(CoreError::NotFound)?;

    // `run_coordinated` itself enforces the single-run-per-article lock
    // (joining an in-flight run, whether started by another request or the
    // scheduler, instead of starting a second one), so every caller — this
    // handler included — just spawns and lets it sort that out.
    let executor = state.executor.clone();
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        let outcome = executor.run_coordinated(&article, cancel).await;
        info!(article_id, outcome = ?outcome, "reanalyze run finished");
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ReanalyzeAccepted {
            article_id,
            accepted: true,
        }),
    ))
}

/// `GET /score-progress/{article_id}` — live progress stream.
///
/// Delivers the current snapshot (if any) immediately, then every
/// subsequent update, closing after the terminal event.
#[utoipa::path(
    get,
    path = "/score-progress/{article_id}",
    params(("article_id" = i64, Path, description = "Article being scored")),
    responses((status = 200, description = "Server-sent progress events"))
)]
#[instrument(skip(state))]
pub async fn score_progress(
    State(state): State<AppState>,
    Path(article_id): Path<i64>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscriber = state.progress.subscribe(article_id);

    let stream = async_stream::stream! {
        while let Some(update) = subscriber.recv().await {
            let is_terminal = update.is_terminal();
            match Event::default().json_data(&update) {
                Ok(event) => yield Ok(event),
                Err(_) => continue,
            }
            if is_terminal {
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ManualScoreRequest {
    pub score: f64,
}

/// `POST /manual-score/{article_id}` — set a score directly, bypassing the
/// ensemble.
#[utoipa::path(
    post,
    path = "/manual-score/{article_id}",
    params(("article_id" = i64, Path, description = "Article to score")),
    request_body = ManualScoreRequest,
    responses((status = 200, description = "Score applied"))
)]
#[instrument(skip(state))]
pub async fn manual_score(
    State(state): State<AppState>,
    Path(article_id): Path<i64>,
    Json(request): Json<ManualScoreRequest>,
) -> CoreResult<impl IntoResponse> {
    db::find_article(&state.db, article_id)
        .await
        .map_err(CoreError::StorageFailed)?
        .ok_or(CoreError::NotFound)?;

    score_manager::apply_manual_score(&state.db, &state.cache, article_id, request.score).await?;

    Ok(StatusCode::OK)
}
