use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::analytics::{StatsAggregator, VisitRecorder};
use crate::error::ApiError;
use crate::models::{
    CreateExhibitRequest, CreateExhibitionRequest, CreateNewsRequest, Exhibit, Exhibition, News,
    SetPreviewRequest, UpdateExhibitRequest, UpdateExhibitionRequest, UpdateNewsRequest,
};
use crate::relay::EventRelay;
use crate::storage::Storage;

/// Collector settings exposed to the frontend tracking script
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalyticsInfo {
    pub enabled: bool,
    pub url: String,
    pub website_id: Option<String>,
}

pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub recorder: VisitRecorder,
    pub stats: StatsAggregator,
    pub relay: Option<Arc<EventRelay>>,
    pub analytics: AnalyticsInfo,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        relay: Option<Arc<EventRelay>>,
        analytics: AnalyticsInfo,
    ) -> Self {
        Self {
            recorder: VisitRecorder::new(Arc::clone(&storage)),
            stats: StatsAggregator::new(Arc::clone(&storage)),
            storage,
            relay,
            analytics,
        }
    }
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

pub async fn ping() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "pong".to_string(),
    })
}

/// Entity ids are UUIDs; anything else is rejected before touching storage
fn validate_id(id: &str) -> Result<(), ApiError> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| ApiError::Validation(format!("malformed id '{id}'")))
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn deleted(found: bool, what: &str) -> Result<StatusCode, ApiError> {
    if found {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{what} not found")))
    }
}

// News

pub async fn list_news(State(state): State<Arc<AppState>>) -> Result<Json<Vec<News>>, ApiError> {
    Ok(Json(state.storage.list_news().await?))
}

pub async fn get_news(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<News>, ApiError> {
    validate_id(&id)?;
    state
        .storage
        .get_news(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("news not found".to_string()))
}

pub async fn create_news(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateNewsRequest>,
) -> Result<(StatusCode, Json<News>), ApiError> {
    require_non_empty("title", &payload.title)?;
    let news = state.storage.create_news(&payload).await?;
    Ok((StatusCode::CREATED, Json(news)))
}

pub async fn update_news(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateNewsRequest>,
) -> Result<Json<News>, ApiError> {
    validate_id(&id)?;
    if let Some(title) = &payload.title {
        require_non_empty("title", title)?;
    }
    Ok(Json(state.storage.update_news(&id, &payload).await?))
}

pub async fn delete_news(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_id(&id)?;
    deleted(state.storage.delete_news(&id).await?, "news")
}

// Exhibitions

pub async fn list_exhibitions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Exhibition>>, ApiError> {
    Ok(Json(state.storage.list_exhibitions().await?))
}

pub async fn get_exhibition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Exhibition>, ApiError> {
    validate_id(&id)?;
    state
        .storage
        .get_exhibition(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("exhibition not found".to_string()))
}

pub async fn create_exhibition(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateExhibitionRequest>,
) -> Result<(StatusCode, Json<Exhibition>), ApiError> {
    require_non_empty("title", &payload.title)?;
    let exhibition = state.storage.create_exhibition(&payload).await?;
    Ok((StatusCode::CREATED, Json(exhibition)))
}

pub async fn update_exhibition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateExhibitionRequest>,
) -> Result<Json<Exhibition>, ApiError> {
    validate_id(&id)?;
    if let Some(title) = &payload.title {
        require_non_empty("title", title)?;
    }
    Ok(Json(state.storage.update_exhibition(&id, &payload).await?))
}

pub async fn delete_exhibition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_id(&id)?;
    deleted(state.storage.delete_exhibition(&id).await?, "exhibition")
}

pub async fn set_exhibition_preview(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<SetPreviewRequest>,
) -> Result<Json<Exhibition>, ApiError> {
    validate_id(&id)?;
    if let Some(exhibit_id) = &payload.exhibit_id {
        validate_id(exhibit_id)?;
    }
    let exhibition = state
        .storage
        .set_exhibition_preview(&id, payload.exhibit_id.as_deref())
        .await?;
    Ok(Json(exhibition))
}

// Exhibits

pub async fn create_exhibit(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateExhibitRequest>,
) -> Result<(StatusCode, Json<Exhibit>), ApiError> {
    validate_id(&payload.exhibition_id)?;
    require_non_empty("title", &payload.title)?;
    let exhibit = state.storage.create_exhibit(&payload).await?;
    Ok((StatusCode::CREATED, Json(exhibit)))
}

pub async fn update_exhibit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateExhibitRequest>,
) -> Result<Json<Exhibit>, ApiError> {
    validate_id(&id)?;
    if let Some(exhibition_id) = &payload.exhibition_id {
        validate_id(exhibition_id)?;
    }
    if let Some(title) = &payload.title {
        require_non_empty("title", title)?;
    }
    Ok(Json(state.storage.update_exhibit(&id, &payload).await?))
}

pub async fn delete_exhibit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_id(&id)?;
    deleted(state.storage.delete_exhibit(&id).await?, "exhibit")
}
