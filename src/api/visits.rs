use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use super::handlers::{AnalyticsInfo, AppState};
use crate::analytics::{host_without_port, primary_language, VisitorContext};
use crate::error::ApiError;
use crate::models::{VisitRequest, VisitStats};
use crate::relay::{AnalyticsEndpointIdentity, RelayCounters, RelayState, TrackEvent};

/// Resolve the typed visitor context for every public request
pub async fn visitor_context_middleware(mut request: Request, next: Next) -> Response {
    let socket_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let ctx = VisitorContext::from_headers(request.headers(), socket_ip);

    request.extensions_mut().insert(ctx);
    next.run(request).await
}

#[derive(Serialize)]
pub struct VisitResponse {
    pub ok: bool,
}

pub async fn record_visit(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<VisitorContext>,
    headers: HeaderMap,
    Json(payload): Json<VisitRequest>,
) -> Result<Json<VisitResponse>, ApiError> {
    state.recorder.record(&ctx, &payload).await?;

    if let Some(relay) = &state.relay {
        relay.track(track_event(&ctx, &headers, &payload));
    }

    Ok(Json(VisitResponse { ok: true }))
}

fn track_event(ctx: &VisitorContext, headers: &HeaderMap, visit: &VisitRequest) -> TrackEvent {
    let language = match visit.language.as_deref() {
        Some(lang) if !lang.is_empty() => lang.to_string(),
        _ => primary_language(header_str(headers, header::ACCEPT_LANGUAGE))
            .unwrap_or_default()
            .to_string(),
    };
    let referrer = match visit.referrer.as_deref() {
        Some(referrer) if !referrer.is_empty() => referrer.to_string(),
        _ => header_str(headers, header::REFERER).to_string(),
    };

    TrackEvent {
        path: visit.page.clone(),
        hostname: host_without_port(header_str(headers, header::HOST)).to_string(),
        title: visit.page.clone(),
        language,
        referrer,
        user_agent: ctx.user_agent.clone(),
        ip: ctx.ip.clone(),
    }
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
}

pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<VisitStats>, ApiError> {
    Ok(Json(state.stats.stats().await?))
}

/// Settings for the frontend tracking script. The resolved website id wins over
/// the configured one.
pub async fn analytics_info(State(state): State<Arc<AppState>>) -> Json<AnalyticsInfo> {
    let mut info = state.analytics.clone();
    if let Some(identity) = state.relay.as_ref().and_then(|relay| relay.identity()) {
        info.website_id = Some(identity.website_id.clone());
    }
    Json(info)
}

#[derive(Serialize)]
pub struct RelayStatus {
    pub state: RelayState,
    pub identity: Option<AnalyticsEndpointIdentity>,
    pub counters: RelayCounters,
}

pub async fn relay_status(State(state): State<Arc<AppState>>) -> Result<Json<RelayStatus>, ApiError> {
    let relay = state
        .relay
        .as_ref()
        .ok_or_else(|| ApiError::NotFound("analytics relay is disabled".to_string()))?;

    if relay.state() == RelayState::Failed {
        return Err(ApiError::UpstreamUnavailable);
    }

    Ok(Json(RelayStatus {
        state: relay.state(),
        identity: relay.identity().cloned(),
        counters: relay.counters(),
    }))
}
