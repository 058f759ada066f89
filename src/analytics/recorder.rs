use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::analytics::VisitorContext;
use crate::models::{NewVisit, VisitRequest};
use crate::storage::{Storage, StorageError, StorageResult};

/// Records inbound visits into the visitor table.
///
/// Every call is one atomic upsert in the storage backend, so concurrent visits
/// from the same IP never lose an increment.
#[derive(Clone)]
pub struct VisitRecorder {
    storage: Arc<dyn Storage>,
}

impl VisitRecorder {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn record(&self, ctx: &VisitorContext, req: &VisitRequest) -> StorageResult<()> {
        self.record_at(ctx, req, Utc::now().timestamp()).await
    }

    /// Record a visit that happened at `at` (Unix seconds)
    pub async fn record_at(
        &self,
        ctx: &VisitorContext,
        req: &VisitRequest,
        at: i64,
    ) -> StorageResult<()> {
        let visit = build_visit(ctx, req)?;
        self.storage.record_visit(&visit, at).await?;
        debug!(ip = %visit.ip, page = %visit.page, "Recorded visit");
        Ok(())
    }
}

fn build_visit(ctx: &VisitorContext, req: &VisitRequest) -> StorageResult<NewVisit> {
    let ip = ctx.ip.trim();
    if ip.is_empty() {
        return Err(StorageError::Validation(
            "visitor IP address is required".to_string(),
        ));
    }

    Ok(NewVisit {
        ip: ip.to_string(),
        user_agent: ctx.user_agent.clone(),
        page: req.page.clone(),
        referrer: req.referrer.clone().unwrap_or_default(),
        // Negative sizes are treated as unknown
        screen_width: req.screen_width.unwrap_or(0).max(0),
        screen_height: req.screen_height.unwrap_or(0).max(0),
        language: req.language.clone().unwrap_or_default(),
    })
}
