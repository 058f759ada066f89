use crate::models::{
    CreateExhibitRequest, CreateExhibitionRequest, CreateNewsRequest, EntityKind, Exhibit,
    Exhibition, NewVisit, News, UpdateExhibitRequest, UpdateExhibitionRequest, UpdateNewsRequest,
    Visitor, VisitorFilter,
};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflicting write")]
    Conflict,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
            _ => StorageError::Other(err.into()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence contract shared by the in-memory, SQLite and PostgreSQL backends.
///
/// Entity reads never return soft-deleted rows, and entity deletes are soft.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert-or-update the visitor keyed by `visit.ip` as one atomic operation.
    ///
    /// `at` is the visit time in Unix seconds. A new visitor starts with
    /// `visit_count = 1` and `first_visit_at = last_visit_at = at`.
    async fn record_visit(&self, visit: &NewVisit, at: i64) -> StorageResult<()>;

    async fn get_visitor(&self, ip: &str) -> StorageResult<Option<Visitor>>;

    async fn count_visitors(&self, filter: VisitorFilter) -> StorageResult<i64>;

    /// Sum of `visit_count` over all visitors, 0 when there are none
    async fn total_page_views(&self) -> StorageResult<i64>;

    /// Number of rows of `kind` that are not soft-deleted
    async fn count_active(&self, kind: EntityKind) -> StorageResult<i64>;

    async fn create_exhibition(&self, req: &CreateExhibitionRequest) -> StorageResult<Exhibition>;

    /// Get an exhibition together with its active exhibits
    async fn get_exhibition(&self, id: &str) -> StorageResult<Option<Exhibition>>;

    async fn list_exhibitions(&self) -> StorageResult<Vec<Exhibition>>;

    async fn update_exhibition(
        &self,
        id: &str,
        req: &UpdateExhibitionRequest,
    ) -> StorageResult<Exhibition>;

    async fn delete_exhibition(&self, id: &str) -> StorageResult<bool>;

    /// Set or clear (`None`) the exhibit shown as the exhibition's preview
    async fn set_exhibition_preview(
        &self,
        id: &str,
        exhibit_id: Option<&str>,
    ) -> StorageResult<Exhibition>;

    /// Fails with `NotFound` when the referenced exhibition is absent or deleted
    async fn create_exhibit(&self, req: &CreateExhibitRequest) -> StorageResult<Exhibit>;

    async fn get_exhibit(&self, id: &str) -> StorageResult<Option<Exhibit>>;

    async fn update_exhibit(&self, id: &str, req: &UpdateExhibitRequest) -> StorageResult<Exhibit>;

    async fn delete_exhibit(&self, id: &str) -> StorageResult<bool>;

    async fn create_news(&self, req: &CreateNewsRequest) -> StorageResult<News>;

    async fn get_news(&self, id: &str) -> StorageResult<Option<News>>;

    async fn list_news(&self) -> StorageResult<Vec<News>>;

    async fn update_news(&self, id: &str, req: &UpdateNewsRequest) -> StorageResult<News>;

    async fn delete_news(&self, id: &str) -> StorageResult<bool>;
}

pub(crate) fn now_secs() -> StorageResult<i64> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| StorageError::Other(e.into()))?
        .as_secs() as i64;
    Ok(secs)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
