use crate::models::{
    CreateExhibitRequest, CreateExhibitionRequest, CreateNewsRequest, EntityKind, Exhibit,
    Exhibition, NewVisit, News, UpdateExhibitRequest, UpdateExhibitionRequest, UpdateNewsRequest,
    Visitor, VisitorFilter,
};
use crate::storage::trait_def::{new_id, now_secs};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::types::Json;
use tokio::sync::Mutex;

/// A row plus its soft-delete marker
struct Stored<T> {
    value: T,
    deleted_at: Option<i64>,
}

impl<T> Stored<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            deleted_at: None,
        }
    }

    fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Default)]
struct Tables {
    visitors: Vec<Visitor>,
    next_visitor_id: i64,
    exhibitions: Vec<Stored<Exhibition>>,
    exhibits: Vec<Stored<Exhibit>>,
    news: Vec<Stored<News>>,
}

impl Tables {
    fn active_exhibition_mut(&mut self, id: &str) -> Option<&mut Exhibition> {
        self.exhibitions
            .iter_mut()
            .find(|row| row.is_active() && row.value.id == id)
            .map(|row| &mut row.value)
    }

    fn active_exhibit(&self, id: &str) -> Option<&Exhibit> {
        self.exhibits
            .iter()
            .find(|row| row.is_active() && row.value.id == id)
            .map(|row| &row.value)
    }

    fn has_active_exhibition(&self, id: &str) -> bool {
        self.exhibitions
            .iter()
            .any(|row| row.is_active() && row.value.id == id)
    }

    fn with_exhibits(&self, exhibition: &Exhibition) -> Exhibition {
        let mut exhibition = exhibition.clone();
        exhibition.exhibits = self
            .exhibits
            .iter()
            .filter(|row| row.is_active() && row.value.exhibition_id == exhibition.id)
            .map(|row| row.value.clone())
            .collect();
        exhibition
    }
}

fn soft_delete<T>(rows: &mut [Stored<T>], id: &str, now: i64, key: impl Fn(&T) -> &str) -> bool {
    match rows
        .iter_mut()
        .find(|row| row.is_active() && key(&row.value) == id)
    {
        Some(row) => {
            row.deleted_at = Some(now);
            true
        }
        None => false,
    }
}

/// In-memory storage backend.
///
/// Every table lives behind one mutex, so each operation (including the visitor
/// upsert) is atomic with respect to every other call.
#[derive(Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn record_visit(&self, visit: &NewVisit, at: i64) -> StorageResult<()> {
        let mut tables = self.tables.lock().await;

        if let Some(existing) = tables.visitors.iter_mut().find(|v| v.ip == visit.ip) {
            visit.merge_into(existing, at);
            return Ok(());
        }

        tables.next_visitor_id += 1;
        let id = tables.next_visitor_id;
        tables.visitors.push(Visitor {
            id,
            ip: visit.ip.clone(),
            user_agent: visit.user_agent.clone(),
            page: visit.page.clone(),
            referrer: visit.referrer.clone(),
            screen_width: visit.screen_width.max(0),
            screen_height: visit.screen_height.max(0),
            language: visit.language.clone(),
            visit_count: 1,
            first_visit_at: at,
            last_visit_at: at,
        });

        Ok(())
    }

    async fn get_visitor(&self, ip: &str) -> StorageResult<Option<Visitor>> {
        let tables = self.tables.lock().await;
        Ok(tables.visitors.iter().find(|v| v.ip == ip).cloned())
    }

    async fn count_visitors(&self, filter: VisitorFilter) -> StorageResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.visitors.iter().filter(|v| filter.matches(v)).count() as i64)
    }

    async fn total_page_views(&self) -> StorageResult<i64> {
        let tables = self.tables.lock().await;
        Ok(tables.visitors.iter().map(|v| v.visit_count).sum())
    }

    async fn count_active(&self, kind: EntityKind) -> StorageResult<i64> {
        let tables = self.tables.lock().await;
        let count = match kind {
            EntityKind::Exhibition => tables.exhibitions.iter().filter(|r| r.is_active()).count(),
            EntityKind::Exhibit => tables.exhibits.iter().filter(|r| r.is_active()).count(),
            EntityKind::News => tables.news.iter().filter(|r| r.is_active()).count(),
        };
        Ok(count as i64)
    }

    async fn create_exhibition(&self, req: &CreateExhibitionRequest) -> StorageResult<Exhibition> {
        let now = now_secs()?;
        let exhibition = Exhibition {
            id: new_id(),
            title: req.title.clone(),
            description: req.description.clone(),
            preview_exhibit_id: None,
            created_at: now,
            updated_at: now,
            exhibits: Vec::new(),
        };

        let mut tables = self.tables.lock().await;
        tables.exhibitions.push(Stored::new(exhibition.clone()));
        Ok(exhibition)
    }

    async fn get_exhibition(&self, id: &str) -> StorageResult<Option<Exhibition>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .exhibitions
            .iter()
            .find(|row| row.is_active() && row.value.id == id)
            .map(|row| tables.with_exhibits(&row.value)))
    }

    async fn list_exhibitions(&self) -> StorageResult<Vec<Exhibition>> {
        let tables = self.tables.lock().await;
        let mut list: Vec<Exhibition> = tables
            .exhibitions
            .iter()
            .rev()
            .filter(|row| row.is_active())
            .map(|row| tables.with_exhibits(&row.value))
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn update_exhibition(
        &self,
        id: &str,
        req: &UpdateExhibitionRequest,
    ) -> StorageResult<Exhibition> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;
        let exhibition = tables
            .active_exhibition_mut(id)
            .ok_or(StorageError::NotFound("exhibition"))?;

        if let Some(title) = &req.title {
            exhibition.title = title.clone();
        }
        if let Some(description) = &req.description {
            exhibition.description = description.clone();
        }
        exhibition.updated_at = now;

        let updated = exhibition.clone();
        Ok(tables.with_exhibits(&updated))
    }

    async fn delete_exhibition(&self, id: &str) -> StorageResult<bool> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;
        Ok(soft_delete(&mut tables.exhibitions, id, now, |e| e.id.as_str()))
    }

    async fn set_exhibition_preview(
        &self,
        id: &str,
        exhibit_id: Option<&str>,
    ) -> StorageResult<Exhibition> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;

        if let Some(exhibit_id) = exhibit_id {
            let exhibit = tables
                .active_exhibit(exhibit_id)
                .ok_or(StorageError::NotFound("exhibit"))?;
            if exhibit.exhibition_id != id {
                return Err(StorageError::Validation(
                    "preview exhibit belongs to another exhibition".to_string(),
                ));
            }
        }

        let exhibition = tables
            .active_exhibition_mut(id)
            .ok_or(StorageError::NotFound("exhibition"))?;
        exhibition.preview_exhibit_id = exhibit_id.map(str::to_string);
        exhibition.updated_at = now;

        let updated = exhibition.clone();
        Ok(tables.with_exhibits(&updated))
    }

    async fn create_exhibit(&self, req: &CreateExhibitRequest) -> StorageResult<Exhibit> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;

        if !tables.has_active_exhibition(&req.exhibition_id) {
            return Err(StorageError::NotFound("exhibition"));
        }

        let exhibit = Exhibit {
            id: new_id(),
            exhibition_id: req.exhibition_id.clone(),
            title: req.title.clone(),
            description: req.description.clone(),
            image_url: req.image_url.clone(),
            created_at: now,
            updated_at: now,
        };
        tables.exhibits.push(Stored::new(exhibit.clone()));
        Ok(exhibit)
    }

    async fn get_exhibit(&self, id: &str) -> StorageResult<Option<Exhibit>> {
        let tables = self.tables.lock().await;
        Ok(tables.active_exhibit(id).cloned())
    }

    async fn update_exhibit(&self, id: &str, req: &UpdateExhibitRequest) -> StorageResult<Exhibit> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;

        if let Some(target) = &req.exhibition_id {
            if !tables.has_active_exhibition(target) {
                return Err(StorageError::NotFound("exhibition"));
            }
        }

        let exhibit = tables
            .exhibits
            .iter_mut()
            .find(|row| row.is_active() && row.value.id == id)
            .map(|row| &mut row.value)
            .ok_or(StorageError::NotFound("exhibit"))?;

        if let Some(exhibition_id) = &req.exhibition_id {
            exhibit.exhibition_id = exhibition_id.clone();
        }
        if let Some(title) = &req.title {
            exhibit.title = title.clone();
        }
        if let Some(description) = &req.description {
            exhibit.description = description.clone();
        }
        if let Some(image_url) = &req.image_url {
            exhibit.image_url = image_url.clone();
        }
        exhibit.updated_at = now;

        Ok(exhibit.clone())
    }

    async fn delete_exhibit(&self, id: &str) -> StorageResult<bool> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;
        Ok(soft_delete(&mut tables.exhibits, id, now, |e| e.id.as_str()))
    }

    async fn create_news(&self, req: &CreateNewsRequest) -> StorageResult<News> {
        let now = now_secs()?;
        let news = News {
            id: new_id(),
            title: req.title.clone(),
            content: req.content.clone(),
            image_urls: Json(req.image_urls.clone()),
            created_at: now,
            updated_at: now,
        };

        let mut tables = self.tables.lock().await;
        tables.news.push(Stored::new(news.clone()));
        Ok(news)
    }

    async fn get_news(&self, id: &str) -> StorageResult<Option<News>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .news
            .iter()
            .find(|row| row.is_active() && row.value.id == id)
            .map(|row| row.value.clone()))
    }

    async fn list_news(&self) -> StorageResult<Vec<News>> {
        let tables = self.tables.lock().await;
        let mut list: Vec<News> = tables
            .news
            .iter()
            .rev()
            .filter(|row| row.is_active())
            .map(|row| row.value.clone())
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn update_news(&self, id: &str, req: &UpdateNewsRequest) -> StorageResult<News> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;
        let news = tables
            .news
            .iter_mut()
            .find(|row| row.is_active() && row.value.id == id)
            .map(|row| &mut row.value)
            .ok_or(StorageError::NotFound("news"))?;

        if let Some(title) = &req.title {
            news.title = title.clone();
        }
        if let Some(content) = &req.content {
            news.content = content.clone();
        }
        if let Some(image_urls) = &req.image_urls {
            news.image_urls = Json(image_urls.clone());
        }
        news.updated_at = now;

        Ok(news.clone())
    }

    async fn delete_news(&self, id: &str) -> StorageResult<bool> {
        let now = now_secs()?;
        let mut tables = self.tables.lock().await;
        Ok(soft_delete(&mut tables.news, id, now, |n| n.id.as_str()))
    }
}
