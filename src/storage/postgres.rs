use crate::models::{
    CreateExhibitRequest, CreateExhibitionRequest, CreateNewsRequest, EntityKind, Exhibit,
    Exhibition, NewVisit, News, UpdateExhibitRequest, UpdateExhibitionRequest, UpdateNewsRequest,
    Visitor, VisitorFilter,
};
use crate::storage::trait_def::{new_id, now_secs};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    async fn fetch_exhibits_for(&self, exhibition_id: &str) -> StorageResult<Vec<Exhibit>> {
        let exhibits = sqlx::query_as::<_, Exhibit>(
            r#"
            SELECT id, exhibition_id, title, description, image_url, created_at, updated_at
            FROM exhibits
            WHERE exhibition_id = $1 AND deleted_at IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .bind(exhibition_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(exhibits)
    }

    async fn fetch_exhibition(&self, id: &str) -> StorageResult<Option<Exhibition>> {
        let exhibition = sqlx::query_as::<_, Exhibition>(
            r#"
            SELECT id, title, description, preview_exhibit_id, created_at, updated_at
            FROM exhibitions
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match exhibition {
            Some(mut exhibition) => {
                exhibition.exhibits = self.fetch_exhibits_for(&exhibition.id).await?;
                Ok(Some(exhibition))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS visitors (
                id BIGSERIAL PRIMARY KEY,
                ip TEXT NOT NULL UNIQUE,
                user_agent TEXT NOT NULL DEFAULT '',
                page TEXT NOT NULL DEFAULT '',
                referrer TEXT NOT NULL DEFAULT '',
                screen_width INTEGER NOT NULL DEFAULT 0,
                screen_height INTEGER NOT NULL DEFAULT 0,
                language TEXT NOT NULL DEFAULT '',
                visit_count BIGINT NOT NULL DEFAULT 1,
                first_visit_at BIGINT NOT NULL,
                last_visit_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visitors_last_visit ON visitors(last_visit_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_visitors_first_visit ON visitors(first_visit_at)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exhibitions (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                preview_exhibit_id TEXT,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                deleted_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exhibits (
                id TEXT PRIMARY KEY,
                exhibition_id TEXT NOT NULL REFERENCES exhibitions(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                image_url TEXT NOT NULL DEFAULT '',
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                deleted_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_exhibits_exhibition ON exhibits(exhibition_id)")
            .execute(self.pool.as_ref())
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS news (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                image_urls JSONB NOT NULL DEFAULT '[]'::jsonb,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL,
                deleted_at BIGINT
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn record_visit(&self, visit: &NewVisit, at: i64) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO visitors (
                ip, user_agent, page, referrer, screen_width, screen_height, language,
                visit_count, first_visit_at, last_visit_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, $8)
            ON CONFLICT (ip) DO UPDATE SET
                visit_count = visitors.visit_count + 1,
                last_visit_at = GREATEST(visitors.last_visit_at, EXCLUDED.last_visit_at),
                user_agent = EXCLUDED.user_agent,
                page = EXCLUDED.page,
                referrer = CASE WHEN EXCLUDED.referrer <> '' THEN EXCLUDED.referrer ELSE visitors.referrer END,
                screen_width = CASE WHEN EXCLUDED.screen_width > 0 THEN EXCLUDED.screen_width ELSE visitors.screen_width END,
                screen_height = CASE WHEN EXCLUDED.screen_height > 0 THEN EXCLUDED.screen_height ELSE visitors.screen_height END,
                language = CASE WHEN EXCLUDED.language <> '' THEN EXCLUDED.language ELSE visitors.language END
            "#,
        )
        .bind(&visit.ip)
        .bind(&visit.user_agent)
        .bind(&visit.page)
        .bind(&visit.referrer)
        .bind(visit.screen_width)
        .bind(visit.screen_height)
        .bind(&visit.language)
        .bind(at)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn get_visitor(&self, ip: &str) -> StorageResult<Option<Visitor>> {
        let visitor = sqlx::query_as::<_, Visitor>(
            r#"
            SELECT id, ip, user_agent, page, referrer, screen_width, screen_height, language,
                   visit_count, first_visit_at, last_visit_at
            FROM visitors
            WHERE ip = $1
            "#,
        )
        .bind(ip)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(visitor)
    }

    async fn count_visitors(&self, filter: VisitorFilter) -> StorageResult<i64> {
        let query = match filter {
            VisitorFilter::All => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM visitors"),
            VisitorFilter::LastVisitSince(since) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM visitors WHERE last_visit_at >= $1")
                    .bind(since)
            }
            VisitorFilter::FirstVisitSince(since) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM visitors WHERE first_visit_at >= $1")
                    .bind(since)
            }
            VisitorFilter::LastVisitBetween(start, end) => sqlx::query_scalar(
                "SELECT COUNT(*) FROM visitors WHERE last_visit_at >= $1 AND last_visit_at < $2",
            )
            .bind(start)
            .bind(end),
            VisitorFilter::Returning => {
                sqlx::query_scalar("SELECT COUNT(*) FROM visitors WHERE visit_count > 1")
            }
        };

        Ok(query.fetch_one(self.pool.as_ref()).await?)
    }

    async fn total_page_views(&self) -> StorageResult<i64> {
        // SUM over BIGINT yields NUMERIC in PostgreSQL
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(visit_count), 0)::BIGINT FROM visitors",
        )
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(total)
    }

    async fn count_active(&self, kind: EntityKind) -> StorageResult<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL",
            kind.table()
        );
        let count = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count)
    }

    async fn create_exhibition(&self, req: &CreateExhibitionRequest) -> StorageResult<Exhibition> {
        let now = now_secs()?;

        let exhibition = sqlx::query_as::<_, Exhibition>(
            r#"
            INSERT INTO exhibitions (id, title, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING id, title, description, preview_exhibit_id, created_at, updated_at
            "#,
        )
        .bind(new_id())
        .bind(&req.title)
        .bind(&req.description)
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(exhibition)
    }

    async fn get_exhibition(&self, id: &str) -> StorageResult<Option<Exhibition>> {
        self.fetch_exhibition(id).await
    }

    async fn list_exhibitions(&self) -> StorageResult<Vec<Exhibition>> {
        let mut exhibitions = sqlx::query_as::<_, Exhibition>(
            r#"
            SELECT id, title, description, preview_exhibit_id, created_at, updated_at
            FROM exhibitions
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        let exhibits = sqlx::query_as::<_, Exhibit>(
            r#"
            SELECT id, exhibition_id, title, description, image_url, created_at, updated_at
            FROM exhibits
            WHERE deleted_at IS NULL
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        let mut by_exhibition: HashMap<String, Vec<Exhibit>> = HashMap::new();
        for exhibit in exhibits {
            by_exhibition
                .entry(exhibit.exhibition_id.clone())
                .or_default()
                .push(exhibit);
        }
        for exhibition in &mut exhibitions {
            exhibition.exhibits = by_exhibition.remove(&exhibition.id).unwrap_or_default();
        }

        Ok(exhibitions)
    }

    async fn update_exhibition(
        &self,
        id: &str,
        req: &UpdateExhibitionRequest,
    ) -> StorageResult<Exhibition> {
        let now = now_secs()?;

        let result = sqlx::query(
            r#"
            UPDATE exhibitions
            SET title = COALESCE($1, title),
                description = COALESCE($2, description),
                updated_at = $3
            WHERE id = $4 AND deleted_at IS NULL
            "#,
        )
        .bind(req.title.as_deref())
        .bind(req.description.as_deref())
        .bind(now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("exhibition"));
        }

        self.fetch_exhibition(id)
            .await?
            .ok_or(StorageError::NotFound("exhibition"))
    }

    async fn delete_exhibition(&self, id: &str) -> StorageResult<bool> {
        let now = now_secs()?;

        let result = sqlx::query(
            r#"
            UPDATE exhibitions
            SET deleted_at = $1
            WHERE id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_exhibition_preview(
        &self,
        id: &str,
        exhibit_id: Option<&str>,
    ) -> StorageResult<Exhibition> {
        if let Some(exhibit_id) = exhibit_id {
            let exhibit = self
                .get_exhibit(exhibit_id)
                .await?
                .ok_or(StorageError::NotFound("exhibit"))?;
            if exhibit.exhibition_id != id {
                return Err(StorageError::Validation(
                    "preview exhibit belongs to another exhibition".to_string(),
                ));
            }
        }

        let now = now_secs()?;
        let result = sqlx::query(
            r#"
            UPDATE exhibitions
            SET preview_exhibit_id = $1, updated_at = $2
            WHERE id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(exhibit_id)
        .bind(now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound("exhibition"));
        }

        self.fetch_exhibition(id)
            .await?
            .ok_or(StorageError::NotFound("exhibition"))
    }

    async fn create_exhibit(&self, req: &CreateExhibitRequest) -> StorageResult<Exhibit> {
        let now = now_secs()?;

        let exhibit = sqlx::query_as::<_, Exhibit>(
            r#"
            INSERT INTO exhibits (id, exhibition_id, title, description, image_url, created_at, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, $6
            WHERE EXISTS (SELECT 1 FROM exhibitions WHERE id = $2 AND deleted_at IS NULL)
            RETURNING id, exhibition_id, title, description, image_url, created_at, updated_at
            "#,
        )
        .bind(new_id())
        .bind(&req.exhibition_id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.image_url)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await?;

        exhibit.ok_or(StorageError::NotFound("exhibition"))
    }

    async fn get_exhibit(&self, id: &str) -> StorageResult<Option<Exhibit>> {
        let exhibit = sqlx::query_as::<_, Exhibit>(
            r#"
            SELECT id, exhibition_id, title, description, image_url, created_at, updated_at
            FROM exhibits
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(exhibit)
    }

    async fn update_exhibit(&self, id: &str, req: &UpdateExhibitRequest) -> StorageResult<Exhibit> {
        let now = now_secs()?;

        let exhibit = sqlx::query_as::<_, Exhibit>(
            r#"
            UPDATE exhibits
            SET exhibition_id = COALESCE($1::TEXT, exhibition_id),
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                image_url = COALESCE($4, image_url),
                updated_at = $5
            WHERE id = $6 AND deleted_at IS NULL
              AND ($1::TEXT IS NULL OR EXISTS (
                  SELECT 1 FROM exhibitions WHERE id = $1::TEXT AND deleted_at IS NULL
              ))
            RETURNING id, exhibition_id, title, description, image_url, created_at, updated_at
            "#,
        )
        .bind(req.exhibition_id.as_deref())
        .bind(req.title.as_deref())
        .bind(req.description.as_deref())
        .bind(req.image_url.as_deref())
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match exhibit {
            Some(exhibit) => Ok(exhibit),
            // Either the exhibit or the target exhibition is missing
            None => match self.get_exhibit(id).await? {
                Some(_) => Err(StorageError::NotFound("exhibition")),
                None => Err(StorageError::NotFound("exhibit")),
            },
        }
    }

    async fn delete_exhibit(&self, id: &str) -> StorageResult<bool> {
        let now = now_secs()?;

        let result = sqlx::query(
            r#"
            UPDATE exhibits
            SET deleted_at = $1
            WHERE id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn create_news(&self, req: &CreateNewsRequest) -> StorageResult<News> {
        let now = now_secs()?;

        let news = sqlx::query_as::<_, News>(
            r#"
            INSERT INTO news (id, title, content, image_urls, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING id, title, content, image_urls, created_at, updated_at
            "#,
        )
        .bind(new_id())
        .bind(&req.title)
        .bind(&req.content)
        .bind(Json(&req.image_urls))
        .bind(now)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(news)
    }

    async fn get_news(&self, id: &str) -> StorageResult<Option<News>> {
        let news = sqlx::query_as::<_, News>(
            r#"
            SELECT id, title, content, image_urls, created_at, updated_at
            FROM news
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(news)
    }

    async fn list_news(&self) -> StorageResult<Vec<News>> {
        let news = sqlx::query_as::<_, News>(
            r#"
            SELECT id, title, content, image_urls, created_at, updated_at
            FROM news
            WHERE deleted_at IS NULL
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(news)
    }

    async fn update_news(&self, id: &str, req: &UpdateNewsRequest) -> StorageResult<News> {
        let now = now_secs()?;

        let news = sqlx::query_as::<_, News>(
            r#"
            UPDATE news
            SET title = COALESCE($1, title),
                content = COALESCE($2, content),
                image_urls = COALESCE($3, image_urls),
                updated_at = $4
            WHERE id = $5 AND deleted_at IS NULL
            RETURNING id, title, content, image_urls, created_at, updated_at
            "#,
        )
        .bind(req.title.as_deref())
        .bind(req.content.as_deref())
        .bind(req.image_urls.as_ref().map(Json))
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        news.ok_or(StorageError::NotFound("news"))
    }

    async fn delete_news(&self, id: &str) -> StorageResult<bool> {
        let now = now_secs()?;

        let result = sqlx::query(
            r#"
            UPDATE news
            SET deleted_at = $1
            WHERE id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
