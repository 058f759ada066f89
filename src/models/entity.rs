use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Kinds of museum content counted by the statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Exhibition,
    Exhibit,
    News,
}

impl EntityKind {
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Exhibition => "exhibitions",
            EntityKind::Exhibit => "exhibits",
            EntityKind::News => "news",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exhibition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub preview_exhibit_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[sqlx(skip)]
    #[serde(default)]
    pub exhibits: Vec<Exhibit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exhibit {
    pub id: String,
    pub exhibition_id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct News {
    pub id: String,
    pub title: String,
    pub content: String,
    pub image_urls: Json<Vec<String>>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExhibitionRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// Partial update: absent fields keep their stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateExhibitionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetPreviewRequest {
    pub exhibit_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateExhibitRequest {
    pub exhibition_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub image_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateExhibitRequest {
    pub exhibition_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNewsRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateNewsRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub image_urls: Option<Vec<String>>,
}
