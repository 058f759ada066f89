//! Behavior every storage backend must share, run against the in-memory and
//! SQLite backends.

use crate::models::{
    CreateExhibitRequest, CreateExhibitionRequest, CreateNewsRequest, EntityKind, NewVisit,
    UpdateExhibitRequest, UpdateExhibitionRequest, UpdateNewsRequest, VisitorFilter,
};
use crate::storage::{MemoryStorage, SqliteStorage, Storage, StorageError};
use std::path::PathBuf;
use std::sync::Arc;

async fn setup_memory() -> Arc<dyn Storage> {
    let storage = MemoryStorage::new();
    storage.init().await.unwrap();
    Arc::new(storage)
}

async fn setup_sqlite() -> Arc<dyn Storage> {
    let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
    storage.init().await.unwrap();
    Arc::new(storage)
}

/// File-backed database so concurrent connections see one schema and use WAL.
async fn setup_sqlite_file() -> (Arc<dyn Storage>, PathBuf) {
    let path = std::env::temp_dir().join(format!("museum-test-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());
    let storage = SqliteStorage::new(&url, 5).await.unwrap();
    storage.init().await.unwrap();
    (Arc::new(storage), path)
}

fn remove_db_files(path: &PathBuf) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
    }
}

fn visit(ip: &str) -> NewVisit {
    NewVisit {
        ip: ip.to_string(),
        user_agent: "Mozilla/5.0".to_string(),
        page: "/".to_string(),
        ..Default::default()
    }
}

async fn check_first_visit_creates_visitor(storage: Arc<dyn Storage>) {
    storage.record_visit(&visit("10.0.0.1"), 1_000).await.unwrap();

    let visitor = storage.get_visitor("10.0.0.1").await.unwrap().unwrap();
    assert_eq!(visitor.visit_count, 1);
    assert_eq!(visitor.first_visit_at, 1_000);
    assert_eq!(visitor.last_visit_at, 1_000);
    assert!(storage.get_visitor("10.0.0.2").await.unwrap().is_none());
}

async fn check_repeat_visit_merges_fields(storage: Arc<dyn Storage>) {
    let first = NewVisit {
        referrer: "https://search.example".to_string(),
        screen_width: 1920,
        screen_height: 1080,
        language: "en-US".to_string(),
        ..visit("10.0.0.1")
    };
    storage.record_visit(&first, 1_000).await.unwrap();

    let second = NewVisit {
        user_agent: "curl/8.0".to_string(),
        page: "/exhibitions".to_string(),
        ..visit("10.0.0.1")
    };
    storage.record_visit(&second, 2_000).await.unwrap();

    let visitor = storage.get_visitor("10.0.0.1").await.unwrap().unwrap();
    assert_eq!(visitor.visit_count, 2);
    assert_eq!(visitor.first_visit_at, 1_000);
    assert_eq!(visitor.last_visit_at, 2_000);
    assert_eq!(visitor.user_agent, "curl/8.0");
    assert_eq!(visitor.page, "/exhibitions");
    assert_eq!(visitor.referrer, "https://search.example");
    assert_eq!(visitor.screen_width, 1920);
    assert_eq!(visitor.screen_height, 1080);
    assert_eq!(visitor.language, "en-US");

    // An out-of-order timestamp still counts but never rewinds last_visit_at
    storage.record_visit(&visit("10.0.0.1"), 1_500).await.unwrap();
    let visitor = storage.get_visitor("10.0.0.1").await.unwrap().unwrap();
    assert_eq!(visitor.visit_count, 3);
    assert_eq!(visitor.last_visit_at, 2_000);
}

async fn check_visitor_counts(storage: Arc<dyn Storage>) {
    storage.record_visit(&visit("10.0.0.1"), 100).await.unwrap();
    storage.record_visit(&visit("10.0.0.1"), 500).await.unwrap();
    storage.record_visit(&visit("10.0.0.2"), 300).await.unwrap();
    storage.record_visit(&visit("10.0.0.3"), 600).await.unwrap();

    for (filter, expected) in [
        (VisitorFilter::All, 3),
        (VisitorFilter::LastVisitSince(500), 2),
        (VisitorFilter::FirstVisitSince(300), 2),
        (VisitorFilter::LastVisitBetween(300, 600), 2),
        (VisitorFilter::Returning, 1),
    ] {
        assert_eq!(
            storage.count_visitors(filter).await.unwrap(),
            expected,
            "{:?}",
            filter
        );
    }
    assert_eq!(storage.total_page_views().await.unwrap(), 4);
}

async fn check_empty_totals(storage: Arc<dyn Storage>) {
    assert_eq!(storage.count_visitors(VisitorFilter::All).await.unwrap(), 0);
    assert_eq!(storage.total_page_views().await.unwrap(), 0);
    for kind in [EntityKind::Exhibition, EntityKind::Exhibit, EntityKind::News] {
        assert_eq!(storage.count_active(kind).await.unwrap(), 0);
    }
}

async fn check_exhibition_lifecycle(storage: Arc<dyn Storage>) {
    let exhibition = storage
        .create_exhibition(&CreateExhibitionRequest {
            title: "Bronze Age".to_string(),
            description: "Tools and ornaments".to_string(),
        })
        .await
        .unwrap();
    assert!(exhibition.exhibits.is_empty());
    assert!(exhibition.preview_exhibit_id.is_none());

    let exhibit = storage
        .create_exhibit(&CreateExhibitRequest {
            exhibition_id: exhibition.id.clone(),
            title: "Axe head".to_string(),
            description: String::new(),
            image_url: "https://cdn.example/axe.jpg".to_string(),
        })
        .await
        .unwrap();

    let fetched = storage.get_exhibition(&exhibition.id).await.unwrap().unwrap();
    assert_eq!(fetched.exhibits.len(), 1);
    assert_eq!(fetched.exhibits[0].id, exhibit.id);

    let updated = storage
        .update_exhibition(
            &exhibition.id,
            &UpdateExhibitionRequest {
                title: Some("Bronze Age Europe".to_string()),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Bronze Age Europe");
    assert_eq!(updated.description, "Tools and ornaments");

    let with_preview = storage
        .set_exhibition_preview(&exhibition.id, Some(&exhibit.id))
        .await
        .unwrap();
    assert_eq!(with_preview.preview_exhibit_id.as_deref(), Some(exhibit.id.as_str()));

    let cleared = storage
        .set_exhibition_preview(&exhibition.id, None)
        .await
        .unwrap();
    assert!(cleared.preview_exhibit_id.is_none());

    let listed = storage.list_exhibitions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].exhibits.len(), 1);
}

async fn check_exhibit_requires_live_exhibition(storage: Arc<dyn Storage>) {
    let result = storage
        .create_exhibit(&CreateExhibitRequest {
            exhibition_id: "missing".to_string(),
            title: "Orphan".to_string(),
            description: String::new(),
            image_url: String::new(),
        })
        .await;
    assert!(matches!(result, Err(StorageError::NotFound("exhibition"))));

    let exhibition = storage
        .create_exhibition(&CreateExhibitionRequest {
            title: "Temporary".to_string(),
            description: String::new(),
        })
        .await
        .unwrap();
    assert!(storage.delete_exhibition(&exhibition.id).await.unwrap());

    let result = storage
        .create_exhibit(&CreateExhibitRequest {
            exhibition_id: exhibition.id.clone(),
            title: "Late arrival".to_string(),
            description: String::new(),
            image_url: String::new(),
        })
        .await;
    assert!(matches!(result, Err(StorageError::NotFound("exhibition"))));
}

async fn check_exhibit_move_and_preview_rules(storage: Arc<dyn Storage>) {
    let first = storage
        .create_exhibition(&CreateExhibitionRequest {
            title: "First".to_string(),
            description: String::new(),
        })
        .await
        .unwrap();
    let second = storage
        .create_exhibition(&CreateExhibitionRequest {
            title: "Second".to_string(),
            description: String::new(),
        })
        .await
        .unwrap();
    let exhibit = storage
        .create_exhibit(&CreateExhibitRequest {
            exhibition_id: first.id.clone(),
            title: "Vase".to_string(),
            description: String::new(),
            image_url: String::new(),
        })
        .await
        .unwrap();

    // Preview must belong to the exhibition it decorates
    let result = storage
        .set_exhibition_preview(&second.id, Some(&exhibit.id))
        .await;
    assert!(matches!(result, Err(StorageError::Validation(_))));

    let result = storage
        .set_exhibition_preview(&first.id, Some("missing"))
        .await;
    assert!(matches!(result, Err(StorageError::NotFound("exhibit"))));

    let result = storage
        .update_exhibit(
            &exhibit.id,
            &UpdateExhibitRequest {
                exhibition_id: Some("missing".to_string()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(result, Err(StorageError::NotFound("exhibition"))));

    let result = storage
        .update_exhibit("missing", &UpdateExhibitRequest::default())
        .await;
    assert!(matches!(result, Err(StorageError::NotFound("exhibit"))));

    let moved = storage
        .update_exhibit(
            &exhibit.id,
            &UpdateExhibitRequest {
                exhibition_id: Some(second.id.clone()),
                title: Some("Amphora".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(moved.exhibition_id, second.id);
    assert_eq!(moved.title, "Amphora");

    let second = storage.get_exhibition(&second.id).await.unwrap().unwrap();
    assert_eq!(second.exhibits.len(), 1);
    let first = storage.get_exhibition(&first.id).await.unwrap().unwrap();
    assert!(first.exhibits.is_empty());
}

async fn check_soft_delete_hides_rows(storage: Arc<dyn Storage>) {
    let news = storage
        .create_news(&CreateNewsRequest {
            title: "Reopening".to_string(),
            content: "Doors open Monday".to_string(),
            image_urls: vec!["https://cdn.example/door.jpg".to_string()],
        })
        .await
        .unwrap();
    storage
        .create_news(&CreateNewsRequest {
            title: "Late hours".to_string(),
            content: "Open until 21:00 on Fridays".to_string(),
            image_urls: Vec::new(),
        })
        .await
        .unwrap();
    assert_eq!(storage.count_active(EntityKind::News).await.unwrap(), 2);

    let updated = storage
        .update_news(
            &news.id,
            &UpdateNewsRequest {
                image_urls: Some(Vec::new()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.image_urls.0.is_empty());
    assert_eq!(updated.title, "Reopening");

    assert!(storage.delete_news(&news.id).await.unwrap());
    assert!(!storage.delete_news(&news.id).await.unwrap());
    assert!(storage.get_news(&news.id).await.unwrap().is_none());
    assert_eq!(storage.list_news().await.unwrap().len(), 1);
    assert_eq!(storage.count_active(EntityKind::News).await.unwrap(), 1);

    let result = storage
        .update_news(&news.id, &UpdateNewsRequest::default())
        .await;
    assert!(matches!(result, Err(StorageError::NotFound("news"))));
}

macro_rules! conformance_suite {
    ($module:ident, $setup:ident) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn test_first_visit_creates_visitor() {
                check_first_visit_creates_visitor($setup().await).await;
            }

            #[tokio::test]
            async fn test_repeat_visit_merges_fields() {
                check_repeat_visit_merges_fields($setup().await).await;
            }

            #[tokio::test]
            async fn test_visitor_counts() {
                check_visitor_counts($setup().await).await;
            }

            #[tokio::test]
            async fn test_empty_totals() {
                check_empty_totals($setup().await).await;
            }

            #[tokio::test]
            async fn test_exhibition_lifecycle() {
                check_exhibition_lifecycle($setup().await).await;
            }

            #[tokio::test]
            async fn test_exhibit_requires_live_exhibition() {
                check_exhibit_requires_live_exhibition($setup().await).await;
            }

            #[tokio::test]
            async fn test_exhibit_move_and_preview_rules() {
                check_exhibit_move_and_preview_rules($setup().await).await;
            }

            #[tokio::test]
            async fn test_soft_delete_hides_rows() {
                check_soft_delete_hides_rows($setup().await).await;
            }
        }
    };
}

conformance_suite!(memory, setup_memory);
conformance_suite!(sqlite, setup_sqlite);

async fn check_concurrent_visits_from_one_ip(storage: Arc<dyn Storage>) {
    storage.record_visit(&visit("192.168.1.1"), 1_000).await.unwrap();

    let mut handles = vec![];
    for i in 0..20 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage
                .record_visit(&visit("192.168.1.1"), 1_001 + i)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let visitor = storage.get_visitor("192.168.1.1").await.unwrap().unwrap();
    assert_eq!(visitor.visit_count, 21, "no increment may be lost");
    assert_eq!(visitor.first_visit_at, 1_000);
    assert_eq!(visitor.last_visit_at, 1_020);
    assert_eq!(storage.count_visitors(VisitorFilter::All).await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_visits_memory() {
    check_concurrent_visits_from_one_ip(setup_memory().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_visits_sqlite_file() {
    let (storage, path) = setup_sqlite_file().await;
    check_concurrent_visits_from_one_ip(storage).await;
    remove_db_files(&path);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_visits_sqlite_file() {
    let (storage, path) = setup_sqlite_file().await;

    let mut handles = vec![];
    for i in 0..10 {
        let storage = Arc::clone(&storage);
        handles.push(tokio::spawn(async move {
            storage.record_visit(&visit("172.16.0.9"), 5_000 + i).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let visitor = storage.get_visitor("172.16.0.9").await.unwrap().unwrap();
    assert_eq!(visitor.visit_count, 10);
    assert_eq!(storage.count_visitors(VisitorFilter::All).await.unwrap(), 1);
    remove_db_files(&path);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_memory_sqlite_shares_one_database_across_pool() {
    // A pool size above one must still see the schema created by init
    let storage = SqliteStorage::new("sqlite::memory:", 5).await.unwrap();
    storage.init().await.unwrap();
    check_concurrent_visits_from_one_ip(Arc::new(storage)).await;
}
