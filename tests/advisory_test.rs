//! Tests for MemoryAdvisoryStore and SqliteAdvisoryStore.

mod common;

use chrono::Duration;
use syncflow::{AdvisoryKind, AdvisoryStore, MemoryAdvisoryStore, SqliteAdvisoryStore};

use common::{memory_pool, start_time};

async fn stores() -> Vec<(&'static str, Box<dyn AdvisoryStore>)> {
    let sqlite = SqliteAdvisoryStore::new(memory_pool().await);
    sqlite.run_migrations().await.unwrap();
    vec![
        ("memory", Box::new(MemoryAdvisoryStore::new())),
        ("sqlite", Box::new(sqlite)),
    ]
}

#[tokio::test]
async fn test_repeated_failures_collapse() {
    for (name, store) in stores().await {
        let first = start_time();
        let later = first + Duration::minutes(20);

        store
            .raise(AdvisoryKind::SyncFailed, "import", "HTTP 401", first)
            .await
            .unwrap();
        let advisory = store
            .raise(AdvisoryKind::SyncFailed, "import", "HTTP 403", later)
            .await
            .unwrap();

        assert_eq!(advisory.occurrences, 2, "{}", name);
        assert_eq!(advisory.message, "HTTP 403");
        assert_eq!(advisory.first_seen, first);
        assert_eq!(advisory.last_seen, later);
        assert_eq!(
            store
                .get(AdvisoryKind::SyncFailed, "import")
                .await
                .unwrap()
                .as_ref(),
            Some(&advisory),
            "{}",
            name
        );
    }
}

#[tokio::test]
async fn test_kinds_and_types_are_separate() {
    for (name, store) in stores().await {
        store
            .raise(AdvisoryKind::SyncFailed, "import", "boom", start_time())
            .await
            .unwrap();
        store
            .raise(AdvisoryKind::SyncOverdue, "import", "late", start_time())
            .await
            .unwrap();
        store
            .raise(AdvisoryKind::SyncFailed, "export", "boom", start_time())
            .await
            .unwrap();

        assert_eq!(store.list().await.unwrap().len(), 3, "{}", name);
        assert!(store
            .get(AdvisoryKind::SyncOverdue, "export")
            .await
            .unwrap()
            .is_none());

        assert_eq!(store.resolve("import").await.unwrap(), 2, "{}", name);
        let left = store.list().await.unwrap();
        assert_eq!(left.len(), 1, "{}", name);
        assert_eq!(left[0].task_type, "export");
        assert_eq!(store.resolve("import").await.unwrap(), 0, "{}", name);
    }
}
