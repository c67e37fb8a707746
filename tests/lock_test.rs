//! Tests for SqliteLockManager.

mod common;

use std::sync::Arc;

use syncflow::{LockManager, SqliteLockManager};

use common::{memory_pool, start_time};

async fn setup_locks() -> SqliteLockManager {
    let locks = SqliteLockManager::new(memory_pool().await);
    locks.run_migrations().await.unwrap();
    locks
}

#[tokio::test]
async fn test_acquire_is_exclusive_and_reentrant() {
    let locks = setup_locks().await;

    assert!(locks.try_acquire("import", "task:1", start_time()).await.unwrap());
    assert!(!locks.try_acquire("import", "task:2", start_time()).await.unwrap());
    // Same holder may take it again
    assert!(locks.try_acquire("import", "task:1", start_time()).await.unwrap());

    assert_eq!(
        locks.holder("import").await.unwrap().as_deref(),
        Some("task:1")
    );
}

#[tokio::test]
async fn test_release_owned_checks_holder() {
    let locks = setup_locks().await;
    locks.try_acquire("import", "task:1", start_time()).await.unwrap();

    assert!(!locks.release_owned("import", "task:2").await.unwrap());
    assert!(locks.is_held("import").await.unwrap());

    assert!(locks.release_owned("import", "task:1").await.unwrap());
    assert!(!locks.is_held("import").await.unwrap());
    assert!(!locks.release_owned("import", "task:1").await.unwrap());
}

#[tokio::test]
async fn test_forced_release_frees_for_next_holder() {
    let locks = setup_locks().await;
    locks.try_acquire("import", "task:1", start_time()).await.unwrap();

    locks.release("import").await.unwrap();
    assert!(locks.holder("import").await.unwrap().is_none());
    assert!(locks.try_acquire("import", "task:2", start_time()).await.unwrap());

    // Releasing a free lock is not an error
    locks.release("export").await.unwrap();
}

#[tokio::test]
async fn test_concurrent_acquire_has_one_winner() {
    let locks = Arc::new(setup_locks().await);

    let attempts = (0..8).map(|n| {
        let locks = locks.clone();
        async move {
            locks
                .try_acquire("import", &format!("task:{}", n), start_time())
                .await
                .unwrap()
        }
    });
    let results = futures::future::join_all(attempts).await;

    assert_eq!(results.iter().filter(|won| **won).count(), 1);
}
