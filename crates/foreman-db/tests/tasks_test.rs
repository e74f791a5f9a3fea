//! Integration tests for the Task Store Client's task queries, run against a
//! real Postgres instance per test via `foreman-test-utils`.

use chrono::Duration;

use foreman_db::models::{MergeMethod, Priority, Queue};
use foreman_db::pool;
use foreman_db::queries::tasks::{self, NewTask, TaskFilter};

use foreman_test_utils::{create_test_db, drop_test_db};

const SCOPE: &str = "test-scope";

fn new_task(id: &str, priority: Priority) -> NewTask {
    NewTask {
        id: id.to_owned(),
        title: format!("task {id}"),
        role: "builder".into(),
        priority,
        branch: format!("task/{id}"),
        flow: "default".into(),
        type_: None,
        blocked_by: None,
        project_id: None,
        breakdown_id: None,
        breakdown_depth: 0,
        merge_method: MergeMethod::Squash,
        hooks: vec![],
        checks: vec![],
        file_path: format!("tasks/{id}.md"),
        expedite: false,
        created_by: "test".into(),
    }
}

#[tokio::test]
async fn create_and_get_roundtrip() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    let created = tasks::create_task(&pool, SCOPE, new_task("t1", Priority::P1))
        .await
        .unwrap();
    assert_eq!(created.queue, Queue::Incoming);
    assert_eq!(created.version, 1);

    let fetched = tasks::get_task(&pool, SCOPE, "t1").await.unwrap();
    assert_eq!(fetched.id, "t1");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn create_rejects_literal_none_blocked_by() {
    use foreman_db::models::StoreError;

    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    let mut new = new_task("t1", Priority::P1);
    new.blocked_by = Some("None".into());
    let err = tasks::create_task(&pool, SCOPE, new).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidArgument(_)));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_orders_by_expedite_then_priority_then_created_at() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    tasks::create_task(&pool, SCOPE, new_task("a", Priority::P2)).await.unwrap();
    tasks::create_task(&pool, SCOPE, new_task("b", Priority::P0)).await.unwrap();
    let mut expedited = new_task("c", Priority::P3);
    expedited.expedite = true;
    tasks::create_task(&pool, SCOPE, expedited).await.unwrap();

    let listed = tasks::list_tasks(&pool, SCOPE, &TaskFilter::default())
        .await
        .unwrap();
    let ids: Vec<&str> = listed.iter().map(|t| t.id.as_str()).collect();

    assert_eq!(ids, vec!["c", "b", "a"]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_next_moves_to_claimed_and_sets_lease() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    tasks::create_task(&pool, SCOPE, new_task("t1", Priority::P1)).await.unwrap();

    let claimed = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap()
        .expect("a task should be claimable");

    assert_eq!(claimed.queue, Queue::Claimed);
    assert_eq!(claimed.claimed_by.as_deref(), Some("builder"));
    assert_eq!(claimed.attempt_count, 1);
    assert!(claimed.lease_expires_at.is_some());

    let none = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap();
    assert!(none.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_next_respects_unresolved_blockers() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    tasks::create_task(&pool, SCOPE, new_task("blocker", Priority::P1)).await.unwrap();

    let mut blocked = new_task("blocked", Priority::P1);
    blocked.blocked_by = Some("blocker".into());
    tasks::create_task(&pool, SCOPE, blocked).await.unwrap();

    // Only the blocker is claimable; the blocked task is not.
    let first = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap()
        .expect("the blocker task should be claimable");
    assert_eq!(first.id, "blocker");

    let second = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap();
    assert!(second.is_none(), "blocked task must not be claimable yet");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn submit_accept_lifecycle() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    tasks::create_task(&pool, SCOPE, new_task("t1", Priority::P1)).await.unwrap();
    let claimed = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap()
        .unwrap();

    let submitted = tasks::submit_task(&pool, SCOPE, &claimed.id, claimed.version, 3, 5)
        .await
        .unwrap();
    assert_eq!(submitted.queue, Queue::Provisional);
    assert_eq!(submitted.commits_count, 3);

    let accepted = tasks::accept_task(&pool, SCOPE, &submitted.id, submitted.version)
        .await
        .unwrap();
    assert_eq!(accepted.queue, Queue::Done);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reject_increments_rejection_count() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    tasks::create_task(&pool, SCOPE, new_task("t1", Priority::P1)).await.unwrap();
    let claimed = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap()
        .unwrap();
    let submitted = tasks::submit_task(&pool, SCOPE, &claimed.id, claimed.version, 1, 1)
        .await
        .unwrap();

    let rejected = tasks::reject_task(&pool, SCOPE, &submitted.id, submitted.version, 3)
        .await
        .unwrap();
    assert_eq!(rejected.queue, Queue::Incoming);
    assert_eq!(rejected.rejection_count, 1);
    assert!(rejected.claimed_by.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reject_escalates_at_rotation_cap() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    tasks::create_task(&pool, SCOPE, new_task("t1", Priority::P1)).await.unwrap();
    let mut task = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap()
        .unwrap();

    for expected_count in 1..=3 {
        let submitted = tasks::submit_task(&pool, SCOPE, &task.id, task.version, 1, 1).await.unwrap();
        let rejected = tasks::reject_task(&pool, SCOPE, &submitted.id, submitted.version, 3)
            .await
            .unwrap();
        assert_eq!(rejected.rejection_count, expected_count);
        if expected_count < 3 {
            assert_eq!(rejected.queue, Queue::Incoming);
            task = tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
                .await
                .unwrap()
                .unwrap();
        } else {
            assert_eq!(rejected.queue, Queue::Escalated);
        }
    }

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stale_version_is_a_conflict_not_silently_applied() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    let created = tasks::create_task(&pool, SCOPE, new_task("t1", Priority::P1))
        .await
        .unwrap();

    // Claim once to bump the version out from under a stale caller.
    tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(10))
        .await
        .unwrap();

    let result = tasks::accept_task(&pool, SCOPE, &created.id, created.version).await;
    assert!(result.is_err(), "stale version must not silently apply");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_zombies_requeues_expired_leases() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool, pool::default_migrations_path())
        .await
        .unwrap();

    tasks::create_task(&pool, SCOPE, new_task("t1", Priority::P1)).await.unwrap();
    tasks::claim_next(&pool, SCOPE, "builder", "orch-1", Duration::minutes(-1))
        .await
        .unwrap();

    let reclaimed = tasks::reclaim_zombies(&pool, SCOPE, chrono::Utc::now())
        .await
        .unwrap();
    assert_eq!(reclaimed, vec!["t1".to_string()]);

    let task = tasks::get_task(&pool, SCOPE, "t1").await.unwrap();
    assert_eq!(task.queue, Queue::Incoming);
    assert!(task.claimed_by.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}
