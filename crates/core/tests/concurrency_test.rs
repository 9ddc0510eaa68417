//! Multi-connection behaviour against a file database.

use runledger_core::config::DatabaseConfig;
use runledger_core::events::{EventType, NewEvent, TrajectoryFilter};
use runledger_core::prelude::*;
use runledger_core::review::{PolicyTrigger, ReviewPolicyFields};
use runledger_core::run::NewRun;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn create_test_store() -> (TempDir, Arc<SqliteStore>) {
    init_logging();
    let temp_dir = TempDir::new().expect("temp dir");
    let config = RunledgerConfig {
        database: DatabaseConfig::at_path(temp_dir.path().join("ledger.db")),
        ..RunledgerConfig::default()
    };
    let store = SqliteStore::open(&config).expect("store");
    (temp_dir, Arc::new(store))
}

async fn project(store: &SqliteStore, cx: &Context) -> ProjectId {
    store
        .create_project(cx, ProjectFields::named("concurrency"))
        .await
        .expect("project")
        .id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_commits_create_exactly_one_review() {
    let (_dir, store) = create_test_store();
    let cx = Context::new(TenantId::new());
    let project = project(&store, &cx).await;
    const THRESHOLD: i64 = 8;
    store
        .create_review_policy(
            &cx,
            project,
            ReviewPolicyFields::new(
                "batch",
                PolicyTrigger::CommitThreshold {
                    threshold: THRESHOLD,
                },
            ),
        )
        .await
        .expect("policy");
    let engine = ReviewEngine::new(store.clone(), store.clone());

    let mut handles = Vec::new();
    for _ in 0..THRESHOLD {
        let engine = engine.clone();
        let cx = cx.clone();
        handles.push(tokio::spawn(async move {
            engine.on_commits(&cx, project, "main", 1).await
        }));
    }
    let mut fired = 0;
    for handle in handles {
        if handle.await.expect("join").expect("on_commits").is_some() {
            fired += 1;
        }
    }

    assert_eq!(fired, 1);
    let reviews = store.list_reviews_by_project(&cx, project).await.unwrap();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].trigger_ref, format!("commits:main:{THRESHOLD}"));
    let policies = store.list_review_policies_by_project(&cx, project).await.unwrap();
    assert_eq!(policies[0].commit_counter, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotation_has_one_winner() {
    let (_dir, store) = create_test_store();
    let cx = Context::new(TenantId::new());
    let issued = store
        .issue(&cx, UserId::new(), time::Duration::hours(1))
        .await
        .expect("issue");

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        let cx = cx.clone();
        let token = issued.token.clone();
        handles.push(tokio::spawn(async move {
            store.rotate(&cx, &token, time::Duration::hours(1)).await
        }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.expect("join") {
            Ok(next) => winners.push(next),
            Err(e) => assert!(e.is_not_found(), "unexpected error {e:?}"),
        }
    }
    assert_eq!(winners.len(), 1);

    let again = store
        .rotate(&cx, &issued.token, time::Duration::hours(1))
        .await
        .unwrap_err();
    assert!(again.is_not_found());
    store
        .rotate(&cx, &winners[0].token, time::Duration::hours(1))
        .await
        .expect("new token is usable");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trajectory_paging_is_exact_while_other_runs_append() {
    let (_dir, store) = create_test_store();
    let cx = Context::new(TenantId::new());
    let project = project(&store, &cx).await;
    let agent = AgentId::new();
    let task = TaskId::new();

    let watched = store
        .create_run(&cx, NewRun::new(project, task, agent))
        .await
        .unwrap();
    for i in 0..30 {
        let event = NewEvent::new(project, agent, EventType::ToolCall, json!({ "i": i }))
            .for_run(task, watched.id);
        store.append(&cx, event).await.unwrap();
    }

    let noisy_runs: Vec<RunId> = {
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                store
                    .create_run(&cx, NewRun::new(project, task, agent))
                    .await
                    .unwrap()
                    .id,
            );
        }
        ids
    };
    let writer = {
        let store = store.clone();
        let cx = cx.clone();
        tokio::spawn(async move {
            for i in 0..60 {
                let run = noisy_runs[i % noisy_runs.len()];
                let event = NewEvent::new(project, agent, EventType::AgentMessage, json!({ "i": i }))
                    .for_run(task, run);
                store.append(&cx, event).await.unwrap();
            }
        })
    };

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = store
            .load_trajectory(&cx, watched.id, TrajectoryFilter::default(), cursor, Some(7))
            .await
            .unwrap();
        assert_eq!(page.total, 30);
        assert!(page.events.iter().all(|e| e.run_id == Some(watched.id)));
        seen.extend(page.events.iter().map(|e| e.version));
        if !page.has_more {
            break;
        }
        cursor = page.cursor;
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    assert_eq!(seen, (1..=30).collect::<Vec<i64>>());
    let unique: HashSet<_> = seen.iter().collect();
    assert_eq!(unique.len(), 30);
}
