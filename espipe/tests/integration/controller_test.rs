use std::collections::BTreeMap;

use config::shared::SchedulerConfig;
use espipe::concurrency::cancel::{CancelToken, create_cancel_pair};
use espipe::controller::TaskMetric;
use espipe::error::ErrorKind;
use espipe::indexer::TaskOutcome;
use espipe::scheduler::start_sync_scheduler;
use espipe::test_utils::index::{numbered_rows, test_index};
use telemetry::tracing::init_test_tracing;

use crate::support::{Harness, TestController, wait_until};

const INIT_FRAGMENT: &str = "FROM orders WHERE updated_at <= $1";

async fn registered(controller: &TestController) -> (Vec<String>, Vec<String>) {
    let metrics = controller.metrics().await;
    let names = |tasks: Vec<TaskMetric>| -> Vec<String> {
        tasks.into_iter().map(|task| task.index_name).collect()
    };

    (names(metrics.init_tasks), names(metrics.sync_tasks))
}

#[tokio::test]
async fn init_replaces_sync_and_blocks_new_sync() {
    init_test_tracing();

    let harness = Harness::default();
    let gate = harness
        .source
        .add_gated_rows(INIT_FRAGMENT, numbered_rows(3))
        .await;
    let controller = harness.controller(vec![test_index("orders", "orders", &["id"])]);

    assert_eq!(
        controller.start_sync("orders").await,
        "Sync index orders is in progress"
    );
    assert_eq!(
        registered(&controller).await,
        (vec![], vec!["orders".to_string()])
    );

    let message = controller.start_init("orders").await;
    assert_eq!(
        message,
        "Remove index orders from sync in progress; Init index orders is in progress"
    );
    assert_eq!(
        registered(&controller).await,
        (vec!["orders".to_string()], vec![])
    );

    assert_eq!(
        controller.start_sync("orders").await,
        "Index orders is in init progress, skip sync."
    );
    assert_eq!(
        controller.start_init("orders").await,
        "Index orders is in init progress, please stop it manually."
    );
    assert_eq!(
        registered(&controller).await,
        (vec!["orders".to_string()], vec![])
    );

    gate.open();
    wait_until(|| {
        let controller = controller.clone();
        async move { registered(&controller).await.0.is_empty() }
    })
    .await;

    let metrics = controller.metrics().await;
    let init = metrics.last_outcomes["orders"].init.as_ref().unwrap();
    assert_eq!(
        init.outcome,
        TaskOutcome::Completed {
            documents: 3,
            batches: 1,
            failed_items: 0
        }
    );
    assert_eq!(metrics.init_pool.completed, 1);
    assert_eq!(
        controller.start_sync("orders").await,
        "Sync index orders is in progress"
    );

    controller.shutdown().await;
}

#[tokio::test]
async fn sync_is_admitted_once_per_index() {
    init_test_tracing();

    let harness = Harness::default();
    let controller = harness.controller(vec![
        test_index("orders", "orders", &["id"]),
        test_index("users", "users", &["id"]),
    ]);

    assert_eq!(
        controller.start_sync_all().await,
        vec![
            "Sync index orders is in progress".to_string(),
            "Sync index users is in progress".to_string(),
        ]
    );
    assert_eq!(
        controller.start_sync("users").await,
        "Index users is in sync progress, skip sync."
    );

    assert_eq!(
        controller.stop_sync("users").await,
        "Remove index users from sync in progress"
    );
    assert_eq!(
        controller.stop_sync("users").await,
        "Index users is not in sync in progress"
    );
    assert_eq!(controller.stop_sync_all().await, "Shutdown all sync");
    assert_eq!(registered(&controller).await, (vec![], vec![]));
}

#[tokio::test]
async fn stopped_init_is_cancelled_and_deregistered() {
    init_test_tracing();

    let harness = Harness::default();
    let _gate = harness
        .source
        .add_gated_rows(INIT_FRAGMENT, numbered_rows(3))
        .await;
    let controller = harness.controller(vec![test_index("orders", "orders", &["id"])]);

    controller.start_init("orders").await;
    assert_eq!(
        controller.stop_init("orders").await,
        "Remove index orders from init in progress"
    );
    assert_eq!(
        controller.stop_init("orders").await,
        "Index orders is not in init in progress"
    );

    wait_until(|| {
        let controller = controller.clone();
        async move {
            controller
                .metrics()
                .await
                .last_outcomes
                .get("orders")
                .and_then(|outcomes| outcomes.init.clone())
                .is_some()
        }
    })
    .await;

    let metrics = controller.metrics().await;
    assert_eq!(
        metrics.last_outcomes["orders"].init.as_ref().unwrap().outcome,
        TaskOutcome::Cancelled
    );
    assert!(harness.gateway.submissions().is_empty());
}

#[tokio::test]
async fn unknown_indices_are_reported() {
    init_test_tracing();

    let harness = Harness::default();
    let controller = harness.controller(vec![test_index("orders", "orders", &["id"])]);

    assert_eq!(
        controller.start_init("missing").await,
        "Index missing is not configured"
    );
    assert_eq!(
        controller.start_sync("missing").await,
        "Index missing is not configured"
    );

    let err = controller
        .start_fix("missing", BTreeMap::from([("id".to_string(), "1".to_string())]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn fix_runs_beside_registered_tasks() {
    init_test_tracing();

    let harness = Harness::default();
    harness.gateway.add_index("orders");
    let _gate = harness
        .source
        .add_gated_rows(INIT_FRAGMENT, numbered_rows(3))
        .await;
    harness
        .source
        .add_rows(&format!("{INIT_FRAGMENT} AND id = $2"), numbered_rows(1))
        .await;
    let controller = harness.controller(vec![test_index("orders", "orders", &["id"])]);

    controller.start_init("orders").await;
    let outcome = controller
        .start_fix("orders", BTreeMap::from([("id".to_string(), "1".to_string())]))
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.gateway.submission_sizes(), vec![1]);
    assert_eq!(
        registered(&controller).await,
        (vec!["orders".to_string()], vec![])
    );

    controller.shutdown().await;
    assert_eq!(registered(&controller).await, (vec![], vec![]));
}

#[tokio::test]
async fn scheduler_admits_sync_until_shutdown() {
    init_test_tracing();

    let harness = Harness::default();
    let controller = harness.controller(vec![
        test_index("items", "items", &["id"]),
        test_index("orders", "orders", &["id"]),
    ]);

    let disabled = SchedulerConfig {
        enabled: false,
        interval_ms: 10,
    };
    assert!(start_sync_scheduler(controller.clone(), &disabled, CancelToken::never()).is_none());

    let (shutdown, token) = create_cancel_pair();
    let config = SchedulerConfig {
        enabled: true,
        interval_ms: 10,
    };
    let scheduler = start_sync_scheduler(controller.clone(), &config, token).unwrap();

    wait_until(|| {
        let controller = controller.clone();
        async move {
            registered(&controller).await.1 == vec!["items".to_string(), "orders".to_string()]
        }
    })
    .await;

    shutdown.cancel();
    scheduler.await.unwrap();

    // Stopped tasks stay stopped once the scheduler is gone.
    controller.stop_sync_all().await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(registered(&controller).await, (vec![], vec![]));
}
