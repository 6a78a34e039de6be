use chrono::{TimeDelta, TimeZone, Utc};
use config::index::FieldsMode;
use config::shared::WatermarkPolicy;
use espipe::concurrency::cancel::{CancelToken, create_cancel_pair};
use espipe::document::CUSTOM_FIELDS;
use espipe::error::ErrorKind;
use espipe::indexer::{FixRequest, MAX_EXTENSION_PARAMETERS, TaskOutcome};
use espipe::source::{QueryParam, QueryParams};
use espipe::store::CheckpointStore;
use espipe::test_utils::index::{numbered_rows, row, test_index, with_extension};
use espipe::types::Cell;
use telemetry::tracing::init_test_tracing;

use crate::support::Harness;

const INIT_FRAGMENT: &str = "FROM orders WHERE updated_at <= $1";

const SYNC_FRAGMENT: &str = "FROM orders WHERE updated_at > $1";

fn fix_request(pairs: &[(&str, &str)]) -> FixRequest {
    pairs
        .iter()
        .map(|(column, value)| (column.to_string(), value.to_string()))
        .collect()
}

#[tokio::test]
async fn init_flushes_full_batches_in_order() {
    init_test_tracing();

    let harness = Harness::default();
    harness.source.add_rows(INIT_FRAGMENT, numbered_rows(238)).await;
    let index = test_index("orders", "orders", &["id"]);
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let outcome = indexer.init(&index, &CancelToken::never()).await.unwrap();

    assert_eq!(
        outcome,
        TaskOutcome::Completed {
            documents: 238,
            batches: 3,
            failed_items: 0
        }
    );
    assert_eq!(harness.gateway.submission_sizes(), vec![100, 100, 38]);
    assert_eq!(harness.gateway.created_indices(), vec!["orders".to_string()]);
    assert!(!harness.gateway.is_refresh_relaxed("orders"));
}

#[tokio::test]
async fn init_saves_the_time_its_query_was_bound_to() {
    init_test_tracing();

    let harness = Harness::default();
    harness.source.add_rows(INIT_FRAGMENT, numbered_rows(3)).await;
    let index = test_index("orders", "orders", &["id"]);
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    indexer.init(&index, &CancelToken::never()).await.unwrap();

    let queries = harness.source.executed_queries().await;
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].sql, "SELECT * FROM orders WHERE updated_at <= $1");
    let QueryParams::Filled {
        fill: QueryParam::Timestamp(bound),
        tail,
    } = &queries[0].params
    else {
        panic!("unexpected init params {:?}", queries[0].params);
    };
    assert!(tail.is_empty());
    assert_eq!(harness.store.find("orders").await.unwrap(), Some(*bound));
}

#[tokio::test]
async fn repeated_init_yields_the_same_documents() {
    init_test_tracing();

    let harness = Harness::default();
    harness.source.add_rows(INIT_FRAGMENT, numbered_rows(25)).await;
    let index = test_index("orders", "orders", &["id"]);
    let indexer = harness.indexer(10, WatermarkPolicy::SaveBeforeSync);

    indexer.init(&index, &CancelToken::never()).await.unwrap();
    let first = harness.gateway.documents("orders");
    indexer.init(&index, &CancelToken::never()).await.unwrap();
    let second = harness.gateway.documents("orders");

    assert_eq!(first.len(), 25);
    assert_eq!(first, second);
    assert_eq!(harness.gateway.submission_sizes(), vec![10, 10, 5, 10, 10, 5]);
}

#[tokio::test]
async fn document_ids_join_id_columns() {
    init_test_tracing();

    let harness = Harness::default();
    harness
        .source
        .add_rows(
            "FROM pairs",
            vec![row([("A", Cell::from("1")), ("B", Cell::from("2"))])],
        )
        .await;
    harness
        .source
        .add_rows("FROM singles", vec![row([("a", Cell::from("7"))])])
        .await;
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    indexer
        .init(&test_index("pairs", "pairs", &["a", "b"]), &CancelToken::never())
        .await
        .unwrap();
    indexer
        .init(&test_index("singles", "singles", &["a"]), &CancelToken::never())
        .await
        .unwrap();

    let pairs = harness.gateway.documents("pairs");
    assert_eq!(pairs.keys().collect::<Vec<_>>(), vec!["1-2"]);
    assert_eq!(pairs["1-2"].get("a"), Some(&Cell::from("1")));
    let singles = harness.gateway.documents("singles");
    assert_eq!(singles.keys().collect::<Vec<_>>(), vec!["7"]);
}

#[tokio::test]
async fn row_without_id_fails_init_without_watermark() {
    init_test_tracing();

    let harness = Harness::default();
    harness
        .source
        .add_rows(INIT_FRAGMENT, vec![row([("id", Cell::Null), ("name", Cell::from("x"))])])
        .await;
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let err = indexer
        .init(&test_index("orders", "orders", &["id"]), &CancelToken::never())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidDocument);
    assert!(harness.gateway.submissions().is_empty());
    assert_eq!(harness.store.find("orders").await.unwrap(), None);
}

#[tokio::test]
async fn init_is_skipped_when_search_engine_is_down() {
    init_test_tracing();

    let harness = Harness::default();
    harness.gateway.set_healthy(false);
    harness
        .store
        .save("orders", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let outcome = indexer
        .init(&test_index("orders", "orders", &["id"]), &CancelToken::never())
        .await
        .unwrap();

    assert!(matches!(outcome, TaskOutcome::Skipped { .. }));
    assert!(harness.gateway.created_indices().is_empty());
    assert!(harness.source.executed_queries().await.is_empty());
    assert!(harness.store.find("orders").await.unwrap().is_some());
}

#[tokio::test]
async fn cancelled_init_does_not_save_watermark() {
    init_test_tracing();

    let harness = Harness::default();
    let _gate = harness
        .source
        .add_gated_rows(INIT_FRAGMENT, numbered_rows(5))
        .await;
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);
    let (cancel, token) = create_cancel_pair();

    let task = tokio::spawn(async move {
        indexer
            .init(&test_index("orders", "orders", &["id"]), &token)
            .await
    });
    crate::support::wait_until(|| {
        let source = harness.source.clone();
        async move { !source.executed_queries().await.is_empty() }
    })
    .await;
    cancel.cancel();

    assert_eq!(task.await.unwrap().unwrap(), TaskOutcome::Cancelled);
    assert!(harness.gateway.submissions().is_empty());
    assert_eq!(harness.store.find("orders").await.unwrap(), None);
}

#[tokio::test]
async fn extension_rows_are_concatenated_into_one_field() {
    init_test_tracing();

    let harness = Harness::default();
    harness
        .source
        .add_rows(
            INIT_FRAGMENT,
            vec![
                row([("id", Cell::I64(5)), ("name", Cell::from("five"))]),
                row([("id", Cell::I64(6)), ("name", Cell::from("six"))]),
            ],
        )
        .await;
    harness
        .source
        .add_rows(
            "FROM order_attributes",
            vec![
                row([
                    ("order_id", Cell::from("5")),
                    ("name", Cell::from("x")),
                    ("value", Cell::from("foo")),
                ]),
                row([
                    ("order_id", Cell::from("5")),
                    ("name", Cell::from("y")),
                    ("value", Cell::from("bar")),
                ]),
            ],
        )
        .await;
    let index = with_extension(
        test_index("orders", "orders", &["id"]),
        "SELECT order_id, name, value FROM order_attributes WHERE order_id IN (?)",
        "id",
        FieldsMode::ConcatOne,
    );
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    indexer.init(&index, &CancelToken::never()).await.unwrap();

    let documents = harness.gateway.documents("orders");
    assert_eq!(
        documents["5"].get(CUSTOM_FIELDS),
        Some(&Cell::from("x foo y bar "))
    );
    assert_eq!(documents["6"].get(CUSTOM_FIELDS), None);

    let extension_queries = harness
        .source
        .executed_queries_containing("FROM order_attributes")
        .await;
    assert_eq!(extension_queries.len(), 1);
    assert_eq!(
        extension_queries[0].sql,
        "SELECT order_id, name, value FROM order_attributes WHERE order_id IN ($1, $2)"
    );
    assert_eq!(
        extension_queries[0].params,
        QueryParams::Positional(vec![QueryParam::Int(5), QueryParam::Int(6)])
    );
}

#[tokio::test]
async fn extension_rows_are_flattened_into_fields() {
    init_test_tracing();

    let harness = Harness::default();
    harness
        .source
        .add_rows(INIT_FRAGMENT, vec![row([("id", Cell::I64(5))])])
        .await;
    harness
        .source
        .add_rows(
            "FROM order_attributes",
            vec![
                row([
                    ("order_id", Cell::I64(5)),
                    ("name", Cell::from("X")),
                    ("value", Cell::from("foo")),
                ]),
                row([
                    ("order_id", Cell::I64(5)),
                    ("name", Cell::from("y")),
                    ("value", Cell::from("bar")),
                ]),
            ],
        )
        .await;
    let index = with_extension(
        test_index("orders", "orders", &["id"]),
        "SELECT order_id, name, value FROM order_attributes WHERE order_id IN (?)",
        "id",
        FieldsMode::Flatten,
    );
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    indexer.init(&index, &CancelToken::never()).await.unwrap();

    let document = &harness.gateway.documents("orders")["5"];
    assert_eq!(document.get("x"), Some(&Cell::from("foo")));
    assert_eq!(document.get("y"), Some(&Cell::from("bar")));
}

#[tokio::test]
async fn rejected_items_do_not_fail_the_batch() {
    init_test_tracing();

    let harness = Harness::default();
    harness.source.add_rows(INIT_FRAGMENT, numbered_rows(4)).await;
    harness
        .gateway
        .fail_item("2", "version_conflict_engine_exception");
    harness.gateway.fail_item("3", "mapper_parsing_exception");
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let outcome = indexer
        .init(&test_index("orders", "orders", &["id"]), &CancelToken::never())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TaskOutcome::Completed {
            documents: 4,
            batches: 1,
            failed_items: 2
        }
    );
    assert!(harness.store.find("orders").await.unwrap().is_some());
}

#[tokio::test]
async fn fix_without_matching_rows_submits_nothing() {
    init_test_tracing();

    let harness = Harness::default();
    harness.gateway.add_index("orders");
    harness.source.add_rows(INIT_FRAGMENT, numbered_rows(3)).await;
    harness
        .source
        .add_rows(&format!("{INIT_FRAGMENT} AND id = $2"), Vec::new())
        .await;
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let err = indexer
        .fix(
            &test_index("orders", "orders", &["id"]),
            &fix_request(&[("id", "42")]),
            &CancelToken::never(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(err.detail().unwrap().contains("42"));
    assert!(harness.gateway.submissions().is_empty());
}

#[tokio::test]
async fn fix_flushes_every_row_and_keeps_watermark() {
    init_test_tracing();

    let harness = Harness::default();
    harness.gateway.add_index("orders");
    let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    harness.store.save("orders", watermark).await.unwrap();
    harness
        .source
        .add_rows(
            &format!("{INIT_FRAGMENT} AND id = $2"),
            vec![
                row([("id", Cell::I64(7)), ("line", Cell::I32(1))]),
                row([("id", Cell::I64(7)), ("line", Cell::I32(2))]),
            ],
        )
        .await;
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let outcome = indexer
        .fix(
            &test_index("orders", "orders", &["id"]),
            &fix_request(&[("id", "7")]),
            &CancelToken::never(),
        )
        .await
        .unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.gateway.submission_sizes(), vec![1, 1]);
    assert_eq!(harness.store.history("orders").await, vec![watermark]);

    let queries = harness.source.executed_queries().await;
    let QueryParams::Filled { tail, .. } = &queries[0].params else {
        panic!("unexpected fix params {:?}", queries[0].params);
    };
    assert_eq!(tail, &vec![QueryParam::Int(7)]);
}

#[tokio::test]
async fn fix_rejects_values_that_are_not_integers() {
    init_test_tracing();

    let harness = Harness::default();
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let err = indexer
        .fix(
            &test_index("orders", "orders", &["id"]),
            &fix_request(&[("id", "abc")]),
            &CancelToken::never(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(harness.source.executed_queries().await.is_empty());
}

#[tokio::test]
async fn sync_window_starts_one_second_before_watermark() {
    init_test_tracing();

    let harness = Harness::default();
    harness.gateway.add_index("orders");
    let last_refresh_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    harness.store.save("orders", last_refresh_time).await.unwrap();
    harness.source.add_rows(SYNC_FRAGMENT, numbered_rows(3)).await;
    let indexer = harness.indexer(1, WatermarkPolicy::SaveBeforeSync);

    let outcome = indexer
        .sync(&test_index("orders", "orders", &["id"]), &CancelToken::never())
        .await
        .unwrap();

    assert!(outcome.is_completed());
    // The whole window is one request, whatever the init batch size.
    assert_eq!(harness.gateway.submission_sizes(), vec![3]);

    let queries = harness.source.executed_queries().await;
    let QueryParams::Window { start, end } = queries[0].params else {
        panic!("unexpected sync params {:?}", queries[0].params);
    };
    assert_eq!(start, last_refresh_time - TimeDelta::seconds(1));
    assert_eq!(harness.store.find("orders").await.unwrap(), Some(end));
}

#[tokio::test]
async fn large_sync_windows_split_the_extension_query() {
    init_test_tracing();

    let harness = Harness::default();
    harness.gateway.add_index("orders");
    let last_refresh_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    harness.store.save("orders", last_refresh_time).await.unwrap();
    // More join values than a u16 parameter count could carry.
    let total = 2 * MAX_EXTENSION_PARAMETERS + 100;
    assert!(total > usize::from(u16::MAX));
    harness
        .source
        .add_rows(SYNC_FRAGMENT, numbered_rows(total as i64))
        .await;
    harness
        .source
        .add_rows(
            "FROM order_attributes",
            vec![row([
                ("order_id", Cell::I64(7)),
                ("name", Cell::from("color")),
                ("value", Cell::from("red")),
            ])],
        )
        .await;
    let index = with_extension(
        test_index("orders", "orders", &["id"]),
        "SELECT order_id, name, value FROM order_attributes WHERE order_id IN ($1)",
        "id",
        FieldsMode::Flatten,
    );
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let outcome = indexer.sync(&index, &CancelToken::never()).await.unwrap();

    assert!(outcome.is_completed());
    assert_eq!(harness.gateway.submission_sizes(), vec![total]);

    let queries = harness
        .source
        .executed_queries_containing("FROM order_attributes")
        .await;
    let sizes: Vec<usize> = queries
        .iter()
        .map(|query| match &query.params {
            QueryParams::Positional(params) => params.len(),
            other => panic!("unexpected extension params {other:?}"),
        })
        .collect();
    assert_eq!(
        sizes,
        vec![MAX_EXTENSION_PARAMETERS, MAX_EXTENSION_PARAMETERS, 100]
    );
    assert!(queries[2].sql.ends_with("$99, $100)"));

    let documents = harness.gateway.documents("orders");
    assert_eq!(documents.len(), total);
    assert_eq!(documents["7"].get("color"), Some(&Cell::from("red")));
}

#[tokio::test]
async fn watermark_never_moves_backwards() {
    init_test_tracing();

    let harness = Harness::default();
    harness.source.add_rows(INIT_FRAGMENT, numbered_rows(2)).await;
    harness.source.add_rows(SYNC_FRAGMENT, numbered_rows(1)).await;
    let index = test_index("orders", "orders", &["id"]);
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    indexer.init(&index, &CancelToken::never()).await.unwrap();
    for _ in 0..3 {
        indexer.sync(&index, &CancelToken::never()).await.unwrap();
    }

    let history = harness.store.history("orders").await;
    assert_eq!(history.len(), 4);
    assert!(history.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[tokio::test]
async fn sync_is_skipped_until_init_ran() {
    init_test_tracing();

    let harness = Harness::default();
    let index = test_index("orders", "orders", &["id"]);
    let indexer = harness.indexer(100, WatermarkPolicy::SaveBeforeSync);

    let outcome = indexer.sync(&index, &CancelToken::never()).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Skipped { .. }));

    harness.gateway.add_index("orders");
    let outcome = indexer.sync(&index, &CancelToken::never()).await.unwrap();
    assert!(matches!(outcome, TaskOutcome::Skipped { .. }));

    assert!(harness.source.executed_queries().await.is_empty());
}

#[tokio::test]
async fn watermark_policy_decides_what_a_failed_sync_keeps() {
    init_test_tracing();

    let last_refresh_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    let index = test_index("orders", "orders", &["id"]);

    for (policy, advanced) in [
        (WatermarkPolicy::SaveBeforeSync, true),
        (WatermarkPolicy::SaveAfterSync, false),
    ] {
        let harness = Harness::default();
        harness.gateway.add_index("orders");
        harness.gateway.set_fail_requests(true);
        harness.store.save("orders", last_refresh_time).await.unwrap();
        harness.source.add_rows(SYNC_FRAGMENT, numbered_rows(2)).await;

        let err = harness
            .indexer(100, policy)
            .sync(&index, &CancelToken::never())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DestinationQueryFailed);

        let watermark = harness.store.find("orders").await.unwrap().unwrap();
        assert_eq!(watermark > last_refresh_time, advanced, "{policy:?}");
    }
}
