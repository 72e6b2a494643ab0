mod common;

use common::{comando, Harness, BLACK, WHITE};
use croupier::{EngineError, EngineState};
use serde_json::json;
use std::sync::atomic::Ordering;

fn verified_balance(h: &Harness) {
    h.mapping("Base", "Base", json!([{ "action": "click", "position": [0.125, 0.125] }]));
    h.mapping(
        "Act",
        "balance",
        json!([
            { "action": "color", "position": [0.5, 0.5], "value": [255, 255, 255] },
            { "action": "read", "position": [[0.25, 0.25], [0.5, 0.375]], "value": ".Saldo" }
        ]),
    );
    h.desk.set_text(250, 250, "980");
}

#[tokio::test]
async fn repeated_timeouts_drop_the_operation_after_the_retry_limit() {
    let h = Harness::new();
    verified_balance(&h);
    let mut engine = h.engine(h.config());

    engine.add_operation(comando("balance", &[])).await.unwrap();
    engine.run().await.unwrap();

    // Two relaunches, the third timeout abandons.
    assert_eq!(h.closes(), 2);
    assert_eq!(h.opens(), 3);
    assert!(h.exporter.payloads().is_empty());
    assert_eq!(engine.pending(), 0);
    assert_eq!(engine.retries(), 0);
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(h.signals(), 1);
}

#[tokio::test]
async fn relaunch_reruns_the_base_mapping() {
    let h = Harness::new();
    verified_balance(&h);
    let mut config = h.config();
    config.max_retries = 2;
    let mut engine = h.engine(config);

    engine.add_operation(comando("balance", &[])).await.unwrap();
    engine.run().await.unwrap();

    // History is cleared on relaunch, so each attempt starts from Base.
    assert_eq!(h.input.clicks(), 2);
    assert_eq!(h.closes(), 1);
}

#[tokio::test]
async fn recovery_before_the_limit_exports_and_resets_the_counter() {
    let h = Harness::new();
    verified_balance(&h);
    h.desk.set_pixel(500, 500, WHITE);
    // The first attempt misses on every probe, the second sees white.
    h.desk.script_pixels(&[BLACK, BLACK, BLACK]);
    let mut engine = h.engine(h.config());

    engine.add_operation(comando("balance", &[])).await.unwrap();
    engine.run().await.unwrap();

    assert_eq!(h.closes(), 1);
    assert_eq!(engine.retries(), 0);
    let payloads = h.exporter.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].get("Saldo"), Some(&json!(["980"])));
}

#[tokio::test]
async fn later_operations_survive_an_abandoned_one() {
    let h = Harness::new();
    verified_balance(&h);
    h.mapping("Nav", "mesa", json!([]));
    h.mapping(
        "Act",
        "members",
        json!([{ "action": "read", "position": [[0.25, 0.25], [0.5, 0.375]], "value": ".Membros" }]),
    );
    let mut engine = h.engine(h.config());

    engine.add_operation(comando("balance", &[])).await.unwrap();
    engine.add_operation(comando("members", &[])).await.unwrap();
    engine.run().await.unwrap();

    let payloads = h.exporter.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].get("Membros"), Some(&json!(["980"])));
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn relaunch_waits_for_the_old_window_to_close() {
    let h = Harness::new();
    verified_balance(&h);
    // The closed window still shows up for three checks.
    h.window.linger(3);
    let mut config = h.config();
    config.max_retries = 2;
    let mut engine = h.engine(config);

    engine.add_operation(comando("balance", &[])).await.unwrap();
    engine.run().await.unwrap();

    assert_eq!(h.closes(), 1);
    assert_eq!(h.opens(), 2);
    assert_eq!(h.terminations(), 0);
    assert_eq!(h.window.lingering_checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn window_that_ignores_close_is_terminated() {
    let h = Harness::new();
    verified_balance(&h);
    h.window.ignores_close.store(true, Ordering::SeqCst);
    let mut config = h.config();
    config.max_retries = 2;
    config.close_timeout_ms = 5;
    let mut engine = h.engine(config);

    engine.add_operation(comando("balance", &[])).await.unwrap();
    engine.run().await.unwrap();

    assert_eq!(h.closes(), 1);
    assert_eq!(h.terminations(), 1);
    assert_eq!(h.opens(), 2);
    assert_eq!(engine.pending(), 0);
}

#[tokio::test]
async fn launch_without_a_window_is_reported() {
    let h = Harness::new();
    verified_balance(&h);
    h.window.fails_to_appear.store(true, Ordering::SeqCst);
    let mut config = h.config();
    config.open_timeout_ms = 10;
    let mut engine = h.engine(config);

    let err = engine.add_operation(comando("balance", &[])).await.unwrap_err();

    assert!(matches!(err, EngineError::WindowNotFound(_)));
    assert_eq!(h.opens(), 1);
    assert!(h.input.events().is_empty());
}
