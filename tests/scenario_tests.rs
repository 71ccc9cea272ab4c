//! End-to-end scenarios: compile a YAML document, run cycles against the
//! in-memory store, observe the outputs.

use ruleflow::compiler::{self, CompileError, CompileOptions};
use ruleflow::emit::ExecutablePlan;
use ruleflow::engine::RuleEngine;
use ruleflow::parser::parse_str;
use ruleflow::store::MemoryStore;
use ruleflow::validator::ValidatorOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const T0: i64 = 1_700_000_000_000_000; // arbitrary base timestamp, µs
const MS: i64 = 1000;

fn options(sensors: &[&str]) -> CompileOptions {
    CompileOptions {
        validator: ValidatorOptions {
            valid_sensors: sensors.iter().map(|s| s.to_string()).collect(),
            ..ValidatorOptions::default()
        },
        ..CompileOptions::default()
    }
}

fn compile_doc(yaml: &str, sensors: &[&str]) -> ExecutablePlan {
    let ruleset = parse_str(yaml, "<scenario>").expect("parse");
    compiler::compile(&ruleset, &options(sensors))
        .expect("compile")
        .plan
}

fn engine_for(plan: ExecutablePlan, store: Arc<MemoryStore>) -> RuleEngine {
    RuleEngine::new(plan, store, 2, Duration::from_secs(60)).expect("engine")
}

// ── S1: basic comparison ────────────────────────────────────────────

#[tokio::test]
async fn s1_basic_comparison() {
    let plan = compile_doc(
        r#"
version: 1
rules:
  - name: high_temperature
    conditions:
      all:
        - condition:
            comparison:
              source: input:temperature
              operator: ">"
              value: 30
    actions:
      - set_value:
          key: output:high_temperature
          value: 1
"#,
        &["input:temperature"],
    );

    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 35.0, T0);
    let engine = engine_for(plan, Arc::clone(&store));

    let report = engine
        .run_cycle_at(T0, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.fired, 1);
    assert!(report.flushed);
    assert_eq!(store.number("output:high_temperature"), Some(1.0));
}

// ── S2/S3: heat index expression + dependency layering ──────────────

const HEAT_RULES: &str = r#"
version: 1
rules:
  - name: heat_index
    conditions:
      all:
        - condition:
            comparison:
              source: input:temperature
              operator: ">"
              value: 0
        - condition:
            comparison:
              source: input:humidity
              operator: ">"
              value: 0
    actions:
      - set_value:
          key: output:heat_index
          value_expression: "0.5 * (input:temperature + 61 + (input:temperature - 68) * 1.2 + input:humidity * 0.094)"
  - name: heat_alert
    conditions:
      all:
        - condition:
            comparison:
              source: output:heat_index
              operator: ">"
              value: 85
    actions:
      - set_value:
          key: output:heat_alert
          value: 1
"#;

#[tokio::test]
async fn s2_heat_index_expression() {
    let plan = compile_doc(HEAT_RULES, &["input:temperature", "input:humidity"]);
    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 85.0, T0);
    store.insert_number("input:humidity", 70.0, T0);
    let engine = engine_for(plan, Arc::clone(&store));

    engine
        .run_cycle_at(T0, &CancellationToken::new())
        .await
        .unwrap();

    let heat_index = store.number("output:heat_index").expect("heat index written");
    // 0.5 * (85 + 61 + (85-68)*1.2 + 70*0.094) = 86.49
    assert!(
        (heat_index - 86.49).abs() < 0.01,
        "heat index was {heat_index}"
    );
}

#[tokio::test]
async fn s3_dependent_rule_fires_in_same_cycle() {
    let plan = compile_doc(HEAT_RULES, &["input:temperature", "input:humidity"]);

    // The consumer sits in a strictly later layer than the producer.
    let heat_index = plan.rules.iter().find(|r| r.name == "heat_index").unwrap();
    let heat_alert = plan.rules.iter().find(|r| r.name == "heat_alert").unwrap();
    assert_eq!(heat_index.layer, 0);
    assert_eq!(heat_alert.layer, 1);

    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 85.0, T0);
    store.insert_number("input:humidity", 70.0, T0);
    let engine = engine_for(plan, Arc::clone(&store));

    let report = engine
        .run_cycle_at(T0, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.fired, 2);
    assert_eq!(store.number("output:heat_alert"), Some(1.0));
}

// ── S4: sustained threshold ─────────────────────────────────────────

#[tokio::test]
async fn s4_sustained_threshold_fires_once_window_filled() {
    let plan = compile_doc(
        r#"
version: 1
rules:
  - name: temperature_rising
    conditions:
      all:
        - condition:
            threshold_over_time:
              source: input:temperature
              operator: ">"
              threshold: 5
              duration_ms: 1000
    actions:
      - set_value:
          key: output:temperature_rising
          value: 1
"#,
        &["input:temperature"],
    );

    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(plan, Arc::clone(&store));
    let cancel = CancellationToken::new();

    // Six readings, 200 ms apart, all comfortably above the threshold.
    for (i, value) in [20.0, 22.0, 24.0, 26.0, 28.0, 30.0].iter().enumerate() {
        let now = T0 + i as i64 * 200 * MS;
        store.insert_number("input:temperature", *value, now);
        engine.run_cycle_at(now, &cancel).await.unwrap();

        if now < T0 + 1000 * MS {
            // Window not yet covered by data: no output.
            assert_eq!(
                store.number("output:temperature_rising"),
                None,
                "fired too early at {} ms",
                (now - T0) / MS
            );
        }
    }

    // At T0 + 1000 ms the window [T0, T0+1000ms] is fully covered and
    // every sample in it exceeds 5.
    assert_eq!(store.number("output:temperature_rising"), Some(1.0));
}

// ── S5: cycle detection ─────────────────────────────────────────────

#[test]
fn s5_cycle_detection_names_both_rules() {
    let ruleset = parse_str(
        r#"
version: 1
rules:
  - name: R1
    conditions:
      all:
        - condition:
            comparison:
              source: output:y
              operator: ">"
              value: 0
    actions:
      - set_value:
          key: output:x
          value: 1
  - name: R2
    conditions:
      all:
        - condition:
            comparison:
              source: output:x
              operator: ">"
              value: 0
    actions:
      - set_value:
          key: output:y
          value: 1
"#,
        "<scenario>",
    )
    .unwrap();

    let err = compiler::compile(&ruleset, &options(&[])).unwrap_err();
    let message = match err {
        CompileError::Validation(failure) => failure.to_string(),
        other => panic!("expected validation failure, got {other}"),
    };
    assert!(message.contains("cycle"), "message: {message}");
    assert!(message.contains("R1"), "message: {message}");
    assert!(message.contains("R2"), "message: {message}");
}

// ── Determinism: same inputs, same outputs ──────────────────────────

#[tokio::test]
async fn repeated_evaluation_is_deterministic() {
    for _ in 0..3 {
        let plan = compile_doc(HEAT_RULES, &["input:temperature", "input:humidity"]);
        let store = Arc::new(MemoryStore::new());
        store.insert_number("input:temperature", 85.0, T0);
        store.insert_number("input:humidity", 70.0, T0);
        let engine = engine_for(plan, Arc::clone(&store));
        engine
            .run_cycle_at(T0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            store.number("output:heat_index"),
            Some(0.5 * (85.0 + 61.0 + (85.0 - 68.0) * 1.2 + 70.0 * 0.094))
        );
        assert_eq!(store.number("output:heat_alert"), Some(1.0));
    }
}

// ── Cancellation: no partial writes ─────────────────────────────────

#[tokio::test]
async fn cancelled_cycle_leaves_no_writes() {
    let plan = compile_doc(HEAT_RULES, &["input:temperature", "input:humidity"]);
    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 85.0, T0);
    store.insert_number("input:humidity", 70.0, T0);
    let engine = engine_for(plan, Arc::clone(&store));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine.run_cycle_at(T0, &cancel).await;
    assert!(matches!(result, Err(ruleflow::EngineError::Cancelled)));
    assert_eq!(store.number("output:heat_index"), None);
    assert_eq!(store.number("output:heat_alert"), None);
}

// ── Flush failure: batch discarded, next cycle recovers ─────────────

#[tokio::test]
async fn flush_failure_discards_batch_and_recovers() {
    let plan = compile_doc(HEAT_RULES, &["input:temperature", "input:humidity"]);
    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 85.0, T0);
    store.insert_number("input:humidity", 70.0, T0);
    let engine = engine_for(plan, Arc::clone(&store));
    let cancel = CancellationToken::new();

    store.fail_writes(true);
    let report = engine.run_cycle_at(T0, &cancel).await.unwrap();
    assert!(!report.flushed);
    assert_eq!(store.number("output:heat_index"), None);
    assert_eq!(engine.stats().flush_failures, 1);

    // Inputs still present: the next cycle re-derives everything.
    store.fail_writes(false);
    let report = engine.run_cycle_at(T0 + 100 * MS, &cancel).await.unwrap();
    assert!(report.flushed);
    assert_eq!(store.number("output:heat_alert"), Some(1.0));
}

// ── Coordinator entry point: evaluate(inputs, outputs) ──────────────

#[tokio::test]
async fn coordinator_evaluate_is_pure_over_maps() {
    let plan = compile_doc(HEAT_RULES, &["input:temperature", "input:humidity"]);
    let store = Arc::new(MemoryStore::new());
    let engine = engine_for(plan, Arc::clone(&store));

    let inputs: HashMap<String, f64> = [
        ("input:temperature".to_string(), 85.0),
        ("input:humidity".to_string(), 70.0),
    ]
    .into_iter()
    .collect();
    let mut outputs = HashMap::new();

    let fired = engine.evaluate(&inputs, &mut outputs);
    assert_eq!(fired, 2);
    assert!((outputs["output:heat_index"] - 86.49).abs() < 0.01);
    assert_eq!(outputs["output:heat_alert"], 1.0);

    // Nothing touched the store.
    assert_eq!(store.key_count(), 0);
}

// ── Messages publish after writes ───────────────────────────────────

#[tokio::test]
async fn send_message_actions_publish() {
    let plan = compile_doc(
        r#"
version: 1
rules:
  - name: alert
    conditions:
      all:
        - condition:
            comparison:
              source: input:temperature
              operator: ">"
              value: 30
    actions:
      - set_value:
          key: output:high_temperature
          value: 1
      - send_message:
          channel: alerts
          message: temperature high
"#,
        &["input:temperature"],
    );

    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 35.0, T0);
    let engine = engine_for(plan, Arc::clone(&store));
    engine
        .run_cycle_at(T0, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        store.published(),
        vec![("alerts".to_string(), "temperature high".to_string())]
    );
    assert_eq!(store.number("output:high_temperature"), Some(1.0));
}
