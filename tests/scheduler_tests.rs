//! Scheduler / HA state management tests (in-memory store, fast intervals).

use ruleflow::compiler::{self, CompileOptions};
use ruleflow::config::Config;
use ruleflow::engine::{RuleEngine, Scheduler};
use ruleflow::parser::parse_str;
use ruleflow::store::{Endpoint, MemoryStore};
use ruleflow::validator::ValidatorOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const RULES: &str = r#"
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
"#;

fn build_engine(store: Arc<MemoryStore>) -> Arc<RuleEngine> {
    let ruleset = parse_str(RULES, "<scheduler-test>").unwrap();
    let opts = CompileOptions {
        validator: ValidatorOptions {
            valid_sensors: vec!["input:temperature".into()],
            ..ValidatorOptions::default()
        },
        ..CompileOptions::default()
    };
    let plan = compiler::compile(&ruleset, &opts).unwrap().plan;
    Arc::new(RuleEngine::new(plan, store, 2, Duration::from_secs(60)).unwrap())
}

fn test_config(host: &str) -> Config {
    let mut config = Config::default();
    config.ha.host = Some(host.to_string());
    config.ha.state_check_interval_ms = 10;
    config.engine.cycle_time_ms = 20;
    config
}

fn master(host: &str) -> Endpoint {
    Endpoint {
        host: host.to_string(),
        port: 6379,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_failover_stops_and_resumes_cycles() {
    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 35.0, 0);
    store.set_master(master("engine-a"));

    let engine = build_engine(Arc::clone(&store));
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&engine),
        &test_config("engine-a"),
        cancel.clone(),
    ));

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    // Sentinel says we are the master: cycles run.
    sleep(Duration::from_millis(150)).await;
    assert!(scheduler.is_active());
    assert!(engine.stats().cycles_completed > 0);
    assert_eq!(store.number("output:high_temperature"), Some(1.0));

    // Master flips to another host: we stop within a check interval or two.
    store.set_master(master("engine-b"));
    sleep(Duration::from_millis(150)).await;
    assert!(!scheduler.is_active());

    // No further cycles (and therefore no writes) while standby.
    let frozen = engine.stats().cycles_completed;
    sleep(Duration::from_millis(150)).await;
    assert_eq!(engine.stats().cycles_completed, frozen);

    // Master comes back: cycles resume.
    store.set_master(master("engine-a"));
    sleep(Duration::from_millis(150)).await;
    assert!(scheduler.is_active());
    assert!(engine.stats().cycles_completed > frozen);

    cancel.cancel();
    runner.await.unwrap();
    assert!(!scheduler.is_active());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unhealthy_store_forces_standby() {
    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 35.0, 0);
    store.set_master(master("engine-a"));

    let engine = build_engine(Arc::clone(&store));
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&engine),
        &test_config("engine-a"),
        cancel.clone(),
    ));

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    sleep(Duration::from_millis(150)).await;
    assert!(scheduler.is_active());

    // Active/standby is master-equality AND health: losing health alone
    // must force standby even though sentinel still points at us.
    store.set_healthy(false);
    sleep(Duration::from_millis(150)).await;
    assert!(!scheduler.is_active());

    store.set_healthy(true);
    sleep(Duration::from_millis(150)).await;
    assert!(scheduler.is_active());

    cancel.cancel();
    runner.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_host_never_activates() {
    let store = Arc::new(MemoryStore::new());
    store.insert_number("input:temperature", 35.0, 0);
    store.set_master(master("engine-b"));

    let engine = build_engine(Arc::clone(&store));
    let cancel = CancellationToken::new();
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&engine),
        &test_config("engine-a"),
        cancel.clone(),
    ));

    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run().await })
    };

    sleep(Duration::from_millis(150)).await;
    assert!(!scheduler.is_active());
    assert_eq!(engine.stats().cycles_completed, 0);
    assert_eq!(store.number("output:high_temperature"), None);

    cancel.cancel();
    runner.await.unwrap();
}
