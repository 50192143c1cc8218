mod common;

use common::*;
use lute::runtime::group::Completion;
use lute::runtime::handler::{ConditionalEventHandler, EventHandler, FireMode, HandlerState};
use lute::runtime::ids::LinkTarget;
use lute::runtime::storage::{EngineSnapshot, FileSaveStore, InMemorySaveStore, NodeSnapshot, SaveStore};
use lute::runtime::variables::{Variables, VariableScope};
use serde_json::json;

fn played_engine(trace: &Trace) -> lute::runtime::engine::Engine {
    let mut engine = engine();
    let a = recording_node(&mut engine, "A", &["a"], trace);
    let b = recording_node(&mut engine, "B", &["b"], trace);
    let c = recording_node(&mut engine, "C", &["c"], trace);
    let secret = recording_node(&mut engine, "Secret", &["s"], trace);
    engine.node_mut(secret).unwrap().saveable = false;
    engine.create_group("AB", &[a, b], Completion::Threshold(2)).unwrap();
    engine.set_target_unlock(LinkTarget::Node(a), Some(LinkTarget::Node(c))).unwrap();
    engine.variables_mut().set("score", json!(42));
    engine
}

#[test]
fn test_snapshot_skips_unsaveable_nodes() {
    let trace = trace();
    let mut engine = played_engine(&trace);
    let a = engine.find_node("A").unwrap();
    engine.start_execution(a, 0).unwrap();

    let snapshot = engine.snapshot();

    assert_eq!(snapshot.nodes.len(), 3);
    assert!(snapshot.nodes.iter().all(|n| n.name != "Secret"));
    assert_eq!(snapshot.nodes[0], NodeSnapshot { name: "A".into(), execution_count: 1, finished_count: 1 });
    assert_eq!(snapshot.variables.local.get("score"), Some(&json!(42)));
}

#[test]
fn test_restore_rebuilds_groups_and_locks() {
    let trace = trace();
    let mut source = played_engine(&trace);
    let a = source.find_node("A").unwrap();
    let b = source.find_node("B").unwrap();
    source.start_execution(a, 0).unwrap();
    source.start_execution(b, 0).unwrap();
    let snapshot = source.snapshot();

    let mut target = played_engine(&trace);
    let c = target.find_node("C").unwrap();
    assert!(!target.is_eligible(c));

    target.restore(&snapshot);

    let group = target.find_group("AB").unwrap();
    assert!(target.group(group).unwrap().is_complete());
    assert!(target.is_eligible(c));
    assert_eq!(target.variables().get("score"), Some(json!(42)));
}

#[test]
fn test_restore_skips_unknown_nodes_and_rearms_handlers() {
    let trace = trace();
    let mut engine = engine();
    let n = recording_node(&mut engine, "N", &["n"], &trace);
    engine.set_handler(n, Some(EventHandler::Conditional(ConditionalEventHandler::new(FireMode::Start, vec![])))).unwrap();
    engine.tick().unwrap();

    let snapshot = EngineSnapshot {
        nodes: vec![
            NodeSnapshot { name: "N".into(), execution_count: 3, finished_count: 2 },
            NodeSnapshot { name: "Gone".into(), execution_count: 1, finished_count: 1 },
        ],
        variables: Default::default(),
    };
    engine.restore(&snapshot);

    let node = engine.node(n).unwrap();
    assert_eq!(node.execution_count(), 3);
    assert_eq!(node.finished_count(), 2);
    assert!(matches!(node.handler(), Some(EventHandler::Conditional(h)) if h.state() == HandlerState::Idle));
}

#[tokio::test]
async fn test_in_memory_store_round_trip() {
    let trace = trace();
    let engine = played_engine(&trace);
    let store = InMemorySaveStore::new();

    assert!(store.load("slot1").await.unwrap().is_none());
    store.save("slot1", &engine.snapshot()).await.unwrap();
    assert_eq!(store.load("slot1").await.unwrap(), Some(engine.snapshot()));

    store.delete("slot1").await.unwrap();
    assert!(store.load("slot1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_file_store_persists_snapshots() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = FileSaveStore::new(temp_dir.path().join("saves"));
    let trace = trace();
    let mut engine = played_engine(&trace);
    let a = engine.find_node("A").unwrap();
    engine.start_execution(a, 0).unwrap();

    store.save("autosave", &engine.snapshot()).await.unwrap();
    assert!(temp_dir.path().join("saves/autosave.json").exists());

    let loaded = store.load("autosave").await.unwrap().unwrap();
    assert_eq!(loaded, engine.snapshot());

    store.delete("autosave").await.unwrap();
    store.delete("autosave").await.unwrap();
    assert!(store.load("autosave").await.unwrap().is_none());
}

#[tokio::test]
async fn test_file_store_rejects_corrupt_file() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    std::fs::write(temp_dir.path().join("broken.json"), "{ not json").unwrap();
    let store = FileSaveStore::new(temp_dir.path());

    assert!(store.load("broken").await.is_err());
}

#[test]
fn test_restore_drops_locals_created_after_the_save() {
    let mut vars = Variables::new();
    vars.set("score", json!(1));
    vars.declare("world", json!("old"), VariableScope::Global);
    let saved = vars.snapshot();

    vars.set("score", json!(9));
    vars.set("later", json!(true));
    vars.declare("world", json!("new"), VariableScope::Global);
    vars.restore(&saved);

    assert_eq!(vars.get("score"), Some(json!(1)));
    assert_eq!(vars.get("later"), None);
    assert_eq!(vars.get("world"), Some(json!("old")));
}
