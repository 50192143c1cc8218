mod common;

use common::*;
use lute::FlowError;
use lute::runtime::engine::Engine;
use lute::runtime::ids::NodeId;
use serde_json::json;

fn log(engine: &mut Engine, node: NodeId, msg: &str) {
    engine.add_order(node, "log", json!({ "msg": msg })).unwrap();
}

fn assert_contiguous(engine: &Engine, node: NodeId) {
    for (i, slot) in engine.node(node).unwrap().orders().iter().enumerate() {
        assert_eq!(slot.index(), i);
    }
}

#[test]
fn test_indices_stay_contiguous() {
    let mut engine = engine();
    let n = engine.add_node("N");
    for msg in ["a", "b", "c", "d"] {
        log(&mut engine, n, msg);
    }

    engine.insert_order(n, 1, "log", json!({ "msg": "inserted" })).unwrap();
    assert_contiguous(&engine, n);
    engine.remove_order(n, 0).unwrap();
    assert_contiguous(&engine, n);
    engine.move_order(n, 3, 0).unwrap();
    assert_contiguous(&engine, n);

    assert_eq!(engine.order_summaries(n).unwrap(), vec!["d", "inserted", "b", "c"]);
}

#[test]
fn test_out_of_range_edits_are_rejected() {
    let mut engine = engine();
    let n = engine.add_node("N");
    log(&mut engine, n, "a");

    assert!(matches!(engine.remove_order(n, 3), Err(FlowError::OrderIndex { index: 3, len: 1, .. })));
    assert!(engine.move_order(n, 0, 1).is_err());
    assert!(engine.insert_order(n, 5, "log", json!({})).is_err());
    assert!(engine.set_order_enabled(n, 1, false).is_err());
    assert_eq!(engine.node(n).unwrap().orders().len(), 1);
}

#[test]
fn test_unknown_kind_and_bad_params() {
    let mut engine = engine();
    let n = engine.add_node("N");

    assert!(matches!(engine.add_order(n, "teleport", json!({})), Err(FlowError::UnknownOrderKind(_))));
    assert!(matches!(engine.add_order(n, "wait", json!({})), Err(FlowError::PrepareOrder { .. })));
    assert!(matches!(engine.add_order(n, "set_variable", json!({ "key": "x", "expression": "(1 + 2" })), Err(FlowError::PrepareOrder { .. })));
    assert!(engine.node(n).unwrap().orders().is_empty());
}

#[test]
fn test_item_ids_are_unique() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let first = engine.add_order(a, "log", json!({})).unwrap();
    let second = engine.add_order(b, "log", json!({})).unwrap();

    assert_ne!(first, second);
    assert_eq!(engine.node(b).unwrap().order_by_item(second).unwrap().index(), 0);
    assert!(engine.node(a).unwrap().order_by_item(second).is_none());
}

#[test]
fn test_duplicate_orders_gets_fresh_copies() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    log(&mut engine, a, "one");
    log(&mut engine, a, "two");
    engine.set_order_enabled(a, 1, false).unwrap();
    engine.set_order_indent(a, 1, 2).unwrap();
    log(&mut engine, b, "existing");

    let ids = engine.duplicate_orders(a, &[0, 1], b, 0).unwrap();

    let target = engine.node(b).unwrap();
    assert_eq!(ids.len(), 2);
    assert_eq!(engine.order_summaries(b).unwrap(), vec!["one", "two", "existing"]);
    assert!(!target.order(1).unwrap().enabled);
    assert_eq!(target.order(1).unwrap().indent, 2);
    assert_ne!(target.order(0).unwrap().item_id(), engine.node(a).unwrap().order(0).unwrap().item_id());
    assert_contiguous(&engine, b);
}

#[test]
fn test_duplicate_is_all_or_nothing() {
    let trace = trace();
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    log(&mut engine, a, "fine");
    record(&mut engine, a, "custom", &trace);

    let err = engine.duplicate_orders(a, &[0, 1], b, 0).unwrap_err();

    assert!(matches!(err, FlowError::UnknownOrderKind(_)));
    assert!(engine.node(b).unwrap().orders().is_empty());
}

#[test]
fn test_running_node_cannot_be_restructured() {
    let mut engine = engine();
    let n = engine.add_node("N");
    let _hold = hold(&mut engine, n);
    engine.start_execution(n, 0).unwrap();

    assert!(matches!(engine.add_order(n, "log", json!({})), Err(FlowError::NodeRunning(_))));
    assert!(matches!(engine.remove_order(n, 0), Err(FlowError::NodeRunning(_))));
    engine.set_order_indent(n, 0, 1).unwrap();

    engine.stop_node(n);
    engine.remove_order(n, 0).unwrap();
}

#[test]
fn test_error_summaries() {
    let mut engine = engine();
    let n = engine.add_node("N");
    engine.add_order(n, "call", json!({})).unwrap();
    engine.add_order(n, "jump", json!({})).unwrap();
    engine.add_order(n, "broadcast", json!({})).unwrap();

    let summaries = engine.order_summaries(n).unwrap();
    assert!(summaries.iter().all(|s| s.starts_with("Error: ")), "{:?}", summaries);
}

#[test]
fn test_node_names_are_unique() {
    let mut engine = engine();
    let first = engine.add_node("Scene");
    let second = engine.add_node("Scene");
    let third = engine.add_node("Scene");

    assert_eq!(engine.node(second).unwrap().name(), "Scene (1)");
    assert_eq!(engine.node(third).unwrap().name(), "Scene (2)");
    assert!(matches!(engine.rename_node(third, "Scene"), Err(FlowError::DuplicateName(_))));
    engine.rename_node(first, "Opening").unwrap();
    assert_eq!(engine.find_node("Opening"), Some(first));
    engine.rename_node(first, "Opening").unwrap();
}

#[test]
fn test_remove_node_clears_selection() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    log(&mut engine, b, "x");
    engine.select_node(a, false).unwrap();
    engine.select_node(b, true).unwrap();
    engine.select_orders(&[0]).unwrap();

    engine.remove_node(b).unwrap();

    assert_eq!(engine.selection().nodes(), &[a]);
    assert!(engine.selection().orders().is_empty());
    assert!(engine.node(b).is_none());
    assert_eq!(engine.node_count(), 1);
}

#[test]
fn test_play_selected_starts_from_first_selected_order() {
    let trace = trace();
    let mut engine = engine();
    let n = recording_node(&mut engine, "N", &["a", "b", "c"], &trace);

    assert!(matches!(engine.select_orders(&[1]), Err(FlowError::NothingSelected)));
    engine.select_node(n, false).unwrap();
    engine.select_orders(&[2, 1]).unwrap();
    assert_eq!(engine.selection().orders(), &[1, 2]);

    assert!(engine.play_selected().unwrap());
    assert_eq!(entries(&trace), vec!["N:b", "N:c"]);
}
