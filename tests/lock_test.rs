mod common;

use common::*;
use lute::FlowError;
use lute::runtime::engine::FlowEvent;
use lute::runtime::group::Completion;
use lute::runtime::handler::{ConditionalEventHandler, EventHandler, FireMode};
use lute::runtime::ids::LinkTarget;

fn node(id: lute::runtime::ids::NodeId) -> LinkTarget {
    LinkTarget::Node(id)
}

#[test]
fn test_finishing_key_unlocks_target() {
    let trace = trace();
    let mut engine = engine();
    let a = recording_node(&mut engine, "A", &["only"], &trace);
    let b = recording_node(&mut engine, "B", &["b"], &trace);

    engine.set_target_unlock(node(a), Some(node(b))).unwrap();
    assert_eq!(engine.node(b).unwrap().target_key(), Some(node(a)));
    assert!(engine.node(b).unwrap().is_locked());
    assert!(!engine.is_eligible(b));

    engine.start_execution(a, 0).unwrap();

    assert!(!engine.node(b).unwrap().is_locked());
    assert!(engine.is_eligible(b));
    let events = engine.drain_events();
    let finished = events.iter().position(|e| *e == FlowEvent::NodeFinished(a)).unwrap();
    let unlocked = events.iter().position(|e| *e == FlowEvent::Unlocked(node(b))).unwrap();
    assert!(finished < unlocked);
}

#[test]
fn test_reassigning_unlock_clears_old_back_reference() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let c = engine.add_node("C");
    let d = engine.add_node("D");

    engine.set_target_unlock(node(a), Some(node(b))).unwrap();
    engine.set_target_unlock(node(a), Some(node(c))).unwrap();

    assert_eq!(engine.node(b).unwrap().target_key(), None);
    assert!(!engine.node(b).unwrap().is_locked());
    assert_eq!(engine.node(c).unwrap().target_key(), Some(node(a)));
    assert_eq!(engine.node(a).unwrap().target_unlock(), Some(node(c)));

    engine.set_target_unlock(node(d), Some(node(c))).unwrap();

    assert_eq!(engine.node(a).unwrap().target_unlock(), None);
    assert_eq!(engine.node(c).unwrap().target_key(), Some(node(d)));
    assert_eq!(engine.node(d).unwrap().target_unlock(), Some(node(c)));
    assert_back_references(&engine);
}

fn assert_back_references(engine: &lute::runtime::engine::Engine) {
    for n in engine.nodes() {
        if let Some(to) = n.target_unlock() {
            assert_eq!(engine.target_key(to), Some(node(n.id())), "{} -> {}", n.name(), to);
        }
        if let Some(key) = n.target_key() {
            assert_eq!(engine.target_unlock(key), Some(node(n.id())));
        }
    }
}

#[test]
fn test_self_link_is_rejected() {
    let mut engine = engine();
    let a = engine.add_node("A");

    let err = engine.set_target_unlock(node(a), Some(node(a))).unwrap_err();

    assert!(matches!(err, FlowError::SelfLink(_)));
    assert_eq!(engine.node(a).unwrap().target_unlock(), None);
}

#[test]
fn test_cycle_is_rejected_without_side_effects() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let c = engine.add_node("C");
    engine.set_target_unlock(node(a), Some(node(b))).unwrap();
    engine.set_target_unlock(node(b), Some(node(c))).unwrap();

    let err = engine.set_target_unlock(node(c), Some(node(a))).unwrap_err();

    assert!(matches!(err, FlowError::LockCycle { .. }));
    assert_eq!(engine.node(a).unwrap().target_key(), None);
    assert_eq!(engine.node(c).unwrap().target_unlock(), None);
    assert_back_references(&engine);
}

#[test]
fn test_clearing_link_unlocks_target() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    engine.set_target_unlock(node(a), Some(node(b))).unwrap();

    engine.clear_target_unlock(node(a)).unwrap();

    assert_eq!(engine.node(b).unwrap().target_key(), None);
    assert!(engine.is_eligible(b));
}

#[test]
fn test_locked_node_waits_for_its_handler() {
    let trace = trace();
    let mut engine = engine();
    let a = recording_node(&mut engine, "A", &["a"], &trace);
    let b = recording_node(&mut engine, "B", &["b"], &trace);
    engine.node_mut(b).unwrap().repeatable = false;
    engine.set_handler(b, Some(EventHandler::Conditional(ConditionalEventHandler::new(FireMode::Update, vec![])))).unwrap();
    engine.set_target_unlock(node(a), Some(node(b))).unwrap();

    engine.tick().unwrap();
    engine.tick().unwrap();
    assert!(entries(&trace).is_empty());

    engine.start_execution(a, 0).unwrap();
    engine.tick().unwrap();
    engine.tick().unwrap();

    assert_eq!(entries(&trace), vec!["A:a", "B:b"]);
}

#[test]
fn test_group_lock_holds_every_member() {
    let trace = trace();
    let mut engine = engine();
    let key = recording_node(&mut engine, "Key", &["k"], &trace);
    let x = recording_node(&mut engine, "X", &["x"], &trace);
    let y = recording_node(&mut engine, "Y", &["y"], &trace);
    let g = engine.create_group("Room", &[x, y], Completion::Threshold(2)).unwrap();

    engine.set_target_unlock(node(key), Some(LinkTarget::Group(g))).unwrap();
    assert!(engine.is_node_locked(x));
    assert!(engine.is_node_locked(y));
    assert!(!engine.node(x).unwrap().is_locked());

    engine.start_execution(key, 0).unwrap();

    assert!(!engine.is_node_locked(x));
    assert!(engine.drain_events().contains(&FlowEvent::Unlocked(LinkTarget::Group(g))));
}

#[test]
fn test_group_completion_unlocks_node() {
    let trace = trace();
    let mut engine = engine();
    let x = recording_node(&mut engine, "X", &["x"], &trace);
    let y = recording_node(&mut engine, "Y", &["y"], &trace);
    let after = recording_node(&mut engine, "After", &["after"], &trace);
    let g = engine.create_group("Room", &[x, y], Completion::SpecificNodes(vec![x, y])).unwrap();
    engine.set_target_unlock(LinkTarget::Group(g), Some(node(after))).unwrap();

    engine.start_execution(x, 0).unwrap();
    assert!(!engine.is_eligible(after));

    engine.start_execution(y, 0).unwrap();
    assert!(engine.is_eligible(after));
}

#[test]
fn test_member_cannot_unlock_its_own_group() {
    let mut engine = engine();
    let x = engine.add_node("X");
    let y = engine.add_node("Y");
    let g = engine.create_group("G", &[x, y], Completion::Threshold(1)).unwrap();

    let err = engine.set_target_unlock(node(x), Some(LinkTarget::Group(g))).unwrap_err();
    assert!(matches!(err, FlowError::LockCycle { .. }));

    let err = engine.set_target_unlock(LinkTarget::Group(g), Some(node(y))).unwrap_err();
    assert!(matches!(err, FlowError::LockCycle { .. }));
}

#[test]
fn test_removing_key_node_heals_target() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    engine.set_target_unlock(node(a), Some(node(b))).unwrap();

    engine.remove_node(a).unwrap();

    assert_eq!(engine.node(b).unwrap().target_key(), None);
    assert!(!engine.node(b).unwrap().is_locked());
    assert_eq!(engine.repair_links(), 0);
}

#[test]
fn test_link_to_unknown_node_is_rejected() {
    let mut engine = engine();
    let a = engine.add_node("A");

    let err = engine.set_target_unlock(node(a), Some(node(lute::runtime::ids::NodeId(42)))).unwrap_err();
    assert!(matches!(err, FlowError::UnknownNode(_)));
}
