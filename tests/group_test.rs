mod common;

use common::*;
use lute::FlowError;
use lute::runtime::engine::FlowEvent;
use lute::runtime::group::Completion;

#[test]
fn test_threshold_group_completes_on_second_finish() {
    let trace = trace();
    let mut engine = engine();
    let m1 = recording_node(&mut engine, "M1", &["1"], &trace);
    let m2 = recording_node(&mut engine, "M2", &["2"], &trace);
    let m3 = recording_node(&mut engine, "M3", &["3"], &trace);
    let g = engine.create_group("G", &[m1, m2, m3], Completion::Threshold(2)).unwrap();

    engine.start_execution(m1, 0).unwrap();
    assert_eq!(engine.group(g).unwrap().completed_count(), 1);
    assert!(!engine.group(g).unwrap().is_complete());
    assert!(!engine.drain_events().contains(&FlowEvent::GroupCompleted(g)));

    engine.start_execution(m2, 0).unwrap();
    assert!(engine.group(g).unwrap().is_complete());
    assert!(engine.drain_events().contains(&FlowEvent::GroupCompleted(g)));

    engine.start_execution(m3, 0).unwrap();
    assert!(!engine.drain_events().contains(&FlowEvent::GroupCompleted(g)));
}

#[test]
fn test_repeat_finishes_count_once() {
    let trace = trace();
    let mut engine = engine();
    let m1 = recording_node(&mut engine, "M1", &["1"], &trace);
    let m2 = recording_node(&mut engine, "M2", &["2"], &trace);
    let g = engine.create_group("G", &[m1, m2], Completion::Threshold(2)).unwrap();

    engine.start_execution(m1, 0).unwrap();
    engine.start_execution(m1, 0).unwrap();

    assert_eq!(engine.group(g).unwrap().completed_count(), 1);
    assert!(!engine.group(g).unwrap().is_complete());
}

#[test]
fn test_threshold_is_clamped() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let c = engine.add_node("C");

    let g = engine.create_group("G", &[a, b, c], Completion::Threshold(10)).unwrap();
    assert_eq!(engine.group(g).unwrap().threshold(), Some(3));

    engine.set_group_completion(g, Completion::Threshold(0)).unwrap();
    assert_eq!(engine.group(g).unwrap().threshold(), Some(1));

    engine.set_group_completion(g, Completion::Threshold(3)).unwrap();
    engine.remove_from_group(g, c).unwrap();
    assert_eq!(engine.group(g).unwrap().threshold(), Some(2));
}

#[test]
fn test_specific_nodes_only_wait_for_listed_members() {
    let trace = trace();
    let mut engine = engine();
    let a = recording_node(&mut engine, "A", &["a"], &trace);
    let b = recording_node(&mut engine, "B", &["b"], &trace);
    let c = recording_node(&mut engine, "C", &["c"], &trace);
    let g = engine.create_group("G", &[a, b, c], Completion::SpecificNodes(vec![a, c])).unwrap();

    engine.start_execution(b, 0).unwrap();
    engine.start_execution(a, 0).unwrap();
    assert!(!engine.group(g).unwrap().is_complete());

    engine.start_execution(c, 0).unwrap();
    assert!(engine.group(g).unwrap().is_complete());
}

#[test]
fn test_empty_specific_list_requires_all_members() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let outsider = engine.add_node("Outsider");

    let g = engine.create_group("G", &[a, b], Completion::SpecificNodes(vec![outsider])).unwrap();

    assert_eq!(engine.group(g).unwrap().completion(), &Completion::SpecificNodes(vec![a, b]));
}

#[test]
fn test_changing_completion_counts_earlier_finishes() {
    let trace = trace();
    let mut engine = engine();
    let a = recording_node(&mut engine, "A", &["a"], &trace);
    let b = recording_node(&mut engine, "B", &["b"], &trace);
    let g = engine.create_group("G", &[a, b], Completion::Threshold(2)).unwrap();
    engine.start_execution(a, 0).unwrap();
    engine.drain_events();

    engine.set_group_completion(g, Completion::Threshold(1)).unwrap();

    assert!(engine.group(g).unwrap().is_complete());
    assert_eq!(engine.drain_events(), vec![FlowEvent::GroupCompleted(g)]);
}

#[test]
fn test_group_needs_two_members() {
    let mut engine = engine();
    let a = engine.add_node("A");

    let err = engine.create_group("G", &[a, a], Completion::Threshold(1)).unwrap_err();

    assert!(matches!(err, FlowError::GroupTooSmall(1)));
    assert_eq!(engine.node(a).unwrap().group(), None);
}

#[test]
fn test_node_belongs_to_one_group() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let c = engine.add_node("C");
    let g = engine.create_group("G", &[a, b], Completion::Threshold(1)).unwrap();

    let err = engine.create_group("H", &[b, c], Completion::Threshold(1)).unwrap_err();
    assert!(matches!(err, FlowError::AlreadyGrouped { group, .. } if group == g));
    assert_eq!(engine.node(c).unwrap().group(), None);

    engine.add_to_group(g, c).unwrap();
    assert_eq!(engine.node(c).unwrap().group(), Some(g));
    assert_eq!(engine.group(g).unwrap().members(), &[a, b, c]);
}

#[test]
fn test_group_left_with_one_member_is_disbanded() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let g = engine.create_group("G", &[a, b], Completion::Threshold(1)).unwrap();

    engine.remove_from_group(g, a).unwrap();

    assert!(engine.group(g).is_none());
    assert_eq!(engine.node(a).unwrap().group(), None);
    assert_eq!(engine.node(b).unwrap().group(), None);
}

#[test]
fn test_removing_member_node_shrinks_group() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let c = engine.add_node("C");
    let g = engine.create_group("G", &[a, b, c], Completion::Threshold(3)).unwrap();

    engine.remove_node(c).unwrap();

    assert_eq!(engine.group(g).unwrap().members(), &[a, b]);
    assert_eq!(engine.group(g).unwrap().threshold(), Some(2));
    assert_eq!(engine.find_group("G"), Some(g));
}

#[test]
fn test_remove_non_member_is_an_error() {
    let mut engine = engine();
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let c = engine.add_node("C");
    let g = engine.create_group("G", &[a, b], Completion::Threshold(1)).unwrap();

    let err = engine.remove_from_group(g, c).unwrap_err();
    assert!(matches!(err, FlowError::NotAMember { .. }));
}

#[test]
fn test_disband_clears_links() {
    let mut engine = engine();
    let key = engine.add_node("Key");
    let a = engine.add_node("A");
    let b = engine.add_node("B");
    let g = engine.create_group("G", &[a, b], Completion::Threshold(1)).unwrap();
    engine.set_target_unlock(lute::runtime::ids::LinkTarget::Node(key), Some(lute::runtime::ids::LinkTarget::Group(g))).unwrap();
    assert!(engine.is_node_locked(a));

    engine.disband_group(g).unwrap();

    assert!(!engine.is_node_locked(a));
    assert_eq!(engine.node(key).unwrap().target_unlock(), None);
    assert!(matches!(engine.disband_group(g), Err(FlowError::UnknownGroup(_))));
}
