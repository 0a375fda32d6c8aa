//! Applies change records to the client tree.

use crate::error::{ProtocolError, Result};
use crate::protocol::{codec, NodeChange, NodeFeature, NodeId};
use crate::reactive::flush;

use super::tree::StateTree;

/// Replays change records onto a [`StateTree`].
pub struct TreeChangeProcessor;

impl TreeChangeProcessor {
    /// Apply `changes` as one batch, then flush.
    ///
    /// Records are applied strictly in order. Computations triggered by the
    /// batch run once, after the whole batch is in place. The first failing
    /// record aborts the rest of the batch.
    pub fn apply(tree: &StateTree, changes: &[NodeChange]) -> Result<()> {
        Self::apply_batch(tree, changes, false)
    }

    /// Reset the tree and apply a full snapshot as one batch, then flush.
    pub fn apply_snapshot(tree: &StateTree, changes: &[NodeChange]) -> Result<()> {
        Self::apply_batch(tree, changes, true)
    }

    fn apply_batch(tree: &StateTree, changes: &[NodeChange], reset: bool) -> Result<()> {
        // A caller that already opened the batch also closes and flushes it.
        let owns_batch = !tree.is_update_in_progress();
        if owns_batch {
            tree.set_update_in_progress(true);
        }
        if reset {
            tree.reset();
        }
        let outcome = changes
            .iter()
            .try_for_each(|change| Self::apply_change(tree, change));
        if owns_batch {
            tree.set_update_in_progress(false);
            flush();
        }

        tracing::debug!(changes = changes.len(), ok = outcome.is_ok(), "applied change batch");
        outcome
    }

    fn apply_change(tree: &StateTree, change: &NodeChange) -> Result<()> {
        match change {
            NodeChange::Attach { node } => {
                tree.ensure_node(*node);
            }
            NodeChange::Detach { node } => {
                if tree.contains(*node) {
                    tree.mark_detached(*node);
                } else {
                    tracing::debug!(node = %node, "detach for unknown node");
                }
            }
            NodeChange::Put {
                node,
                feat,
                key,
                value,
            } => {
                require_map(*node, *feat)?;
                let value = codec::decode_with_type_info(value, Some(tree))?;
                tree.ensure_node(*node)
                    .map(*feat)
                    .property(key)
                    .set_value(value);
            }
            NodeChange::Remove { node, feat, key } => {
                require_map(*node, *feat)?;
                let target = tree.ensure_node(*node);
                if target.has_feature(*feat) {
                    target.map(*feat).property(key).remove_value();
                }
            }
            NodeChange::ListInsert {
                node,
                feat,
                index,
                value,
            } => {
                require_list(*node, *feat)?;
                let value = codec::decode_with_type_info(value, Some(tree))?;
                tree.ensure_node(*node).list(*feat).insert(*index, value)?;
            }
            NodeChange::ListRemove { node, feat, index } => {
                require_list(*node, *feat)?;
                tree.ensure_node(*node).list(*feat).remove(*index)?;
            }
            NodeChange::Clear { node, feat } => {
                require_list(*node, *feat)?;
                tree.ensure_node(*node).list(*feat).clear();
            }
        }
        Ok(())
    }
}

fn require_map(node: NodeId, feature: NodeFeature) -> std::result::Result<(), ProtocolError> {
    if feature.is_map() {
        Ok(())
    } else {
        Err(ProtocolError::FeatureKindMismatch {
            node,
            feature,
            expected: "map",
        })
    }
}

fn require_list(node: NodeId, feature: NodeFeature) -> std::result::Result<(), ProtocolError> {
    if feature.is_list() {
        Ok(())
    } else {
        Err(ProtocolError::FeatureKindMismatch {
            node,
            feature,
            expected: "list",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::protocol::{keys, Value};
    use crate::reactive::run_when_dependencies_change;
    use std::cell::Cell;
    use std::rc::Rc;

    fn put(node: u32, feat: NodeFeature, key: &str, value: Value) -> NodeChange {
        NodeChange::put(NodeId::new(node), feat, key, &value).unwrap()
    }

    fn insert(node: u32, feat: NodeFeature, index: usize, value: Value) -> NodeChange {
        NodeChange::list_insert(NodeId::new(node), feat, index, &value).unwrap()
    }

    #[test]
    fn put_before_attach_is_a_forward_reference() {
        let attach_first = StateTree::new();
        TreeChangeProcessor::apply(
            &attach_first,
            &[
                NodeChange::Attach { node: NodeId::new(2) },
                put(2, NodeFeature::ElementProperties, "x", Value::from(1)),
            ],
        )
        .unwrap();

        let put_first = StateTree::new();
        TreeChangeProcessor::apply(
            &put_first,
            &[
                put(2, NodeFeature::ElementProperties, "x", Value::from(1)),
                NodeChange::Attach { node: NodeId::new(2) },
            ],
        )
        .unwrap();

        for tree in [attach_first, put_first] {
            let node = tree.node(NodeId::new(2)).unwrap();
            assert_eq!(
                node.peek_property(NodeFeature::ElementProperties, "x"),
                Some(Value::from(1))
            );
        }
    }

    #[test]
    fn batch_runs_computation_once() {
        let tree = StateTree::new();
        let node = tree.ensure_node(NodeId::new(2));
        let map = node.map(NodeFeature::ElementProperties);
        let runs = Rc::new(Cell::new(0));

        let (p1, p2, runs_clone) = (map.property("p1"), map.property("p2"), runs.clone());
        let _computation = run_when_dependencies_change(move || {
            p1.value();
            p2.value();
            runs_clone.set(runs_clone.get() + 1);
        });

        TreeChangeProcessor::apply(
            &tree,
            &[
                put(2, NodeFeature::ElementProperties, "p1", Value::from("a")),
                put(2, NodeFeature::ElementProperties, "p2", Value::from("b")),
            ],
        )
        .unwrap();

        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn list_insert_references_unseen_node() {
        let tree = StateTree::new();
        TreeChangeProcessor::apply(
            &tree,
            &[
                insert(1, NodeFeature::ElementChildren, 0, Value::Node(NodeId::new(7))),
                put(7, NodeFeature::ElementData, keys::TAG, Value::from("span")),
            ],
        )
        .unwrap();

        let child = tree.node(NodeId::new(7)).unwrap();
        assert_eq!(child.parent(), Some(tree.root()));
    }

    #[test]
    fn detach_without_new_parent_unregisters() {
        let tree = StateTree::new();
        TreeChangeProcessor::apply(
            &tree,
            &[insert(1, NodeFeature::ElementChildren, 0, Value::Node(NodeId::new(3)))],
        )
        .unwrap();

        TreeChangeProcessor::apply(
            &tree,
            &[
                NodeChange::ListRemove {
                    node: NodeId::ROOT,
                    feat: NodeFeature::ElementChildren,
                    index: 0,
                },
                NodeChange::Detach { node: NodeId::new(3) },
            ],
        )
        .unwrap();

        assert!(!tree.contains(NodeId::new(3)));
    }

    #[test]
    fn wrong_feature_kind_is_a_protocol_error() {
        let tree = StateTree::new();
        let error = TreeChangeProcessor::apply(
            &tree,
            &[put(1, NodeFeature::ElementChildren, "x", Value::Null)],
        )
        .unwrap_err();

        assert!(matches!(
            error,
            Error::Protocol(ProtocolError::FeatureKindMismatch { expected: "map", .. })
        ));
    }

    #[test]
    fn out_of_bounds_remove_is_a_protocol_error() {
        let tree = StateTree::new();
        let error = TreeChangeProcessor::apply(
            &tree,
            &[NodeChange::ListRemove {
                node: NodeId::ROOT,
                feat: NodeFeature::ClassList,
                index: 0,
            }],
        )
        .unwrap_err();

        assert!(error.is_protocol_error());
        assert!(!tree.is_update_in_progress());
    }

    #[test]
    fn snapshot_replaces_previous_state() {
        let tree = StateTree::new();
        TreeChangeProcessor::apply(
            &tree,
            &[insert(1, NodeFeature::ElementChildren, 0, Value::Node(NodeId::new(3)))],
        )
        .unwrap();

        TreeChangeProcessor::apply_snapshot(
            &tree,
            &[insert(1, NodeFeature::ElementChildren, 0, Value::Node(NodeId::new(4)))],
        )
        .unwrap();

        assert!(!tree.contains(NodeId::new(3)));
        assert_eq!(
            tree.root().list(NodeFeature::ElementChildren).peek_values(),
            vec![Value::Node(NodeId::new(4))]
        );
    }
}
