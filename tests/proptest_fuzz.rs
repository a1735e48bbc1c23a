//! Property-based tests (fuzzing) for the tree engine.
//!
//! Uses proptest to generate random operation sequences and malformed
//! inputs, and verifies the engine keeps its path invariants and never
//! panics, only returns clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};

use mptree::storage::sql_filter::{Dialect, FilterTranslator};
use mptree::{
    InMemoryNodeStore, NodeFilter, PathCodec, Position, SiblingInsert, TreeConfig, TreeManager,
    TreeNode, MAX_STEP_LEN,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    AddRoot,
    AddChild(usize),
    AddSibling(usize, Position),
    Move(usize, usize, Position),
    Delete(usize),
}

fn position_strategy() -> impl Strategy<Value = Position> {
    prop_oneof![
        Just(Position::FirstChild),
        Just(Position::LastChild),
        Just(Position::FirstSibling),
        Just(Position::Left),
        Just(Position::Right),
        Just(Position::LastSibling),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        2 => Just(Op::AddRoot),
        4 => any::<usize>().prop_map(Op::AddChild),
        3 => (any::<usize>(), position_strategy()).prop_map(|(i, p)| Op::AddSibling(i, p)),
        3 => (any::<usize>(), any::<usize>(), position_strategy())
            .prop_map(|(a, b, p)| Op::Move(a, b, p)),
        1 => any::<usize>().prop_map(Op::Delete),
    ]
}

fn sibling_insert_strategy() -> impl Strategy<Value = SiblingInsert> {
    prop_oneof![Just(SiblingInsert::Direct), Just(SiblingInsert::Shift)]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Apply `ops` and check the whole tree after every step.
fn run_ops(ops: Vec<Op>, mode: SiblingInsert) {
    runtime().block_on(async move {
        let config = TreeConfig { sibling_insert: mode, ..Default::default() };
        let tree = TreeManager::with_config(InMemoryNodeStore::new(), &config).unwrap();

        for op in ops {
            let mut nodes = tree.store().snapshot();
            nodes.sort_by(|a, b| a.path.cmp(&b.path));
            let pick = |i: usize| nodes.get(i % nodes.len().max(1)).cloned();

            let result = match op {
                Op::AddRoot => tree.add_root(json!({})).await.map(|_| ()),
                Op::AddChild(i) => match pick(i) {
                    Some(parent) => tree.add_child(&parent, json!({})).await.map(|_| ()),
                    None => continue,
                },
                Op::AddSibling(i, position) => match pick(i) {
                    Some(reference) => tree
                        .add_sibling(&reference, json!({}), position)
                        .await
                        .map(|_| ()),
                    None => continue,
                },
                Op::Move(a, b, position) => match (pick(a), pick(b)) {
                    (Some(node), Some(target)) => {
                        let before = subtree_shape(&tree, &node).await;
                        let moved = tree.move_node(&node, &target, position).await;
                        if let Ok(moved) = &moved {
                            assert_eq!(moved.id, node.id);
                            assert_eq!(subtree_shape(&tree, moved).await, before);
                        }
                        moved.map(|_| ())
                    }
                    _ => continue,
                },
                Op::Delete(i) => match pick(i) {
                    Some(node) => {
                        let expected = tree.count_descendants(&node).await.unwrap() + 1;
                        let removed = tree.delete(&node).await.unwrap();
                        assert_eq!(removed, expected);
                        Ok(())
                    }
                    None => continue,
                },
            };

            if let Err(e) = result {
                let allowed = e.is_validation() || (mode == SiblingInsert::Direct && e.is_conflict());
                assert!(allowed, "unexpected error in {mode:?} mode: {e}");
            }

            let report = tree.check().await.unwrap();
            assert!(report.is_consistent(), "{:?}", report.violations);
            assert_descendants_match_prefixes(&tree).await;
        }
    });
}

/// Descendant ids of `node` with their depth below it.
async fn subtree_shape(
    tree: &TreeManager<InMemoryNodeStore>,
    node: &TreeNode,
) -> BTreeMap<String, u32> {
    let base = node.depth.unwrap();
    tree.get_descendants(node, false)
        .await
        .unwrap()
        .into_iter()
        .map(|d| (d.id, d.depth.unwrap() - base))
        .collect()
}

/// B is a descendant of A exactly when A's path is a proper prefix of B's.
async fn assert_descendants_match_prefixes(tree: &TreeManager<InMemoryNodeStore>) {
    let nodes = tree.store().snapshot();
    for a in &nodes {
        let found: HashSet<String> = tree
            .get_descendants(a, false)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        let a_path = a.path.as_deref().unwrap();
        for b in &nodes {
            let b_path = b.path.as_deref().unwrap();
            let by_prefix = b_path.starts_with(a_path) && b_path != a_path;
            assert_eq!(
                found.contains(&b.id),
                by_prefix,
                "{a_path} / {b_path}: descendant query disagrees with path prefix"
            );
        }
    }
}

// =============================================================================
// Codec properties
// =============================================================================

proptest! {
    #[test]
    fn prop_encode_decode_roundtrip(step_len in 1usize..=MAX_STEP_LEN, seed in any::<u64>()) {
        let codec = PathCodec::new(step_len).unwrap();
        let n = seed % codec.capacity();
        let segment = codec.encode(n).unwrap();
        prop_assert_eq!(segment.len(), step_len);
        prop_assert_eq!(codec.decode(&segment).unwrap(), n);
    }

    /// Fixed width makes string order agree with numeric order.
    #[test]
    fn prop_segment_order_matches_numeric(a in 0u64..1_679_616, b in 0u64..1_679_616) {
        let codec = PathCodec::default();
        let (ea, eb) = (codec.encode(a).unwrap(), codec.encode(b).unwrap());
        prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
    }

    #[test]
    fn prop_decode_never_panics(s in ".{0,8}") {
        let _ = PathCodec::default().decode(&s);
        let _ = PathCodec::default().is_well_formed(&s);
    }

    #[test]
    fn prop_ancestor_paths_are_prefixes(segments in prop::collection::vec(1u64..1000, 1..6)) {
        let codec = PathCodec::default();
        let mut path: Option<String> = None;
        for n in &segments {
            path = Some(codec.child_path(path.as_deref(), *n).unwrap());
        }
        let path = path.unwrap();

        let ancestors = codec.ancestor_paths(&path, false);
        prop_assert_eq!(ancestors.len(), segments.len() - 1);
        for ancestor in &ancestors {
            prop_assert!(path.starts_with(ancestor.as_str()));
            prop_assert!(ancestor.len() < path.len());
        }
        prop_assert_eq!(codec.depth_of(&path).unwrap() as usize, segments.len());
    }

    /// Every `?` in the generated SQL has exactly one bound parameter.
    #[test]
    fn prop_sql_placeholders_match_params(
        prefix in "[0-9A-Z%_!]{0,12}",
        depth in prop::option::of(1u32..10),
        limit in prop::option::of(1usize..100),
        name in "[a-z_]{1,8}",
        value in ".{0,10}",
    ) {
        let mut filter = NodeFilter::all().descendants_of(prefix).field_eq(name, value);
        if let Some(depth) = depth {
            filter = filter.depth(depth);
        }
        if let Some(limit) = limit {
            filter = filter.limit(limit);
        }
        for dialect in [Dialect::Sqlite, Dialect::MySql] {
            let sql = FilterTranslator::translate(&filter, dialect).unwrap();
            let placeholders = sql.clause.matches('?').count() + sql.tail.matches('?').count();
            prop_assert_eq!(placeholders, sql.params.len());
        }
    }
}

// =============================================================================
// Operation sequences
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_random_ops_keep_tree_consistent(
        ops in prop::collection::vec(op_strategy(), 1..40),
        mode in sibling_insert_strategy(),
    ) {
        run_ops(ops, mode);
    }
}
