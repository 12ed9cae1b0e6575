// Copyright 2024 Braid Contributors
// SPDX-License-Identifier: Apache-2.0, MIT

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid tree shape: {0}")]
    InvalidShape(String),
}

/// A node of the file's Merkle-tree skeleton. The shape is fully determined
/// by the leaf count and fan-out, so the tree can be rebuilt from metadata
/// alone; CIDs are stamped in while walking.
#[derive(Debug, Clone)]
pub struct TreeNode {
    /// 0-based lattice index of this node's block.
    pub lattice_index: usize,
    pub cid: Option<String>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::count).sum::<usize>()
    }
}

/// Builds the skeleton for a file with `leaves` data chunks grouped
/// `max_children` per interior node.
///
/// Lattice indices are assigned leaves-first: leaves take `0..leaves` in
/// file order, then each interior level left to right, the root last. The
/// uploader uses the same rule, which is what keeps the metadata CID map
/// and this skeleton in agreement.
pub fn build_skeleton(leaves: usize, max_children: usize) -> Result<TreeNode, Error> {
    if leaves == 0 {
        return Err(Error::InvalidShape("tree has no leaves".to_string()));
    }
    if leaves > 1 && max_children < 2 {
        return Err(Error::InvalidShape(format!(
            "fan-out {} cannot join {} leaves",
            max_children, leaves
        )));
    }

    let mut level: Vec<TreeNode> = (0..leaves)
        .map(|i| TreeNode {
            lattice_index: i,
            cid: None,
            children: Vec::new(),
        })
        .collect();
    let mut next_index = leaves;

    while level.len() > 1 {
        let mut parents = Vec::with_capacity((level.len() + max_children - 1) / max_children);
        let mut nodes = level.into_iter().peekable();
        while nodes.peek().is_some() {
            let children: Vec<TreeNode> = nodes.by_ref().take(max_children).collect();
            parents.push(TreeNode {
                lattice_index: next_index,
                cid: None,
                children,
            });
            next_index += 1;
        }
        level = parents;
    }

    Ok(level.remove(0))
}

/// Number of tree levels for the given shape; a single chunk is depth 1.
pub fn depth(leaves: usize, max_children: usize) -> usize {
    let mut levels = 1;
    let mut width = leaves;
    while width > 1 {
        width = (width + max_children - 1) / max_children;
        levels += 1;
    }
    levels
}

/// Total number of nodes (leaves plus interior) for the given shape.
pub fn total_nodes(leaves: usize, max_children: usize) -> usize {
    let mut total = leaves;
    let mut width = leaves;
    while width > 1 {
        width = (width + max_children - 1) / max_children;
        total += width;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_file_is_one_node() {
        let root = build_skeleton(1, 4).unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.lattice_index, 0);
        assert_eq!(depth(1, 4), 1);
        assert_eq!(total_nodes(1, 4), 1);
    }

    #[test]
    fn two_level_tree_indexes_leaves_first() {
        let root = build_skeleton(3, 4).unwrap();
        assert_eq!(root.lattice_index, 3);
        assert_eq!(root.children.len(), 3);
        for (i, child) in root.children.iter().enumerate() {
            assert!(child.is_leaf());
            assert_eq!(child.lattice_index, i);
        }
        assert_eq!(depth(3, 4), 2);
        assert_eq!(total_nodes(3, 4), 4);
    }

    #[test]
    fn three_level_tree_has_root_last() {
        // 5 leaves, fan-out 2: levels of 5, 3, 2, 1 nodes
        let root = build_skeleton(5, 2).unwrap();
        assert_eq!(total_nodes(5, 2), 11);
        assert_eq!(root.count(), 11);
        assert_eq!(root.lattice_index, 10);
        assert_eq!(depth(5, 2), 4);

        // interior indices follow level order
        assert_eq!(root.children[0].lattice_index, 8);
        assert_eq!(root.children[1].lattice_index, 9);
        assert_eq!(root.children[0].children[0].lattice_index, 5);
    }

    #[test]
    fn rejects_degenerate_shapes() {
        assert!(build_skeleton(0, 4).is_err());
        assert!(build_skeleton(2, 1).is_err());
        assert!(build_skeleton(1, 1).is_ok());
    }
}
