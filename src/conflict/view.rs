//! Flat-arena conflict tree for presentation.
//!
//! Nodes live in one `Vec` and refer to each other by index, so the tree is
//! a single allocation-friendly structure with no interior mutability; the
//! display layer reads rows out of it instead of walking linked nodes.

use crate::diff::directory::{DirectoryDiffResults, TimestampFileProperties};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Org,
    Directory,
    File,
}

#[derive(Debug, Clone)]
pub struct ConflictNode {
    pub kind: NodeKind,
    pub label: String,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub conflict: Option<TimestampFileProperties>,
}

/// One renderable line of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayRow {
    pub depth: usize,
    pub label: String,
    pub is_file: bool,
    pub local_stamp: Option<String>,
    pub remote_stamp: Option<String>,
}

pub struct ConflictTree {
    nodes: Vec<ConflictNode>,
    root: usize,
}

impl ConflictTree {
    /// Build the tree from a diff result. Entries are inserted in local-path
    /// order; shared directory prefixes collapse into one node.
    pub fn from_results(org_label: &str, results: &DirectoryDiffResults) -> Self {
        let mut tree = Self {
            nodes: vec![ConflictNode {
                kind: NodeKind::Org,
                label: org_label.to_string(),
                parent: None,
                children: Vec::new(),
                conflict: None,
            }],
            root: 0,
        };
        let mut entries: Vec<&TimestampFileProperties> = results.different.iter().collect();
        entries.sort_by(|a, b| a.local_rel_path.cmp(&b.local_rel_path));
        for entry in entries {
            let segments: Vec<&str> = entry
                .local_rel_path
                .split(['/', '\\'])
                .filter(|s| !s.is_empty())
                .collect();
            if segments.is_empty() {
                continue;
            }
            let mut cursor = tree.root;
            let (dirs, leaf) = segments.split_at(segments.len() - 1);
            for dir in dirs {
                cursor = tree.ensure_dir_child(cursor, dir);
            }
            tree.push(cursor, NodeKind::File, leaf[0].to_string(), Some(entry.clone()));
        }
        tree
    }

    fn push(
        &mut self,
        parent: usize,
        kind: NodeKind,
        label: String,
        conflict: Option<TimestampFileProperties>,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(ConflictNode {
            kind,
            label,
            parent: Some(parent),
            children: Vec::new(),
            conflict,
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn ensure_dir_child(&mut self, parent: usize, label: &str) -> usize {
        let existing = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].kind == NodeKind::Directory && self.nodes[c].label == label);
        match existing {
            Some(id) => id,
            None => self.push(parent, NodeKind::Directory, label.to_string(), None),
        }
    }

    pub fn conflict_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.conflict.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.conflict_count() == 0
    }

    /// All conflict payloads in local-path order.
    pub fn conflicts(&self) -> impl Iterator<Item = &TimestampFileProperties> {
        self.nodes.iter().filter_map(|n| n.conflict.as_ref())
    }

    /// Pre-order rows with directories listed before files at each level.
    pub fn rows(&self) -> Vec<DisplayRow> {
        let mut rows = Vec::new();
        self.collect_rows(self.root, 0, &mut rows);
        rows
    }

    fn collect_rows(&self, node: usize, depth: usize, rows: &mut Vec<DisplayRow>) {
        let n = &self.nodes[node];
        rows.push(DisplayRow {
            depth,
            label: n.label.clone(),
            is_file: n.kind == NodeKind::File,
            local_stamp: n
                .conflict
                .as_ref()
                .and_then(|c| c.local_last_modified_date.clone()),
            remote_stamp: n
                .conflict
                .as_ref()
                .and_then(|c| c.remote_last_modified_date.clone()),
        });
        let mut children = n.children.clone();
        children.sort_by_key(|&c| {
            (
                self.nodes[c].kind == NodeKind::File,
                self.nodes[c].label.clone(),
            )
        });
        for child in children {
            self.collect_rows(child, depth + 1, rows);
        }
    }
}
