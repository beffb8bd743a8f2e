//! Race/culture/profession rule trees
//!
//! Catalog trees are instantiated into an arena per stage activation; nodes
//! reference each other by index, never by pointer. `valid` and `suggested`
//! are recomputed whenever any of the three selectors (or the bonus track)
//! changes.

use crate::domain::document::{bool_or, JsonMap};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    Race,
    Culture,
    Profession,
}

impl SelectorKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Race => "race",
            Self::Culture => "culture",
            Self::Profession => "profession",
        }
    }
}

/// Direct verdict of a suggestion/possibility predicate on a single node,
/// before tree propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectState {
    Suggested,
    Possible,
    Unsuitable,
}

#[derive(Debug, Clone)]
pub struct RuleNode {
    pub kind: SelectorKind,
    pub name: String,
    /// Catalog record for this node, minus the nested variant definitions.
    pub data: JsonMap,
    pub parent: Option<NodeId>,
    /// Non-combinable sub-variants, forming the selection tree.
    pub children: Vec<NodeId>,
    /// Combinable variants applicable at this node, own plus inherited.
    pub variants: Vec<NodeId>,
    pub depth: usize,
    pub valid: bool,
    pub suggested: bool,
}

#[derive(Debug, Clone)]
pub struct RuleTree {
    kind: SelectorKind,
    nodes: Vec<RuleNode>,
    roots: Vec<NodeId>,
}

impl RuleTree {
    pub fn build(kind: SelectorKind, catalog: &JsonMap) -> Self {
        let mut tree = Self { kind, nodes: Vec::new(), roots: Vec::new() };
        for (name, record) in catalog {
            if let Some(record) = record.as_object() {
                let id = tree.add_node(name, record, None, 0, &[]);
                tree.roots.push(id);
            }
        }
        tree
    }

    fn add_node(
        &mut self,
        name: &str,
        record: &JsonMap,
        parent: Option<NodeId>,
        depth: usize,
        inherited_variants: &[NodeId],
    ) -> NodeId {
        let mut data = record.clone();
        data.remove("variants");

        let id = NodeId(self.nodes.len());
        self.nodes.push(RuleNode {
            kind: self.kind,
            name: name.to_string(),
            data,
            parent,
            children: Vec::new(),
            variants: Vec::new(),
            depth,
            valid: true,
            suggested: false,
        });

        let mut variants = inherited_variants.to_vec();
        if let Some(Value::Object(nested)) = record.get("variants") {
            // Combinable variants first so sub-variant nodes inherit them.
            for (child_name, child) in nested {
                if let Some(child) = child.as_object() {
                    if bool_or(child, "combinable", false) {
                        let variant = self.add_node(child_name, child, Some(id), depth + 1, &[]);
                        variants.push(variant);
                    }
                }
            }
            self.nodes[id.0].variants = variants.clone();
            for (child_name, child) in nested {
                if let Some(child) = child.as_object() {
                    if !bool_or(child, "combinable", false) {
                        let node = self.add_node(child_name, child, Some(id), depth + 1, &variants);
                        self.nodes[id.0].children.push(node);
                    }
                }
            }
        } else {
            self.nodes[id.0].variants = variants;
        }
        id
    }

    pub fn kind(&self) -> SelectorKind {
        self.kind
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> &RuleNode {
        &self.nodes[id.0]
    }

    /// Node ids from root down to `id`, inclusive.
    pub fn chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Nearest value for `key` walking from `id` up to the root.
    pub fn lookup<'a>(&'a self, id: NodeId, key: &str) -> Option<&'a Value> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id.0];
            if let Some(value) = node.data.get(key) {
                return Some(value);
            }
            current = node.parent;
        }
        None
    }

    /// Build-point cost of selecting `id`, from the nearest ancestor that
    /// declares one.
    pub fn cost(&self, id: NodeId) -> i64 {
        self.lookup(id, "cost").and_then(Value::as_i64).unwrap_or(0)
    }

    /// Selection path of node names from root to `id`.
    pub fn path(&self, id: NodeId) -> Vec<String> {
        self.chain(id).into_iter().map(|n| self.nodes[n.0].name.clone()).collect()
    }

    /// Resolve a selection path back to a node.
    pub fn find_path(&self, path: &[String]) -> Option<NodeId> {
        let mut names = path.iter();
        let first = names.next()?;
        let mut current = *self.roots.iter().find(|id| self.nodes[id.0].name == *first)?;
        for name in names {
            current = *self.nodes[current.0]
                .children
                .iter()
                .find(|id| self.nodes[id.0].name == *name)?;
        }
        Some(current)
    }

    pub fn find_variant(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.nodes[id.0]
            .variants
            .iter()
            .copied()
            .find(|v| self.nodes[v.0].name == name)
    }

    pub fn set_flags(&mut self, id: NodeId, valid: bool, suggested: bool) {
        self.nodes[id.0].valid = valid;
        self.nodes[id.0].suggested = suggested;
    }

    /// Recompute `valid`/`suggested` bottom-up from a direct predicate.
    ///
    /// A directly suggested or possible node settles its whole subtree; an
    /// unsuitable inner node is valid if any descendant is, suggested only
    /// if all reachable descendants are. Variants carry their own direct
    /// verdict, defaulting to valid/not-suggested.
    pub fn propagate(&mut self, judge: &dyn Fn(&RuleNode) -> DirectState) {
        for root in self.roots.clone() {
            self.propagate_node(root, judge);
        }
    }

    fn propagate_node(&mut self, id: NodeId, judge: &dyn Fn(&RuleNode) -> DirectState) -> (bool, bool) {
        let direct = judge(&self.nodes[id.0]);
        let (valid, suggested) = match direct {
            DirectState::Suggested => {
                self.reset_descendants(id);
                (true, true)
            }
            DirectState::Possible => {
                self.reset_descendants(id);
                (true, false)
            }
            DirectState::Unsuitable => {
                let children = self.nodes[id.0].children.clone();
                if children.is_empty() {
                    (false, false)
                } else {
                    let mut any_valid = false;
                    let mut all_suggested = true;
                    for child in children {
                        let (v, s) = self.propagate_node(child, judge);
                        any_valid |= v;
                        all_suggested &= s;
                    }
                    (any_valid, any_valid && all_suggested)
                }
            }
        };
        for variant in self.nodes[id.0].variants.clone() {
            let (v, s) = match judge(&self.nodes[variant.0]) {
                DirectState::Suggested => (true, true),
                DirectState::Possible => (true, false),
                DirectState::Unsuitable => (true, false),
            };
            self.set_flags(variant, v, s);
        }
        self.set_flags(id, valid, suggested);
        (valid, suggested)
    }

    fn reset_descendants(&mut self, id: NodeId) {
        for child in self.nodes[id.0].children.clone() {
            self.set_flags(child, true, false);
            self.reset_descendants(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree() -> RuleTree {
        let catalog = json!({
            "Elf": {
                "cost": 18,
                "variants": {
                    "Auelf": { "cost": 3 },
                    "Firnelf": { "cost": 5 },
                    "Zahori-Blut": { "combinable": true, "cost": 2 }
                }
            },
            "Zwerg": { "cost": 6 }
        });
        RuleTree::build(SelectorKind::Race, catalog.as_object().unwrap())
    }

    #[test]
    fn children_inherit_combinable_variants() {
        let tree = tree();
        let elf = tree.find_path(&["Elf".into()]).unwrap();
        let auelf = tree.find_path(&["Elf".into(), "Auelf".into()]).unwrap();
        assert_eq!(tree.node(elf).variants.len(), 1);
        assert_eq!(tree.node(auelf).variants.len(), 1);
        assert!(tree.find_variant(auelf, "Zahori-Blut").is_some());
    }

    #[test]
    fn cost_falls_back_to_parent_chain() {
        let tree = tree();
        let auelf = tree.find_path(&["Elf".into(), "Auelf".into()]).unwrap();
        assert_eq!(tree.cost(auelf), 3);
        let variant = tree.find_variant(auelf, "Zahori-Blut").unwrap();
        assert_eq!(tree.cost(variant), 2);
    }

    #[test]
    fn propagation_derives_inner_validity_from_children() {
        let mut tree = tree();
        // Only Firnelf is directly possible; Elf should stay valid through it.
        tree.propagate(&|node| {
            if node.name == "Firnelf" {
                DirectState::Possible
            } else {
                DirectState::Unsuitable
            }
        });
        let elf = tree.find_path(&["Elf".into()]).unwrap();
        let zwerg = tree.find_path(&["Zwerg".into()]).unwrap();
        assert!(tree.node(elf).valid);
        assert!(!tree.node(elf).suggested);
        assert!(!tree.node(zwerg).valid);
    }

    #[test]
    fn suggested_node_settles_its_subtree() {
        let mut tree = tree();
        tree.propagate(&|node| {
            if node.name == "Elf" {
                DirectState::Suggested
            } else {
                DirectState::Unsuitable
            }
        });
        let elf = tree.find_path(&["Elf".into()]).unwrap();
        let auelf = tree.find_path(&["Elf".into(), "Auelf".into()]).unwrap();
        assert!(tree.node(elf).suggested);
        assert!(tree.node(auelf).valid);
        assert!(!tree.node(auelf).suggested);
    }
}
