//! Hierarchical choice maps.
//!
//! Nodes live in a flat arena: index `0` is the root, each node records its
//! parent and its children in insertion order, and addresses are resolved by
//! walking child indices. A node either holds a value (a leaf) or has
//! children; never both.

use std::fmt::{self, Display};

use crate::core::address::{Address, Selection};
use crate::core::value::Value;
use crate::error::GFIError;

type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone)]
struct Node {
    label: Option<Address>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    value: Option<Value>,
}

impl Node {
    fn new(label: Option<Address>, parent: Option<NodeId>) -> Self {
        Self {
            label,
            parent,
            children: Vec::new(),
            value: None,
        }
    }

    fn is_vacant(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChoiceMap {
    nodes: Vec<Node>,
}

impl Default for ChoiceMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceMap {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(None, None)],
        }
    }

    /// A map holding a single value at the root address.
    pub fn leaf(value: Value) -> Self {
        let mut map = Self::new();
        map.nodes[ROOT].value = Some(value);
        map
    }

    /// Build a map from `(address, value)` pairs, failing on repeated addresses.
    pub fn from_pairs<A, V>(pairs: impl IntoIterator<Item = (A, V)>) -> Result<Self, GFIError>
    where
        A: Into<Address>,
        V: Into<Value>,
    {
        let mut map = Self::new();
        for (addr, value) in pairs {
            map.insert(&addr.into(), value.into())?;
        }
        Ok(map)
    }

    /// Builder form of [`ChoiceMap::insert`].
    pub fn with(mut self, addr: impl Into<Address>, value: impl Into<Value>) -> Result<Self, GFIError> {
        self.insert(&addr.into(), value.into())?;
        Ok(self)
    }

    fn child(&self, node: NodeId, label: &Address) -> Option<NodeId> {
        self.nodes[node]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].label.as_ref() == Some(label))
    }

    fn find(&self, addr: &Address) -> Option<NodeId> {
        addr.segments()
            .iter()
            .try_fold(ROOT, |node, seg| self.child(node, seg))
    }

    fn address_of(&self, mut node: NodeId) -> Address {
        let mut segments = Vec::new();
        while let Some(parent) = self.nodes[node].parent {
            if let Some(label) = &self.nodes[node].label {
                segments.push(label.clone());
            }
            node = parent;
        }
        segments.reverse();
        Address::from_segments(segments)
    }

    fn push_node(&mut self, label: Address, parent: NodeId) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(Some(label), Some(parent)));
        self.nodes[parent].children.push(id);
        id
    }

    /// Record `value` at `addr`. Writing over an existing leaf, below an
    /// existing leaf, or over an existing submap is an `AddressCollision`.
    pub fn insert(&mut self, addr: &Address, value: Value) -> Result<(), GFIError> {
        let mut node = ROOT;
        let mut walked = Vec::new();
        for seg in addr.segments() {
            if self.nodes[node].value.is_some() {
                return Err(GFIError::AddressCollision {
                    address: Address::from_segments(walked),
                });
            }
            walked.push(seg.clone());
            node = match self.child(node, &seg) {
                Some(c) => c,
                None => self.push_node(seg, node),
            };
        }
        if !self.nodes[node].is_vacant() {
            return Err(GFIError::AddressCollision {
                address: addr.clone(),
            });
        }
        self.nodes[node].value = Some(value);
        Ok(())
    }

    /// Namespace every choice of `submap` under `addr`.
    pub fn insert_submap(&mut self, addr: &Address, submap: &ChoiceMap) -> Result<(), GFIError> {
        for (inner, value) in submap.iter() {
            self.insert(&addr.join(&inner), value.clone())?;
        }
        Ok(())
    }

    /// Value of the leaf at `addr`.
    pub fn get(&self, addr: &Address) -> Option<&Value> {
        self.find(addr).and_then(|n| self.nodes[n].value.as_ref())
    }

    pub fn root_value(&self) -> Option<&Value> {
        self.nodes[ROOT].value.as_ref()
    }

    /// Whether a leaf exists at `addr`.
    pub fn contains(&self, addr: &Address) -> bool {
        self.get(addr).is_some()
    }

    /// Whether anything (a leaf or a nonempty submap) exists at `addr`.
    pub fn has_submap(&self, addr: &Address) -> bool {
        self.find(addr).is_some_and(|n| !self.nodes[n].is_vacant())
    }

    /// Copy of the subtree rooted at `addr`; empty if nothing is there.
    pub fn get_submap(&self, addr: &Address) -> ChoiceMap {
        let mut out = ChoiceMap::new();
        if let Some(node) = self.find(addr) {
            out.nodes[ROOT].value = self.nodes[node].value.clone();
            self.copy_children(node, &mut out, ROOT);
        }
        out
    }

    fn copy_children(&self, from: NodeId, out: &mut ChoiceMap, to: NodeId) {
        for &c in &self.nodes[from].children {
            if self.nodes[c].is_vacant() {
                continue;
            }
            let label = self.nodes[c].label.clone().unwrap_or_else(Address::root);
            let id = out.push_node(label, to);
            out.nodes[id].value = self.nodes[c].value.clone();
            self.copy_children(c, out, id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.iter().all(|n| n.value.is_none())
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.value.is_some()).count()
    }

    /// Leaves in insertion order.
    pub fn iter(&self) -> Vec<(Address, &Value)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, n)| n.value.as_ref().map(|v| (self.address_of(id), v)))
            .collect()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.iter().into_iter().map(|(a, _)| a).collect()
    }

    /// Leaves whose address is in `selection`.
    pub fn filter(&self, selection: &Selection) -> ChoiceMap {
        let mut out = ChoiceMap::new();
        for (addr, value) in self.iter() {
            if selection.contains(&addr) {
                // Addresses come from a valid map, so re-insertion cannot collide.
                let _ = out.insert(&addr, value.clone());
            }
        }
        out
    }

    /// Union of two maps with disjoint addresses.
    pub fn merge(&self, other: &ChoiceMap) -> Result<ChoiceMap, GFIError> {
        let mut out = self.clone();
        for (addr, value) in other.iter() {
            out.insert(&addr, value.clone())?;
        }
        Ok(out)
    }

    /// Union where `other` wins every conflict. Returns the merged map and
    /// the values of `self` that were overridden.
    pub fn merge_override(&self, other: &ChoiceMap) -> (ChoiceMap, ChoiceMap) {
        let mut merged = other.clone();
        let mut discarded = ChoiceMap::new();
        for (addr, value) in self.iter() {
            if merged.insert(&addr, value.clone()).is_err() {
                let _ = discarded.insert(&addr, value.clone());
            }
        }
        (merged, discarded)
    }
}

impl PartialEq for ChoiceMap {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .into_iter()
                .all(|(addr, v)| other.get(&addr) == Some(v))
    }
}

impl Display for ChoiceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self
            .iter()
            .into_iter()
            .map(|(a, v)| format!("{}: {}", a, v))
            .collect();
        write!(f, "{{{}}}", entries.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{path, s, sym};

    fn xyz() -> ChoiceMap {
        ChoiceMap::from_pairs([("x", 1.0), ("y", 2.0)])
            .unwrap()
            .with(path!(q, z), 3.0)
            .unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let map = xyz();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(&sym!(x)), Some(&Value::from(1.0)));
        assert_eq!(map.get(&path!(q, z)), Some(&Value::from(3.0)));
        assert!(map.get(&sym!(q)).is_none());
        assert!(map.has_submap(&sym!(q)));
        assert!(!map.contains(&sym!(w)));
        assert_eq!(
            map.addresses(),
            vec![sym!(x), sym!(y), path!(q, z)]
        );
    }

    #[test]
    fn test_collisions() {
        let mut map = xyz();
        assert_eq!(
            map.insert(&sym!(x), Value::from(0.0)),
            Err(GFIError::AddressCollision { address: sym!(x) })
        );
        assert_eq!(
            map.insert(&path!(x, deeper), Value::from(0.0)),
            Err(GFIError::AddressCollision { address: sym!(x) })
        );
        assert_eq!(
            map.insert(&sym!(q), Value::from(0.0)),
            Err(GFIError::AddressCollision { address: sym!(q) })
        );
    }

    #[test]
    fn test_root_leaf_and_submaps() {
        let leaf = ChoiceMap::leaf(Value::from(4.0));
        assert_eq!(leaf.root_value(), Some(&Value::from(4.0)));
        assert_eq!(leaf.get(&Address::root()), Some(&Value::from(4.0)));

        let mut outer = ChoiceMap::new();
        outer.insert_submap(&sym!(a), &leaf).unwrap();
        outer.insert_submap(&sym!(b), &xyz()).unwrap();
        assert_eq!(outer.get(&sym!(a)), Some(&Value::from(4.0)));
        assert_eq!(outer.get(&path!(b, q, z)), Some(&Value::from(3.0)));

        let sub = outer.get_submap(&sym!(b));
        assert_eq!(sub, xyz());
        assert!(outer.get_submap(&sym!(missing)).is_empty());
        assert_eq!(
            outer.get_submap(&sym!(a)).root_value(),
            Some(&Value::from(4.0))
        );
    }

    #[test]
    fn test_filter_partitions() {
        let map = xyz();
        let sel = s!(x) | s!(q);
        let picked = map.filter(&sel);
        let rest = map.filter(&!sel);
        assert_eq!(picked.addresses(), vec![sym!(x), path!(q, z)]);
        assert_eq!(rest.addresses(), vec![sym!(y)]);
        assert_eq!(picked.merge(&rest).unwrap(), map);
    }

    #[test]
    fn test_merge_policies() {
        let a = ChoiceMap::from_pairs([("x", 1.0)]).unwrap();
        let b = ChoiceMap::from_pairs([("x", 5.0), ("y", 2.0)]).unwrap();

        assert_eq!(
            a.merge(&b),
            Err(GFIError::AddressCollision { address: sym!(x) })
        );

        let (merged, discarded) = a.merge_override(&b);
        assert_eq!(merged.get(&sym!(x)), Some(&Value::from(5.0)));
        assert_eq!(merged.get(&sym!(y)), Some(&Value::from(2.0)));
        assert_eq!(discarded.get(&sym!(x)), Some(&Value::from(1.0)));
        assert_eq!(discarded.len(), 1);
    }

    #[test]
    fn test_equality_ignores_order() {
        let a = ChoiceMap::from_pairs([("x", 1.0), ("y", 2.0)]).unwrap();
        let b = ChoiceMap::from_pairs([("y", 2.0), ("x", 1.0)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "{x: 1, y: 2}");
    }
}
