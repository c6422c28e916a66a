//! Condition expressions
//!
//! A composable, immutable boolean tree of field comparisons. Trees are
//! built from flat `field__op` pairs or combined with `&`, `|`, and `!`;
//! a relationship segment (`rel__field`) produces a nested node scoped to
//! that relationship. `simplify` normalizes the tree so that repeated
//! `filter` calls compile to flat query text with one sub-select per
//! relationship scope.

pub mod ordering;

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};

use crate::value::Value;

/// Comparison operator for a single field condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Is,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    In,
}

impl CompareOp {
    /// Resolve a filter-key suffix token (`gt` in `age__gt`)
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "contains" => Some(CompareOp::Like),
            "eq" => Some(CompareOp::Eq),
            "exact" => Some(CompareOp::Is),
            "gt" => Some(CompareOp::Gt),
            "lt" => Some(CompareOp::Lt),
            "gte" => Some(CompareOp::Gte),
            "lte" => Some(CompareOp::Lte),
            "in" => Some(CompareOp::In),
            _ => None,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "="),
            CompareOp::Is => write!(f, "IS"),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Lte => write!(f, "<="),
            CompareOp::Like => write!(f, "LIKE"),
            CompareOp::In => write!(f, "IN"),
        }
    }
}

/// Logical connective for a condition node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
}

impl fmt::Display for Logic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logic::And => write!(f, "AND"),
            Logic::Or => write!(f, "OR"),
        }
    }
}

/// A single field comparison leaf
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: String,
    pub op: CompareOp,
    pub value: Value,
}

/// A child of a condition node
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Group(Condition),
    Leaf(Comparison),
}

/// A boolean tree of field comparisons.
///
/// A node with a relationship scope applies its subtree to fields of the
/// related dataset rather than the one being queried.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub(crate) logic: Logic,
    pub(crate) negated: bool,
    pub(crate) rel: Option<String>,
    pub(crate) children: Vec<Node>,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition {
    /// Create an empty conjunction
    pub fn new() -> Self {
        Self {
            logic: Logic::And,
            negated: false,
            rel: None,
            children: Vec::new(),
        }
    }

    /// Build a condition from flat `field__op` pairs combined under AND.
    ///
    /// A key without an operator token compares with `IS` when the value is
    /// null and `=` otherwise. A leading relationship segment
    /// (`rel__field__op`) wraps the comparison in a node scoped to that
    /// relationship.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut root = Self::new();
        for (key, value) in pairs {
            let value = value.into();
            let (rel, comparison) = parse_filter_key(key.as_ref(), value);
            match rel {
                Some(rel) => root.children.push(Node::Group(Condition {
                    logic: Logic::And,
                    negated: false,
                    rel: Some(rel),
                    children: vec![Node::Leaf(comparison)],
                })),
                None => root.children.push(Node::Leaf(comparison)),
            }
        }
        root
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn relationship_scope(&self) -> Option<&str> {
        self.rel.as_deref()
    }

    fn op_match(&self, logic: Logic) -> bool {
        self.logic == logic || self.children.len() <= 1
    }

    // Merging is allowed when relationship scopes are equal; an earlier
    // revision of this rule refused any overlap in scopes.
    fn can_merge(&self, other: &Self, logic: Logic) -> bool {
        self.op_match(logic)
            && other.op_match(logic)
            && self.negated == other.negated
            && self.rel == other.rel
    }

    fn can_append(&self, logic: Logic) -> bool {
        self.op_match(logic) && !self.negated && self.rel.is_none()
    }

    fn combine(self, other: Self, logic: Logic) -> Self {
        if self.can_merge(&other, logic) {
            let mut combined = self;
            combined.children.extend(other.children);
            combined.logic = logic;
            combined
        } else if self.can_append(logic) {
            let mut combined = self;
            combined.children.push(Node::Group(other));
            combined.logic = logic;
            combined
        } else if other.can_append(logic) {
            let mut combined = other;
            combined.children.push(Node::Group(self));
            combined.logic = logic;
            combined
        } else {
            Condition {
                logic,
                negated: false,
                rel: None,
                children: vec![Node::Group(self), Node::Group(other)],
            }
        }
    }

    /// Normalize the tree to a fixed point.
    ///
    /// Sibling subtrees sharing negation and relationship scope merge when
    /// their connectives are compatible with this node's, absorbable
    /// siblings fold together, and single-child wrappers collapse. The loop
    /// re-simplifies children after every rewrite, so the result is a global
    /// fixed point and the operation is idempotent.
    pub fn simplify(mut self) -> Self {
        loop {
            let before = self.clone();
            self.children = self
                .children
                .into_iter()
                .map(|node| match node {
                    Node::Group(group) => Node::Group(group.simplify()),
                    leaf => leaf,
                })
                .collect();
            self.merge_siblings();
            self.absorb_siblings();
            self.splice_single_child_groups();
            self.collapse_single_group();
            if self == before {
                return self;
            }
        }
    }

    // Merge any two sibling groups that share negation and relationship
    // scope by concatenating their children. A plain pair must already use
    // this node's connective (or hold a single child); a negated pair must
    // use the dual connective, which is what makes the concatenation sound.
    fn merge_siblings(&mut self) {
        let dual = match self.logic {
            Logic::And => Logic::Or,
            Logic::Or => Logic::And,
        };
        let mut i = 0;
        while i < self.children.len() {
            let mut j = i + 1;
            while j < self.children.len() {
                let target = match (&self.children[i], &self.children[j]) {
                    (Node::Group(a), Node::Group(b))
                        if a.negated == b.negated && a.rel == b.rel =>
                    {
                        let target = if a.negated { dual } else { self.logic };
                        let fits = |group: &Condition| {
                            group.logic == target || group.children.len() <= 1
                        };
                        (fits(a) && fits(b)).then_some(target)
                    }
                    _ => None,
                };
                if let Some(target) = target {
                    if let Node::Group(absorbed) = self.children.remove(j) {
                        if let Node::Group(merged) = &mut self.children[i] {
                            merged.children.extend(absorbed.children);
                            merged.logic = target;
                        }
                    }
                } else {
                    j += 1;
                }
            }
            i += 1;
        }
    }

    // Fold a sibling into an unscoped, non-negated group that either has at
    // most one child or already uses this node's connective. The absorbing
    // group takes this node's connective, which is what makes the fold
    // semantics-preserving in both cases.
    fn absorb_siblings(&mut self) {
        loop {
            let mut target = None;
            'outer: for i in 0..self.children.len() {
                let absorber = match &self.children[i] {
                    Node::Group(group) => group,
                    Node::Leaf(_) => continue,
                };
                if absorber.negated || absorber.rel.is_some() {
                    continue;
                }
                if absorber.children.len() > 1 && absorber.logic != self.logic {
                    continue;
                }
                for j in 0..self.children.len() {
                    if i != j {
                        target = Some((i, j));
                        break 'outer;
                    }
                }
            }
            let Some((absorber, moved)) = target else {
                return;
            };
            let node = self.children.remove(moved);
            let absorber = if moved < absorber { absorber - 1 } else { absorber };
            if let Node::Group(group) = &mut self.children[absorber] {
                group.children.push(node);
                group.logic = self.logic;
            }
        }
    }

    // Replace a non-negated, unscoped group holding a single child with that
    // child directly.
    fn splice_single_child_groups(&mut self) {
        let mut i = 0;
        while i < self.children.len() {
            let single = matches!(
                &self.children[i],
                Node::Group(group)
                    if group.children.len() == 1 && !group.negated && group.rel.is_none()
            );
            if single {
                if let Node::Group(mut group) = self.children.remove(i) {
                    self.children.insert(i, group.children.remove(0));
                }
            }
            i += 1;
        }
    }

    // Collapse this node onto its only child when the child is a
    // non-negated, unscoped group; the node keeps its own negation and
    // relationship scope.
    fn collapse_single_group(&mut self) {
        if self.children.len() != 1 {
            return;
        }
        let collapsible = matches!(
            &self.children[0],
            Node::Group(group) if !group.negated && group.rel.is_none()
        );
        if collapsible {
            if let Node::Group(group) = self.children.remove(0) {
                self.logic = group.logic;
                self.children = group.children;
            }
        }
    }
}

impl BitAnd for Condition {
    type Output = Condition;

    fn bitand(self, rhs: Condition) -> Condition {
        self.combine(rhs, Logic::And)
    }
}

impl BitOr for Condition {
    type Output = Condition;

    fn bitor(self, rhs: Condition) -> Condition {
        self.combine(rhs, Logic::Or)
    }
}

impl Not for Condition {
    type Output = Condition;

    fn not(mut self) -> Condition {
        self.negated = !self.negated;
        self
    }
}

// Split `rel__field__op` into its parts. The operator suffix is consumed
// first; whatever remains in front of the field name is the relationship
// segment.
fn parse_filter_key(key: &str, value: Value) -> (Option<String>, Comparison) {
    let (mut field, op) = match key.rfind("__") {
        Some(idx) => match CompareOp::from_token(&key[idx + 2..]) {
            Some(op) => (&key[..idx], op),
            None => (key, infer_op(&value)),
        },
        None => (key, infer_op(&value)),
    };

    let mut rel = None;
    if let Some(idx) = field.rfind("__") {
        rel = Some(field[..idx].to_string());
        field = &field[idx + 2..];
    }

    (
        rel,
        Comparison {
            field: field.to_string(),
            op,
            value,
        },
    )
}

fn infer_op(value: &Value) -> CompareOp {
    if matches!(value, Value::Null) {
        CompareOp::Is
    } else {
        CompareOp::Eq
    }
}
