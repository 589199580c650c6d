// SPDX-License-Identifier: Apache-2.0
//! Node data model (`spec.md` §3): kinds, kind families, and the node record.

use crate::ident::{DeweyId, NodeKey, NO_KEY};

/// Variant tag for a node, stored as the first byte of its slot.
///
/// Kinds partition into four (overlapping) families, tested by
/// [`NodeKind::family`] and [`NodeKind::is_name_bearing`]. Every variant here
/// must be classified by both; [`all_kinds_classified`] is a standing
/// exhaustiveness check run in tests so a newly added kind cannot silently
/// fall through hashing or cursor accessor logic unclassified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub enum NodeKind {
    /// The document root. Exactly one per resource; has no parent, no siblings.
    DocumentRoot,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
    /// A JSON object's key; the sole parent of an object-child value kind.
    ObjectKey,
    /// An XML element.
    Element,
    /// A JSON array-member or XML-adjacent string value.
    StringValue,
    /// A JSON array-member or XML-adjacent number value.
    NumberValue,
    /// A JSON array-member or XML-adjacent boolean value.
    BooleanValue,
    /// A JSON array-member or XML-adjacent null value.
    NullValue,
    /// XML text content.
    Text,
    /// XML comment.
    Comment,
    /// XML processing instruction.
    ProcessingInstruction,
    /// XML attribute.
    Attribute,
    /// XML namespace declaration.
    Namespace,
    /// A JSON object value of string type (sole child of an `ObjectKey`).
    ObjectStringValue,
    /// A JSON object value of number type (sole child of an `ObjectKey`).
    ObjectNumberValue,
    /// A JSON object value of boolean type (sole child of an `ObjectKey`).
    ObjectBooleanValue,
    /// A JSON object value of null type (sole child of an `ObjectKey`).
    ObjectNullValue,
    /// Tombstone written in place of a logically removed node's slot.
    ///
    /// Never constructed by callers directly; a storage engine writes this
    /// tag into a slot on logical removal, and a cursor reading it back
    /// treats the node as absent (`spec.md` "Lifecycle").
    Deleted,
}

/// The shape family a [`NodeKind`] belongs to (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKindFamily {
    /// Carries child/sibling links and a descendant count.
    Structural,
    /// Carries sibling links but no children (a leaf).
    SiblingBearingValue,
    /// No siblings, no children; the sole child of an `ObjectKey`.
    ObjectChildValue,
    /// A tombstone slot; carries no meaningful links or payload.
    Tombstone,
}

impl NodeKind {
    /// Returns the structural family this kind belongs to.
    #[must_use]
    pub const fn family(self) -> NodeKindFamily {
        match self {
            Self::DocumentRoot | Self::Object | Self::Array | Self::ObjectKey | Self::Element => {
                NodeKindFamily::Structural
            }
            Self::StringValue
            | Self::NumberValue
            | Self::BooleanValue
            | Self::NullValue
            | Self::Text
            | Self::Comment
            | Self::ProcessingInstruction
            | Self::Attribute
            | Self::Namespace => NodeKindFamily::SiblingBearingValue,
            Self::ObjectStringValue
            | Self::ObjectNumberValue
            | Self::ObjectBooleanValue
            | Self::ObjectNullValue => NodeKindFamily::ObjectChildValue,
            Self::Deleted => NodeKindFamily::Tombstone,
        }
    }

    /// Returns `true` for the tombstone kind a cursor must treat as absent.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Returns `true` for name-bearing kinds (`path_node_key` plus name key(s)).
    #[must_use]
    pub const fn is_name_bearing(self) -> bool {
        matches!(
            self,
            Self::ObjectKey
                | Self::Element
                | Self::Attribute
                | Self::Namespace
                | Self::ProcessingInstruction
        )
    }

    /// Returns `true` for kinds that carry a decoded scalar payload.
    #[must_use]
    pub const fn is_value_bearing(self) -> bool {
        matches!(
            self,
            Self::StringValue
                | Self::NumberValue
                | Self::BooleanValue
                | Self::NullValue
                | Self::ObjectStringValue
                | Self::ObjectNumberValue
                | Self::ObjectBooleanValue
                | Self::ObjectNullValue
                | Self::Text
                | Self::Comment
                | Self::ProcessingInstruction
                | Self::Attribute
        )
    }

    /// Returns `true` if nodes of this kind may ever have children.
    #[must_use]
    pub const fn can_have_children(self) -> bool {
        matches!(self.family(), NodeKindFamily::Structural)
    }

    /// All kinds, for exhaustiveness checks and property-test generators.
    #[must_use]
    pub const fn all() -> &'static [NodeKind] {
        &[
            Self::DocumentRoot,
            Self::Object,
            Self::Array,
            Self::ObjectKey,
            Self::Element,
            Self::StringValue,
            Self::NumberValue,
            Self::BooleanValue,
            Self::NullValue,
            Self::Text,
            Self::Comment,
            Self::ProcessingInstruction,
            Self::Attribute,
            Self::Namespace,
            Self::ObjectStringValue,
            Self::ObjectNumberValue,
            Self::ObjectBooleanValue,
            Self::ObjectNullValue,
            Self::Deleted,
        ]
    }
}

/// Decoded scalar payload carried by value-bearing kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// UTF-8 text (string values, text, comments, PIs, attributes).
    Str(String),
    /// A numeric value. JSON numbers and XML-adjacent numerics both land here.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// The JSON `null` literal.
    Null,
}

/// A materialized node record (`spec.md` §3).
///
/// Every field is present on every record regardless of kind; fields that do
/// not apply to a given kind's family (e.g. `first_child_key` on a leaf) are
/// left at their sentinel (`NO_KEY`, `0`, `None`). This flat layout follows
/// the "common header, kind-indexed accessor" design-note option: callers
/// index into the fields that matter for `self.kind.family()` rather than
/// matching out a nested per-kind struct on every access.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Stable 64-bit identifier for this node.
    pub node_key: NodeKey,
    /// Kind tag.
    pub kind: NodeKind,
    /// Parent's node key, or `NO_KEY` for the document root.
    pub parent_key: NodeKey,
    /// Revision in which the node was last structurally touched before this one.
    pub previous_revision: u64,
    /// Revision that produced the node's current slot contents.
    pub last_modified_revision: u64,
    /// Subtree fingerprint maintained by the hashing subsystem (`spec.md` §4.1).
    pub hash: u64,
    /// Lazily-bound ordered path label; `None` until `get_dewey_id` binds it.
    pub dewey_id: Option<DeweyId>,
    /// Sum over children of `1 + descendant_count(child)`. Structural kinds only.
    pub descendant_count: u64,
    /// Number of direct children. Structural kinds only.
    pub child_count: u32,
    /// First child's key, or `NO_KEY`. Structural kinds only.
    pub first_child_key: NodeKey,
    /// Last child's key, or `NO_KEY`. Structural kinds only.
    pub last_child_key: NodeKey,
    /// Left sibling's key, or `NO_KEY`.
    pub left_sibling_key: NodeKey,
    /// Right sibling's key, or `NO_KEY`.
    pub right_sibling_key: NodeKey,
    /// Path summary pointer. Name-bearing kinds only.
    pub path_node_key: Option<NodeKey>,
    /// Local name key (string-table reference). Name-bearing kinds only.
    pub name_key: Option<u64>,
    /// Namespace URI key. Name-bearing kinds with a namespace only.
    pub uri_key: Option<u64>,
    /// Namespace prefix key. Name-bearing kinds with a prefix only.
    pub prefix_key: Option<u64>,
    /// Decoded scalar payload. Value-bearing kinds only.
    pub value: Option<NodeValue>,
}

impl Node {
    /// Builds a bare node of the given kind with all links unset.
    ///
    /// Callers fill in kind-appropriate fields afterward; this only
    /// establishes the sentinels so a freshly constructed node is never in an
    /// ambiguous "zeroed" state (`NO_KEY` is unambiguous, `0` as a key is not,
    /// since `0` is the document root's own key).
    #[must_use]
    pub fn bare(node_key: NodeKey, kind: NodeKind, parent_key: NodeKey, revision: u64) -> Self {
        Self {
            node_key,
            kind,
            parent_key,
            previous_revision: revision,
            last_modified_revision: revision,
            hash: 0,
            dewey_id: None,
            descendant_count: 0,
            child_count: 0,
            first_child_key: NO_KEY,
            last_child_key: NO_KEY,
            left_sibling_key: NO_KEY,
            right_sibling_key: NO_KEY,
            path_node_key: None,
            name_key: None,
            uri_key: None,
            prefix_key: None,
            value: None,
        }
    }

    /// Returns `true` if this node has a parent.
    #[must_use]
    pub const fn has_parent(&self) -> bool {
        self.parent_key != NO_KEY
    }

    /// Returns `true` if this node has a left sibling.
    #[must_use]
    pub const fn has_left_sibling(&self) -> bool {
        self.left_sibling_key != NO_KEY
    }

    /// Returns `true` if this node has a right sibling.
    #[must_use]
    pub const fn has_right_sibling(&self) -> bool {
        self.right_sibling_key != NO_KEY
    }

    /// Returns `true` if this node has at least one child.
    #[must_use]
    pub const fn has_first_child(&self) -> bool {
        self.first_child_key != NO_KEY
    }

    /// Overwrites `self` with `other`'s fields in place, reusing allocations.
    ///
    /// This is the cursor singleton's rebind primitive: the owned `String`
    /// inside `value`/`dewey_id` keeps its backing buffer instead of being
    /// dropped and reallocated on every `move_to`.
    pub fn rebind_from(&mut self, other: &Node) {
        self.node_key = other.node_key;
        self.kind = other.kind;
        self.parent_key = other.parent_key;
        self.previous_revision = other.previous_revision;
        self.last_modified_revision = other.last_modified_revision;
        self.hash = other.hash;
        self.descendant_count = other.descendant_count;
        self.child_count = other.child_count;
        self.first_child_key = other.first_child_key;
        self.last_child_key = other.last_child_key;
        self.left_sibling_key = other.left_sibling_key;
        self.right_sibling_key = other.right_sibling_key;
        self.path_node_key = other.path_node_key;
        self.name_key = other.name_key;
        self.uri_key = other.uri_key;
        self.prefix_key = other.prefix_key;

        match (&mut self.value, &other.value) {
            (Some(NodeValue::Str(dst)), Some(NodeValue::Str(src))) => {
                dst.clear();
                dst.push_str(src);
            }
            _ => self.value = other.value.clone(),
        }

        // Dewey binding is lazy (`spec.md` §4.2): a rebind always starts unbound,
        // regardless of whether `other` had one, because the offset/page context
        // changed and a previously bound label would now be stale.
        self.dewey_id = None;
    }
}

/// Asserts every [`NodeKind`] variant is classified by both `family` and
/// `is_name_bearing` without panicking — i.e. that the match arms above are
/// in fact exhaustive over [`NodeKind::all`]. Used as a standing regression
/// test rather than relying on `#[non_exhaustive]` compiler exhaustiveness
/// alone, since `family`/`is_name_bearing` are hand-matched, not derived.
#[must_use]
pub fn all_kinds_classified() -> bool {
    NodeKind::all().iter().all(|k| {
        let _ = k.family();
        let _ = k.is_name_bearing();
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_is_classified() {
        assert!(all_kinds_classified());
    }

    #[test]
    fn object_key_is_structural_and_name_bearing() {
        assert_eq!(NodeKind::ObjectKey.family(), NodeKindFamily::Structural);
        assert!(NodeKind::ObjectKey.is_name_bearing());
    }

    #[test]
    fn object_child_kinds_cannot_have_children() {
        for k in [
            NodeKind::ObjectStringValue,
            NodeKind::ObjectNumberValue,
            NodeKind::ObjectBooleanValue,
            NodeKind::ObjectNullValue,
        ] {
            assert!(!k.can_have_children());
            assert_eq!(k.family(), NodeKindFamily::ObjectChildValue);
        }
    }

    #[test]
    fn rebind_from_reuses_string_allocation() {
        let mut dst = Node::bare(1, NodeKind::StringValue, 0, 0);
        dst.value = Some(NodeValue::Str(String::with_capacity(32)));
        let cap = match &dst.value {
            Some(NodeValue::Str(s)) => s.capacity(),
            _ => 0,
        };

        let mut src = Node::bare(1, NodeKind::StringValue, 0, 1);
        src.value = Some(NodeValue::Str("hi".to_string()));
        dst.rebind_from(&src);

        match &dst.value {
            Some(NodeValue::Str(s)) => {
                assert_eq!(s, "hi");
                assert!(s.capacity() >= cap || cap == 0);
            }
            _ => unreachable!("value must remain Str"),
        }
    }
}
