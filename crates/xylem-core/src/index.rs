// SPDX-License-Identifier: Apache-2.0
//! Index-change notification plane (`spec.md` §4.3).
//!
//! Drives secondary index implementations (path/CAS/name) via listener
//! notifications. The index implementations themselves, and the
//! language-specific path-expression grammar used to build filters, are
//! out-of-scope collaborators this module only calls through traits.

use std::sync::Arc;

use xylem_storage_api::{Node, NodeKey, NodeKind, NodeValue};

use crate::error::{TxnError, TxnResult};

/// Whether a mutation inserted or removed a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A node was inserted.
    Insert,
    /// A node was removed.
    Delete,
}

/// Which secondary index family a listener belongs to; also the dispatch
/// group order (`spec.md` §4.3: path first, then CAS, then name).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Path summary index.
    Path,
    /// Content-addressed-storage index.
    Cas,
    /// Name index.
    Name,
}

const DISPATCH_ORDER: [IndexKind; 3] = [IndexKind::Path, IndexKind::Cas, IndexKind::Name];

/// A full node snapshot, delivered to listeners that need the whole record.
pub struct ChangeEvent<'a> {
    /// Whether the node was inserted or removed.
    pub kind: ChangeKind,
    /// The node's current (insert) or last (delete) snapshot.
    pub node: &'a Node,
    /// The node's path-summary pointer, if any.
    pub path_node_key: Option<NodeKey>,
}

/// The primitive hot-path event: avoids materializing a node snapshot.
pub struct PrimitiveChangeEvent<'a> {
    /// Whether the node was inserted or removed.
    pub kind: ChangeKind,
    /// The affected node's key.
    pub node_key: NodeKey,
    /// The affected node's kind.
    pub node_kind: NodeKind,
    /// The node's path-summary pointer, if any.
    pub path_node_key: Option<NodeKey>,
    /// The node's name, if name-bearing.
    pub name: Option<&'a str>,
    /// The node's decoded value, if value-bearing.
    pub value: Option<&'a NodeValue>,
}

/// A listener that requires a full node snapshot per change.
pub trait ChangeListener: Send + Sync {
    /// Handles one logical change.
    fn notify_change(&self, event: &ChangeEvent<'_>) -> TxnResult<()>;
}

/// A listener that can consume the primitive hot-path event without a node
/// snapshot. Registering through [`IndexController::register_primitive`]
/// only accepts implementors of this trait, which is how "listeners that do
/// not support primitive events are rejected at registration time"
/// (`spec.md` §4.3) is enforced here: statically, at the call site, rather
/// than with a runtime capability check.
pub trait PrimitiveChangeListener: Send + Sync {
    /// Handles one logical change without a materialized node snapshot.
    fn notify_change_primitive(&self, event: &PrimitiveChangeEvent<'_>) -> TxnResult<()>;
}

enum ListenerEntry {
    Full(Arc<dyn ChangeListener>),
    Primitive(Arc<dyn PrimitiveChangeListener>),
}

/// Dispatches insert/delete notifications to registered secondary-index
/// listeners, grouped by [`IndexKind`] and ordered path, then CAS, then name.
#[derive(Default)]
pub struct IndexController {
    listeners: Vec<(IndexKind, ListenerEntry)>,
}

impl IndexController {
    /// Builds a controller with no listeners registered.
    #[must_use]
    pub fn new() -> Self {
        Self { listeners: Vec::new() }
    }

    /// Registers a full-snapshot listener under `kind`.
    pub fn register_full(&mut self, kind: IndexKind, listener: Arc<dyn ChangeListener>) {
        self.listeners.push((kind, ListenerEntry::Full(listener)));
    }

    /// Registers a primitive hot-path listener under `kind`.
    pub fn register_primitive(&mut self, kind: IndexKind, listener: Arc<dyn PrimitiveChangeListener>) {
        self.listeners.push((kind, ListenerEntry::Primitive(listener)));
    }

    /// Returns `true` if any listener is registered for `kind`.
    #[must_use]
    pub fn has_index(&self, kind: IndexKind) -> bool {
        self.listeners.iter().any(|(k, _)| *k == kind)
    }

    /// `has_path_index`.
    #[must_use]
    pub fn has_path_index(&self) -> bool {
        self.has_index(IndexKind::Path)
    }

    /// `has_cas_index`.
    #[must_use]
    pub fn has_cas_index(&self) -> bool {
        self.has_index(IndexKind::Cas)
    }

    /// `has_name_index`.
    #[must_use]
    pub fn has_name_index(&self) -> bool {
        self.has_index(IndexKind::Name)
    }

    /// Full-snapshot `notify_change`: delivered only to
    /// [`ChangeListener`]s, in path → CAS → name group order, registration
    /// order within a group.
    pub fn notify_change(&self, kind: ChangeKind, node: &Node, path_node_key: Option<NodeKey>) -> TxnResult<()> {
        let event = ChangeEvent { kind, node, path_node_key };
        for group in DISPATCH_ORDER {
            for (listener_kind, entry) in &self.listeners {
                if *listener_kind != group {
                    continue;
                }
                if let ListenerEntry::Full(listener) = entry {
                    listener.notify_change(&event)?;
                }
            }
        }
        Ok(())
    }

    /// Primitive hot-path `notify_change`: delivered only to
    /// [`PrimitiveChangeListener`]s, same group/registration ordering.
    #[allow(clippy::too_many_arguments)]
    pub fn notify_change_primitive(
        &self,
        kind: ChangeKind,
        node_key: NodeKey,
        node_kind: NodeKind,
        path_node_key: Option<NodeKey>,
        name: Option<&str>,
        value: Option<&NodeValue>,
    ) -> TxnResult<()> {
        let event = PrimitiveChangeEvent {
            kind,
            node_key,
            node_kind,
            path_node_key,
            name,
            value,
        };
        for group in DISPATCH_ORDER {
            for (listener_kind, entry) in &self.listeners {
                if *listener_kind != group {
                    continue;
                }
                if let ListenerEntry::Primitive(listener) = entry {
                    listener.notify_change_primitive(&event)?;
                }
            }
        }
        Ok(())
    }
}

/// A parsed path filter. Segment representation only; the language-specific
/// (JSON vs XML) path grammar that produces these is an out-of-scope
/// collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFilter {
    /// Parsed path segments, root first.
    pub segments: Vec<String>,
}

/// An optional CAS range bound pair, parsed alongside a [`PathFilter`].
#[derive(Debug, Clone, PartialEq)]
pub struct CasRange {
    /// Inclusive lower bound, if any.
    pub from: Option<NodeValue>,
    /// Inclusive upper bound, if any.
    pub to: Option<NodeValue>,
}

/// Parses path expressions into filters. A resource type (JSON or XML)
/// supplies the grammar; this crate only calls through the trait.
pub trait PathExpressionParser: Send + Sync {
    /// Parses `expression` into a [`PathFilter`].
    fn parse(&self, expression: &str) -> Result<PathFilter, TxnError>;
}

/// `create_name_filter` / `create_cas_filter` / `create_cas_filter_range`:
/// pure constructors over a supplied [`PathExpressionParser`].
pub struct FilterFactory {
    parser: Arc<dyn PathExpressionParser>,
}

impl FilterFactory {
    /// Builds a factory backed by the given path-expression grammar.
    #[must_use]
    pub fn new(parser: Arc<dyn PathExpressionParser>) -> Self {
        Self { parser }
    }

    /// `create_name_filter`.
    pub fn create_name_filter(&self, expression: &str) -> Result<PathFilter, TxnError> {
        self.parser.parse(expression)
    }

    /// `create_cas_filter`.
    pub fn create_cas_filter(&self, expression: &str) -> Result<PathFilter, TxnError> {
        self.parser.parse(expression)
    }

    /// `create_cas_filter_range`.
    pub fn create_cas_filter_range(
        &self,
        expression: &str,
        from: Option<NodeValue>,
        to: Option<NodeValue>,
    ) -> Result<(PathFilter, CasRange), TxnError> {
        let filter = self.parser.parse(expression)?;
        Ok((filter, CasRange { from, to }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use xylem_storage_api::NO_KEY;

    struct RecordingListener {
        label: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ChangeListener for RecordingListener {
        fn notify_change(&self, _event: &ChangeEvent<'_>) -> TxnResult<()> {
            self.seen.lock().unwrap_or_else(|e| e.into_inner()).push(self.label);
            Ok(())
        }
    }

    #[test]
    fn dispatch_order_is_path_then_cas_then_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut controller = IndexController::new();
        controller.register_full(
            IndexKind::Name,
            Arc::new(RecordingListener { label: "name", seen: seen.clone() }),
        );
        controller.register_full(
            IndexKind::Cas,
            Arc::new(RecordingListener { label: "cas", seen: seen.clone() }),
        );
        controller.register_full(
            IndexKind::Path,
            Arc::new(RecordingListener { label: "path", seen: seen.clone() }),
        );

        let node = Node::bare(1, NodeKind::Object, NO_KEY, 0);
        controller.notify_change(ChangeKind::Insert, &node, None).expect("notify");

        let order = seen.lock().unwrap_or_else(|e| e.into_inner()).clone();
        assert_eq!(order, vec!["path", "cas", "name"]);
    }

    struct SlashParser;
    impl PathExpressionParser for SlashParser {
        fn parse(&self, expression: &str) -> Result<PathFilter, TxnError> {
            if expression.is_empty() {
                return Err(TxnError::PathException("empty path expression".to_string()));
            }
            Ok(PathFilter {
                segments: expression.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            })
        }
    }

    #[test]
    fn filter_factory_parses_segments() {
        let factory = FilterFactory::new(Arc::new(SlashParser));
        let filter = factory.create_name_filter("/a/b/c").expect("parse");
        assert_eq!(filter.segments, vec!["a", "b", "c"]);
    }

    #[test]
    fn filter_factory_rejects_empty_expression() {
        let factory = FilterFactory::new(Arc::new(SlashParser));
        assert!(factory.create_cas_filter("").is_err());
    }
}
