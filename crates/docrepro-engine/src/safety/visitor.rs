//! Syntax tree walk enforcing a [`SafetyPolicy`].
//!
//! The walk is a pre-order traversal over named nodes, so parents are seen
//! before their children and the first violation in document order wins.
//! It is iterative: deeply nested input cannot exhaust the stack.

use std::ops::ControlFlow;

use tree_sitter::Node;

use super::policy::SafetyPolicy;
use super::{Rejection, ViolationKind};

pub(super) struct Visitor<'a> {
    policy: &'a SafetyPolicy,
    source: &'a [u8],
}

impl<'a> Visitor<'a> {
    pub(super) fn new(policy: &'a SafetyPolicy, source: &'a str) -> Self {
        Self {
            policy,
            source: source.as_bytes(),
        }
    }

    /// Visit every named node under `root`, stopping at the first rejection.
    pub(super) fn walk(&self, root: Node<'_>) -> ControlFlow<Rejection> {
        let mut cursor = root.walk();
        loop {
            let node = cursor.node();
            if node.is_named() {
                self.visit(node)?;
            }
            if cursor.goto_first_child() {
                continue;
            }
            loop {
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    return ControlFlow::Continue(());
                }
            }
        }
    }

    fn visit(&self, node: Node<'_>) -> ControlFlow<Rejection> {
        let kind = node.kind();
        if !self.policy.allowed_node_kinds.contains(kind) {
            return reject(
                ViolationKind::Unclassified,
                node,
                format!("unsupported construct `{kind}`"),
            );
        }
        match kind {
            "import_statement" => self.check_import(node),
            "import_from_statement" => self.check_import_from(node),
            "attribute" => self.check_attribute(node),
            "identifier" => self.check_identifier(node),
            "keyword_argument" => self.check_keyword(node),
            _ => ControlFlow::Continue(()),
        }
    }

    // -----------------------------------------------------------------------
    // Imports
    // -----------------------------------------------------------------------

    fn check_import(&self, node: Node<'_>) -> ControlFlow<Rejection> {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let path = self.module_path(name);
            if let Some(kind) = self.policy.denied_module(&path) {
                return reject(kind, node, format!("import of `{path}`"));
            }
        }
        ControlFlow::Continue(())
    }

    fn check_import_from(&self, node: Node<'_>) -> ControlFlow<Rejection> {
        let Some(module) = node.child_by_field_name("module_name") else {
            return ControlFlow::Continue(());
        };
        if module.kind() == "relative_import" {
            return reject(
                ViolationKind::DisallowedImport,
                node,
                format!("relative import from `{}`", self.dotted(module)),
            );
        }
        let module = self.dotted(module);
        if let Some(kind) = self.policy.denied_module(&module) {
            return reject(kind, node, format!("import from `{module}`"));
        }

        let mut cursor = node.walk();
        if node.named_children(&mut cursor).any(|c| c.kind() == "wildcard_import") {
            if let Some(kind) = self.policy.denied_wildcard(&module) {
                return reject(kind, node, format!("wildcard import from `{module}`"));
            }
        }

        for name in node.children_by_field_name("name", &mut cursor) {
            let name = self.module_path(name);
            let full = format!("{module}.{name}");
            let kind = self
                .policy
                .denied_module(&full)
                .or_else(|| self.policy.denied_attributes.get(&name).copied());
            if let Some(kind) = kind {
                return reject(kind, node, format!("import of `{name}` from `{module}`"));
            }
        }
        ControlFlow::Continue(())
    }

    /// Dotted path of an import target, looking through `as` aliases.
    fn module_path(&self, node: Node<'_>) -> String {
        let target = match node.kind() {
            "aliased_import" => node.child_by_field_name("name").unwrap_or(node),
            _ => node,
        };
        self.dotted(target)
    }

    fn dotted(&self, node: Node<'_>) -> String {
        self.text(node).chars().filter(|c| !c.is_whitespace()).collect()
    }

    // -----------------------------------------------------------------------
    // Names
    // -----------------------------------------------------------------------

    fn check_attribute(&self, node: Node<'_>) -> ControlFlow<Rejection> {
        let Some(attr) = node.child_by_field_name("attribute") else {
            return ControlFlow::Continue(());
        };
        let name = self.text(attr);
        if let Some(kind) = self.policy.denied_attributes.get(name) {
            return reject(*kind, node, format!("access to attribute `{name}`"));
        }
        self.check_name(node, name)
    }

    fn check_identifier(&self, node: Node<'_>) -> ControlFlow<Rejection> {
        if let Some(parent) = node.parent() {
            // Attribute names are judged by `check_attribute`; keyword
            // argument names do not resolve to anything.
            let skip = match parent.kind() {
                "attribute" => parent.child_by_field_name("attribute") == Some(node),
                "keyword_argument" => parent.child_by_field_name("name") == Some(node),
                _ => false,
            };
            if skip {
                return ControlFlow::Continue(());
            }
        }

        let name = self.text(node);
        if let Some(kind) = self.policy.denied_builtins.get(name) {
            return reject(*kind, node, format!("use of `{name}`"));
        }
        self.check_name(node, name)
    }

    /// Rules shared by bare names and attribute names.  `callee` is the node
    /// that would appear in call position.
    fn check_name(&self, callee: Node<'_>, name: &str) -> ControlFlow<Rejection> {
        if SafetyPolicy::is_dunder(name) && !self.policy.allowed_dunders.contains(name) {
            return reject(
                ViolationKind::DynamicEvaluation,
                callee,
                format!("introspection via `{name}`"),
            );
        }
        if self.policy.path_callables.contains(name) {
            return self.check_path_call(callee, name);
        }
        ControlFlow::Continue(())
    }

    // -----------------------------------------------------------------------
    // Path arguments
    // -----------------------------------------------------------------------

    fn check_keyword(&self, node: Node<'_>) -> ControlFlow<Rejection> {
        let Some(name) = node.child_by_field_name("name") else {
            return ControlFlow::Continue(());
        };
        let name = self.text(name);
        if !self.policy.path_keywords.contains(name) {
            return ControlFlow::Continue(());
        }
        match node.child_by_field_name("value") {
            Some(value) if self.is_relative_literal(value) => ControlFlow::Continue(()),
            _ => reject(
                ViolationKind::FilesystemAccess,
                node,
                format!("`{name}=` given a path that is not a relative string literal"),
            ),
        }
    }

    fn check_path_call(&self, callee: Node<'_>, name: &str) -> ControlFlow<Rejection> {
        let call = callee
            .parent()
            .filter(|p| p.kind() == "call" && p.child_by_field_name("function") == Some(callee));
        let Some(call) = call else {
            return reject(
                ViolationKind::FilesystemAccess,
                callee,
                format!("`{name}` used other than as a direct call"),
            );
        };

        let first_arg = call
            .child_by_field_name("arguments")
            .filter(|args| args.kind() == "argument_list")
            .and_then(|args| {
                let mut cursor = args.walk();
                args.named_children(&mut cursor)
                    .find(|child| child.kind() != "comment")
            });

        match first_arg {
            Some(arg) if self.is_relative_literal(arg) => ControlFlow::Continue(()),
            _ => reject(
                ViolationKind::FilesystemAccess,
                call,
                format!("`{name}` on a path that is not a relative string literal"),
            ),
        }
    }

    /// Whether `node` is a plain string literal naming a path inside the
    /// working directory.
    fn is_relative_literal(&self, node: Node<'_>) -> bool {
        if node.kind() != "string" {
            return false;
        }
        let mut start = None;
        let mut end = None;
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "string_start" => start = Some(child.end_byte()),
                "string_end" => end = Some(child.start_byte()),
                "interpolation" => return false,
                _ => {}
            }
        }
        let (Some(start), Some(end)) = (start, end) else {
            return false;
        };
        self.source
            .get(start..end)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
            .is_some_and(is_contained_path)
    }

    fn text(&self, node: Node<'_>) -> &'a str {
        node.utf8_text(self.source).unwrap_or("")
    }
}

fn reject(kind: ViolationKind, node: Node<'_>, detail: String) -> ControlFlow<Rejection> {
    ControlFlow::Break(Rejection {
        kind,
        detail,
        line: node.start_position().row + 1,
    })
}

/// A relative path that cannot leave the directory it is resolved against.
///
/// Backslashes are refused outright, which also rules out escape sequences
/// in the literal.
fn is_contained_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.starts_with('~')
        && !path.contains(['\\', ':', '\0'])
        && path.split('/').all(|component| component != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contained_paths() {
        assert!(is_contained_path("data.csv"));
        assert!(is_contained_path("out/result.txt"));
        assert!(is_contained_path("./notes.md"));
        assert!(is_contained_path("..hidden"));
    }

    #[test]
    fn escaping_paths() {
        assert!(!is_contained_path(""));
        assert!(!is_contained_path("/etc/passwd"));
        assert!(!is_contained_path("~/.ssh/id_rsa"));
        assert!(!is_contained_path("../secret"));
        assert!(!is_contained_path("a/../../b"));
        assert!(!is_contained_path("C:/Windows"));
        assert!(!is_contained_path("file:///etc/hosts"));
        assert!(!is_contained_path("a\\b"));
    }
}
