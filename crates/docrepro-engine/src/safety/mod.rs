//! Static safety analysis.
//!
//! Every snippet is parsed with tree-sitter and checked against a
//! [`SafetyPolicy`] before it may be executed.  The analysis is
//! fail-closed: a snippet is allowed only when it parses cleanly, uses
//! nothing but allowlisted syntax, and touches no denied module, attribute,
//! or builtin.  Anything the analyzer cannot classify is rejected.
//!
//! Analysis is pure and deterministic.  It never executes or imports the
//! code it inspects.

mod policy;
mod visitor;

pub use policy::SafetyPolicy;

use serde::{Deserialize, Serialize};
use tree_sitter::{Language as Grammar, Node, Parser};

use crate::error::{EngineError, Result};
use crate::snippet::Snippet;

use self::visitor::Visitor;

/// Category of a safety violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Sockets, HTTP clients, or any other way off the host.
    NetworkAccess,
    /// Reading or mutating the filesystem outside the workspace.
    FilesystemAccess,
    /// Starting, signalling, or replacing processes.
    ProcessSpawn,
    /// Reading or mutating environment variables or user accounts.
    EnvironmentAccess,
    /// `eval`-style execution, reflection, or frame introspection.
    DynamicEvaluation,
    /// Imports that cannot be resolved statically.
    DisallowedImport,
    /// Syntax outside the allowlist.
    Unclassified,
    /// The source does not parse.
    Unparseable,
    /// The snippet is not in a supported language.
    UnsupportedLanguage,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::NetworkAccess => "network access",
            Self::FilesystemAccess => "filesystem access",
            Self::ProcessSpawn => "process spawn",
            Self::EnvironmentAccess => "environment access",
            Self::DynamicEvaluation => "dynamic evaluation",
            Self::DisallowedImport => "disallowed import",
            Self::Unclassified => "unclassified construct",
            Self::Unparseable => "unparseable",
            Self::UnsupportedLanguage => "unsupported language",
        };
        f.write_str(label)
    }
}

/// Why a snippet was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: ViolationKind,
    /// Human-readable description of the offending construct.
    pub detail: String,
    /// 1-based line within the snippet.
    pub line: usize,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} (snippet line {})", self.kind, self.detail, self.line)
    }
}

/// Outcome of analysing one snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict")]
pub enum SafetyVerdict {
    Allowed,
    Rejected(Rejection),
}

impl SafetyVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Static analyzer for Python snippets.
///
/// Holds the policy and the grammar; a parser is created per call so one
/// analyzer can be shared across threads.
#[derive(Debug, Clone)]
pub struct SafetyAnalyzer {
    policy: SafetyPolicy,
    grammar: Grammar,
}

impl SafetyAnalyzer {
    /// Create an analyzer enforcing `policy`.
    ///
    /// Fails only if the bundled grammar is incompatible with the linked
    /// tree-sitter runtime.
    pub fn new(policy: SafetyPolicy) -> Result<Self> {
        let grammar: Grammar = tree_sitter_python::LANGUAGE.into();
        Parser::new()
            .set_language(&grammar)
            .map_err(|e| EngineError::Parser(e.to_string()))?;
        Ok(Self { policy, grammar })
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Decide whether `snippet` may be executed.
    pub fn analyze(&self, snippet: &Snippet) -> SafetyVerdict {
        if !snippet.language.is_supported() {
            return SafetyVerdict::Rejected(Rejection {
                kind: ViolationKind::UnsupportedLanguage,
                detail: format!("language `{}` is not executed", snippet.language),
                line: 1,
            });
        }
        let verdict = self.analyze_source(&snippet.source);
        if let SafetyVerdict::Rejected(rejection) = &verdict {
            tracing::debug!(snippet = %snippet.position, %rejection, "snippet rejected");
        }
        verdict
    }

    /// Analyse raw Python source.
    pub fn analyze_source(&self, source: &str) -> SafetyVerdict {
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&self.grammar) {
            return SafetyVerdict::Rejected(Rejection {
                kind: ViolationKind::Unparseable,
                detail: format!("parser unavailable: {e}"),
                line: 1,
            });
        }
        let Some(tree) = parser.parse(source, None) else {
            return SafetyVerdict::Rejected(Rejection {
                kind: ViolationKind::Unparseable,
                detail: "parser produced no tree".into(),
                line: 1,
            });
        };

        let root = tree.root_node();
        if root.has_error() {
            let line = first_syntax_error(root).map_or(1, |n| n.start_position().row + 1);
            return SafetyVerdict::Rejected(Rejection {
                kind: ViolationKind::Unparseable,
                detail: "syntax error".into(),
                line,
            });
        }

        match Visitor::new(&self.policy, source).walk(root) {
            std::ops::ControlFlow::Continue(()) => SafetyVerdict::Allowed,
            std::ops::ControlFlow::Break(rejection) => SafetyVerdict::Rejected(rejection),
        }
    }
}

/// Descend along erroneous children to the first error or missing node.
fn first_syntax_error(root: Node<'_>) -> Option<Node<'_>> {
    let mut node = root;
    loop {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        let mut cursor = node.walk();
        let next = node
            .children(&mut cursor)
            .find(|child| child.has_error() || child.is_missing());
        match next {
            Some(child) => node = child,
            None => return Some(node),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::{Language, SnippetPosition};

    fn analyzer() -> SafetyAnalyzer {
        SafetyAnalyzer::new(SafetyPolicy::default()).unwrap()
    }

    fn kind_of(source: &str) -> Option<ViolationKind> {
        match analyzer().analyze_source(source) {
            SafetyVerdict::Allowed => None,
            SafetyVerdict::Rejected(r) => Some(r.kind),
        }
    }

    fn assert_allowed(source: &str) {
        let verdict = analyzer().analyze_source(source);
        assert_eq!(verdict, SafetyVerdict::Allowed, "source: {source:?}");
    }

    // -- accepted --------------------------------------------------------

    #[test]
    fn plain_computation_is_allowed() {
        assert_allowed("print(\"hello\")\n");
        assert_allowed("print(undefined_name)\n");
        assert_allowed("while True:\n    pass\n");
        assert_allowed("import math\nprint(math.sqrt(2))\n");
        assert_allowed("from collections import Counter\nc = Counter('abc')\n");
        assert_allowed("import numpy as np\nx = np.zeros(3)\n");
    }

    #[test]
    fn common_idioms_are_allowed() {
        let source = r#"
import re
from dataclasses import dataclass

@dataclass
class Point:
    x: int
    y: int = 0

    def __repr__(self) -> str:
        return f"Point({self.x!r}, {self.y})"

def main(*args, **kwargs):
    pattern = re.compile(r"\d+")
    items = [p for p in (Point(i) for i in range(3)) if p.x]
    try:
        total = sum(i.x for i in items)
    except (ValueError, TypeError) as exc:
        raise RuntimeError("bad") from exc
    else:
        print(total, pattern)
    with open("data.txt", "w") as fh:
        fh.write("ok")
    return lambda n=1: n + 1

if __name__ == "__main__":
    main()
"#;
        assert_allowed(source);
    }

    #[test]
    fn relative_literal_open_is_allowed() {
        assert_allowed("open('out.txt', 'w').write('x')\n");
        assert_allowed("from PIL import Image\nImage.open('cat.png')\n");
    }

    // -- rejected --------------------------------------------------------

    #[test]
    fn denied_imports() {
        assert_eq!(kind_of("import os\nos.system(\"ls\")\n"), Some(ViolationKind::FilesystemAccess));
        assert_eq!(kind_of("import socket\n"), Some(ViolationKind::NetworkAccess));
        assert_eq!(kind_of("import urllib.request\n"), Some(ViolationKind::NetworkAccess));
        assert_eq!(kind_of("import subprocess as sp\n"), Some(ViolationKind::ProcessSpawn));
        assert_eq!(kind_of("from http import client\n"), Some(ViolationKind::NetworkAccess));
        assert_eq!(kind_of("import math, ctypes\n"), Some(ViolationKind::DynamicEvaluation));
    }

    #[test]
    fn relative_import_is_disallowed() {
        assert_eq!(kind_of("from . import sibling\n"), Some(ViolationKind::DisallowedImport));
        assert_eq!(kind_of("from ..pkg import x\n"), Some(ViolationKind::DisallowedImport));
    }

    #[test]
    fn imported_names_are_checked() {
        assert_eq!(
            kind_of("from platform import popen\n"),
            Some(ViolationKind::ProcessSpawn)
        );
        assert_eq!(
            kind_of("from concurrent.futures import ProcessPoolExecutor\n"),
            Some(ViolationKind::ProcessSpawn)
        );
    }

    #[test]
    fn denied_attributes_on_any_object() {
        assert_eq!(kind_of("import sys\nsys.modules\n"), Some(ViolationKind::DynamicEvaluation));
        assert_eq!(kind_of("x = thing.environ['HOME']\n"), Some(ViolationKind::EnvironmentAccess));
        assert_eq!(kind_of("platform.popen('id')\n"), Some(ViolationKind::ProcessSpawn));
    }

    #[test]
    fn dynamic_evaluation_builtins() {
        assert_eq!(kind_of("eval('1+1')\n"), Some(ViolationKind::DynamicEvaluation));
        assert_eq!(kind_of("exec('x = 1')\n"), Some(ViolationKind::DynamicEvaluation));
        assert_eq!(kind_of("__import__('os')\n"), Some(ViolationKind::DynamicEvaluation));
        assert_eq!(kind_of("f = getattr\n"), Some(ViolationKind::DynamicEvaluation));
    }

    #[test]
    fn attribute_names_do_not_trigger_builtin_rules() {
        assert_allowed("import re\nre.compile('a')\n");
        assert_allowed("call(exec=1)\n");
    }

    #[test]
    fn dunder_introspection() {
        assert_eq!(
            kind_of("().__class__.__bases__[0].__subclasses__()\n"),
            Some(ViolationKind::DynamicEvaluation)
        );
        assert_eq!(kind_of("f.__globals__\n"), Some(ViolationKind::DynamicEvaluation));
    }

    #[test]
    fn open_outside_workspace() {
        assert_eq!(kind_of("open('/etc/passwd')\n"), Some(ViolationKind::FilesystemAccess));
        assert_eq!(kind_of("open('../x')\n"), Some(ViolationKind::FilesystemAccess));
        assert_eq!(kind_of("open(path)\n"), Some(ViolationKind::FilesystemAccess));
        assert_eq!(kind_of("open(f'{p}')\n"), Some(ViolationKind::FilesystemAccess));
        assert_eq!(kind_of("open(file='a')\n"), Some(ViolationKind::FilesystemAccess));
        assert_eq!(kind_of("o = open\n"), Some(ViolationKind::FilesystemAccess));
    }

    #[test]
    fn private_c_modules_are_disallowed() {
        assert_eq!(
            kind_of("import _socket
s = _socket.socket()
s.connect(('example.com', 80))
"),
            Some(ViolationKind::DisallowedImport)
        );
        assert_eq!(kind_of("from _io import FileIO
"), Some(ViolationKind::DisallowedImport));
        assert_eq!(kind_of("import _thread as t
"), Some(ViolationKind::DisallowedImport));
    }

    #[test]
    fn host_file_readers_are_rejected() {
        assert_eq!(
            kind_of("import io
print(io.FileIO('/etc/passwd').read()[:30])
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_eq!(
            kind_of("from io import FileIO
FileIO('x')
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_eq!(
            kind_of("import linecache
linecache.getlines('/etc/passwd')
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_allowed("import io
buf = io.StringIO()
buf.write('x')
");
    }

    #[test]
    fn log_files_outside_workspace_are_rejected() {
        assert_eq!(
            kind_of("import logging
logging.basicConfig(filename='/tmp/out.log')
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_eq!(
            kind_of("import logging
logging.basicConfig(filename=name)
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_eq!(
            kind_of("import logging
h = logging.FileHandler('x.log')
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_eq!(
            kind_of("import logging.handlers
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_allowed("import logging
logging.basicConfig(filename='run.log', level=10)
");
        assert_allowed("import logging
logging.basicConfig(level=logging.INFO)
");
    }

    #[test]
    fn package_installers_are_rejected() {
        assert_eq!(kind_of("import pip
"), Some(ViolationKind::ProcessSpawn));
        assert_eq!(kind_of("import ensurepip
"), Some(ViolationKind::ProcessSpawn));
        assert_eq!(kind_of("from pip._internal import main
"), Some(ViolationKind::ProcessSpawn));
    }

    #[test]
    fn wildcard_imports_of_modules_with_denied_names() {
        assert_eq!(
            kind_of("from io import *
FileIO('/etc/passwd')
"),
            Some(ViolationKind::FilesystemAccess)
        );
        assert_eq!(kind_of("from sys import *
"), Some(ViolationKind::DynamicEvaluation));
        assert_eq!(kind_of("from os import *
"), Some(ViolationKind::FilesystemAccess));
        assert_allowed("from math import *
print(sqrt(2))
");
    }

    #[test]
    fn syntax_errors_are_unparseable() {
        let verdict = analyzer().analyze_source("x = 1\ndef f(:\n    pass\n");
        let SafetyVerdict::Rejected(rejection) = verdict else {
            panic!("expected rejection");
        };
        assert_eq!(rejection.kind, ViolationKind::Unparseable);
        assert_eq!(rejection.line, 2);
    }

    #[test]
    fn python2_print_is_unclassified() {
        assert_eq!(kind_of("print \"hi\"\n"), Some(ViolationKind::Unclassified));
    }

    #[test]
    fn first_violation_in_document_order_wins() {
        let verdict = analyzer().analyze_source("x = 1\nimport socket\nimport os\n");
        let SafetyVerdict::Rejected(rejection) = verdict else {
            panic!("expected rejection");
        };
        assert_eq!(rejection.kind, ViolationKind::NetworkAccess);
        assert_eq!(rejection.line, 2);
    }

    #[test]
    fn node_allowlist_is_closed() {
        let mut policy = SafetyPolicy::default();
        policy.allowed_node_kinds.remove("while_statement");
        let analyzer = SafetyAnalyzer::new(policy).unwrap();
        let SafetyVerdict::Rejected(r) = analyzer.analyze_source("while True:\n    pass\n") else {
            panic!("expected rejection");
        };
        assert_eq!(r.kind, ViolationKind::Unclassified);
    }

    #[test]
    fn unsupported_language_is_rejected() {
        let snippet = Snippet {
            position: SnippetPosition { index: 0, line: 1 },
            language: Language::Other("bash".into()),
            source: "rm -rf /\n".into(),
        };
        let SafetyVerdict::Rejected(r) = analyzer().analyze(&snippet) else {
            panic!("expected rejection");
        };
        assert_eq!(r.kind, ViolationKind::UnsupportedLanguage);
    }

    #[test]
    fn analysis_is_deterministic() {
        let a = analyzer();
        let source = "import math\nx = eval('1')\n";
        assert_eq!(a.analyze_source(source), a.analyze_source(source));
    }

    #[test]
    fn deep_nesting_does_not_overflow() {
        let depth = 5_000;
        let source = format!("x = {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        // Either verdict is acceptable; the walk must simply terminate.
        let _ = analyzer().analyze_source(&source);
    }
}
