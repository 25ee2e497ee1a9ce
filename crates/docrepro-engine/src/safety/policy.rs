//! Safety policy: the denylists and allowlists the analyzer enforces.
//!
//! Every list is configuration.  The defaults target CPython 3 and err on
//! the side of rejecting: a snippet that is wrongly rejected costs half a
//! point, a dangerous snippet that is wrongly executed costs the host.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::ViolationKind;

/// Configurable rules for [`SafetyAnalyzer`](super::SafetyAnalyzer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyPolicy {
    /// Modules (or dotted module prefixes) that may not be imported.
    pub denied_modules: BTreeMap<String, ViolationKind>,
    /// Refuse every module whose top-level name starts with `_`.  These are
    /// the C accelerators (`_socket`, `_io`, `_thread`, ...) behind the
    /// public modules, and they bypass the public names denied above.
    pub deny_private_modules: bool,
    /// Modules that may be imported by name but not with `from m import *`,
    /// because they export a denied attribute or path callable that would
    /// then be reachable as a bare name.
    pub wildcard_denied_modules: BTreeMap<String, ViolationKind>,
    /// Attribute names that may not be accessed on any object, nor imported
    /// by name from any module.
    pub denied_attributes: BTreeMap<String, ViolationKind>,
    /// Bare names that may not appear at all (builtins and their aliases).
    pub denied_builtins: BTreeMap<String, ViolationKind>,
    /// Callables that take a path as their first argument.  Allowed only as
    /// a direct call on a relative string-literal path without `..`.
    pub path_callables: BTreeSet<String>,
    /// Keyword arguments that name a path wherever they appear
    /// (`logging.basicConfig(filename=...)`).  Held to the same rule as
    /// [`path_callables`](Self::path_callables).
    pub path_keywords: BTreeSet<String>,
    /// Dunder names that may be used.  Every other `__name__`-style
    /// identifier or attribute is treated as introspection.
    pub allowed_dunders: BTreeSet<String>,
    /// Closed allowlist of syntax node kinds.  Anything else is rejected as
    /// unclassified.
    pub allowed_node_kinds: BTreeSet<String>,
}

fn table(kind: ViolationKind, names: &[&str]) -> impl Iterator<Item = (String, ViolationKind)> {
    names.iter().map(move |name| ((*name).to_owned(), kind))
}

fn set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| (*name).to_owned()).collect()
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        use ViolationKind::*;

        let denied_modules = table(
            NetworkAccess,
            &[
                "socket", "ssl", "http", "urllib", "urllib2", "urllib3", "requests", "httpx",
                "aiohttp", "ftplib", "smtplib", "smtpd", "poplib", "imaplib", "nntplib",
                "telnetlib", "socketserver", "xmlrpc", "webbrowser", "asyncio", "select",
                "selectors", "websocket", "websockets", "paramiko",
            ],
        )
        .chain(table(
            FilesystemAccess,
            &[
                "os", "posix", "nt", "posixpath", "ntpath", "shutil", "pathlib", "tempfile",
                "glob", "fileinput", "filecmp", "zipfile", "tarfile", "gzip", "bz2", "lzma",
                "zipimport", "sqlite3", "dbm", "shelve", "mmap", "fcntl", "tty", "termios",
                "linecache", "logging.handlers", "logging.config", "netrc", "mailbox",
                "py_compile", "compileall", "zipapp",
            ],
        ))
        .chain(table(
            ProcessSpawn,
            &[
                "subprocess", "multiprocessing", "pty", "signal", "resource", "pip", "ensurepip",
                "venv",
            ],
        ))
        .chain(table(EnvironmentAccess, &["getpass", "pwd", "grp", "site"]))
        .chain(table(
            DynamicEvaluation,
            &[
                "importlib", "imp", "builtins", "__builtin__", "ctypes", "cffi", "code",
                "codeop", "runpy", "pickle", "cPickle", "_pickle", "marshal", "dill",
                "cloudpickle", "inspect", "gc", "pkgutil", "trace", "pdb", "bdb",
            ],
        ))
        .collect();

        let denied_attributes = table(
            ProcessSpawn,
            &[
                "system", "popen", "Popen", "spawnl", "spawnle", "spawnlp", "spawnlpe", "spawnv",
                "spawnve", "spawnvp", "spawnvpe", "posix_spawn", "posix_spawnp", "fork",
                "forkpty", "execl", "execle", "execlp", "execlpe", "execv", "execve", "execvp",
                "execvpe", "kill", "killpg", "check_output", "check_call", "startfile",
                "ProcessPoolExecutor",
            ],
        )
        .chain(table(
            FilesystemAccess,
            &[
                "unlink", "rmdir", "removedirs", "rmtree", "chmod", "chown", "lchown", "chroot",
                "chdir", "symlink", "mkfifo", "mknod", "listdir", "scandir", "makedirs",
                "FileIO", "open_code", "FileHandler", "RotatingFileHandler",
                "TimedRotatingFileHandler", "WatchedFileHandler", "fileConfig",
            ],
        ))
        .chain(table(
            EnvironmentAccess,
            &["environ", "environb", "putenv", "unsetenv", "getenv"],
        ))
        .chain(table(
            NetworkAccess,
            &[
                "urlopen", "urlretrieve", "create_connection", "create_server", "getaddrinfo",
                "gethostbyname", "SocketHandler", "DatagramHandler", "SysLogHandler",
                "HTTPHandler", "SMTPHandler",
            ],
        ))
        .chain(table(
            DynamicEvaluation,
            &[
                "modules", "_getframe", "settrace", "setprofile", "f_globals", "f_locals",
                "f_builtins", "f_back", "gi_frame", "cr_frame", "tb_frame", "co_code",
                "import_module", "exec_module", "load_module",
            ],
        ))
        .collect();

        let denied_builtins = table(
            DynamicEvaluation,
            &[
                "eval", "exec", "execfile", "compile", "__import__", "globals", "locals",
                "vars", "getattr", "setattr", "delattr", "breakpoint", "__builtins__",
                "__loader__", "__spec__",
            ],
        )
        .collect();

        let wildcard_denied_modules = table(
            FilesystemAccess,
            &["io", "codecs", "logging", "tokenize"],
        )
        .chain(table(DynamicEvaluation, &["sys", "threading"]))
        .chain(table(ProcessSpawn, &["concurrent", "platform"]))
        .collect();

        let allowed_dunders = set(&[
            "__name__", "__main__", "__doc__", "__version__", "__all__", "__slots__",
            "__init__", "__new__", "__post_init__", "__repr__", "__str__", "__format__",
            "__hash__", "__bool__", "__len__", "__iter__", "__next__", "__aiter__",
            "__anext__", "__contains__", "__getitem__", "__setitem__", "__delitem__",
            "__call__", "__enter__", "__exit__", "__aenter__", "__aexit__", "__eq__",
            "__ne__", "__lt__", "__le__", "__gt__", "__ge__", "__add__", "__radd__",
            "__iadd__", "__sub__", "__rsub__", "__mul__", "__rmul__", "__truediv__",
            "__floordiv__", "__mod__", "__pow__", "__neg__", "__abs__", "__and__",
            "__or__", "__xor__", "__int__", "__float__", "__index__", "__round__",
        ]);

        let allowed_node_kinds = set(&[
            // module structure
            "module", "block", "comment", "line_continuation", "expression_statement",
            "expression_list", "pattern_list", "tuple_pattern", "list_pattern",
            // imports
            "import_statement", "import_from_statement", "future_import_statement",
            "dotted_name", "aliased_import", "wildcard_import", "relative_import",
            "import_prefix",
            // simple statements
            "assignment", "augmented_assignment", "named_expression", "return_statement",
            "pass_statement", "break_statement", "continue_statement", "assert_statement",
            "delete_statement", "raise_statement", "global_statement", "nonlocal_statement",
            "type_alias_statement",
            // compound statements
            "if_statement", "elif_clause", "else_clause", "for_statement", "while_statement",
            "try_statement", "except_clause", "except_group_clause", "finally_clause",
            "with_statement", "with_clause", "with_item", "as_pattern", "as_pattern_target",
            "match_statement", "case_clause", "case_pattern", "class_pattern",
            "complex_pattern", "dict_pattern", "keyword_pattern", "splat_pattern",
            "union_pattern",
            // definitions
            "function_definition", "class_definition", "decorated_definition", "decorator",
            "parameters", "lambda_parameters", "default_parameter", "typed_parameter",
            "typed_default_parameter", "list_splat_pattern", "dictionary_splat_pattern",
            "keyword_separator", "positional_separator", "type_parameter", "type",
            "generic_type", "union_type", "splat_type", "member_type", "constrained_type",
            // expressions
            "identifier", "attribute", "call", "argument_list", "keyword_argument",
            "list_splat", "dictionary_splat", "parenthesized_list_splat", "subscript",
            "slice", "lambda", "conditional_expression", "parenthesized_expression",
            "not_operator", "boolean_operator", "binary_operator", "unary_operator",
            "comparison_operator", "await", "yield", "ellipsis",
            // literals
            "integer", "float", "true", "false", "none", "string", "string_start",
            "string_content", "string_end", "escape_sequence", "escape_interpolation",
            "concatenated_string", "interpolation", "format_specifier", "format_expression",
            "type_conversion",
            // containers and comprehensions
            "list", "tuple", "set", "dictionary", "pair", "list_comprehension",
            "set_comprehension", "dictionary_comprehension", "generator_expression",
            "for_in_clause", "if_clause",
        ]);

        Self {
            denied_modules,
            deny_private_modules: true,
            wildcard_denied_modules,
            denied_attributes,
            denied_builtins,
            path_callables: set(&["open"]),
            path_keywords: set(&["filename"]),
            allowed_dunders,
            allowed_node_kinds,
        }
    }
}

impl SafetyPolicy {
    /// Look up a dotted module path, matching the path itself or any of its
    /// dotted prefixes (`http.client` matches a `http` entry).
    pub fn denied_module(&self, path: &str) -> Option<ViolationKind> {
        if self.deny_private_modules && path.starts_with('_') {
            return Some(ViolationKind::DisallowedImport);
        }
        lookup_dotted(&self.denied_modules, path)
    }

    /// Whether `from path import *` is refused, by the same matching rules
    /// as [`denied_module`](Self::denied_module).
    pub fn denied_wildcard(&self, path: &str) -> Option<ViolationKind> {
        self.denied_module(path)
            .or_else(|| lookup_dotted(&self.wildcard_denied_modules, path))
    }

    /// Whether `name` has the `__dunder__` shape.
    pub fn is_dunder(name: &str) -> bool {
        name.len() > 4 && name.starts_with("__") && name.ends_with("__")
    }
}

/// Match `path` or any of its dotted prefixes against `table`.
fn lookup_dotted(table: &BTreeMap<String, ViolationKind>, path: &str) -> Option<ViolationKind> {
    let mut end = 0;
    loop {
        let next = path[end..].find('.').map(|i| end + i);
        let prefix = &path[..next.unwrap_or(path.len())];
        if let Some(kind) = table.get(prefix) {
            return Some(*kind);
        }
        match next {
            Some(dot) => end = dot + 1,
            None => return None,
        }
    }
}
