//! Snippet data model.

use serde::{Deserialize, Serialize};

/// Where a snippet came from in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnippetPosition {
    /// 0-based ordinal among the fenced blocks the extractor emitted.
    pub index: usize,
    /// 1-based line number of the opening fence.
    pub line: usize,
}

impl std::fmt::Display for SnippetPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} (line {})", self.index, self.line)
    }
}

/// Language of a fenced block, as declared by its info string or inferred
/// from its content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "tag")]
pub enum Language {
    /// A plain Python script.
    Python,
    /// An interactive Python session (`>>>` prompts), already converted to
    /// a plain script by the extractor.
    PythonConsole,
    /// Some other declared language.
    Other(String),
    /// No language declared and none could be inferred.
    Unknown,
}

impl Language {
    /// Whether snippets in this language are analysed and executed.
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Python | Self::PythonConsole)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Python => write!(f, "python"),
            Self::PythonConsole => write!(f, "pycon"),
            Self::Other(tag) => write!(f, "{tag}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One extracted code block.  Immutable once extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    /// Location in the source document.
    pub position: SnippetPosition,
    /// Declared or inferred language.
    pub language: Language,
    /// Source text, dedented, with a trailing newline.
    pub source: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_python_variants_are_supported() {
        assert!(Language::Python.is_supported());
        assert!(Language::PythonConsole.is_supported());
        assert!(!Language::Other("bash".into()).is_supported());
        assert!(!Language::Unknown.is_supported());
    }

    #[test]
    fn position_display() {
        let pos = SnippetPosition { index: 2, line: 17 };
        assert_eq!(pos.to_string(), "#2 (line 17)");
    }

    #[test]
    fn language_display() {
        assert_eq!(Language::Python.to_string(), "python");
        assert_eq!(Language::Other("rust".into()).to_string(), "rust");
    }
}
