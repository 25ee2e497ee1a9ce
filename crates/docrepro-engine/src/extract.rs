//! Fenced code block extraction.
//!
//! [`extract`] turns documentation text into a lazy sequence of
//! [`Snippet`]s in document order.  The iterator borrows the text and is
//! `Clone`, so a sequence can be restarted by cloning it before use or by
//! calling [`extract`] again.  Extraction has no side effects.
//!
//! Recognised fences:
//!
//! ````text
//! ```python            ~~~ py
//! print("hi")          print("hi")
//! ```                  ~~~
//! ````
//!
//! - three or more backticks or tildes, optionally indented;
//! - the closing fence uses the same character, is at least as long, and
//!   carries nothing but whitespace;
//! - content is dedented by the opening fence's indentation.
//!
//! Unterminated fences are malformed and skipped; scanning resumes on the
//! line after the opening fence.  Blocks that are empty or whitespace-only
//! are dropped.
//!
//! Once a scan for a closing fence runs off the end of the document, no
//! later fence of that marker and at least that length is scanned again,
//! so a run of unterminated openers costs one pass rather than one pass
//! per opener.

use std::iter::Enumerate;
use std::str::Lines;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::snippet::{Language, Snippet, SnippetPosition};

/// Prompt prefixes of an interactive Python session.
const PROMPT_PRIMARY: &str = ">>>";
const PROMPT_CONTINUATION: &str = "...";

fn fence_pattern() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"^(?P<indent>[ \t]*)(?P<fence>`{3,}|~{3,})(?P<info>.*)$")
            .expect("fence pattern is a valid regex")
    })
}

/// Fence info-string tags mapped to the supported language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageTags {
    /// Tags for plain Python scripts.
    pub python: Vec<String>,
    /// Tags for interactive session transcripts.
    pub console: Vec<String>,
}

impl Default for LanguageTags {
    fn default() -> Self {
        Self {
            python: vec!["python".into(), "py".into(), "python3".into()],
            console: vec!["pycon".into(), "python-repl".into(), "pyrepl".into()],
        }
    }
}

impl LanguageTags {
    /// Classify a fence's info-string tag.  `content` is consulted only when
    /// no tag was declared.
    fn classify(&self, tag: &str, content: &[&str]) -> Language {
        if tag.is_empty() {
            let first = content.iter().map(|l| l.trim_start()).find(|l| !l.is_empty());
            return match first {
                Some(line) if line.starts_with(PROMPT_PRIMARY) => Language::PythonConsole,
                _ => Language::Unknown,
            };
        }
        if self.python.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            Language::Python
        } else if self.console.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            Language::PythonConsole
        } else {
            Language::Other(tag.to_owned())
        }
    }
}

/// Start extracting snippets from `text`.
pub fn extract<'a>(text: &'a str, tags: &'a LanguageTags) -> Snippets<'a> {
    Snippets {
        lines: text.lines().enumerate(),
        tags,
        emitted: 0,
        unclosable: Unclosable::default(),
    }
}

/// Lazy iterator over the snippets in a document.
#[derive(Debug, Clone)]
pub struct Snippets<'a> {
    lines: Enumerate<Lines<'a>>,
    tags: &'a LanguageTags,
    emitted: usize,
    unclosable: Unclosable,
}

/// Shortest fence length, per marker, already known to have no closing
/// line anywhere in the rest of the document.
#[derive(Debug, Clone, Copy, Default)]
struct Unclosable {
    backtick: Option<usize>,
    tilde: Option<usize>,
}

impl Unclosable {
    fn slot(&mut self, marker: char) -> &mut Option<usize> {
        match marker {
            '`' => &mut self.backtick,
            _ => &mut self.tilde,
        }
    }

    fn covers(&self, fence: &Fence<'_>) -> bool {
        let known = match fence.marker {
            '`' => self.backtick,
            _ => self.tilde,
        };
        known.is_some_and(|len| fence.len >= len)
    }

    fn record(&mut self, fence: &Fence<'_>) {
        let slot = self.slot(fence.marker);
        *slot = Some(slot.map_or(fence.len, |len| len.min(fence.len)));
    }
}

/// An opening fence line, parsed.
struct Fence<'a> {
    indent: usize,
    marker: char,
    len: usize,
    info: &'a str,
}

impl<'a> Fence<'a> {
    fn open(line: &'a str) -> Option<Self> {
        let caps = fence_pattern().captures(line)?;
        let fence = caps.name("fence")?.as_str();
        let info = caps.name("info").map_or("", |m| m.as_str());
        let marker = fence.chars().next()?;
        // A backtick fence's info string may not contain backticks.
        if marker == '`' && info.contains('`') {
            return None;
        }
        Some(Self {
            indent: caps.name("indent").map_or(0, |m| m.as_str().chars().count()),
            marker,
            len: fence.len(),
            info,
        })
    }

    fn is_closed_by(&self, line: &str) -> bool {
        let trimmed = line.trim();
        trimmed.len() >= self.len && trimmed.chars().all(|c| c == self.marker)
    }

    /// First word of the info string, lowercased, without attribute-style
    /// decoration such as `{.python}`.
    fn tag(&self) -> String {
        self.info
            .split_whitespace()
            .next()
            .unwrap_or("")
            .trim_start_matches('{')
            .trim_start_matches('.')
            .trim_end_matches('}')
            .to_ascii_lowercase()
    }

    /// Remove up to `indent` leading whitespace characters.
    fn dedent<'l>(&self, line: &'l str) -> &'l str {
        let mut rest = line;
        for _ in 0..self.indent {
            match rest.chars().next() {
                Some(c) if c == ' ' || c == '\t' => rest = &rest[1..],
                _ => break,
            }
        }
        rest
    }
}

impl<'a> Iterator for Snippets<'a> {
    type Item = Snippet;

    fn next(&mut self) -> Option<Snippet> {
        while let Some((lineno, line)) = self.lines.next() {
            let Some(fence) = Fence::open(line) else {
                continue;
            };
            if self.unclosable.covers(&fence) {
                tracing::debug!(line = lineno + 1, "skipping unterminated code fence");
                continue;
            }

            // Scan ahead on a copy so an unterminated fence can be abandoned.
            let mut ahead = self.lines.clone();
            let mut body: Vec<&'a str> = Vec::new();
            let mut closed = false;
            for (_, inner) in ahead.by_ref() {
                if fence.is_closed_by(inner) {
                    closed = true;
                    break;
                }
                body.push(fence.dedent(inner));
            }

            if !closed {
                tracing::debug!(line = lineno + 1, "skipping unterminated code fence");
                self.unclosable.record(&fence);
                continue;
            }
            self.lines = ahead;

            let language = self.tags.classify(&fence.tag(), &body);
            let lines = match language {
                Language::PythonConsole => strip_console_prompts(&body),
                _ => body.into_iter().map(str::to_owned).collect(),
            };
            if lines.iter().all(|l| l.trim().is_empty()) {
                continue;
            }

            let mut source = lines.join("\n");
            source.push('\n');

            let position = SnippetPosition {
                index: self.emitted,
                line: lineno + 1,
            };
            self.emitted += 1;
            return Some(Snippet {
                position,
                language,
                source,
            });
        }
        None
    }
}

/// Convert an interactive session transcript into a script: keep prompt
/// lines without their prompt, drop echoed output.
fn strip_console_prompts(lines: &[&str]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            [PROMPT_PRIMARY, PROMPT_CONTINUATION].iter().find_map(|prompt| {
                let rest = trimmed.strip_prefix(prompt)?;
                if rest.is_empty() {
                    Some(String::new())
                } else {
                    rest.strip_prefix(' ').map(str::to_owned)
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(text: &str) -> Vec<Snippet> {
        let tags = LanguageTags::default();
        extract(text, &tags).collect()
    }

    #[test]
    fn extracts_tagged_blocks_in_order() {
        let doc = "# Title\n\n```python\nprint(1)\n```\n\ntext\n\n```bash\nls\n```\n";
        let snippets = collect(doc);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].language, Language::Python);
        assert_eq!(snippets[0].source, "print(1)\n");
        assert_eq!(snippets[0].position, SnippetPosition { index: 0, line: 3 });
        assert_eq!(snippets[1].language, Language::Other("bash".into()));
        assert_eq!(snippets[1].position, SnippetPosition { index: 1, line: 9 });
    }

    #[test]
    fn untagged_block_is_unknown() {
        let snippets = collect("```\nsome text\n```\n");
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].language, Language::Unknown);
    }

    #[test]
    fn no_fences_yields_nothing() {
        assert!(collect("Just prose.\nNo code here.\n").is_empty());
    }

    #[test]
    fn empty_and_blank_blocks_are_dropped() {
        let snippets = collect("```python\n```\n\n```python\n   \n\t\n```\n\n```py\nx = 1\n```\n");
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].source, "x = 1\n");
        assert_eq!(snippets[0].position.index, 0);
    }

    #[test]
    fn indented_fence_is_dedented() {
        let doc = "    ## Example\n    ```python\n    def foo():\n        return 1\n    print(foo())\n    ```\n";
        let snippets = collect(doc);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].source, "def foo():\n    return 1\nprint(foo())\n");
    }

    #[test]
    fn tilde_fence_and_longer_closing_fence() {
        let doc = "~~~py\nprint('a')\n~~~~~\n````python\n```\nstill inside\n````\n";
        let snippets = collect(doc);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].source, "print('a')\n");
        assert_eq!(snippets[1].source, "```\nstill inside\n");
    }

    #[test]
    fn unterminated_fence_is_skipped_and_scanning_resumes() {
        let doc = "```python\nprint('lost')\n";
        assert!(collect(doc).is_empty());

        let doc = "~~~python\nbroken\n```python\nprint('ok')\n```\n";
        let snippets = collect(doc);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].source, "print('ok')\n");
        assert_eq!(snippets[0].position.line, 3);
    }

    #[test]
    fn shorter_fence_is_still_scanned_after_a_longer_one_fails() {
        let doc = "`````python\nlost\n```python\nprint('ok')\n```\n";
        let snippets = collect(doc);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].source, "print('ok')\n");
    }

    #[test]
    fn unterminated_openers_are_linear() {
        let lines = 40_000;
        let doc = "```x\n~~~y\n".repeat(lines / 2);
        let started = std::time::Instant::now();
        assert_eq!(collect(&doc).len(), 0);
        assert!(
            started.elapsed() < std::time::Duration::from_secs(5),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn tag_is_case_insensitive_and_decorations_are_stripped() {
        let snippets = collect("```Python title=\"x\"\na = 1\n```\n```{.py}\nb = 2\n```\n");
        assert_eq!(snippets.len(), 2);
        assert!(snippets.iter().all(|s| s.language == Language::Python));
    }

    #[test]
    fn console_transcript_is_converted() {
        let doc = "```pycon\n>>> x = 2\n>>> for i in range(x):\n...     print(i)\n...\n0\n1\n```\n";
        let snippets = collect(doc);
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].language, Language::PythonConsole);
        assert_eq!(snippets[0].source, "x = 2\nfor i in range(x):\n    print(i)\n\n");
    }

    #[test]
    fn untagged_transcript_is_inferred() {
        let snippets = collect("```\n>>> print('hi')\nhi\n```\n");
        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].language, Language::PythonConsole);
        assert_eq!(snippets[0].source, "print('hi')\n");
    }

    #[test]
    fn iteration_is_restartable() {
        let tags = LanguageTags::default();
        let doc = "```python\na = 1\n```\n```python\nb = 2\n```\n";
        let snippets = extract(doc, &tags);
        let first: Vec<_> = snippets.clone().collect();
        let second: Vec<_> = snippets.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn custom_tags() {
        let tags = LanguageTags {
            python: vec!["snake".into()],
            console: Vec::new(),
        };
        let snippets: Vec<_> = extract("```snake\nx = 1\n```\n```python\ny = 2\n```\n", &tags).collect();
        assert_eq!(snippets[0].language, Language::Python);
        assert_eq!(snippets[1].language, Language::Other("python".into()));
    }
}
