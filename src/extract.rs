//! Function boundary detection
//!
//! This is a line-oriented heuristic, not a parser. The start of a function is
//! the nearest line above the target that *looks like* a function header, and
//! the end is where `{`/`}` counting returns to zero. Braces inside string
//! literals, template strings, regexes or comments are counted like any other
//! brace, so boundaries can be wrong for such code.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Source lines believed to make up one function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    pub file_path: PathBuf,
    /// 0-based, inclusive
    pub start_line: usize,
    /// 0-based, inclusive
    pub end_line: usize,
    pub source_text: String,
}

impl FunctionSpan {
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Strategy for finding the `[start, end]` line range around a target line.
///
/// Implementations must return `start <= end`, both within `lines`, for any
/// non-empty input.
pub trait SpanStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn find_span(&self, lines: &[&str], target: usize) -> (usize, usize);
}

/// Header regexes plus brace counting.
#[derive(Debug, Default, Clone, Copy)]
pub struct BraceHeuristic;

fn header_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // function foo(...) / async function (...)
            Regex::new(r"function\s*\w*\s*\(").expect("valid regex"),
            // const foo = (a, b) => {
            Regex::new(r"=\s*\(?.*\)?\s*=>\s*\{").expect("valid regex"),
            // app.get('/x', (req, res) => {
            Regex::new(r"\w+\.\w+\(.*,\s*\(?.*\)?\s*=>\s*\{").expect("valid regex"),
        ]
    })
}

fn looks_like_function_header(line: &str) -> bool {
    let trimmed = line.trim();
    header_patterns().iter().any(|re| re.is_match(trimmed))
}

impl BraceHeuristic {
    /// Nearest header at or above `target`, or line 0.
    pub fn find_start(&self, lines: &[&str], target: usize) -> usize {
        (0..=target)
            .rev()
            .find(|&i| looks_like_function_header(lines[i]))
            .unwrap_or(0)
    }

    /// First line at which the block opened on or after `start` closes again,
    /// or the last line of the file.
    pub fn find_end(&self, lines: &[&str], start: usize) -> usize {
        let mut depth: i64 = 0;
        let mut opened = false;

        for (i, line) in lines.iter().enumerate().skip(start) {
            let opens = line.matches('{').count() as i64;
            let closes = line.matches('}').count() as i64;
            opened |= opens > 0;
            depth += opens - closes;

            if opened && depth <= 0 {
                return i;
            }
        }

        lines.len().saturating_sub(1)
    }
}

impl SpanStrategy for BraceHeuristic {
    fn name(&self) -> &'static str {
        "brace-heuristic"
    }

    fn find_span(&self, lines: &[&str], target: usize) -> (usize, usize) {
        let start = self.find_start(lines, target);
        let end = self.find_end(lines, start);
        (start, end.max(start))
    }
}

/// Cuts the enclosing function out of a file's lines.
pub struct FunctionExtractor {
    strategy: Box<dyn SpanStrategy>,
}

impl Default for FunctionExtractor {
    fn default() -> Self {
        Self::new(Box::new(BraceHeuristic))
    }
}

impl FunctionExtractor {
    pub fn new(strategy: Box<dyn SpanStrategy>) -> Self {
        Self { strategy }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Span around `target_line_index` (0-based). Never fails: an index past
    /// the end is clamped, and a file with no recognisable header yields a
    /// span starting at line 0.
    pub fn extract(&self, file_path: &Path, lines: &[&str], target_line_index: usize) -> FunctionSpan {
        if lines.is_empty() {
            return FunctionSpan {
                file_path: file_path.to_path_buf(),
                start_line: 0,
                end_line: 0,
                source_text: String::new(),
            };
        }

        let target = target_line_index.min(lines.len() - 1);
        let (start, end) = self.strategy.find_span(lines, target);
        let end = end.min(lines.len() - 1).max(start);

        FunctionSpan {
            file_path: file_path.to_path_buf(),
            start_line: start,
            end_line: end,
            source_text: lines[start..=end].join("\n"),
        }
    }
}

/// Extract with the default [`BraceHeuristic`].
pub fn extract_function_code(file_path: &Path, lines: &[&str], target_line_index: usize) -> FunctionSpan {
    FunctionExtractor::default().extract(file_path, lines, target_line_index)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = r#"const express = require('express');
const app = express();

function logError(err) {
  fs.appendFileSync('app.log', err.stack + '\n');
}

app.post('/parse', (req, res) => {
  try {
    const data = req.body.data;
    const upper = data.toUpperCase();
    res.send({ result: upper });
  } catch (err) {
    logError(err);
    res.status(500).send({ error: 'Something went wrong' });
  }
});

const startServer = () => {
  app.listen(3000);
};"#;

    fn lines(text: &str) -> Vec<&str> {
        text.split('\n').collect()
    }

    fn extract(text: &str, target: usize) -> FunctionSpan {
        extract_function_code(Path::new("server.js"), &lines(text), target)
    }

    #[test]
    fn test_inline_callback_span() {
        let span = extract(SERVER, 10);
        assert_eq!((span.start_line, span.end_line), (7, 16));
        assert!(span.source_text.starts_with("app.post('/parse'"));
        assert!(span.source_text.ends_with("});"));
    }

    #[test]
    fn test_named_function_span() {
        let span = extract(SERVER, 4);
        assert_eq!((span.start_line, span.end_line), (3, 5));
        assert_eq!(span.line_count(), 3);
    }

    #[test]
    fn test_arrow_assignment_span() {
        let span = extract(SERVER, 19);
        assert_eq!((span.start_line, span.end_line), (18, 20));
    }

    #[test]
    fn test_no_header_falls_back_to_line_zero() {
        let text = "let a = 1;\nlet b = a.foo.bar;\nconsole.log(b);";
        let span = extract(text, 1);
        assert_eq!(span.start_line, 0);
        // no block ever opens, so the end falls back to the last line
        assert_eq!(span.end_line, 2);
    }

    #[test]
    fn test_unbalanced_block_ends_at_last_line() {
        let text = "function broken() {\n  if (x) {\n    return 1;\n  }";
        let span = extract(text, 2);
        assert_eq!((span.start_line, span.end_line), (0, 3));
    }

    #[test]
    fn test_multiline_signature_keeps_body() {
        let text = "function wide(\n  a,\n  b\n) {\n  return a + b;\n}\n";
        let span = extract(text, 4);
        assert_eq!((span.start_line, span.end_line), (0, 5));
    }

    #[test]
    fn test_target_past_end_is_clamped() {
        let span = extract(SERVER, 500);
        assert!(span.end_line >= span.start_line);
        assert_eq!(span.end_line, lines(SERVER).len() - 1);
    }

    #[test]
    fn test_empty_input() {
        let span = extract_function_code(Path::new("empty.js"), &[], 3);
        assert_eq!((span.start_line, span.end_line), (0, 0));
        assert!(span.source_text.is_empty());

        let span = extract("", 0);
        assert_eq!((span.start_line, span.end_line), (0, 0));
    }

    #[test]
    fn test_end_never_precedes_start() {
        let inputs = [
            "}}}\nfunction f() {\n}",
            "{\n{\n{",
            "const f = () => {\n}}}}\n",
            "\n\n\n",
        ];
        for text in inputs {
            for target in 0..5 {
                let span = extract(text, target);
                assert!(span.end_line >= span.start_line, "{text:?} @ {target}");
            }
        }
    }

    // Known limitation: braces inside literals and comments are counted.
    #[test]
    fn test_brace_in_string_cuts_function_short() {
        let text = "function f() {\n  const s = \"}\";\n  return s;\n}";
        let span = extract(text, 2);
        assert_eq!((span.start_line, span.end_line), (0, 1));
    }

    #[test]
    fn test_brace_in_comment_extends_function() {
        let text = "function f() {\n  // opens { here\n  return 1;\n}\nfunction g() {\n}";
        let span = extract(text, 2);
        // the comment's `{` keeps depth above zero past f's closing brace
        assert_eq!((span.start_line, span.end_line), (0, 5));
    }

    struct WholeFile;

    impl SpanStrategy for WholeFile {
        fn name(&self) -> &'static str {
            "whole-file"
        }

        fn find_span(&self, lines: &[&str], _target: usize) -> (usize, usize) {
            (0, lines.len() - 1)
        }
    }

    #[test]
    fn test_custom_strategy_is_used() {
        let extractor = FunctionExtractor::new(Box::new(WholeFile));
        assert_eq!(extractor.strategy_name(), "whole-file");
        let span = extractor.extract(Path::new("server.js"), &lines(SERVER), 3);
        assert_eq!(span.start_line, 0);
        assert_eq!(span.end_line, lines(SERVER).len() - 1);
    }
}
