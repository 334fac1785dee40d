//! Patch preview and mini diff
//!
//! Purely observational output. The diff compares lines at equal positions;
//! it is not an LCS diff, so an inserted line shows every following line as
//! changed.

use crossterm::style::Stylize;
use std::fmt::Write as _;
use std::io::IsTerminal;

/// Whether to emit ANSI colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn plain() -> Self {
        Self { enabled: false }
    }

    /// Colors only on a real terminal, unless `NO_COLOR=1` or `TERM=dumb`.
    pub fn detect() -> Self {
        let no_color = std::env::var("NO_COLOR").is_ok_and(|v| v == "1");
        let dumb = std::env::var("TERM").is_ok_and(|v| v == "dumb");
        Self {
            enabled: std::io::stderr().is_terminal() && !no_color && !dumb,
        }
    }

    fn red(&self, s: &str) -> String {
        if self.enabled {
            s.red().to_string()
        } else {
            s.to_string()
        }
    }

    fn green(&self, s: &str) -> String {
        if self.enabled {
            s.green().to_string()
        } else {
            s.to_string()
        }
    }

    fn dim(&self, s: &str) -> String {
        if self.enabled {
            s.dim().to_string()
        } else {
            s.to_string()
        }
    }

    fn bold(&self, s: &str) -> String {
        if self.enabled {
            s.bold().to_string()
        } else {
            s.to_string()
        }
    }
}

/// Numbered before/after listing of the patched function.
///
/// `first_line` is the 0-based line the function starts on; numbers are
/// printed 1-based. Each side is cut after `max_lines`.
pub fn render_patch_preview(
    before: &str,
    after: &str,
    first_line: usize,
    max_lines: usize,
    palette: Palette,
) -> String {
    let mut out = String::new();
    for (title, text) in [("before", before), ("after", after)] {
        let _ = writeln!(out, "{}", palette.bold(&format!("--- {} ---", title)));
        let lines: Vec<&str> = text.split('\n').collect();
        for (i, line) in lines.iter().take(max_lines).enumerate() {
            let number = palette.dim(&format!("{:>5} |", first_line + i + 1));
            let _ = writeln!(out, "{} {}", number, line);
        }
        if lines.len() > max_lines {
            let _ = writeln!(
                out,
                "{}",
                palette.dim(&format!("      … ({} more lines)", lines.len() - max_lines))
            );
        }
    }
    out
}

/// One row of the positional diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffRow<'a> {
    Same(&'a str),
    Changed { old: &'a str, new: &'a str },
    Removed(&'a str),
    Added(&'a str),
}

/// Compare `before` and `after` line by line at equal indices.
pub fn positional_diff<'a>(before: &'a str, after: &'a str) -> Vec<DiffRow<'a>> {
    let old: Vec<&str> = before.split('\n').collect();
    let new: Vec<&str> = after.split('\n').collect();
    (0..old.len().max(new.len()))
        .map(|i| match (old.get(i).copied(), new.get(i).copied()) {
            (Some(a), Some(b)) if a == b => DiffRow::Same(a),
            (Some(a), Some(b)) => DiffRow::Changed { old: a, new: b },
            (Some(a), None) => DiffRow::Removed(a),
            (None, Some(b)) => DiffRow::Added(b),
            (None, None) => unreachable!("index is below the longer side"),
        })
        .collect()
}

/// `-`/`+` rendering of [`positional_diff`], at most `max_rows` rows.
pub fn render_mini_diff(before: &str, after: &str, max_rows: usize, palette: Palette) -> String {
    let rows = positional_diff(before, after);
    let mut out = String::new();
    for row in rows.iter().take(max_rows) {
        match row {
            DiffRow::Same(line) => {
                let _ = writeln!(out, "  {}", line);
            }
            DiffRow::Changed { old, new } => {
                let _ = writeln!(out, "{}", palette.red(&format!("- {}", old)));
                let _ = writeln!(out, "{}", palette.green(&format!("+ {}", new)));
            }
            DiffRow::Removed(line) => {
                let _ = writeln!(out, "{}", palette.red(&format!("- {}", line)));
            }
            DiffRow::Added(line) => {
                let _ = writeln!(out, "{}", palette.green(&format!("+ {}", line)));
            }
        }
    }
    if rows.len() > max_rows {
        let _ = writeln!(
            out,
            "{}",
            palette.dim(&format!("… ({} more lines)", rows.len() - max_rows))
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_diff_rows() {
        let rows = positional_diff("a\nb\nc", "a\nB\nc\nd");
        assert_eq!(
            rows,
            vec![
                DiffRow::Same("a"),
                DiffRow::Changed { old: "b", new: "B" },
                DiffRow::Same("c"),
                DiffRow::Added("d"),
            ]
        );
    }

    #[test]
    fn test_insertion_shifts_everything_after() {
        let rows = positional_diff("x\ny", "new\nx\ny");
        assert_eq!(
            rows,
            vec![
                DiffRow::Changed { old: "x", new: "new" },
                DiffRow::Changed { old: "y", new: "x" },
                DiffRow::Added("y"),
            ]
        );
    }

    #[test]
    fn test_mini_diff_plain_output() {
        let out = render_mini_diff("keep\nold\ngone", "keep\nnew", 10, Palette::plain());
        assert_eq!(out, "  keep\n- old\n+ new\n- gone\n");
    }

    #[test]
    fn test_mini_diff_truncates() {
        let before = (0..50).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let out = render_mini_diff(&before, &before, 5, Palette::plain());
        assert_eq!(out.lines().count(), 6);
        assert!(out.ends_with("… (45 more lines)\n"));
    }

    #[test]
    fn test_preview_numbers_from_function_start() {
        let out = render_patch_preview("a\nb", "c", 9, 10, Palette::plain());
        assert_eq!(
            out,
            "--- before ---\n   10 | a\n   11 | b\n--- after ---\n   10 | c\n"
        );
    }

    #[test]
    fn test_preview_truncates_each_side() {
        let out = render_patch_preview("1\n2\n3", "1", 0, 2, Palette::plain());
        assert!(out.contains("… (1 more lines)"));
        assert!(!out.contains("    3 | 3"));
    }
}
