//! Backup and splice
//!
//! A patch replaces the lines `[start, end]` of a file with the candidate's
//! lines. The untouched original is always copied to a timestamped sibling
//! first and never cleaned up afterwards.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::path::{Path, PathBuf};

const BACKUP_SUFFIX: &str = ".bak.";

/// What a successful patch left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPatch {
    pub file: PathBuf,
    pub backup: PathBuf,
    /// Replaced range in the original file, 0-based inclusive
    pub start_line: usize,
    pub end_line: usize,
    /// Number of lines the range was replaced with
    pub inserted_lines: usize,
}

/// `<file>.bak.<UTC timestamp>` with `:` and `.` in the timestamp replaced by `-`.
pub fn backup_path_for(file_path: &Path, at: DateTime<Utc>) -> PathBuf {
    let stamp = at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    let mut name = file_path.as_os_str().to_os_string();
    name.push(BACKUP_SUFFIX);
    name.push(stamp);
    PathBuf::from(name)
}

/// Copy the current content of `file_path` next to it. Returns the backup path.
pub fn write_backup(file_path: &Path) -> Result<PathBuf> {
    let base = backup_path_for(file_path, Utc::now());
    let mut backup = base.clone();
    let mut n = 1;
    while backup.exists() {
        let mut name = base.clone().into_os_string();
        name.push(format!("-{}", n));
        backup = PathBuf::from(name);
        n += 1;
    }

    fs::copy(file_path, &backup).with_context(|| {
        format!(
            "Failed to back up {} to {}",
            file_path.display(),
            backup.display()
        )
    })?;
    Ok(backup)
}

/// `lines[..start] + new_code lines + lines[end + 1..]`
pub fn splice_lines(
    original_lines: &[&str],
    start_line: usize,
    end_line: usize,
    new_code: &str,
) -> Result<Vec<String>> {
    if start_line > end_line || end_line >= original_lines.len() {
        bail!(
            "Invalid line range {}..={} for a file with {} lines",
            start_line,
            end_line,
            original_lines.len()
        );
    }

    let mut out: Vec<String> = Vec::with_capacity(original_lines.len());
    out.extend(original_lines[..start_line].iter().map(|s| s.to_string()));
    out.extend(new_code.split('\n').map(str::to_string));
    out.extend(original_lines[end_line + 1..].iter().map(|s| s.to_string()));
    Ok(out)
}

/// Write the spliced file. The new content goes to a temp sibling that is
/// renamed over the original, so readers see either the old or the new file.
pub fn replace_function_in_file(
    file_path: &Path,
    original_lines: &[&str],
    start_line: usize,
    end_line: usize,
    new_code: &str,
) -> Result<()> {
    let content = splice_lines(original_lines, start_line, end_line, new_code)?.join("\n");
    write_atomic(file_path, &content)
        .with_context(|| format!("Failed to write patched {}", file_path.display()))
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".medic-tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, content)?;
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(&tmp_path, meta.permissions());
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

/// Back up, then splice. Nothing is written if the backup fails.
pub fn apply_patch(
    file_path: &Path,
    original_lines: &[&str],
    start_line: usize,
    end_line: usize,
    new_code: &str,
) -> Result<AppliedPatch> {
    // validate before leaving a backup behind for a patch that cannot apply
    splice_lines(original_lines, start_line, end_line, new_code)?;

    let backup = write_backup(file_path)?;
    replace_function_in_file(file_path, original_lines, start_line, end_line, new_code)?;

    Ok(AppliedPatch {
        file: file_path.to_path_buf(),
        backup,
        start_line,
        end_line,
        inserted_lines: new_code.split('\n').count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_backup_name_replaces_unsafe_chars() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let path = backup_path_for(Path::new("/app/server.js"), at);
        assert_eq!(
            path,
            PathBuf::from("/app/server.js.bak.2026-03-04T05-06-07-000Z")
        );
    }

    #[test]
    fn test_write_backup_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server.js");
        fs::write(&file, "line one\r\nline two\n\u{feff}tail").unwrap();

        let backup = write_backup(&file).unwrap();
        assert_eq!(fs::read(&backup).unwrap(), fs::read(&file).unwrap());
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("server.js.bak."));
    }

    #[test]
    fn test_repeated_backups_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.js");
        fs::write(&file, "v1").unwrap();
        let first = write_backup(&file).unwrap();
        fs::write(&file, "v2").unwrap();
        let second = write_backup(&file).unwrap();

        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first).unwrap(), "v1");
        assert_eq!(fs::read_to_string(second).unwrap(), "v2");
    }

    #[test]
    fn test_splice_replaces_range() {
        let lines = ["a", "b", "c", "d"];
        let out = splice_lines(&lines, 1, 2, "x\ny\nz").unwrap();
        assert_eq!(out, vec!["a", "x", "y", "z", "d"]);

        let out = splice_lines(&lines, 0, 3, "only").unwrap();
        assert_eq!(out, vec!["only"]);
    }

    #[test]
    fn test_splice_rejects_bad_range() {
        let lines = ["a", "b"];
        assert!(splice_lines(&lines, 1, 0, "x").is_err());
        assert!(splice_lines(&lines, 0, 2, "x").is_err());
    }

    #[test]
    fn test_apply_patch_keeps_surrounding_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server.js");
        let original = "head\nfunction f() {\n  return x.y;\n}\ntail\n";
        fs::write(&file, original).unwrap();
        let lines: Vec<&str> = original.split('\n').collect();

        let applied = apply_patch(&file, &lines, 1, 3, "function f() {\n  return x?.y;\n}").unwrap();

        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "head\nfunction f() {\n  return x?.y;\n}\ntail\n"
        );
        assert_eq!(fs::read_to_string(&applied.backup).unwrap(), original);
        assert_eq!(applied.inserted_lines, 3);
        assert!(!dir.path().join("server.js.medic-tmp").exists());
    }

    #[test]
    fn test_apply_patch_bad_range_leaves_no_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("server.js");
        fs::write(&file, "one\ntwo").unwrap();

        assert!(apply_patch(&file, &["one", "two"], 1, 5, "x").is_err());
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
