use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sysdeck_backend::AdminError;

/// Reads a tool's config file; a missing file is `None`.
pub(crate) async fn read_if_exists(path: &Path) -> Result<Option<String>, AdminError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Files in `dir` with one of `extensions`, sorted by name. A missing
/// directory yields nothing.
pub(crate) async fn files_with_extension(
    dir: &Path,
    extensions: &[&str],
) -> Result<Vec<PathBuf>, AdminError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.contains(&ext))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LineEdit {
    Replace(String),
    Drop,
}

/// Applies per-line edits keyed by zero-based line index. The trailing
/// newline of the original is preserved.
pub(crate) fn apply_line_edits(contents: &str, edits: &BTreeMap<usize, LineEdit>) -> String {
    let mut out = String::with_capacity(contents.len());
    for (index, line) in contents.lines().enumerate() {
        match edits.get(&index) {
            Some(LineEdit::Drop) => continue,
            Some(LineEdit::Replace(text)) => out.push_str(text),
            None => out.push_str(line),
        }
        out.push('\n');
    }
    if !contents.ends_with('\n') && out.ends_with('\n') && !contents.is_empty() {
        out.pop();
    }
    out
}

/// Sets `key<sep>value` on the first uncommented line defining `key`,
/// appending the assignment when no such line exists.
pub(crate) fn set_assignment(contents: &str, key: &str, separator: &str, value: &str) -> String {
    let wanted = format!("{key}{separator}{value}");
    let position = contents
        .lines()
        .position(|line| assignment_value(line, key, separator).is_some());

    match position {
        Some(index) => {
            apply_line_edits(contents, &BTreeMap::from([(index, LineEdit::Replace(wanted))]))
        }
        None => {
            let mut out = contents.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&wanted);
            out.push('\n');
            out
        }
    }
}

/// Value of `key` on an uncommented `key<sep>value` line. A whitespace
/// separator matches any run of spaces or tabs.
pub(crate) fn assignment_value<'a>(line: &'a str, key: &str, separator: &str) -> Option<&'a str> {
    let line = line.trim_start();
    if line.starts_with('#') {
        return None;
    }
    let rest = line.strip_prefix(key)?;
    let value = if separator.trim().is_empty() {
        if !rest.starts_with([' ', '\t']) {
            return None;
        }
        rest.trim_start()
    } else {
        rest.trim_start().strip_prefix(separator.trim())?.trim_start()
    };
    Some(value.trim_end())
}

/// Strips one level of shell-style quoting.
pub(crate) fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
