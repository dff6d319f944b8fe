use std::collections::HashMap;

use sysdeck_backend::Parsed;

/// One data row of a `|`-separated table, keyed by header text.
#[derive(Debug, Clone)]
pub(crate) struct Row {
    pub line_no: usize,
    pub raw: String,
    fields: HashMap<String, String>,
}

impl Row {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields.get(header).map(String::as_str)
    }

    /// First present, non-empty column among `headers`.
    pub fn first(&self, headers: &[&str]) -> Option<&str> {
        headers
            .iter()
            .filter_map(|header| self.get(header))
            .find(|value| !value.is_empty())
    }
}

fn cells(line: &str) -> Vec<String> {
    line.split('|').map(|cell| cell.trim().to_string()).collect()
}

fn is_separator(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty() && line.chars().all(|c| matches!(c, '-' | '+' | '='))
}

/// Parses zypper-style tables. Everything before the header row (progress
/// chatter) is ignored; after it, non-table lines are reported as skipped.
pub(crate) fn parse_pipe_table(backend: &'static str, output: &str) -> Parsed<Row> {
    let mut parsed = Parsed::new();
    let mut headers: Option<Vec<String>> = None;

    for (index, line) in output.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() || is_separator(line) {
            continue;
        }

        let Some(header) = &headers else {
            if line.contains('|') {
                headers = Some(cells(line));
            }
            continue;
        };

        if !line.contains('|') {
            parsed.skip(backend, line_no, line);
            continue;
        }

        let values = cells(line);
        if values.len() != header.len() {
            parsed.skip(backend, line_no, line);
            continue;
        }

        parsed.push(Row {
            line_no,
            raw: line.to_string(),
            fields: header.iter().cloned().zip(values).collect(),
        });
    }

    parsed
}
