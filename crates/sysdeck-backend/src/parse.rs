use crate::error::AdminError;

/// A line a parser could not interpret. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub backend: &'static str,
    pub line_no: usize,
    pub line: String,
}

impl From<ParseIssue> for AdminError {
    fn from(issue: ParseIssue) -> Self {
        AdminError::Parse {
            backend: issue.backend,
            line_no: issue.line_no,
            line: issue.line,
        }
    }
}

/// Records recovered from tool output plus the lines that were skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parsed<T> {
    pub records: Vec<T>,
    pub issues: Vec<ParseIssue>,
}

impl<T> Default for Parsed<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            issues: Vec::new(),
        }
    }
}

impl<T> Parsed<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: T) {
        self.records.push(record);
    }

    /// Records an unparseable line. `line_no` is 1-based.
    pub fn skip(&mut self, backend: &'static str, line_no: usize, line: &str) {
        self.issues.push(ParseIssue {
            backend,
            line_no,
            line: line.to_string(),
        });
    }

    #[must_use]
    pub fn skipped(&self) -> usize {
        self.issues.len()
    }

    /// Logs skipped lines and returns the records.
    pub fn into_records(self) -> Vec<T> {
        for issue in &self.issues {
            log::warn!("{}", AdminError::from(issue.clone()));
        }
        if !self.issues.is_empty() {
            log::debug!(
                "Kept {} records, skipped {} lines",
                self.records.len(),
                self.issues.len()
            );
        }
        self.records
    }

    #[must_use]
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Parsed<U> {
        Parsed {
            records: self.records.into_iter().map(f).collect(),
            issues: self.issues,
        }
    }
}

impl<T> FromIterator<T> for Parsed<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
            issues: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Parsed;
    use crate::error::{AdminError, ErrorKind};

    #[test]
    fn skipped_lines_are_counted_without_dropping_records() {
        let mut parsed = Parsed::new();
        parsed.push("first");
        parsed.skip("dpkg", 3, "garbage");
        parsed.push("second");

        assert_eq!(parsed.skipped(), 1);
        assert_eq!(parsed.issues[0].line_no, 3);
        assert_eq!(parsed.into_records(), vec!["first", "second"]);
    }

    #[test]
    fn issue_converts_to_parse_error() {
        let mut parsed: Parsed<()> = Parsed::new();
        parsed.skip("ufw", 7, "Anywhere ???");

        let error = AdminError::from(parsed.issues.remove(0));
        assert_eq!(error.kind(), ErrorKind::Parse);
        assert_eq!(
            error.to_string(),
            "Unparseable ufw output at line 7: Anywhere ???"
        );
    }
}
