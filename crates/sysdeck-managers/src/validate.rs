use sysdeck_backend::AdminError;

/// Rejects values a tool could mistake for an option or that cannot be a
/// single token: empty, leading `-`, whitespace or control characters.
pub(crate) fn token<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AdminError> {
    if value.is_empty() {
        return Err(AdminError::invalid(field, "must not be empty"));
    }
    if value.starts_with('-') {
        return Err(AdminError::invalid(
            field,
            format!("{value:?} must not start with '-'"),
        ));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AdminError::invalid(
            field,
            format!("{value:?} must not contain whitespace"),
        ));
    }
    Ok(value)
}

/// A [`token`] that is also usable as a file name.
pub(crate) fn file_token<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AdminError> {
    let value = token(field, value)?;
    if value.contains('/') || value == "." || value == ".." {
        return Err(AdminError::invalid(
            field,
            format!("{value:?} must not contain '/'"),
        ));
    }
    Ok(value)
}

/// Free text passed as one argument (comments, GECOS). Only control
/// characters are refused.
pub(crate) fn text<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AdminError> {
    if value.chars().any(char::is_control) || value.contains(':') {
        return Err(AdminError::invalid(
            field,
            "must not contain control characters or ':'",
        ));
    }
    Ok(value)
}

/// One argument that may contain spaces (ufw application profiles such as
/// `Apache Full`). Still refused when it looks like an option.
pub(crate) fn argument<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AdminError> {
    let value = single_line(field, value)?;
    if value.starts_with('-') {
        return Err(AdminError::invalid(
            field,
            format!("{value:?} must not start with '-'"),
        ));
    }
    Ok(value)
}

/// A non-empty single line, used where the value is matched rather than
/// passed to a tool (repository keys).
pub(crate) fn single_line<'a>(field: &'static str, value: &'a str) -> Result<&'a str, AdminError> {
    if value.is_empty() || value.chars().any(char::is_control) {
        return Err(AdminError::invalid(field, "must be a single non-empty line"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use sysdeck_backend::ErrorKind;

    use super::{argument, file_token, single_line, text, token};

    #[test]
    fn token_rejects_option_like_and_spaced_values() {
        assert!(token("package", "curl").is_ok());
        assert!(token("package", "libstdc++6").is_ok());
        assert!(token("package", "homebrew/cask/firefox").is_ok());

        for bad in ["", "-y", "--purge", "a b", "x\ny", "tab\there"] {
            let error = token("package", bad).expect_err(bad);
            assert_eq!(error.kind(), ErrorKind::InvalidArgument, "{bad:?}");
        }
    }

    #[test]
    fn file_token_rejects_path_separators() {
        assert!(file_token("repository", "docker-ce").is_ok());
        assert!(file_token("repository", "../etc/passwd").is_err());
        assert!(file_token("repository", "..").is_err());
    }

    #[test]
    fn text_allows_spaces_but_not_separators() {
        assert!(text("full name", "Ada Lovelace").is_ok());
        assert!(text("full name", "Ada:0:0").is_err());
        assert!(text("full name", "Ada\nroot::0:0").is_err());
    }

    #[test]
    fn single_line_allows_spaces_but_not_newlines() {
        assert!(single_line("repository", "deb http://x/ stable main").is_ok());
        assert!(single_line("repository", "").is_err());
        assert!(single_line("repository", "a\nb").is_err());
    }

    #[test]
    fn argument_allows_profile_names() {
        assert!(argument("service", "Apache Full").is_ok());
        assert!(argument("service", "--force").is_err());
    }
}
