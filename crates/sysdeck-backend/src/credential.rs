use std::fmt;

use zeroize::Zeroizing;

/// An elevation secret.
///
/// Not `Clone` and never printed. The whole buffer is zeroed when the value
/// is dropped, so moving a `Credential` into an operation bounds its
/// lifetime to that operation.
pub struct Credential {
    secret: Zeroizing<Vec<u8>>,
}

impl Credential {
    #[must_use]
    pub fn new(secret: String) -> Self {
        Self {
            secret: Zeroizing::new(secret.into_bytes()),
        }
    }

    /// Reads one line, dropping the trailing newline. The dropped bytes
    /// stay in spare capacity and are zeroed along with the rest.
    #[must_use]
    pub fn from_line(line: String) -> Self {
        let mut credential = Self::new(line);
        while matches!(credential.secret.last(), Some(b'\n' | b'\r')) {
            credential.secret.pop();
        }
        credential
    }

    #[must_use]
    pub fn expose_secret(&self) -> &[u8] {
        &self.secret
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.secret.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.secret.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}
