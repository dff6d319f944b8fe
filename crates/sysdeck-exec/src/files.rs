use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tempfile::NamedTempFile;

use sysdeck_backend::{AdminError, Credential};

use crate::gateway::{DomainGuard, ExecutionGateway};
use crate::request::ExecutionRequest;

impl ExecutionGateway {
    /// Replace `path` with `contents` so readers see either the old or the
    /// new file, never a partial one.
    ///
    /// The file is written next to its target and renamed over it. When the
    /// directory is not writable by this process, the new contents are
    /// staged in the temp dir, installed beside the target with elevation,
    /// and moved into place.
    ///
    /// # Errors
    /// Returns `Io` for local write failures and the usual execution errors
    /// for the elevated fallback.
    pub async fn replace_file(
        &self,
        guard: &DomainGuard,
        path: &Path,
        contents: &str,
        credential: Option<&Credential>,
    ) -> Result<(), AdminError> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .ok_or_else(|| AdminError::invalid("path", format!("{} has no parent", path.display())))?
            .to_path_buf();

        let target = path.to_path_buf();
        let body = contents.to_string();
        let direct = tokio::task::spawn_blocking(move || write_atomically(&parent, &target, &body))
            .await
            .map_err(|e| AdminError::Io {
                kind: std::io::ErrorKind::Other,
                message: e.to_string(),
            })?;

        match direct {
            Ok(()) => {
                info!("Rewrote {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                debug!(
                    "No write access to {}, using elevated replace",
                    path.display()
                );
                self.replace_file_elevated(guard, path, contents, credential)
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn replace_file_elevated(
        &self,
        guard: &DomainGuard,
        path: &Path,
        contents: &str,
        credential: Option<&Credential>,
    ) -> Result<(), AdminError> {
        let mut staged = NamedTempFile::new()?;
        staged.write_all(contents.as_bytes())?;
        staged.as_file().sync_all()?;

        let sibling = sibling_temp_path(path);
        let staged_path = staged.path().display().to_string();
        let sibling_path = sibling.display().to_string();

        self.mutate_locked(
            guard,
            ExecutionRequest::new("install")
                .args(["-m", "0644", "--"])
                .args([staged_path, sibling_path.clone()])
                .privileged(),
            credential,
        )
        .await?;

        self.mutate_locked(
            guard,
            ExecutionRequest::new("mv")
                .args(["-f", "--"])
                .args([sibling_path, path.display().to_string()])
                .privileged(),
            credential,
        )
        .await?;

        info!("Rewrote {} with elevation", path.display());
        Ok(())
    }
}

fn write_atomically(parent: &Path, target: &Path, contents: &str) -> std::io::Result<()> {
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(contents.as_bytes())?;
    if let Ok(metadata) = std::fs::metadata(target) {
        temp.as_file().set_permissions(metadata.permissions())?;
    }
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.sysdeck-tmp"))
}
