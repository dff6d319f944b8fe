mod shadow;

use std::path::PathBuf;
use std::sync::LazyLock;

use log::info;
use regex::Regex;

use sysdeck_backend::{
    AdminError, Credential, Domain, Group, NewUser, OpOutcome, UserAccount, UserBackend,
    UserBackendKind, UserChanges,
};
use sysdeck_exec::ExecutionGateway;

use crate::validate;

pub use shadow::ShadowUsers;

static USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_-]*\$?$").expect("username regex")
});

const MAX_USERNAME_LEN: usize = 32;
const ROOT: &str = "root";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPaths {
    pub passwd: PathBuf,
    pub group: PathBuf,
}

impl Default for UserPaths {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            group: PathBuf::from("/etc/group"),
        }
    }
}

#[must_use]
pub fn backend_for(
    kind: UserBackendKind,
    gateway: ExecutionGateway,
    paths: UserPaths,
) -> Box<dyn UserBackend> {
    match kind {
        UserBackendKind::ShadowUtils => {
            Box::new(ShadowUsers::new(gateway, paths.passwd, paths.group))
        }
    }
}

fn username(value: &str) -> Result<&str, AdminError> {
    let value = value.trim();
    if value.len() > MAX_USERNAME_LEN || !USERNAME.is_match(value) {
        return Err(AdminError::invalid(
            "username",
            format!(
                "{value:?} must be lowercase letters, digits, '_' or '-' (at most {MAX_USERNAME_LEN})"
            ),
        ));
    }
    Ok(value)
}

fn check_password(password: &Credential) -> Result<(), AdminError> {
    if password.len() < NewUser::MIN_PASSWORD_LEN {
        return Err(AdminError::invalid(
            "password",
            format!(
                "must be at least {} characters",
                NewUser::MIN_PASSWORD_LEN
            ),
        ));
    }
    if password.expose_secret().iter().any(|b| *b == b'\n' || *b == b'\r') {
        return Err(AdminError::invalid("password", "must be a single line"));
    }
    Ok(())
}

fn check_changes(changes: &UserChanges) -> Result<(), AdminError> {
    if let Some(full_name) = &changes.full_name {
        validate::text("full_name", full_name)?;
    }
    if let Some(shell) = &changes.shell {
        validate::token("shell", shell)?;
    }
    if let Some(home) = &changes.home {
        validate::token("home", &home.to_string_lossy())?;
    }
    for group in &changes.add_groups {
        validate::token("group", group)?;
        if group.contains(',') {
            return Err(AdminError::invalid("group", format!("{group:?} must not contain ','")));
        }
    }
    Ok(())
}

fn protect_root(name: &str, operation: &str) -> Result<(), AdminError> {
    if name == ROOT {
        return Err(AdminError::refused(format!("Cannot {operation} the root user")));
    }
    Ok(())
}

/// Local account administration.
pub struct UserManager {
    backend: Option<Box<dyn UserBackend>>,
}

impl UserManager {
    #[must_use]
    pub fn new(backend: Option<Box<dyn UserBackend>>) -> Self {
        Self { backend }
    }

    fn backend(&self, operation: &'static str) -> Result<&dyn UserBackend, AdminError> {
        self.backend
            .as_deref()
            .ok_or_else(|| AdminError::no_backend(Domain::Users, operation))
    }

    /// Login accounts. System accounts are dropped unless requested, but
    /// `root` is always listed.
    pub async fn list(&self, include_system: bool) -> Result<Vec<UserAccount>, AdminError> {
        let accounts = self.backend("list")?.list().await?;
        Ok(accounts
            .into_iter()
            .filter(|account| include_system || !account.is_system() || account.username == ROOT)
            .collect())
    }

    pub async fn groups(&self) -> Result<Vec<Group>, AdminError> {
        self.backend("groups")?.groups().await
    }

    /// The request (and its password) is consumed and wiped on return.
    pub async fn create(
        &self,
        user: NewUser,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("create")?;
        username(&user.username)?;
        check_password(&user.password)?;
        validate::token("shell", &user.shell)?;
        if let Some(full_name) = &user.full_name {
            validate::text("full_name", full_name)?;
        }
        if let Some(home) = &user.home {
            validate::token("home", &home.to_string_lossy())?;
        }
        for group in &user.groups {
            validate::token("group", group)?;
        }
        info!("Creating user {} via {}", user.username, backend.kind());
        backend.create(&user, cred.as_ref()).await
    }

    pub async fn modify(
        &self,
        name: &str,
        changes: &UserChanges,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("modify")?;
        let name = username(name)?;
        if changes.is_empty() {
            return Ok(OpOutcome::failed("No changes requested"));
        }
        check_changes(changes)?;
        info!("Modifying user {name}");
        backend.modify(name, changes, cred.as_ref()).await
    }

    pub async fn delete(
        &self,
        name: &str,
        remove_home: bool,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("delete")?;
        let name = username(name)?;
        protect_root(name, "delete")?;
        info!("Deleting user {name} (remove home: {remove_home})");
        backend.delete(name, remove_home, cred.as_ref()).await
    }

    pub async fn lock(&self, name: &str, cred: Option<Credential>) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("lock")?;
        let name = username(name)?;
        protect_root(name, "lock")?;
        info!("Locking user {name}");
        backend.set_locked(name, true, cred.as_ref()).await
    }

    pub async fn unlock(
        &self,
        name: &str,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("unlock")?;
        let name = username(name)?;
        info!("Unlocking user {name}");
        backend.set_locked(name, false, cred.as_ref()).await
    }

    pub async fn set_password(
        &self,
        name: &str,
        password: Credential,
        cred: Option<Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let backend = self.backend("set password")?;
        let name = username(name)?;
        check_password(&password)?;
        info!("Changing password for {name}");
        backend.set_password(name, &password, cred.as_ref()).await
    }
}
