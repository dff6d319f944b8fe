use std::path::PathBuf;

use async_trait::async_trait;
use log::{info, warn};

use sysdeck_backend::{
    AdminError, Credential, Domain, Group, NewUser, OpOutcome, Parsed, UserAccount, UserBackend,
    UserBackendKind, UserChanges,
};
use sysdeck_exec::{ExecutionGateway, ExecutionRequest};

use crate::config_file::read_if_exists;

const SHADOW: &str = UserBackendKind::ShadowUtils.as_str();

/// `name:x:uid:gid:gecos:home:shell`.
pub(crate) fn parse_passwd(contents: &str) -> Parsed<UserAccount> {
    let mut parsed = Parsed::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        let [name, _, uid, gid, gecos, home, shell] = fields.as_slice() else {
            parsed.skip(SHADOW, index + 1, line);
            continue;
        };
        let (Ok(uid), Ok(gid)) = (uid.parse(), gid.parse()) else {
            parsed.skip(SHADOW, index + 1, line);
            continue;
        };
        parsed.push(UserAccount {
            username: (*name).to_string(),
            uid,
            gid,
            gecos: (*gecos).to_string(),
            home: PathBuf::from(home),
            shell: (*shell).to_string(),
        });
    }
    parsed
}

/// `name:x:gid:member,member`.
pub(crate) fn parse_group(contents: &str) -> Parsed<Group> {
    let mut parsed = Parsed::new();
    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split(':').collect();
        let [name, _, gid, members] = fields.as_slice() else {
            parsed.skip(SHADOW, index + 1, line);
            continue;
        };
        let Ok(gid) = gid.parse() else {
            parsed.skip(SHADOW, index + 1, line);
            continue;
        };
        parsed.push(Group {
            name: (*name).to_string(),
            gid,
            members: members
                .split(',')
                .filter(|member| !member.is_empty())
                .map(str::to_string)
                .collect(),
        });
    }
    parsed
}

/// `user:password` for chpasswd, built straight into the secret buffer.
fn chpasswd_line(username: &str, password: &Credential) -> Result<Credential, AdminError> {
    let password = std::str::from_utf8(password.expose_secret())
        .map_err(|_| AdminError::invalid("password", "must be valid UTF-8"))?;
    let mut line = String::with_capacity(username.len() + 1 + password.len());
    line.push_str(username);
    line.push(':');
    line.push_str(password);
    Ok(Credential::new(line))
}

pub struct ShadowUsers {
    gateway: ExecutionGateway,
    passwd: PathBuf,
    group: PathBuf,
}

impl ShadowUsers {
    #[must_use]
    pub fn new(
        gateway: ExecutionGateway,
        passwd: impl Into<PathBuf>,
        group: impl Into<PathBuf>,
    ) -> Self {
        Self {
            gateway,
            passwd: passwd.into(),
            group: group.into(),
        }
    }

    fn usermod() -> ExecutionRequest {
        ExecutionRequest::new("usermod").privileged()
    }

    fn chpasswd(username: &str, password: &Credential) -> Result<ExecutionRequest, AdminError> {
        Ok(ExecutionRequest::new("chpasswd")
            .privileged()
            .secret_stdin(chpasswd_line(username, password)?))
    }
}

#[async_trait]
impl UserBackend for ShadowUsers {
    fn kind(&self) -> UserBackendKind {
        UserBackendKind::ShadowUtils
    }

    async fn list(&self) -> Result<Vec<UserAccount>, AdminError> {
        let contents = read_if_exists(&self.passwd).await?.unwrap_or_default();
        Ok(parse_passwd(&contents).into_records())
    }

    async fn groups(&self) -> Result<Vec<Group>, AdminError> {
        let contents = read_if_exists(&self.group).await?.unwrap_or_default();
        Ok(parse_group(&contents).into_records())
    }

    /// The account is created first; a failed password step leaves it
    /// locked and is reported as the error. Group failures only warn.
    async fn create(
        &self,
        user: &NewUser,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let mut useradd = ExecutionRequest::new("useradd")
            .args(["-m", "-s"])
            .arg(user.shell.as_str())
            .privileged();
        if let Some(full_name) = &user.full_name {
            useradd = useradd.arg("-c").arg(full_name.as_str());
        }
        if let Some(home) = &user.home {
            useradd = useradd.arg("-d").arg(home.display().to_string());
        }
        let useradd = useradd.arg("--").arg(user.username.as_str());
        let chpasswd = Self::chpasswd(&user.username, &user.password)?;

        let guard = self.gateway.lock(Domain::Users).await;
        self.gateway.mutate_locked(&guard, useradd, cred).await?;
        info!("Created account {}", user.username);
        if let Err(e) = self.gateway.mutate_locked(&guard, chpasswd, cred).await {
            warn!("Account {} created without a password", user.username);
            return Err(e);
        }

        let mut skipped = Vec::new();
        for group in &user.groups {
            let request = Self::usermod()
                .args(["-aG", group.as_str(), "--", user.username.as_str()]);
            if let Err(e) = self.gateway.mutate_locked(&guard, request, cred).await {
                warn!("Could not add {} to {group}: {e}", user.username);
                skipped.push(group.as_str());
            }
        }

        if skipped.is_empty() {
            Ok(OpOutcome::ok("User created successfully"))
        } else {
            Ok(OpOutcome::ok(format!(
                "User created; not added to {}",
                skipped.join(", ")
            )))
        }
    }

    async fn modify(
        &self,
        username: &str,
        changes: &UserChanges,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let mut request = Self::usermod();
        if let Some(full_name) = &changes.full_name {
            request = request.arg("-c").arg(full_name.as_str());
        }
        if let Some(shell) = &changes.shell {
            request = request.arg("-s").arg(shell.as_str());
        }
        if let Some(home) = &changes.home {
            request = request.arg("-d").arg(home.display().to_string());
        }
        if !changes.add_groups.is_empty() {
            request = request.arg("-aG").arg(changes.add_groups.join(","));
        }
        self.gateway
            .mutate(Domain::Users, request.arg("--").arg(username), cred)
            .await?;
        Ok(OpOutcome::ok("User modified successfully"))
    }

    async fn delete(
        &self,
        username: &str,
        remove_home: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let request = ExecutionRequest::new("userdel")
            .args(remove_home.then_some("-r"))
            .args(["--", username])
            .privileged();
        self.gateway.mutate(Domain::Users, request, cred).await?;
        Ok(OpOutcome::ok("User deleted successfully"))
    }

    async fn set_locked(
        &self,
        username: &str,
        locked: bool,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        let flag = if locked { "-L" } else { "-U" };
        self.gateway
            .mutate(
                Domain::Users,
                Self::usermod().args([flag, "--", username]),
                cred,
            )
            .await?;
        Ok(OpOutcome::ok(if locked {
            "User locked successfully"
        } else {
            "User unlocked successfully"
        }))
    }

    async fn set_password(
        &self,
        username: &str,
        password: &Credential,
        cred: Option<&Credential>,
    ) -> Result<OpOutcome, AdminError> {
        self.gateway
            .mutate(Domain::Users, Self::chpasswd(username, password)?, cred)
            .await?;
        Ok(OpOutcome::ok("Password changed"))
    }
}
