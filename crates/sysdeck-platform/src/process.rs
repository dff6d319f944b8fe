/// Spawn a child as the leader of its own process group so that it and
/// everything it forks can be signalled together.
pub trait OwnProcessGroup {
    fn own_process_group(&mut self) -> &mut Self;
}

impl OwnProcessGroup for tokio::process::Command {
    #[cfg(unix)]
    fn own_process_group(&mut self) -> &mut Self {
        self.process_group(0)
    }

    #[cfg(not(unix))]
    fn own_process_group(&mut self) -> &mut Self {
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSignal {
    Terminate,
    Kill,
}

/// Deliver `signal` to the process group led by `pgid`.
///
/// # Errors
/// Returns the OS error when the group no longer exists or cannot be
/// signalled.
#[cfg(unix)]
pub fn signal_group(pgid: u32, signal: GroupSignal) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let signal = match signal {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };

    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn signal_group(_pgid: u32, _signal: GroupSignal) -> std::io::Result<()> {
    Err(std::io::Error::from(std::io::ErrorKind::Unsupported))
}

/// Whether any process is still a member of the group led by `pgid`.
/// A group whose members belong to another user (a command under sudo)
/// still counts as existing.
#[cfg(unix)]
#[must_use]
pub fn group_exists(pgid: u32) -> bool {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return false;
    };
    // SAFETY: signal 0 only checks for existence and permission.
    let rc = unsafe { libc::killpg(pgid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
#[must_use]
pub fn group_exists(_pgid: u32) -> bool {
    false
}

/// Whether this process already has an effective uid of 0.
#[must_use]
pub fn running_as_root() -> bool {
    #[cfg(unix)]
    {
        // SAFETY: geteuid cannot fail and touches no memory.
        unsafe { libc::geteuid() == 0 }
    }

    #[cfg(not(unix))]
    {
        false
    }
}
