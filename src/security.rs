#![forbid(unsafe_code)]

//! Startup guards for the tuberelay backend.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when the backend is started as root. The server writes
/// downloaded media and the history log to disk, and doing that as an
/// unprivileged user keeps installs predictable.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}
