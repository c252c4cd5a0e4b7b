// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! App lifecycle management for a self-hosted node.
//!
//! Apps are containerized compose projects. This crate installs, removes,
//! starts, stops, and restarts them by shelling out to the compose tool, and
//! keeps track of which of them are installed through the user state file of
//! the node. It also merges optional core services into the master compose
//! document of the node.
//!
//! Every invocation is short-lived and synchronous. Node files are read,
//! modified, and rewritten in full without any locking, thus only one manager
//! may operate on a node at a time.

pub mod app;
pub mod config;
pub mod path;
pub mod service;
pub mod store;

/// Check that the current process runs with root privileges.
///
/// # Errors
///
/// - Return [`NotRoot`] if effective user is not root.
#[cfg(unix)]
pub fn ensure_root() -> Result<(), NotRoot> {
    // SAFETY: geteuid(2) always succeeds and touches no memory.
    if unsafe { libc::geteuid() } == 0 {
        Ok(())
    } else {
        Err(NotRoot)
    }
}

#[cfg(not(unix))]
pub fn ensure_root() -> Result<(), NotRoot> {
    Ok(())
}

/// Current process is not running as root.
#[derive(Clone, Debug, thiserror::Error)]
#[error("This script must be run as root!")]
pub struct NotRoot;
