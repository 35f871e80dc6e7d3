// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::PathBuf;

/// Environment variable that overrides the data directory outright.
pub const DATA_DIR_ENV: &str = "PASSGATE_DATA_DIR";

/// Return the application data directory.
///
/// `PASSGATE_DATA_DIR` wins; otherwise `$XDG_DATA_HOME/passgate`, then
/// `~/.local/share/passgate`. Creation is left to the service layer so a
/// read-only command never fails on it.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs_fallback().join("passgate")
}

fn dirs_fallback() -> PathBuf {
    // Try XDG data dir, then fallback to home
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort
    std::env::temp_dir()
}
