//! Integrity hold marker.
//!
//! A failed post-apply integrity check leaves `.oxide-sync-hold` in the
//! versions directory. While it exists, further runs against the target are
//! refused until the operator acknowledges it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SyncError};

/// File name of the marker inside the versions directory.
pub const HOLD_FILE_NAME: &str = ".oxide-sync-hold";

/// Contents of the hold marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldNotice {
    /// When the divergence was detected.
    pub detected_at: DateTime<Local>,
    /// The migrated database.
    pub target: PathBuf,
    /// Backup taken before the apply.
    pub backup: PathBuf,
    /// Plan that was applied.
    pub artifact: Option<PathBuf>,
    /// Integrity check output.
    pub messages: Vec<String>,
}

/// Path of the marker for a versions directory.
#[must_use]
pub fn hold_path(versions_dir: &Path) -> PathBuf {
    versions_dir.join(HOLD_FILE_NAME)
}

/// Fails with [`SyncError::IntegrityHold`] if a marker is present.
pub fn check(versions_dir: &Path) -> Result<()> {
    let path = hold_path(versions_dir);
    if path.exists() {
        return Err(SyncError::IntegrityHold(path));
    }
    Ok(())
}

/// Writes the marker and returns its path.
pub async fn place(versions_dir: &Path, notice: &HoldNotice) -> Result<PathBuf> {
    tokio::fs::create_dir_all(versions_dir).await?;
    let path = hold_path(versions_dir);
    tokio::fs::write(&path, serde_json::to_string_pretty(notice)?).await?;
    warn!(path = %path.display(), "Integrity hold placed");
    Ok(path)
}

/// Removes the marker. Returns the notice it held, if there was one.
pub async fn acknowledge(versions_dir: &Path) -> Result<Option<HoldNotice>> {
    let path = hold_path(versions_dir);
    if !path.exists() {
        return Ok(None);
    }
    let text = tokio::fs::read_to_string(&path).await?;
    // An unreadable marker still counts as acknowledged once removed.
    let notice = serde_json::from_str(&text).ok();
    tokio::fs::remove_file(&path).await?;
    info!(path = %path.display(), "Integrity hold acknowledged");
    Ok(notice)
}
