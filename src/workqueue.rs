//! Deferred filesystem operations.
//!
//! Store transactions only touch metadata. Changes to working files are
//! described as [`WorkItem`]s, queued while the transaction runs and
//! executed with [`run_work_items`] once it has committed.

use std::fs;

use tracing::{debug, trace};

use crate::wc_db::WcDb;
use crate::{Checksum, Context, WcError};

/// One deferred filesystem operation. Paths are working-copy relpaths.
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkItem {
    /// Copy `src` to `dst`, replacing `dst`.
    FileCopy { src: String, dst: String },
    /// Rename `src` to `dst`, replacing `dst`.
    FileMove { src: String, dst: String },
    /// Write the pristine text `checksum` to `dst`.
    FileInstallPristine { checksum: Checksum, dst: String },
    /// Remove `path` if it exists.
    FileRemove { path: String },
}

impl WorkItem {
    fn run(&self, db: &WcDb) -> Result<(), WcError> {
        match self {
            Self::FileCopy { src, dst } => {
                fs::copy(db.abspath(src), db.abspath(dst))?;
            }
            Self::FileMove { src, dst } => {
                fs::rename(db.abspath(src), db.abspath(dst))?;
            }
            Self::FileInstallPristine { checksum, dst } => {
                fs::copy(db.pristine_get_path(checksum)?, db.abspath(dst))?;
            }
            Self::FileRemove { path } => match fs::remove_file(db.abspath(path)) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            },
        }
        Ok(())
    }
}

/// Runs `items` in order, stopping at the first failure.
pub fn run_work_items(db: &WcDb, items: &[WorkItem], ctx: &Context) -> Result<(), WcError> {
    debug!(count = items.len(), "running work queue");
    for item in items {
        ctx.check_cancelled()?;
        trace!(?item, "work item");
        item.run(db)?;
    }
    Ok(())
}
