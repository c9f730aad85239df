use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use rusqlite::{OptionalExtension, params};
use tracing::trace;

use super::{ADM_DIR, WcDb};
use crate::{Checksum, ChecksumKind, WcError};

impl WcDb {
    /// Stores `contents` in the pristine store and returns its SHA-1
    /// checksum. Installing the same text twice is a no-op.
    pub fn pristine_install(&mut self, contents: &[u8]) -> Result<Checksum, WcError> {
        let sha1 = Checksum::sha1(contents);
        let path = self.pristine_path(&sha1.digest);
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let tmp = self.abspath(&self.tmp_relpath());
            let mut file = File::create(&tmp)?;
            file.write_all(contents)?;
            file.sync_all()?;
            std::fs::rename(&tmp, &path)?;
            trace!(checksum = %sha1, size = contents.len(), "installed pristine text");
        }
        let size = i64::try_from(contents.len())
            .map_err(|_| WcError::Corrupt(format!("pristine text {sha1} is too large")))?;
        self.conn
            .prepare_cached(
                "INSERT OR IGNORE INTO pristine (checksum, md5_checksum, size) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![sha1.to_string(), Checksum::md5(contents).to_string(), size])?;
        Ok(sha1)
    }

    /// Resolves `checksum` to the SHA-1 key of the pristine store.
    pub fn pristine_sha1(&self, checksum: &Checksum) -> Result<Checksum, WcError> {
        match checksum.kind {
            ChecksumKind::Sha1 => Ok(checksum.clone()),
            ChecksumKind::Md5 => {
                let sha1: Option<String> = self
                    .conn
                    .prepare_cached("SELECT checksum FROM pristine WHERE md5_checksum = ?1")?
                    .query_row(params![checksum.to_string()], |row| row.get(0))
                    .optional()?;
                let sha1 = sha1
                    .ok_or_else(|| WcError::Corrupt(format!("no pristine text for {checksum}")))?;
                Checksum::parse(&sha1)
            }
        }
    }

    /// Returns the MD5 checksum recorded for a pristine text.
    pub fn pristine_md5(&self, checksum: &Checksum) -> Result<Checksum, WcError> {
        let sha1 = self.pristine_sha1(checksum)?;
        let md5: Option<String> = self
            .conn
            .prepare_cached("SELECT md5_checksum FROM pristine WHERE checksum = ?1")?
            .query_row(params![sha1.to_string()], |row| row.get(0))
            .optional()?;
        let md5 = md5.ok_or_else(|| WcError::Corrupt(format!("no pristine text for {checksum}")))?;
        Checksum::parse(&md5)
    }

    /// Returns the on-disk location of a pristine text.
    pub fn pristine_get_path(&self, checksum: &Checksum) -> Result<PathBuf, WcError> {
        let sha1 = self.pristine_sha1(checksum)?;
        let path = self.pristine_path(&sha1.digest);
        if !path.is_file() {
            return Err(WcError::Corrupt(format!(
                "pristine text {sha1} missing from store"
            )));
        }
        Ok(path)
    }

    /// Opens a pristine text for reading.
    pub fn pristine_read(&self, checksum: &Checksum) -> Result<File, WcError> {
        Ok(File::open(self.pristine_get_path(checksum)?)?)
    }

    fn pristine_path(&self, sha1_hex: &str) -> PathBuf {
        let shard = sha1_hex.get(..2).unwrap_or("00");
        self.root
            .join(ADM_DIR)
            .join("pristine")
            .join(shard)
            .join(format!("{sha1_hex}.svn-base"))
    }
}
