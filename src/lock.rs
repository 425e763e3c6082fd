use std::{
    fmt,
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Serialize;

use crate::error::{StoreError, StoreResult};

/// The two phase gates of a week folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockName {
    Upload,
    Vote,
}

impl LockName {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockName::Upload => "upload",
            LockName::Vote => "vote",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.lock", self.as_str())
    }

    fn path_in(&self, week_dir: &Path) -> PathBuf {
        week_dir.join(self.file_name())
    }
}

impl fmt::Display for LockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(LockName::Upload),
            "vote" => Ok(LockName::Vote),
            other => Err(format!("unknown lock {other:?}")),
        }
    }
}

/// Whether `{name}.lock` exists in the week folder. Only "not found" counts as
/// unlocked; every other I/O failure is returned to the caller.
pub fn check_lock(name: LockName, week_dir: &Path) -> StoreResult<bool> {
    let path = name.path_in(week_dir);
    match fs::symlink_metadata(&path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::Io { path, source: err }),
    }
}

pub fn create_lock(name: LockName, week_dir: &Path) -> StoreResult<()> {
    let path = name.path_in(week_dir);
    match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            Err(StoreError::AlreadyLocked(name))
        }
        Err(err) => Err(StoreError::io(path, err)),
    }
}

pub fn remove_lock(name: LockName, week_dir: &Path) -> StoreResult<()> {
    let path = name.path_in(week_dir);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotLocked(name)),
        Err(err) => Err(StoreError::Io { path, source: err }),
    }
}

/// Open (uploads allowed) -> Voting (ballots allowed) -> Closed (results final).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Open,
    Voting,
    Closed,
}

impl Phase {
    pub fn from_locks(upload_locked: bool, vote_locked: bool) -> Self {
        match (upload_locked, vote_locked) {
            (false, _) => Phase::Open,
            (true, false) => Phase::Voting,
            (true, true) => Phase::Closed,
        }
    }

    /// Reads both locks of a week folder.
    pub fn of_week_dir(week_dir: &Path) -> StoreResult<Self> {
        let upload = check_lock(LockName::Upload, week_dir)?;
        let vote = check_lock(LockName::Vote, week_dir)?;
        Ok(Self::from_locks(upload, vote))
    }

    pub fn can_upload(&self) -> bool {
        matches!(self, Phase::Open)
    }

    pub fn can_vote(&self) -> bool {
        matches!(self, Phase::Voting)
    }

    pub fn voting_finished(&self) -> bool {
        matches!(self, Phase::Closed)
    }
}
