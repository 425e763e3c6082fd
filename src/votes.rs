use std::{
    cmp::Reverse,
    collections::HashMap,
    fs,
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;

use crate::{
    error::{StoreError, StoreResult},
    models::VoteResult,
};

pub const BALLOT_FILE: &str = "votes.txt";
const FIELD_SEPARATOR: char = ':';

/// Number of choices every ballot of a week with `uploads` uploads must hold.
pub fn allowed_vote_count(uploads: usize) -> usize {
    ((uploads as f64).sqrt() * 1.15).floor() as usize
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub owner: String,
    pub choices: Vec<String>,
}

/// All ballots of one week in file order. At most one per owner, compared
/// case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ballots {
    ballots: Vec<Ballot>,
}

impl Ballots {
    /// Reads the ballot file. A missing file means nobody voted yet.
    pub fn load(path: &Path) -> StoreResult<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    /// Parses `owner:choice:choice...` lines. Any malformed line rejects the
    /// whole file.
    pub fn parse(content: &str, path: &Path) -> StoreResult<Self> {
        let mut ballots = Self::default();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }

            let mut fields = line.split(FIELD_SEPARATOR);
            let owner = fields.next().unwrap_or_default();
            let choices: Vec<String> = fields.map(str::to_string).collect();
            if owner.is_empty() || choices.iter().any(|choice| choice.is_empty()) {
                return Err(StoreError::CorruptBallotFile {
                    path: path.to_path_buf(),
                    line: index + 1,
                });
            }

            ballots.set(Ballot {
                owner: owner.to_string(),
                choices,
            });
        }
        Ok(ballots)
    }

    /// Inserts a ballot, replacing an earlier one of the same owner in place.
    pub fn set(&mut self, ballot: Ballot) {
        match self
            .ballots
            .iter_mut()
            .find(|existing| existing.owner.eq_ignore_ascii_case(&ballot.owner))
        {
            Some(existing) => *existing = ballot,
            None => self.ballots.push(ballot),
        }
    }

    pub fn get(&self, owner: &str) -> Option<&Ballot> {
        self.ballots
            .iter()
            .find(|ballot| ballot.owner.eq_ignore_ascii_case(owner))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Ballot> {
        self.ballots.iter()
    }

    pub fn len(&self) -> usize {
        self.ballots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ballots.is_empty()
    }

    pub fn to_file_contents(&self) -> String {
        let mut out = String::new();
        for ballot in &self.ballots {
            out.push_str(&ballot.owner);
            for choice in &ballot.choices {
                out.push(FIELD_SEPARATOR);
                out.push_str(choice);
            }
            out.push('\n');
        }
        out
    }

    /// Replaces the ballot file through a temporary file in the same folder so
    /// readers never observe a partial write.
    pub fn write_atomic(&self, path: &Path) -> StoreResult<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut file = NamedTempFile::new_in(dir).map_err(|err| StoreError::io(dir, err))?;
        file.write_all(self.to_file_contents().as_bytes())
            .and_then(|_| file.as_file().sync_all())
            .map_err(|err| StoreError::io(file.path(), err))?;
        file.persist(path)
            .map_err(|err| StoreError::io(path, err.error))?;
        Ok(())
    }

    pub fn tally(&self) -> Vec<VoteResult> {
        tally(self.iter())
    }
}

/// Counts how many ballots name each upload and ranks them by count. Ties are
/// broken by the upload's week sequence number, then by file name.
pub fn tally<'a>(ballots: impl IntoIterator<Item = &'a Ballot>) -> Vec<VoteResult> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for ballot in ballots {
        for choice in &ballot.choices {
            *counts.entry(choice.as_str()).or_default() += 1;
        }
    }

    let mut results: Vec<VoteResult> = counts
        .into_iter()
        .map(|(file_name, votes)| VoteResult {
            file_name: file_name.to_string(),
            votes,
        })
        .collect();
    results.sort_by(|a, b| {
        (Reverse(a.votes), week_seq_of(&a.file_name), &a.file_name).cmp(&(
            Reverse(b.votes),
            week_seq_of(&b.file_name),
            &b.file_name,
        ))
    });
    results
}

fn week_seq_of(file_name: &str) -> u32 {
    file_name
        .split('_')
        .next()
        .and_then(|seq| seq.parse().ok())
        .unwrap_or(u32::MAX)
}
