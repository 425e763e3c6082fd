use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{StoreError, StoreResult},
    lock::Phase,
    week::CalendarWeek,
};

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "gif", "png"];
pub const TEMPLATE_STEM: &str = "template";

pub fn is_image_extension(ext: &str) -> bool {
    IMAGE_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
}

/// Owner names end up in file names and ballot lines, so they are restricted to
/// lower-case ASCII letters and digits.
pub fn normalize_owner(raw: &str) -> StoreResult<String> {
    let owner = raw.trim().to_ascii_lowercase();
    if owner.is_empty() || !owner.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(StoreError::InvalidOwner(raw.to_string()));
    }
    Ok(owner)
}

/// A user submitted image, parsed from `{week_seq}_{owner}_{owner_seq}.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upload {
    pub owner: String,
    /// Unique number within the week.
    pub week_seq: u32,
    /// Number of the owner's upload within the week.
    pub owner_seq: u32,
    pub extension: String,
    pub cw: CalendarWeek,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl Upload {
    pub fn parse(file_name: &str, cw: CalendarWeek) -> StoreResult<Self> {
        let malformed = || StoreError::MalformedFileName(file_name.to_string());

        let (stem, extension) = file_name.split_once('.').ok_or_else(malformed)?;
        if extension.is_empty() || extension.contains('.') {
            return Err(malformed());
        }

        let mut parts = stem.split('_');
        let (Some(week_seq), Some(owner), Some(owner_seq), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };

        let week_seq = parse_seq(week_seq).ok_or_else(malformed)?;
        let owner_seq = parse_seq(owner_seq).ok_or_else(malformed)?;
        if owner.is_empty() || !owner.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(malformed());
        }

        Ok(Self {
            owner: owner.to_string(),
            week_seq,
            owner_seq,
            extension: extension.to_string(),
            cw,
            uploaded_at: None,
        })
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.{}",
            self.week_seq, self.owner, self.owner_seq, self.extension
        )
    }

    /// Path relative to the source root, `/` separated.
    pub fn href(&self) -> String {
        format!("{}/{}", self.cw.href(), self.file_name())
    }

    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.owner.eq_ignore_ascii_case(owner)
    }
}

/// Only canonical decimal numbers, so the file name can be rebuilt exactly.
fn parse_seq(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return None;
    }
    raw.parse().ok()
}

/// The week's prompt image, always `template.{ext}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Template {
    pub extension: String,
    pub cw: CalendarWeek,
}

impl Template {
    /// Recognises `template.{ext}` file names.
    pub fn parse(file_name: &str, cw: CalendarWeek) -> Option<Self> {
        let extension = file_name.strip_prefix(TEMPLATE_STEM)?.strip_prefix('.')?;
        (!extension.is_empty()).then(|| Self {
            extension: extension.to_string(),
            cw,
        })
    }

    pub fn file_name(&self) -> String {
        format!("{TEMPLATE_STEM}.{}", self.extension)
    }

    pub fn href(&self) -> String {
        format!("{}/{}", self.cw.href(), self.file_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteResult {
    pub file_name: String,
    pub votes: usize,
}

/// Everything a week folder holds, re-read from disk on every request.
#[derive(Debug, Clone)]
pub struct WeekFolder {
    pub cw: CalendarWeek,
    /// Newest first.
    pub uploads: Vec<Upload>,
    pub template: Option<Template>,
    pub phase: Phase,
    /// Ranked results, only filled in once voting has finished.
    pub votes: Vec<VoteResult>,
}

impl WeekFolder {
    pub fn can_upload(&self) -> bool {
        self.phase.can_upload()
    }

    pub fn can_vote(&self) -> bool {
        self.phase.can_vote()
    }

    pub fn voting_finished(&self) -> bool {
        self.phase.voting_finished()
    }

    pub fn upload(&self, file_name: &str) -> Option<&Upload> {
        self.uploads
            .iter()
            .find(|upload| upload.file_name() == file_name)
    }

    pub fn uploads_of(&self, owner: &str) -> impl Iterator<Item = &Upload> {
        let owner = owner.to_string();
        self.uploads
            .iter()
            .filter(move |upload| upload.is_owned_by(&owner))
    }

    pub fn sort_uploads(&mut self) {
        // stable: equal sequence numbers keep directory order
        self.uploads.sort_by(|a, b| b.week_seq.cmp(&a.week_seq));
    }
}
