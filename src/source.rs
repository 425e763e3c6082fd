use std::{
    collections::{BTreeSet, HashSet},
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use image::ImageFormat;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::{
    error::{PhaseViolation, StoreError, StoreResult},
    lock::{self, LockName, Phase},
    models::{is_image_extension, normalize_owner, Template, Upload, WeekFolder},
    votes::{allowed_vote_count, Ballot, Ballots, BALLOT_FILE},
    week::{CalendarWeek, WEEK_DIR_PREFIX},
};

pub const USERS_FILE: &str = "users.txt";

/// The directory tree holding every week's uploads. All state lives on disk;
/// nothing here is cached between calls.
#[derive(Debug)]
pub struct ContentStore {
    root: PathBuf,
    // serializes read-modify-write sequences (uploads, ballots, lock toggles)
    writes: Mutex<()>,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn week_dir(&self, cw: CalendarWeek) -> PathBuf {
        self.root.join(cw.path())
    }

    /// The week with its ranked results once voting has finished.
    pub fn list_week(&self, cw: CalendarWeek) -> StoreResult<WeekFolder> {
        let mut week = self.list_week_files(cw)?;
        if week.voting_finished() {
            week.votes = self.ballots(cw)?.tally();
        }
        Ok(week)
    }

    /// Uploads, template and phase of a week. The ballot file is not read.
    pub fn list_week_files(&self, cw: CalendarWeek) -> StoreResult<WeekFolder> {
        let dir = self.week_dir(cw);
        let mut entries = fs::read_dir(&dir)
            .map_err(|err| StoreError::io(&dir, err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::io(&dir, err))?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut uploads = Vec::new();
        let mut template: Option<Template> = None;
        for entry in entries {
            let file_type = entry
                .file_type()
                .map_err(|err| StoreError::io(entry.path(), err))?;
            if file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(week = %cw, path = ?entry.path(), "skipping non utf-8 file name");
                continue;
            };
            let is_image = Path::new(&name)
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(is_image_extension);
            if !is_image {
                continue;
            }

            if let Some(found) = Template::parse(&name, cw) {
                match &template {
                    Some(existing) => warn!(
                        week = %cw,
                        kept = %existing.file_name(),
                        ignored = %name,
                        "week has more than one template"
                    ),
                    None => template = Some(found),
                }
                continue;
            }

            match Upload::parse(&name, cw) {
                Ok(mut upload) => {
                    upload.uploaded_at = entry
                        .metadata()
                        .and_then(|meta| meta.modified())
                        .ok()
                        .map(DateTime::<Utc>::from);
                    uploads.push(upload);
                }
                Err(err) => warn!(week = %cw, error = %err, "skipping unparsable upload"),
            }
        }

        let phase = Phase::of_week_dir(&dir)?;
        let mut week = WeekFolder {
            cw,
            uploads,
            template,
            phase,
            votes: Vec::new(),
        };
        week.sort_uploads();
        Ok(week)
    }

    /// Years that have a folder in the source root.
    pub fn list_years(&self) -> StoreResult<BTreeSet<i32>> {
        let mut years = BTreeSet::new();
        for entry in self.read_dir(&self.root)? {
            if !entry.file_type().is_ok_and(|ty| ty.is_dir()) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            match name.parse() {
                Ok(year) => {
                    years.insert(year);
                }
                Err(err) => warn!(folder = %name, error = %err, "skipping year folder"),
            }
        }
        Ok(years)
    }

    /// Calendar weeks of a year in ascending order.
    pub fn list_weeks_of_year(&self, year: i32) -> StoreResult<Vec<CalendarWeek>> {
        let year_dir = PathBuf::from(year.to_string());
        let mut weeks = Vec::new();
        for entry in self.read_dir(&self.root.join(&year_dir))? {
            if !entry.file_type().is_ok_and(|ty| ty.is_dir()) {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(WEEK_DIR_PREFIX) {
                continue;
            }
            match CalendarWeek::from_path(year_dir.join(name)) {
                Ok(cw) => weeks.push(cw),
                Err(err) => warn!(error = %err, "skipping week folder"),
            }
        }
        weeks.sort();
        Ok(weeks)
    }

    /// Every week of a year that has uploads, newest week first.
    pub fn list_year(&self, year: i32) -> StoreResult<Vec<WeekFolder>> {
        let mut weeks = Vec::new();
        for cw in self.list_weeks_of_year(year)?.into_iter().rev() {
            let week = self.list_week(cw)?;
            if !week.uploads.is_empty() {
                weeks.push(week);
            }
        }
        Ok(weeks)
    }

    /// Lower-cased user names listed in `users.txt`.
    pub fn list_users(&self) -> StoreResult<Vec<String>> {
        let path = self.root.join(USERS_FILE);
        let content = fs::read_to_string(&path).map_err(|err| StoreError::io(&path, err))?;
        Ok(content
            .lines()
            .map(|line| line.trim().to_lowercase())
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub fn phase(&self, cw: CalendarWeek) -> StoreResult<Phase> {
        Phase::of_week_dir(&self.week_dir(cw))
    }

    pub fn ballots(&self, cw: CalendarWeek) -> StoreResult<Ballots> {
        Ballots::load(&self.week_dir(cw).join(BALLOT_FILE))
    }

    /// Closes a phase. The week folder is created if nobody uploaded yet.
    pub fn create_lock(&self, name: LockName, cw: CalendarWeek) -> StoreResult<()> {
        let _guard = self.write_guard();
        let dir = self.week_dir(cw);
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
        lock::create_lock(name, &dir)?;
        info!(week = %cw, lock = %name, "lock created");
        Ok(())
    }

    pub fn remove_lock(&self, name: LockName, cw: CalendarWeek) -> StoreResult<()> {
        let _guard = self.write_guard();
        let dir = self.week_dir(cw);
        lock::remove_lock(name, &dir)?;
        info!(week = %cw, lock = %name, "lock removed");
        Ok(())
    }

    /// Stores a new upload as `{week_seq}_{owner}_{owner_seq}.{ext}` while
    /// uploads are open.
    pub fn store_upload(
        &self,
        owner: &str,
        cw: CalendarWeek,
        bytes: &[u8],
        extension: &str,
    ) -> StoreResult<Upload> {
        let owner = normalize_owner(owner)?;
        let extension = extension.to_ascii_lowercase();
        if !is_image_extension(&extension) {
            return Err(StoreError::UnsupportedImage(extension));
        }

        let _guard = self.write_guard();
        let dir = self.week_dir(cw);
        if !Phase::of_week_dir(&dir)?.can_upload() {
            return Err(StoreError::PhaseClosed(PhaseViolation::UploadsClosed));
        }
        fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;

        let week = self.list_week_files(cw)?;
        let week_seq = week.uploads.iter().map(|u| u.week_seq).max().unwrap_or(0) + 1;
        let owner_seq = week
            .uploads_of(&owner)
            .map(|u| u.owner_seq)
            .max()
            .unwrap_or(0)
            + 1;

        let upload = Upload {
            owner,
            week_seq,
            owner_seq,
            extension,
            cw,
            uploaded_at: Some(Utc::now()),
        };
        let target = dir.join(upload.file_name());

        let mut file = NamedTempFile::new_in(&dir).map_err(|err| StoreError::io(&dir, err))?;
        file.write_all(bytes)
            .and_then(|_| file.as_file().sync_all())
            .map_err(|err| StoreError::io(file.path(), err))?;
        file.persist_noclobber(&target)
            .map_err(|err| StoreError::io(&target, err.error))?;

        info!(
            week = %cw,
            owner = %upload.owner,
            file = %upload.file_name(),
            bytes = bytes.len(),
            "stored upload"
        );
        Ok(upload)
    }

    /// Records `owner`'s ballot for the week, replacing an earlier one.
    pub fn submit_ballot(
        &self,
        cw: CalendarWeek,
        owner: &str,
        choices: Vec<String>,
    ) -> StoreResult<Ballot> {
        let owner = normalize_owner(owner)?;

        let _guard = self.write_guard();
        let dir = self.week_dir(cw);
        match Phase::of_week_dir(&dir)? {
            Phase::Open => return Err(StoreError::PhaseClosed(PhaseViolation::VotingNotOpen)),
            Phase::Closed => return Err(StoreError::PhaseClosed(PhaseViolation::VotingClosed)),
            Phase::Voting => {}
        }

        let week = self.list_week_files(cw)?;
        let expected = allowed_vote_count(week.uploads.len());
        if choices.len() != expected {
            return Err(StoreError::BallotSizeMismatch {
                expected,
                actual: choices.len(),
            });
        }

        let mut seen = HashSet::new();
        for choice in &choices {
            if week.upload(choice).is_none() {
                return Err(StoreError::InvalidBallot(format!("unknown upload {choice}")));
            }
            if !seen.insert(choice.as_str()) {
                return Err(StoreError::InvalidBallot(format!("duplicate choice {choice}")));
            }
        }

        let path = dir.join(BALLOT_FILE);
        let mut ballots = Ballots::load(&path)?;
        let ballot = Ballot { owner, choices };
        ballots.set(ballot.clone());
        ballots.write_atomic(&path)?;

        info!(week = %cw, owner = %ballot.owner, ballots = ballots.len(), "ballot stored");
        Ok(ballot)
    }

    fn read_dir(&self, dir: &Path) -> StoreResult<Vec<fs::DirEntry>> {
        fs::read_dir(dir)
            .map_err(|err| StoreError::io(dir, err))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| StoreError::io(dir, err))
    }

    fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sniffs the image type of uploaded bytes and returns the extension it is
/// stored under.
pub fn detect_image_extension(bytes: &[u8]) -> StoreResult<&'static str> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok("png"),
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        Ok(ImageFormat::Gif) => Ok("gif"),
        Ok(other) => Err(StoreError::UnsupportedImage(format!("{other:?}"))),
        Err(_) => Err(StoreError::UnsupportedImage("unknown".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cw(week: u32) -> CalendarWeek {
        CalendarWeek::new(2024, week).unwrap()
    }

    fn store_with(week: CalendarWeek, files: &[&str]) -> (TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let week_dir = store.week_dir(week);
        fs::create_dir_all(&week_dir).unwrap();
        for file in files {
            fs::write(week_dir.join(file), b"img").unwrap();
        }
        (dir, store)
    }

    fn names(week: &WeekFolder) -> Vec<String> {
        week.uploads.iter().map(Upload::file_name).collect()
    }

    #[test]
    fn lists_uploads_newest_first() {
        let (_dir, store) = store_with(cw(5), &["1_alice_1.png", "2_bob_1.png", "3_alice_2.png"]);
        let week = store.list_week(cw(5)).unwrap();
        assert_eq!(
            names(&week),
            vec!["3_alice_2.png", "2_bob_1.png", "1_alice_1.png"]
        );
        assert!(week.uploads.iter().all(|u| u.uploaded_at.is_some()));
    }

    #[test]
    fn classifies_template_and_skips_other_files() {
        let (_dir, store) = store_with(
            cw(5),
            &[
                "template.jpg",
                "1_alice_1.JPG",
                "notes.txt",
                "votes.txt",
                "upload.lock",
                "broken_name.png",
                "2_bob_x.gif",
            ],
        );
        fs::create_dir(store.week_dir(cw(5)).join("3_dir_1.png")).unwrap();

        let week = store.list_week(cw(5)).unwrap();
        assert_eq!(names(&week), vec!["1_alice_1.JPG"]);
        assert_eq!(week.template.unwrap().file_name(), "template.jpg");
        assert_eq!(week.phase, Phase::Voting);
    }

    #[test]
    fn missing_week_is_not_found() {
        let (_dir, store) = store_with(cw(5), &[]);
        assert!(matches!(
            store.list_week(cw(6)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn lists_years_and_weeks() {
        let (dir, store) = store_with(cw(5), &["1_alice_1.png"]);
        fs::create_dir_all(dir.path().join("2023").join("CW_52")).unwrap();
        fs::create_dir_all(dir.path().join("2024").join("CW_1")).unwrap();
        fs::create_dir_all(dir.path().join("2024").join("CW_02")).unwrap();
        fs::create_dir_all(dir.path().join("2024").join("misc")).unwrap();
        fs::create_dir_all(dir.path().join("static")).unwrap();
        fs::write(dir.path().join("1999"), b"not a folder").unwrap();

        let years: Vec<i32> = store.list_years().unwrap().into_iter().collect();
        assert_eq!(years, vec![2023, 2024]);

        assert_eq!(store.list_weeks_of_year(2024).unwrap(), vec![cw(2), cw(5)]);
        assert!(matches!(
            store.list_weeks_of_year(2020),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn list_year_drops_empty_weeks() {
        let (_dir, store) = store_with(cw(5), &["1_alice_1.png"]);
        fs::create_dir_all(store.week_dir(cw(6))).unwrap();
        fs::write(store.week_dir(cw(6)).join("template.png"), b"t").unwrap();
        fs::create_dir_all(store.week_dir(cw(7))).unwrap();
        fs::write(store.week_dir(cw(7)).join("1_bob_1.png"), b"b").unwrap();

        let weeks = store.list_year(2024).unwrap();
        let cws: Vec<CalendarWeek> = weeks.iter().map(|w| w.cw).collect();
        assert_eq!(cws, vec![cw(7), cw(5)]);
    }

    #[test]
    fn store_upload_assigns_sequence_numbers() {
        let (_dir, store) = store_with(cw(5), &["1_alice_1.png", "4_bob_1.png"]);

        let upload = store.store_upload("Alice", cw(5), b"data", "png").unwrap();
        assert_eq!(upload.file_name(), "5_alice_2.png");
        let upload = store.store_upload("carol", cw(5), b"data", "JPG").unwrap();
        assert_eq!(upload.file_name(), "6_carol_1.jpg");

        let stored = fs::read(store.week_dir(cw(5)).join("5_alice_2.png")).unwrap();
        assert_eq!(stored, b"data");
        assert_eq!(store.list_week(cw(5)).unwrap().uploads.len(), 4);
    }

    #[test]
    fn store_upload_creates_week_folder() {
        let (_dir, store) = store_with(cw(5), &[]);
        let upload = store.store_upload("alice", cw(9), b"x", "gif").unwrap();
        assert_eq!(upload.file_name(), "1_alice_1.gif");
        assert!(store.week_dir(cw(9)).join("1_alice_1.gif").exists());
    }

    #[test]
    fn store_upload_rejects_bad_input_and_closed_phase() {
        let (_dir, store) = store_with(cw(5), &[]);
        assert!(matches!(
            store.store_upload("a_b", cw(5), b"x", "png"),
            Err(StoreError::InvalidOwner(_))
        ));
        assert!(matches!(
            store.store_upload("alice", cw(5), b"x", "exe"),
            Err(StoreError::UnsupportedImage(_))
        ));

        store.create_lock(LockName::Upload, cw(5)).unwrap();
        assert!(matches!(
            store.store_upload("alice", cw(5), b"x", "png"),
            Err(StoreError::PhaseClosed(PhaseViolation::UploadsClosed))
        ));
    }

    #[test]
    fn lock_toggles_report_conflicts() {
        let (_dir, store) = store_with(cw(5), &[]);
        store.create_lock(LockName::Upload, cw(5)).unwrap();
        assert!(matches!(
            store.create_lock(LockName::Upload, cw(5)),
            Err(StoreError::AlreadyLocked(LockName::Upload))
        ));
        store.remove_lock(LockName::Upload, cw(5)).unwrap();
        assert!(matches!(
            store.remove_lock(LockName::Upload, cw(5)),
            Err(StoreError::NotLocked(LockName::Upload))
        ));
        assert!(matches!(
            store.remove_lock(LockName::Vote, cw(40)),
            Err(StoreError::NotLocked(LockName::Vote))
        ));
    }

    fn nine_uploads() -> Vec<String> {
        (1..=9).map(|i| format!("{i}_user{i}_1.png")).collect()
    }

    #[test]
    fn ballot_size_must_match_allowed_count() {
        let files = nine_uploads();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let (_dir, store) = store_with(cw(5), &refs);
        store.create_lock(LockName::Upload, cw(5)).unwrap();

        let err = store
            .submit_ballot(cw(5), "alice", files[..2].to_vec())
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::BallotSizeMismatch {
                expected: 3,
                actual: 2
            }
        ));

        store
            .submit_ballot(cw(5), "alice", files[..3].to_vec())
            .unwrap();
    }

    #[test]
    fn ballot_choices_must_exist_and_be_distinct() {
        let files = nine_uploads();
        let refs: Vec<&str> = files.iter().map(String::as_str).collect();
        let (_dir, store) = store_with(cw(5), &refs);
        store.create_lock(LockName::Upload, cw(5)).unwrap();

        let unknown = vec![files[0].clone(), files[1].clone(), "99_x_1.png".to_string()];
        assert!(matches!(
            store.submit_ballot(cw(5), "alice", unknown),
            Err(StoreError::InvalidBallot(_))
        ));
        let duplicate = vec![files[0].clone(), files[0].clone(), files[1].clone()];
        assert!(matches!(
            store.submit_ballot(cw(5), "alice", duplicate),
            Err(StoreError::InvalidBallot(_))
        ));
    }

    #[test]
    fn voting_follows_the_phase() {
        let (_dir, store) = store_with(cw(5), &["1_alice_1.png", "2_bob_1.png"]);
        let choice = vec!["2_bob_1.png".to_string()];

        assert!(matches!(
            store.submit_ballot(cw(5), "alice", choice.clone()),
            Err(StoreError::PhaseClosed(PhaseViolation::VotingNotOpen))
        ));

        store.create_lock(LockName::Upload, cw(5)).unwrap();
        store.submit_ballot(cw(5), "alice", choice.clone()).unwrap();
        store
            .submit_ballot(cw(5), "bob", vec!["1_alice_1.png".into()])
            .unwrap();
        store.submit_ballot(cw(5), "BOB", choice.clone()).unwrap();
        assert!(store.list_week(cw(5)).unwrap().votes.is_empty());
        assert_eq!(store.ballots(cw(5)).unwrap().len(), 2);

        store.create_lock(LockName::Vote, cw(5)).unwrap();
        assert!(matches!(
            store.submit_ballot(cw(5), "carol", choice),
            Err(StoreError::PhaseClosed(PhaseViolation::VotingClosed))
        ));

        let week = store.list_week(cw(5)).unwrap();
        assert!(week.voting_finished());
        assert_eq!(week.votes.len(), 1);
        assert_eq!(week.votes[0].file_name, "2_bob_1.png");
        assert_eq!(week.votes[0].votes, 2);
    }

    #[test]
    fn corrupt_ballot_file_fails_finished_week() {
        let (_dir, store) = store_with(cw(5), &["1_alice_1.png"]);
        let dir = store.week_dir(cw(5));
        fs::write(dir.join(BALLOT_FILE), "alice:1_alice_1.png\n:oops\n").unwrap();
        fs::write(dir.join("upload.lock"), b"").unwrap();
        fs::write(dir.join("vote.lock"), b"").unwrap();

        assert!(matches!(
            store.list_week(cw(5)),
            Err(StoreError::CorruptBallotFile { line: 2, .. })
        ));
    }

    #[test]
    fn file_listing_ignores_corrupt_ballots() {
        let (_dir, store) = store_with(cw(5), &["1_alice_1.png", "2_bob_1.png"]);
        let dir = store.week_dir(cw(5));
        fs::write(dir.join(BALLOT_FILE), ":oops\n").unwrap();
        fs::write(dir.join("upload.lock"), b"").unwrap();
        fs::write(dir.join("vote.lock"), b"").unwrap();

        let week = store.list_week_files(cw(5)).unwrap();
        assert_eq!(names(&week), vec!["2_bob_1.png", "1_alice_1.png"]);
        assert!(week.voting_finished());
        assert!(week.votes.is_empty());
    }

    #[test]
    fn non_canonical_sequence_numbers_are_skipped() {
        let (_dir, store) = store_with(cw(5), &["01_alice_1.png", "2_bob_1.png", "3_carol_01.png"]);
        let week = store.list_week(cw(5)).unwrap();
        assert_eq!(names(&week), vec!["2_bob_1.png"]);
        for upload in &week.uploads {
            assert!(store.root().join(upload.href()).is_file());
        }

        store.create_lock(LockName::Upload, cw(5)).unwrap();
        assert!(matches!(
            store.submit_ballot(cw(5), "dave", vec!["01_alice_1.png".to_string()]),
            Err(StoreError::InvalidBallot(_))
        ));
        assert!(matches!(
            store.submit_ballot(cw(5), "dave", vec!["1_alice_1.png".to_string()]),
            Err(StoreError::InvalidBallot(_))
        ));
        store
            .submit_ballot(cw(5), "dave", vec!["2_bob_1.png".to_string()])
            .unwrap();
    }

    #[test]
    fn lists_users() {
        let (dir, store) = store_with(cw(5), &[]);
        assert!(matches!(store.list_users(), Err(StoreError::NotFound(_))));
        fs::write(dir.path().join(USERS_FILE), "Alice\n  bob \n\n").unwrap();
        assert_eq!(store.list_users().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn detects_uploaded_image_types() {
        assert_eq!(
            detect_image_extension(b"\x89PNG\r\n\x1a\n0000").unwrap(),
            "png"
        );
        assert_eq!(detect_image_extension(b"GIF89a000000").unwrap(), "gif");
        assert_eq!(detect_image_extension(b"\xff\xd8\xff\xe0").unwrap(), "jpg");
        assert!(detect_image_extension(b"hello world").is_err());
    }
}
