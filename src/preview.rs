use std::{
    fs,
    io::{self, Cursor, Write},
    path::{Component, Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use dashmap::DashMap;
use image::{
    codecs::jpeg::JpegEncoder, imageops::FilterType, DynamicImage, GenericImageView, ImageReader,
};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::PreviewError;

const CACHE_NAMESPACE: &str = "mmotcw";
/// Length of the shorter preview edge in pixels.
pub const PREVIEW_SHORT_EDGE: u32 = 20;
/// Upper bound for the longer edge, reached only by extreme aspect ratios.
pub const PREVIEW_LONG_EDGE: u32 = 80;
pub const PREVIEW_QUALITY: u8 = 40;

/// A tiny re-encoded JPEG of a source image together with the source's
/// dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl Preview {
    /// Size to render the image at for a given width, keeping the aspect ratio
    /// of the original.
    pub fn display_size(&self, width: u32) -> (u32, u32) {
        if self.width == 0 {
            return (width, 0);
        }
        let height = (width as f64 / self.width as f64 * self.height as f64) as u32;
        (width, height)
    }

    pub fn to_base64(&self) -> String {
        STANDARD_NO_PAD.encode(&self.bytes)
    }

    fn to_entry(&self) -> String {
        format!("{} {} {}", self.width, self.height, self.to_base64())
    }

    fn from_entry(entry: &str) -> Option<Self> {
        let mut parts = entry.split(' ');
        let (Some(width), Some(height), Some(data), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };
        let bytes = STANDARD_NO_PAD.decode(data.trim_end()).ok()?;
        if bytes.is_empty() {
            return None;
        }
        Some(Self {
            width: width.parse().ok()?,
            height: height.parse().ok()?,
            bytes,
        })
    }
}

/// Memoizes previews in memory and under `{cache_dir}/mmotcw/`, keyed by the
/// SHA-256 of the image's path relative to the source root.
///
/// The key does not depend on the image content: replacing a file in place
/// keeps serving the old preview.
pub struct PreviewCache {
    source_root: PathBuf,
    dir: PathBuf,
    entries: DashMap<String, Arc<Preview>>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    generations: AtomicU64,
}

impl PreviewCache {
    pub fn open(
        cache_dir: impl AsRef<Path>,
        source_root: impl Into<PathBuf>,
    ) -> Result<Self, PreviewError> {
        let dir = cache_dir.as_ref().join(CACHE_NAMESPACE);
        fs::create_dir_all(&dir).map_err(|source| PreviewError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            source_root: source_root.into(),
            dir,
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            generations: AtomicU64::new(0),
        })
    }

    pub fn cache_key(path: &str) -> String {
        hex::encode(Sha256::digest(path.as_bytes()))
    }

    /// Number of previews decoded from a source image since the cache was
    /// opened.
    pub fn generations(&self) -> u64 {
        self.generations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the preview for an image path relative to the source root,
    /// generating and persisting it on first access. At most one caller
    /// generates a given key at a time.
    pub fn get_preview(&self, path: &str) -> Result<Arc<Preview>, PreviewError> {
        let normalized = validate_path(path)?;
        let key = Self::cache_key(&normalized);

        if let Some(hit) = self.entries.get(&key) {
            return Ok(hit.value().clone());
        }

        let slot = self.in_flight.entry(key.clone()).or_default().clone();
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.load_or_generate(&normalized, &key)
        };
        self.in_flight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
        result
    }

    fn load_or_generate(&self, path: &str, key: &str) -> Result<Arc<Preview>, PreviewError> {
        // someone else may have finished while we waited
        if let Some(hit) = self.entries.get(key) {
            return Ok(hit.value().clone());
        }

        let preview = match self.load_entry(key)? {
            Some(preview) => preview,
            None => {
                let preview = self.generate(Path::new(path))?;
                if let Err(err) = self.persist_entry(key, &preview) {
                    warn!(path, error = %err, "failed to persist preview, keeping it in memory only");
                }
                preview
            }
        };

        let preview = Arc::new(preview);
        self.entries.insert(key.to_string(), preview.clone());
        Ok(preview)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    fn load_entry(&self, key: &str) -> Result<Option<Preview>, PreviewError> {
        let path = self.entry_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                warn!(entry = %path.display(), "preview cache entry is not text, regenerating");
                return Ok(None);
            }
            Err(source) => return Err(PreviewError::Io { path, source }),
        };
        match Preview::from_entry(&content) {
            Some(preview) => Ok(Some(preview)),
            None => {
                warn!(entry = %path.display(), "corrupt preview cache entry, regenerating");
                Ok(None)
            }
        }
    }

    fn generate(&self, relative: &Path) -> Result<Preview, PreviewError> {
        let source_path = self.source_root.join(relative);
        let unreadable = |source| PreviewError::SourceUnreadable {
            path: source_path.clone(),
            source,
        };

        let bytes = fs::read(&source_path).map_err(unreadable)?;
        let image = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(unreadable)?
            .decode()
            .map_err(|source| PreviewError::DecodeFailed {
                path: source_path.clone(),
                source,
            })?;

        let (width, height) = image.dimensions();
        let (preview_width, preview_height) = preview_dimensions(width, height);
        let small = image.resize_exact(preview_width, preview_height, FilterType::Triangle);
        let rgb = DynamicImage::ImageRgb8(small.to_rgb8());

        let mut encoded = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut encoded, PREVIEW_QUALITY))
            .map_err(PreviewError::EncodeFailed)?;

        self.generations.fetch_add(1, Ordering::Relaxed);
        debug!(
            source = %source_path.display(),
            width,
            height,
            preview_width,
            preview_height,
            "generated preview"
        );
        Ok(Preview {
            width,
            height,
            bytes: encoded,
        })
    }

    fn persist_entry(&self, key: &str, preview: &Preview) -> Result<(), PreviewError> {
        let path = self.entry_path(key);
        let io_err = |source| PreviewError::Io {
            path: path.clone(),
            source,
        };
        let mut file = NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        file.write_all(preview.to_entry().as_bytes())
            .map_err(io_err)?;
        file.persist(&path).map_err(|err| io_err(err.error))?;
        Ok(())
    }
}

/// Only plain relative paths below the source root are accepted. Returns the
/// path with empty and `.` segments dropped, `/` separated.
fn validate_path(path: &str) -> Result<String, PreviewError> {
    let invalid = || PreviewError::InvalidPath(path.to_string());
    let mut segments = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_str().ok_or_else(invalid)?),
            _ => return Err(invalid()),
        }
    }
    if segments.is_empty() {
        return Err(invalid());
    }
    Ok(segments.join("/"))
}

/// Scales the shorter edge down to [`PREVIEW_SHORT_EDGE`] and the longer one
/// to at most [`PREVIEW_LONG_EDGE`], keeping the aspect ratio. Never upscales.
fn preview_dimensions(width: u32, height: u32) -> (u32, u32) {
    let short = width.min(height).max(1) as f64;
    let long = width.max(height).max(1) as f64;
    let scale = (PREVIEW_SHORT_EDGE as f64 / short)
        .min(PREVIEW_LONG_EDGE as f64 / long)
        .min(1.0);
    let fit = |edge: u32| ((edge as f64 * scale).round() as u32).max(1);
    (fit(width), fit(height))
}
