use crate::config::StorageConfig;
use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File};
use tracing::{debug, info, instrument, warn};

/// Kind of stored artifact, each with its own storage root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}

/// Local filesystem store for uploaded videos and thumbnails
#[derive(Debug, Clone)]
pub struct MediaStore {
    video_root: PathBuf,
    image_root: PathBuf,
}

impl MediaStore {
    /// Create a store over the given roots. Roots are made absolute up front
    /// so stored keys stay valid regardless of the working directory later.
    pub fn new(video_root: impl AsRef<Path>, image_root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            video_root: absolutize(video_root.as_ref())?,
            image_root: absolutize(image_root.as_ref())?,
        })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(&config.video_upload_path, &config.image_upload_path)
    }

    /// Create both storage roots if they are missing
    pub async fn ensure_roots(&self) -> Result<()> {
        for root in [&self.video_root, &self.image_root] {
            fs::create_dir_all(root).await?;
        }
        info!(
            video_root = %self.video_root.display(),
            image_root = %self.image_root.display(),
            "Media storage roots ready"
        );
        Ok(())
    }

    pub fn root(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Video => &self.video_root,
            MediaKind::Image => &self.image_root,
        }
    }

    /// Write `data` under the root for `kind` using the base name of
    /// `original_name`. An existing file with the same name is overwritten.
    /// Returns the absolute path, which is the key recorded on the source.
    #[instrument(skip(self, data), fields(kind = kind.as_str(), size_bytes = data.len()))]
    pub async fn save(&self, kind: MediaKind, original_name: &str, data: &[u8]) -> Result<String> {
        let file_name = base_file_name(original_name)?;
        let root = self.root(kind);
        let destination = root.join(file_name);

        fs::create_dir_all(root).await?;
        fs::write(&destination, data).await?;

        metrics::counter!("processor.media.bytes_saved", "kind" => kind.as_str())
            .increment(data.len() as u64);

        debug!(path = %destination.display(), "Media file saved");

        Ok(destination.to_string_lossy().into_owned())
    }

    /// Open a stored file after checking it lies under the root for `kind`
    #[instrument(skip(self))]
    pub async fn open(&self, kind: MediaKind, stored_key: &str) -> Result<(File, String)> {
        let path = resolve(stored_key, self.root(kind)).map_err(|e| {
            if matches!(e, Error::AccessDenied) {
                warn!(stored_key = %stored_key, "Stored key escapes storage root");
                metrics::counter!("processor.media.access_denied").increment(1);
            }
            e
        })?;

        let not_found = || Error::NotFound(format!("{} file", kind.as_str()));

        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(Error::Storage(e)),
        }

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(Error::Storage(e)),
        };

        Ok((file, content_type_for(&path)))
    }
}

/// Resolve `stored_key` against `storage_root`, refusing anything that ends up
/// outside the root once `.` and `..` segments are collapsed.
///
/// Relative keys are taken relative to the root; absolute keys as they are.
/// The containment check runs on cleaned paths only.
pub fn resolve(stored_key: &str, storage_root: impl AsRef<Path>) -> Result<PathBuf> {
    if stored_key.is_empty() {
        return Err(Error::NotFound("media".to_string()));
    }

    let root = absolutize(storage_root.as_ref())?;
    let key = Path::new(stored_key);
    let candidate = if key.is_absolute() {
        clean(key)
    } else {
        clean(&root.join(key))
    };

    if !candidate.starts_with(&root) {
        return Err(Error::AccessDenied);
    }
    if candidate == root {
        return Err(Error::NotFound("media".to_string()));
    }

    Ok(candidate)
}

/// Lexically clean a path: drop `.`, fold `..` into its parent. `..` above the
/// filesystem root stays at the root; leading `..` of a relative path is kept.
pub fn clean(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }

    parts.iter().map(|c| c.as_os_str()).collect()
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(clean(path))
    } else {
        Ok(clean(&std::env::current_dir()?.join(path)))
    }
}

/// Base file name of a client-supplied name, with any directory part removed
fn base_file_name(original_name: &str) -> Result<&str> {
    let name = original_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default()
        .trim();

    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::Validation(format!(
            "Invalid upload file name: {:?}",
            original_name
        )));
    }

    Ok(name)
}

/// Content type from the file extension
fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
