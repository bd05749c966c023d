use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::detection::domain::model_manager::ModelLoadError;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("failed to create cache directory: {0}")]
    CacheDir(#[source] std::io::Error),
    #[error("download failed for {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to write model to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not determine cache directory")]
    NoCacheDir,
    #[error("model {0} not found locally and no download URL configured")]
    NotFound(String),
}

impl From<ModelResolveError> for ModelLoadError {
    fn from(e: ModelResolveError) -> Self {
        match e {
            ModelResolveError::NotFound(name) => ModelLoadError::NotFound(name),
            other => ModelLoadError::Resolve(other.to_string()),
        }
    }
}

/// Locate a model file, downloading it into the cache as a last resort.
///
/// Resolution order:
/// 1. `name` itself, when it points at an existing file
/// 2. User cache directory (platform-specific)
/// 3. Download from `url` into the cache
pub fn resolve(name: &str, url: Option<&str>) -> Result<PathBuf, ModelResolveError> {
    let direct = Path::new(name);
    if direct.is_file() {
        return Ok(direct.to_path_buf());
    }

    let file_name = direct
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let cache_dir = model_cache_dir()?;
    resolve_in(&file_name, url, &cache_dir)
}

fn resolve_in(file_name: &str, url: Option<&str>, cache_dir: &Path) -> Result<PathBuf, ModelResolveError> {
    let cached_path = cache_dir.join(file_name);
    if cached_path.exists() {
        return Ok(cached_path);
    }

    let url = url.ok_or_else(|| ModelResolveError::NotFound(file_name.to_string()))?;
    fs::create_dir_all(cache_dir).map_err(ModelResolveError::CacheDir)?;
    log::info!("Downloading {file_name} from {url}");
    download(url, &cached_path)?;
    Ok(cached_path)
}

/// Logs download progress in 10% steps, or every 10 MB when the size is
/// unknown.
struct DownloadProgress {
    total: u64,
    next_step: u64,
}

impl DownloadProgress {
    const UNKNOWN_SIZE_STEP: u64 = 10 * 1024 * 1024;

    fn new(total: u64) -> Self {
        let mut progress = Self { total, next_step: 0 };
        progress.next_step = progress.step();
        progress
    }

    fn step(&self) -> u64 {
        if self.total == 0 {
            Self::UNKNOWN_SIZE_STEP
        } else {
            (self.total / 10).max(1)
        }
    }

    /// The message to log once `downloaded` crosses the next step.
    fn update(&mut self, downloaded: u64) -> Option<String> {
        if downloaded < self.next_step {
            return None;
        }
        let step = self.step();
        self.next_step = (downloaded / step + 1) * step;
        let mb = downloaded as f64 / (1024.0 * 1024.0);
        Some(if self.total == 0 {
            format!("Downloaded {mb:.1} MB")
        } else {
            let pct = (downloaded.min(self.total) * 100) / self.total;
            format!("Downloaded {mb:.1} MB ({pct}%)")
        })
    }
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/Hardhat/models/`
/// - Linux: `$XDG_CACHE_HOME/Hardhat/models/` or `~/.cache/Hardhat/models/`
/// - Windows: `%LOCALAPPDATA%/Hardhat/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("Hardhat").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("Hardhat").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

fn download(url: &str, dest: &Path) -> Result<(), ModelResolveError> {
    let temp_path = dest.with_extension("part");

    let result = download_inner(url, dest, &temp_path);

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }

    result
}

fn download_inner(
    url: &str,
    dest: &Path,
    temp_path: &Path,
) -> Result<(), ModelResolveError> {
    let write_err = |path: &Path, source: std::io::Error| ModelResolveError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ModelResolveError::Download {
            url: url.to_string(),
            source: e,
        })?;

    let mut progress = DownloadProgress::new(response.content_length().unwrap_or(0));
    let mut downloaded: u64 = 0;
    let mut file = fs::File::create(temp_path).map_err(|e| write_err(temp_path, e))?;

    // Stream in 1MB chunks; detection models run to tens of megabytes.
    let mut buf = vec![0u8; 1024 * 1024];
    loop {
        let n = response
            .read(&mut buf)
            .map_err(|e| write_err(temp_path, e))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .map_err(|e| write_err(temp_path, e))?;
        downloaded += n as u64;
        if let Some(message) = progress.update(downloaded) {
            log::info!("{message}");
        }
    }

    file.flush().map_err(|e| write_err(temp_path, e))?;
    drop(file);

    fs::rename(temp_path, dest).map_err(|e| write_err(dest, e))?;
    Ok(())
}
