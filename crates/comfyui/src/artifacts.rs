//! Output artifact retrieval.
//!
//! Completed prompts are delivered either as direct-access URLs (no
//! bytes transferred) or by streaming each output into a local
//! directory. Downloads are best-effort per item: one failed artifact is
//! logged and skipped, the rest of the batch still completes.

use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// A generated output file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    /// Filename as reported by ComfyUI.
    pub name: String,
    /// Where the artifact can be found.
    pub location: ArtifactLocation,
}

/// Where an [`Artifact`] lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactLocation {
    /// Fetchable from the ComfyUI `/view` endpoint.
    Remote(String),
    /// Saved on the local filesystem.
    Local(PathBuf),
}

impl Artifact {
    /// The URL or local path, as a string.
    pub fn reference(&self) -> String {
        match &self.location {
            ArtifactLocation::Remote(url) => url.clone(),
            ArtifactLocation::Local(path) => path.display().to_string(),
        }
    }
}

/// Failure to save a single artifact.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The name would escape the target directory.
    #[error("Refusing unsafe artifact name '{0}'")]
    UnsafeName(String),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error("Download interrupted: {0}")]
    Stream(#[from] reqwest::Error),

    #[error("Failed to write artifact: {0}")]
    Io(#[from] std::io::Error),
}

/// Build direct-access URLs for `names` without transferring any bytes.
pub fn to_urls(api: &ComfyUIApi, names: &[String]) -> Vec<Artifact> {
    names
        .iter()
        .map(|name| Artifact {
            name: name.clone(),
            location: ArtifactLocation::Remote(api.view_url(name)),
        })
        .collect()
}

/// Download every artifact in `names` into `target_dir`.
///
/// The directory is created if needed. Returns the paths that were
/// written, in input order; artifacts that fail are skipped. Only a
/// failure to create the directory itself is returned as an error.
pub async fn download(
    api: &ComfyUIApi,
    names: &[String],
    target_dir: &Path,
) -> Result<Vec<PathBuf>, std::io::Error> {
    tokio::fs::create_dir_all(target_dir).await?;

    let mut saved = Vec::with_capacity(names.len());
    for name in names {
        match save_one(api, name, target_dir).await {
            Ok(path) => {
                tracing::info!(artifact = %name, path = %path.display(), "Artifact saved");
                saved.push(path);
            }
            Err(e) => {
                tracing::error!(artifact = %name, error = %e, "Failed to download artifact, skipping");
            }
        }
    }
    Ok(saved)
}

/// Download `names` and describe the saved files as [`Artifact`]s.
pub async fn download_artifacts(
    api: &ComfyUIApi,
    names: &[String],
    target_dir: &Path,
) -> Result<Vec<Artifact>, std::io::Error> {
    let paths = download(api, names, target_dir).await?;
    Ok(paths
        .into_iter()
        .map(|path| Artifact {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            location: ArtifactLocation::Local(path),
        })
        .collect())
}

/// Stream one artifact to `target_dir/name`, removing the partial file
/// if anything goes wrong after it was created.
async fn save_one(api: &ComfyUIApi, name: &str, target_dir: &Path) -> Result<PathBuf, ArtifactError> {
    if !is_safe_name(name) {
        return Err(ArtifactError::UnsafeName(name.to_string()));
    }

    let response = api.view(name).await?;
    let path = target_dir.join(name);

    let mut file = tokio::fs::File::create(&path).await?;
    match write_body(response, &mut file).await {
        Ok(()) => Ok(path),
        Err(e) => {
            drop(file);
            if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                tracing::warn!(
                    path = %path.display(),
                    error = %remove_err,
                    "Failed to remove partial artifact",
                );
            }
            Err(e)
        }
    }
}

async fn write_body(
    response: reqwest::Response,
    file: &mut tokio::fs::File,
) -> Result<(), ArtifactError> {
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

/// A name is safe when it is a single normal path component.
fn is_safe_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
