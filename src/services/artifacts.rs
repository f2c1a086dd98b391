use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::services::fetch::FetchedImage;

/// Per-job folders of images in which no face was found.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    /// Store the original image bytes as `<row_id>_NOFACE.<ext>`.
    pub async fn save(
        &self,
        job_id: Uuid,
        row_id: &str,
        image: &FetchedImage,
    ) -> Result<PathBuf, ArtifactError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!(
            "{}_NOFACE.{}",
            sanitize_file_stem(row_id),
            image.extension()
        ));
        tokio::fs::write(&path, &image.bytes).await?;
        Ok(path)
    }

    /// Package every artifact of a job into an in-memory ZIP archive.
    pub async fn bundle(&self, job_id: Uuid) -> Result<Vec<u8>, ArtifactError> {
        let dir = self.job_dir(job_id);
        tokio::task::spawn_blocking(move || build_zip(&dir))
            .await
            .map_err(|e| ArtifactError::Io(std::io::Error::other(e)))?
    }
}

fn build_zip(dir: &Path) -> Result<Vec<u8>, ArtifactError> {
    if !dir.is_dir() {
        return Err(ArtifactError::NotFound);
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let mut entries = 0usize;

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ArtifactError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let data = std::fs::read(entry.path())?;
        zip.start_file(name, options)?;
        zip.write_all(&data)?;
        entries += 1;
    }

    if entries == 0 {
        return Err(ArtifactError::NotFound);
    }

    Ok(zip.finish()?.into_inner())
}

/// Keep row ids safe to use as file names.
fn sanitize_file_stem(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "row".to_string()
    } else {
        cleaned.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("No images found")]
    NotFound,

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to build archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Read;

    fn fetched() -> FetchedImage {
        let mut out = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(2, 2)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        FetchedImage::decode(out.into_inner()).unwrap()
    }

    #[test]
    fn test_sanitize_file_stem() {
        assert_eq!(sanitize_file_stem("42"), "42");
        assert_eq!(sanitize_file_stem("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_file_stem("a b/c"), "a_b_c");
        assert_eq!(sanitize_file_stem("  "), "row");
    }

    #[tokio::test]
    async fn test_save_then_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let job_id = Uuid::new_v4();
        let image = fetched();

        let path = store.save(job_id, "17", &image).await.unwrap();
        assert_eq!(path, store.job_dir(job_id).join("17_NOFACE.png"));
        store.save(job_id, "18", &image).await.unwrap();

        let bytes = store.bundle(job_id).await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.len(), 2);
        let mut first = archive.by_name("17_NOFACE.png").unwrap();
        let mut contents = Vec::new();
        first.read_to_end(&mut contents).unwrap();
        assert_eq!(contents, image.bytes);
    }

    #[tokio::test]
    async fn test_bundle_without_artifacts_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let job_id = Uuid::new_v4();
        assert!(matches!(store.bundle(job_id).await, Err(ArtifactError::NotFound)));

        std::fs::create_dir_all(store.job_dir(job_id)).unwrap();
        assert!(matches!(store.bundle(job_id).await, Err(ArtifactError::NotFound)));
    }
}
