use bytes::Bytes;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::excel::types::WorkbookFormat;

const ALLOWED_MIME_TYPES: [&str; 4] = [
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.spreadsheet",
    "text/csv",
];

const ALLOWED_EXTENSIONS: [&str; 5] = ["xls", "xlsx", "xlsb", "ods", "csv"];

fn extension(original_name: &str) -> Option<String> {
    Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Decides how an upload is parsed from its MIME type and file extension.
pub fn detect_format(original_name: &str, content_type: Option<&str>) -> Result<WorkbookFormat, AppError> {
    let mime = content_type
        .map(|ct| ct.split(';').next().unwrap_or_default().trim().to_ascii_lowercase())
        .unwrap_or_default();
    let ext = extension(original_name).unwrap_or_default();

    let allowed = ALLOWED_MIME_TYPES.contains(&mime.as_str()) || ALLOWED_EXTENSIONS.contains(&ext.as_str());
    if !allowed {
        tracing::warn!("Rejected upload {} with type '{}'", original_name, mime);
        return Err(AppError::InvalidInput(
            "Invalid file type. Only Excel files (.xls, .xlsx) and CSV files are allowed.".to_string(),
        ));
    }

    if mime == "text/csv" || ext == "csv" {
        Ok(WorkbookFormat::Csv)
    } else {
        Ok(WorkbookFormat::Spreadsheet)
    }
}

/// A raw upload written to the upload directory.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Directory holding the original bytes of every upload.
#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub async fn create(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!("Upload directory ready at {}", root.display());
        Ok(Self { root })
    }

    /// Writes `data` under a unique name that keeps the original extension.
    pub async fn save(&self, original_name: &str, data: &Bytes) -> Result<StoredFile, AppError> {
        let filename = match extension(original_name) {
            Some(ext) => format!("file-{}.{}", Uuid::new_v4(), ext),
            None => format!("file-{}", Uuid::new_v4()),
        };
        let path = self.root.join(&filename);
        tokio::fs::write(&path, data).await.map_err(|e| {
            tracing::error!("Failed to write upload {}: {}", path.display(), e);
            AppError::IoError(e)
        })?;

        tracing::debug!("Saved {} as {}", original_name, path.display());
        Ok(StoredFile {
            filename,
            path,
            size: data.len() as u64,
        })
    }

    pub async fn read(&self, path: &Path) -> Result<Bytes, AppError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::error!("Stored file {} is missing", path.display());
                Err(AppError::NotFound("File not found".to_string()))
            }
            Err(e) => Err(AppError::IoError(e)),
        }
    }

    /// Best-effort removal; failures are logged.
    pub async fn remove(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::error!("Error deleting file {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format("a.xlsx", Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")).unwrap(),
            WorkbookFormat::Spreadsheet
        );
        assert_eq!(detect_format("data.CSV", None).unwrap(), WorkbookFormat::Csv);
        assert_eq!(
            detect_format("export", Some("text/csv; charset=utf-8")).unwrap(),
            WorkbookFormat::Csv
        );
        assert_eq!(
            detect_format("legacy.xls", Some("application/octet-stream")).unwrap(),
            WorkbookFormat::Spreadsheet
        );
        assert!(matches!(
            detect_format("notes.txt", Some("text/plain")),
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_save_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadDir::create(dir.path().join("uploads")).await.unwrap();

        let stored = uploads.save("Report.XLSX", &Bytes::from_static(b"abc")).await.unwrap();
        assert!(stored.filename.starts_with("file-"));
        assert!(stored.filename.ends_with(".xlsx"));
        assert_eq!(stored.size, 3);
        assert_eq!(uploads.read(&stored.path).await.unwrap(), Bytes::from_static(b"abc"));

        uploads.remove(&stored.path).await;
        assert!(matches!(
            uploads.read(&stored.path).await,
            Err(AppError::NotFound(_))
        ));
        // a second removal only logs
        uploads.remove(&stored.path).await;
    }
}
