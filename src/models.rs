use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::services::excel::types::Sheet;
use crate::services::excel::utils::file_size_mb;

/// Stored file record, without its sheets.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub id: String,
    pub owner: String,
    pub filename: String,
    pub original_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: String,
    pub description: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

/// Fields supplied when a new upload is persisted.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub owner: String,
    pub filename: String,
    pub original_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub mime_type: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSummary {
    pub name: String,
    pub row_count: usize,
    pub column_count: usize,
    pub headers: Vec<String>,
}

impl From<&Sheet> for SheetSummary {
    fn from(sheet: &Sheet) -> Self {
        Self {
            name: sheet.name.clone(),
            row_count: sheet.row_count,
            column_count: sheet.column_count,
            headers: sheet.headers.clone(),
        }
    }
}

/// One entry of the upload response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: String,
    pub sheets: Vec<SheetSummary>,
    pub uploaded_at: DateTime<Utc>,
}

impl UploadedFile {
    pub fn new(record: &FileRecord, sheets: &[Sheet]) -> Self {
        Self {
            id: record.id.clone(),
            filename: record.filename.clone(),
            original_name: record.original_name.clone(),
            file_size_mb: file_size_mb(record.file_size),
            sheets: sheets.iter().map(SheetSummary::from).collect(),
            uploaded_at: record.created_at,
        }
    }
}

/// File listing entry; sheets carry metadata only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    pub file_size: u64,
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: String,
    pub mime_type: String,
    pub description: String,
    pub tags: Vec<String>,
    pub is_public: bool,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
    pub sheets: Vec<SheetSummary>,
}

impl FileSummary {
    pub fn new(record: FileRecord, sheets: Vec<SheetSummary>) -> Self {
        Self {
            file_size_mb: file_size_mb(record.file_size),
            id: record.id,
            filename: record.filename,
            original_name: record.original_name,
            file_size: record.file_size,
            mime_type: record.mime_type,
            description: record.description,
            tags: record.tags,
            is_public: record.is_public,
            uploaded_by: record.owner,
            uploaded_at: record.created_at,
            last_accessed: record.last_accessed,
            access_count: record.access_count,
            sheets,
        }
    }
}

/// A single file with its full sheet contents.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    pub id: String,
    pub filename: String,
    pub original_name: String,
    #[serde(rename = "fileSizeMB")]
    pub file_size_mb: String,
    pub sheets: Vec<Sheet>,
    pub description: String,
    pub tags: Vec<String>,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

impl FileDetail {
    pub fn new(record: FileRecord, sheets: Vec<Sheet>) -> Self {
        Self {
            file_size_mb: file_size_mb(record.file_size),
            id: record.id,
            filename: record.filename,
            original_name: record.original_name,
            sheets,
            description: record.description,
            tags: record.tags,
            uploaded_by: record.owner,
            uploaded_at: record.created_at,
            last_accessed: record.last_accessed,
            access_count: record.access_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    CreatedAt,
    OriginalName,
    FileSize,
    LastAccessed,
    AccessCount,
}

impl SortField {
    pub fn column(self) -> &'static str {
        match self {
            SortField::CreatedAt => "created_at",
            SortField::OriginalName => "original_name",
            SortField::FileSize => "file_size",
            SortField::LastAccessed => "last_accessed",
            SortField::AccessCount => "access_count",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

pub const MAX_PAGE_SIZE: u32 = 100;

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub sort_by: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            search: String::new(),
            sort_by: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl ListQuery {
    pub fn page(&self) -> u32 {
        self.page.max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        (self.page() as u64 - 1) * self.limit() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_files: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(query: &ListQuery, total_files: u64) -> Self {
        let page = query.page();
        let limit = query.limit() as u64;
        Self {
            current_page: page,
            total_pages: total_files.div_ceil(limit),
            total_files,
            has_next: page as u64 * limit < total_files,
            has_prev: page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_query_defaults() {
        let query: ListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), 10);
        assert_eq!(query.sort_by, SortField::CreatedAt);
        assert_eq!(query.sort_order, SortOrder::Desc);
        assert_eq!(query.offset(), 0);
    }

    #[test]
    fn test_list_query_clamps() {
        let query: ListQuery =
            serde_json::from_str(r#"{"page":0,"limit":1000,"sortBy":"fileSize","sortOrder":"asc"}"#).unwrap();
        assert_eq!(query.page(), 1);
        assert_eq!(query.limit(), MAX_PAGE_SIZE);
        assert_eq!(query.sort_by.column(), "file_size");
    }

    #[test]
    fn test_pagination() {
        let query = ListQuery { page: 2, limit: 10, ..Default::default() };
        assert_eq!(
            Pagination::new(&query, 25),
            Pagination {
                current_page: 2,
                total_pages: 3,
                total_files: 25,
                has_next: true,
                has_prev: true,
            }
        );
        assert!(!Pagination::new(&query, 20).has_next);
    }
}
