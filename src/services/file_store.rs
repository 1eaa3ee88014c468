use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{FileRecord, FileSummary, ListQuery, NewFile, SheetSummary, SortOrder};
use crate::services::excel::types::Sheet;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id            TEXT PRIMARY KEY,
    owner         TEXT NOT NULL,
    filename      TEXT NOT NULL,
    original_name TEXT NOT NULL,
    file_path     TEXT NOT NULL,
    file_size     INTEGER NOT NULL,
    mime_type     TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    tags          TEXT NOT NULL DEFAULT '[]',
    is_public     INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_files_owner_created ON files (owner, created_at DESC);
CREATE TABLE IF NOT EXISTS sheets (
    file_id      TEXT NOT NULL REFERENCES files (id) ON DELETE CASCADE,
    position     INTEGER NOT NULL,
    name         TEXT NOT NULL,
    headers      TEXT NOT NULL,
    data         TEXT NOT NULL,
    row_count    INTEGER NOT NULL,
    column_count INTEGER NOT NULL,
    PRIMARY KEY (file_id, position)
);
";

const FILE_COLUMNS: &str = "id, owner, filename, original_name, file_path, file_size, mime_type, \
     description, tags, is_public, created_at, updated_at, last_accessed, access_count";

const SHEET_COLUMNS: &str = "name, headers, data, row_count, column_count";

const SEARCH_FILTER: &str = "owner = ?1 AND (original_name LIKE ?2 ESCAPE '\\' \
     OR description LIKE ?2 ESCAPE '\\' \
     OR EXISTS (SELECT 1 FROM json_each(files.tags) WHERE json_each.value LIKE ?2 ESCAPE '\\'))";

/// SQLite-backed store for uploaded file records and their normalized sheets.
pub struct FileStore {
    conn: Mutex<Connection>,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        info!("Opening file store at {}", path.display());
        let conn = Connection::open(path).map_err(|e| {
            error!("Failed to open database {}: {}", path.display(), e);
            AppError::DatabaseError(e.to_string())
        })?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        debug!("Opening in-memory file store");
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AppError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persists a file record and all of its sheets in one transaction.
    pub fn insert(&self, new_file: NewFile, sheets: &[Sheet]) -> Result<FileRecord, AppError> {
        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4().to_string(),
            owner: new_file.owner,
            filename: new_file.filename,
            original_name: new_file.original_name,
            file_path: new_file.file_path,
            file_size: new_file.file_size,
            mime_type: new_file.mime_type,
            description: new_file.description,
            tags: new_file.tags,
            is_public: false,
            created_at: now,
            updated_at: now,
            last_accessed: now,
            access_count: 0,
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            &format!(
                "INSERT INTO files ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                FILE_COLUMNS
            ),
            params![
                record.id,
                record.owner,
                record.filename,
                record.original_name,
                record.file_path,
                record.file_size as i64,
                record.mime_type,
                record.description,
                serde_json::to_string(&record.tags)?,
                record.is_public,
                record.created_at,
                record.updated_at,
                record.last_accessed,
                record.access_count as i64,
            ],
        )?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO sheets (file_id, position, {}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                SHEET_COLUMNS
            ))?;
            for (position, sheet) in sheets.iter().enumerate() {
                stmt.execute(params![
                    record.id,
                    position as i64,
                    sheet.name,
                    serde_json::to_string(&sheet.headers)?,
                    serde_json::to_string(&sheet.data)?,
                    sheet.row_count as i64,
                    sheet.column_count as i64,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            "Stored file {} ({}) with {} sheets",
            record.id,
            record.original_name,
            sheets.len()
        );
        Ok(record)
    }

    pub fn find(&self, owner: &str, id: &str) -> Result<Option<FileRecord>, AppError> {
        let conn = self.conn.lock();
        find_record(&conn, owner, id)
    }

    /// One page of the owner's files plus the total number of matches.
    pub fn list(&self, owner: &str, query: &ListQuery) -> Result<(Vec<FileSummary>, u64), AppError> {
        let conn = self.conn.lock();
        let pattern = format!("%{}%", escape_like(query.search.trim()));

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM files WHERE {}", SEARCH_FILTER),
            params![owner, pattern],
            |row| row.get(0),
        )?;

        let order = match query.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT {} FROM files WHERE {} ORDER BY {} {} LIMIT ?3 OFFSET ?4",
            FILE_COLUMNS,
            SEARCH_FILTER,
            query.sort_by.column(),
            order
        );
        debug!("Listing files: {}", sql);

        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params![owner, pattern, query.limit() as i64, query.offset() as i64],
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let mut files = Vec::with_capacity(records.len());
        for record in records {
            let sheets = sheet_summaries(&conn, &record.id)?;
            files.push(FileSummary::new(record, sheets));
        }

        Ok((files, total as u64))
    }

    pub fn sheets(&self, file: &FileRecord) -> Result<Vec<Sheet>, AppError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM sheets WHERE file_id = ?1 ORDER BY position",
            SHEET_COLUMNS
        ))?;
        let sheets = stmt
            .query_map(params![file.id], sheet_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sheets)
    }

    pub fn first_sheet(&self, file: &FileRecord) -> Result<Option<Sheet>, AppError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM sheets WHERE file_id = ?1 ORDER BY position LIMIT 1",
                SHEET_COLUMNS
            ),
            params![file.id],
            sheet_from_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn sheet_by_name(&self, file: &FileRecord, name: &str) -> Result<Option<Sheet>, AppError> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM sheets WHERE file_id = ?1 AND name = ?2 ORDER BY position LIMIT 1",
                SHEET_COLUMNS
            ),
            params![file.id, name],
            sheet_from_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Bumps the access counter and timestamp, returning the updated record.
    pub fn record_access(&self, owner: &str, id: &str) -> Result<Option<FileRecord>, AppError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE files SET access_count = access_count + 1, last_accessed = ?3, updated_at = ?3 \
             WHERE id = ?1 AND owner = ?2",
            params![id, owner, Utc::now()],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        find_record(&conn, owner, id)
    }

    /// Removes the record and its sheets; the caller deletes the file on disk.
    pub fn delete(&self, owner: &str, id: &str) -> Result<Option<FileRecord>, AppError> {
        let conn = self.conn.lock();
        let Some(record) = find_record(&conn, owner, id)? else {
            return Ok(None);
        };
        conn.execute(
            "DELETE FROM files WHERE id = ?1 AND owner = ?2",
            params![id, owner],
        )?;
        info!("Deleted file record {}", id);
        Ok(Some(record))
    }
}

fn find_record(conn: &Connection, owner: &str, id: &str) -> Result<Option<FileRecord>, AppError> {
    conn.query_row(
        &format!("SELECT {} FROM files WHERE id = ?1 AND owner = ?2", FILE_COLUMNS),
        params![id, owner],
        record_from_row,
    )
    .optional()
    .map_err(AppError::from)
}

fn sheet_summaries(conn: &Connection, file_id: &str) -> Result<Vec<SheetSummary>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT name, row_count, column_count, headers FROM sheets WHERE file_id = ?1 ORDER BY position",
    )?;
    let summaries = stmt
        .query_map(params![file_id], |row| {
            Ok(SheetSummary {
                name: row.get(0)?,
                row_count: row.get::<_, i64>(1)? as usize,
                column_count: row.get::<_, i64>(2)? as usize,
                headers: json_column(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(summaries)
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: row.get(0)?,
        owner: row.get(1)?,
        filename: row.get(2)?,
        original_name: row.get(3)?,
        file_path: row.get(4)?,
        file_size: row.get::<_, i64>(5)? as u64,
        mime_type: row.get(6)?,
        description: row.get(7)?,
        tags: json_column(row, 8)?,
        is_public: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
        last_accessed: row.get(12)?,
        access_count: row.get::<_, i64>(13)? as u64,
    })
}

fn sheet_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sheet> {
    Ok(Sheet {
        name: row.get(0)?,
        headers: json_column(row, 1)?,
        data: json_column(row, 2)?,
        row_count: row.get::<_, i64>(3)? as usize,
        column_count: row.get::<_, i64>(4)? as usize,
    })
}

fn json_column<T: DeserializeOwned>(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortField;
    use crate::services::excel::types::{CellValue, Row};
    use tokio_test::assert_ok;

    fn new_file(owner: &str, name: &str, description: &str, tags: &[&str]) -> NewFile {
        NewFile {
            owner: owner.to_string(),
            filename: format!("file-{}", name),
            original_name: name.to_string(),
            file_path: format!("/tmp/{}", name),
            file_size: 2048,
            mime_type: "text/csv".to_string(),
            description: description.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn sheet(name: &str) -> Sheet {
        let mut row = Row::new();
        row.insert("Region".to_string(), CellValue::from("North"));
        row.insert("Amount".to_string(), CellValue::Number(12.5));
        Sheet::new(name, vec!["Region".into(), "Amount".into()], vec![row])
    }

    #[test]
    fn test_insert_and_read_back() {
        let store = FileStore::open_in_memory().unwrap();
        let record = store
            .insert(new_file("u1", "sales.csv", "", &["q1"]), &[sheet("First"), sheet("Second")])
            .unwrap();

        let found = store.find("u1", &record.id).unwrap().unwrap();
        assert_eq!(found.original_name, "sales.csv");
        assert_eq!(found.tags, vec!["q1"]);
        assert_eq!(found.access_count, 0);

        let sheets = store.sheets(&found).unwrap();
        assert_eq!(sheets.len(), 2);
        assert_eq!(sheets[0], sheet("First"));

        let first = store.first_sheet(&found).unwrap().unwrap();
        assert_eq!(first.name, "First");
        let second = store.sheet_by_name(&found, "Second").unwrap().unwrap();
        assert_eq!(second.data[0]["Amount"], CellValue::Number(12.5));
        assert!(store.sheet_by_name(&found, "Third").unwrap().is_none());
    }

    #[test]
    fn test_records_are_owner_scoped() {
        let store = FileStore::open_in_memory().unwrap();
        let record = store.insert(new_file("u1", "a.csv", "", &[]), &[sheet("S")]).unwrap();

        assert!(store.find("u2", &record.id).unwrap().is_none());
        assert!(store.record_access("u2", &record.id).unwrap().is_none());
        assert!(store.delete("u2", &record.id).unwrap().is_none());
        assert!(store.find("u1", &record.id).unwrap().is_some());
    }

    #[test]
    fn test_list_search_and_pagination() {
        let store = FileStore::open_in_memory().unwrap();
        assert_ok!(store.insert(new_file("u1", "Budget.xlsx", "yearly plan", &[]), &[sheet("S")]));
        assert_ok!(store.insert(new_file("u1", "sales.csv", "", &["Finance"]), &[sheet("S")]));
        assert_ok!(store.insert(new_file("u1", "inventory.xlsx", "", &[]), &[sheet("S")]));
        assert_ok!(store.insert(new_file("u2", "budget_other.xlsx", "", &[]), &[sheet("S")]));

        let query = ListQuery {
            search: "budget".into(),
            ..Default::default()
        };
        let (files, total) = store.list("u1", &query).unwrap();
        assert_eq!(total, 1);
        assert_eq!(files[0].original_name, "Budget.xlsx");
        assert_eq!(files[0].sheets[0].headers, vec!["Region", "Amount"]);

        let query = ListQuery {
            search: "finance".into(),
            ..Default::default()
        };
        assert_eq!(store.list("u1", &query).unwrap().1, 1);

        let query = ListQuery {
            limit: 2,
            page: 2,
            sort_by: SortField::OriginalName,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let (files, total) = store.list("u1", &query).unwrap();
        assert_eq!(total, 3);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].original_name, "sales.csv");
    }

    #[test]
    fn test_search_treats_wildcards_literally() {
        let store = FileStore::open_in_memory().unwrap();
        assert_ok!(store.insert(new_file("u1", "report.csv", "", &[]), &[sheet("S")]));

        let query = ListQuery {
            search: "%".into(),
            ..Default::default()
        };
        assert_eq!(store.list("u1", &query).unwrap().1, 0);
    }

    #[test]
    fn test_search_matches_tag_values_not_their_encoding() {
        let store = FileStore::open_in_memory().unwrap();
        assert_ok!(store.insert(new_file("u1", "report.csv", "", &[]), &[sheet("S")]));
        assert_ok!(store.insert(new_file("u1", "budget.csv", "", &[]), &[sheet("S")]));

        for term in ["[", "]", "[]", "\"", ","] {
            let query = ListQuery {
                search: term.into(),
                ..Default::default()
            };
            assert_eq!(store.list("u1", &query).unwrap().1, 0, "search {:?}", term);
        }

        assert_ok!(store.insert(new_file("u1", "sales.csv", "", &["Q1 North", "west"]), &[sheet("S")]));
        let query = ListQuery {
            search: "1 nor".into(),
            ..Default::default()
        };
        let (files, total) = store.list("u1", &query).unwrap();
        assert_eq!(total, 1);
        assert_eq!(files[0].original_name, "sales.csv");
    }

    #[test]
    fn test_record_access_bumps_counter() {
        let store = FileStore::open_in_memory().unwrap();
        let record = store.insert(new_file("u1", "a.csv", "", &[]), &[sheet("S")]).unwrap();

        store.record_access("u1", &record.id).unwrap();
        let updated = store.record_access("u1", &record.id).unwrap().unwrap();
        assert_eq!(updated.access_count, 2);
        assert!(updated.last_accessed >= record.last_accessed);
    }

    #[test]
    fn test_delete_cascades_to_sheets() {
        let store = FileStore::open_in_memory().unwrap();
        let record = store.insert(new_file("u1", "a.csv", "", &[]), &[sheet("S")]).unwrap();

        let deleted = store.delete("u1", &record.id).unwrap().unwrap();
        assert_eq!(deleted.file_path, "/tmp/a.csv");
        assert!(store.find("u1", &record.id).unwrap().is_none());

        let remaining: i64 = store
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM sheets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
