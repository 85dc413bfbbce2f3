//! SQLite database for research studies
//!
//! List-valued fields (genres, documents, questions) and `additional_info` are
//! stored as JSON text columns.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{PatentStatus, StudyFilter, StudyOrder, StudyRecord};

const STUDY_COLUMNS: &str = "id, researcher_id, title, abstract, brief_description, genres, \
     documents, patent_status, questions, additional_info, approved, created_at, updated_at";

/// SQLite-backed study store
#[derive(Clone)]
pub struct StudyDb {
    conn: Arc<Mutex<Connection>>,
}

impl StudyDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::database(format!("Failed to open database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate(true)?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::database(format!("Failed to open in-memory database: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.migrate(false)?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self, on_disk: bool) -> Result<()> {
        let conn = self.conn.lock();

        if on_disk {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                "#,
            )
            .map_err(|e| Error::database(format!("Failed to set pragmas: {}", e)))?;
        }

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS studies (
                id TEXT PRIMARY KEY,
                researcher_id TEXT NOT NULL,
                title TEXT NOT NULL,
                abstract TEXT NOT NULL,
                brief_description TEXT NOT NULL,
                genres TEXT NOT NULL DEFAULT '[]',
                documents TEXT NOT NULL DEFAULT '[]',
                patent_status TEXT,
                questions TEXT NOT NULL DEFAULT '[]',
                additional_info TEXT NOT NULL DEFAULT '{}',
                approved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_studies_researcher ON studies(researcher_id);
            CREATE INDEX IF NOT EXISTS idx_studies_title ON studies(title);
            CREATE INDEX IF NOT EXISTS idx_studies_created_at ON studies(created_at);
            "#,
        )
        .map_err(|e| Error::database(format!("Failed to run migrations: {}", e)))?;

        tracing::info!("Database migrations complete");
        Ok(())
    }

    /// Insert a new study
    pub fn insert(&self, study: &StudyRecord) -> Result<()> {
        study.validate()?;
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT INTO studies (
                id, researcher_id, title, abstract, brief_description, genres, documents,
                patent_status, questions, additional_info, approved, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                study.id.to_string(),
                study.researcher_id,
                study.title,
                study.abstract_text,
                study.brief_description,
                serde_json::to_string(&study.genres)?,
                serde_json::to_string(&study.documents)?,
                study.patent_status.map(|s| s.as_str()),
                serde_json::to_string(&study.questions)?,
                serde_json::to_string(&study.additional_info)?,
                study.approved,
                study.created_at.to_rfc3339(),
                study.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(format!("Failed to insert study: {}", e)))?;

        tracing::debug!("Inserted study {} ({})", study.id, study.title);
        Ok(())
    }

    /// Get a study by id
    pub fn get(&self, id: &Uuid) -> Result<Option<StudyRecord>> {
        let conn = self.conn.lock();

        let mut stmt = conn
            .prepare(&format!("SELECT {} FROM studies WHERE id = ?1", STUDY_COLUMNS))
            .map_err(|e| Error::database(format!("Failed to prepare query: {}", e)))?;

        let record = stmt
            .query_row(params![id.to_string()], row_to_study)
            .optional()
            .map_err(|e| Error::database(format!("Failed to get study: {}", e)))?;

        Ok(record)
    }

    /// Overwrite a stored study. Bumps `updated_at` and returns the stored value.
    pub fn update(&self, study: &StudyRecord) -> Result<StudyRecord> {
        let mut study = study.clone();
        study.updated_at = Utc::now();
        study.validate()?;

        let conn = self.conn.lock();
        let changed = conn
            .execute(
                r#"
                UPDATE studies SET
                    title = ?2,
                    abstract = ?3,
                    brief_description = ?4,
                    genres = ?5,
                    documents = ?6,
                    patent_status = ?7,
                    questions = ?8,
                    additional_info = ?9,
                    approved = ?10,
                    updated_at = ?11
                WHERE id = ?1
                "#,
                params![
                    study.id.to_string(),
                    study.title,
                    study.abstract_text,
                    study.brief_description,
                    serde_json::to_string(&study.genres)?,
                    serde_json::to_string(&study.documents)?,
                    study.patent_status.map(|s| s.as_str()),
                    serde_json::to_string(&study.questions)?,
                    serde_json::to_string(&study.additional_info)?,
                    study.approved,
                    study.updated_at.to_rfc3339(),
                ],
            )
            .map_err(|e| Error::database(format!("Failed to update study: {}", e)))?;

        if changed == 0 {
            return Err(Error::not_found("Study"));
        }
        Ok(study)
    }

    /// Delete a study, returning whether it existed
    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        let conn = self.conn.lock();

        let deleted = conn
            .execute("DELETE FROM studies WHERE id = ?1", params![id.to_string()])
            .map_err(|e| Error::database(format!("Failed to delete study: {}", e)))?;

        Ok(deleted > 0)
    }

    /// Mark a study approved or not. Approval happens outside the API.
    pub fn set_approved(&self, id: &Uuid, approved: bool) -> Result<bool> {
        let conn = self.conn.lock();

        let changed = conn
            .execute(
                "UPDATE studies SET approved = ?2 WHERE id = ?1",
                params![id.to_string(), approved],
            )
            .map_err(|e| Error::database(format!("Failed to update approval: {}", e)))?;

        Ok(changed > 0)
    }

    /// Page of studies matching `filter` and the total match count
    pub fn search(&self, filter: &StudyFilter) -> Result<(Vec<StudyRecord>, u64)> {
        let (clause, mut args) = where_clause(filter);
        let order = match filter.order {
            StudyOrder::NewestCreated => "created_at DESC",
            StudyOrder::RecentlyUpdated => "updated_at DESC",
        };

        let conn = self.conn.lock();

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM studies{}", clause),
                params_from_iter(args.iter()),
                |row| row.get(0),
            )
            .map_err(|e| Error::database(format!("Failed to count studies: {}", e)))?;

        let limit_index = args.len() + 1;
        args.push(i64::from(filter.limit).to_string());
        args.push(filter.offset().to_string());

        let sql = format!(
            "SELECT {} FROM studies{} ORDER BY {} LIMIT CAST(?{} AS INTEGER) OFFSET CAST(?{} AS INTEGER)",
            STUDY_COLUMNS,
            clause,
            order,
            limit_index,
            limit_index + 1
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| Error::database(format!("Failed to prepare query: {}", e)))?;

        let studies = stmt
            .query_map(params_from_iter(args.iter()), row_to_study)
            .map_err(|e| Error::database(format!("Failed to search studies: {}", e)))?
            .filter_map(|r| match r {
                Ok(study) => Some(study),
                Err(e) => {
                    tracing::warn!("Skipping unreadable study row: {}", e);
                    None
                }
            })
            .collect();

        Ok((studies, total.max(0) as u64))
    }

    /// Studies of one researcher, most recently updated first
    pub fn list_by_researcher(&self, researcher_id: &str, page: u32, limit: u32) -> Result<(Vec<StudyRecord>, u64)> {
        self.search(&StudyFilter {
            researcher_id: Some(researcher_id.to_string()),
            order: StudyOrder::RecentlyUpdated,
            page,
            limit,
            ..Default::default()
        })
    }

    /// Total number of studies
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM studies", [], |row| row.get(0))
            .map_err(|e| Error::database(format!("Failed to count studies: {}", e)))?;

        Ok(count.max(0) as u64)
    }
}

/// Escape LIKE wildcards so caller text matches literally
fn like_pattern(text: &str) -> String {
    let escaped = text
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn where_clause(filter: &StudyFilter) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut args = Vec::new();

    if filter.approved_only {
        conditions.push("approved = 1".to_string());
    }
    if let Some(researcher_id) = &filter.researcher_id {
        args.push(researcher_id.clone());
        conditions.push(format!("researcher_id = ?{}", args.len()));
    }
    if let Some(title) = filter.title.as_deref().filter(|t| !t.trim().is_empty()) {
        args.push(like_pattern(title.trim()));
        conditions.push(format!("lower(title) LIKE ?{} ESCAPE '\\'", args.len()));
    }

    let genres: Vec<&str> = filter
        .genres
        .iter()
        .map(|g| g.trim())
        .filter(|g| !g.is_empty())
        .collect();
    if !genres.is_empty() {
        let mut any = Vec::new();
        for genre in genres {
            args.push(like_pattern(genre));
            any.push(format!("lower(g.value) LIKE ?{} ESCAPE '\\'", args.len()));
        }
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM json_each(studies.genres) AS g WHERE {})",
            any.join(" OR ")
        ));
    }

    if conditions.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), args)
    }
}

fn parse_time(value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn parse_json<T: serde::de::DeserializeOwned>(idx: usize, value: String) -> rusqlite::Result<T> {
    serde_json::from_str(&value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_study(row: &rusqlite::Row) -> rusqlite::Result<StudyRecord> {
    let id: String = row.get(0)?;
    let patent_status: Option<String> = row.get(7)?;

    Ok(StudyRecord {
        id: Uuid::parse_str(&id)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))?,
        researcher_id: row.get(1)?,
        title: row.get(2)?,
        abstract_text: row.get(3)?,
        brief_description: row.get(4)?,
        genres: parse_json(5, row.get(5)?)?,
        documents: parse_json(6, row.get(6)?)?,
        patent_status: patent_status.and_then(|s| s.parse::<PatentStatus>().ok()),
        questions: parse_json(8, row.get(8)?)?,
        additional_info: parse_json(9, row.get(9)?)?,
        approved: row.get(10)?,
        created_at: parse_time(row.get(11)?)?,
        updated_at: parse_time(row.get(12)?)?,
    })
}
