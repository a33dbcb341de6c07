//! Feedback Store - rusqlite 기반 피드백 저장소
//!
//! 단일 파티션 키(`feedback_id`)로 주소 지정되는 키-값 저장소 계약을 로컬 SQLite로 구현합니다.
//! 저장 위치: <data dir>/feedback.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::get_data_dir;

/// 피드백 DB 파일 이름
pub const FEEDBACK_DB_FILE: &str = "feedback.db";

// ============================================================================
// Types
// ============================================================================

/// 사용자 평가 1건
///
/// 평가 시 한 번 생성되며 이후 수정/삭제되지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub feedback_id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub is_helpful: bool,
    pub feedback_text: String,
}

impl FeedbackRecord {
    /// 새 레코드 생성 (세션 ID가 없으면 새로 발급)
    pub fn new(
        question: &str,
        answer: &str,
        is_helpful: bool,
        feedback_text: &str,
        session_id: Option<Uuid>,
    ) -> Self {
        Self {
            feedback_id: Uuid::new_v4(),
            session_id: session_id.unwrap_or_else(Uuid::new_v4),
            timestamp: Utc::now(),
            question: question.to_string(),
            answer: answer.to_string(),
            is_helpful,
            feedback_text: feedback_text.to_string(),
        }
    }
}

// ============================================================================
// FeedbackStore Trait
// ============================================================================

/// 피드백 저장소 계약
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// 테이블이 없으면 생성 (멱등)
    async fn ensure_table(&self) -> Result<()>;

    /// 레코드 1건 저장
    async fn put(&self, record: &FeedbackRecord) -> Result<()>;

    /// 전체 레코드 조회
    async fn scan_all(&self) -> Result<Vec<FeedbackRecord>>;

    /// 저장소 이름
    fn name(&self) -> &str;
}

// ============================================================================
// SqliteFeedbackStore
// ============================================================================

/// SQLite 피드백 저장소
pub struct SqliteFeedbackStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    table: String,
}

impl SqliteFeedbackStore {
    /// 저장소 열기 (DB 파일이 없으면 생성)
    ///
    /// # Arguments
    /// * `path` - DB 파일 경로
    /// * `table` - 테이블 이름 (식별자 형식만 허용)
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        validate_table_name(table)?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
            table: table.to_string(),
        })
    }

    /// 데이터 디렉토리에서 열기 (<data dir>/feedback.db)
    pub fn open_in(data_dir: &Path, table: &str) -> Result<Self> {
        Self::open(&data_dir.join(FEEDBACK_DB_FILE), table)
    }

    /// 기본 위치에서 열기
    pub fn open_default(table: &str) -> Result<Self> {
        Self::open_in(&get_data_dir(), table)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// 블로킹 스레드에서 커넥션 작업 실행
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let table = self.table.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
            f(&conn, &table)
        })
        .await
        .context("Feedback store task failed")?
    }
}

#[async_trait]
impl FeedbackStore for SqliteFeedbackStore {
    async fn ensure_table(&self) -> Result<()> {
        self.with_conn(|conn, table| {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                        feedback_id TEXT PRIMARY KEY,
                        session_id TEXT NOT NULL,
                        timestamp TEXT NOT NULL,
                        question TEXT NOT NULL,
                        answer TEXT NOT NULL,
                        is_helpful INTEGER NOT NULL,
                        feedback_text TEXT NOT NULL DEFAULT ''
                    )"
                ),
                [],
            )
            .with_context(|| format!("Failed to create table {}", table))?;

            tracing::debug!("Feedback table ready: {}", table);
            Ok(())
        })
        .await
    }

    async fn put(&self, record: &FeedbackRecord) -> Result<()> {
        let record = record.clone();

        self.with_conn(move |conn, table| {
            conn.execute(
                &format!(
                    "INSERT INTO {table}
                     (feedback_id, session_id, timestamp, question, answer,
                      is_helpful, feedback_text)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    record.feedback_id.to_string(),
                    record.session_id.to_string(),
                    record.timestamp.to_rfc3339(),
                    record.question,
                    record.answer,
                    record.is_helpful,
                    record.feedback_text,
                ],
            )
            .context("Failed to insert feedback")?;
            Ok(())
        })
        .await
    }

    async fn scan_all(&self) -> Result<Vec<FeedbackRecord>> {
        self.with_conn(|conn, table| {
            let mut stmt = conn.prepare(&format!(
                "SELECT feedback_id, session_id, timestamp, question, answer,
                        is_helpful, feedback_text
                 FROM {table}
                 ORDER BY timestamp"
            ))?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (
                    feedback_id,
                    session_id,
                    timestamp,
                    question,
                    answer,
                    is_helpful,
                    feedback_text,
                ) = row?;
                records.push(FeedbackRecord {
                    feedback_id: Uuid::parse_str(&feedback_id)
                        .with_context(|| format!("Invalid feedback_id: {}", feedback_id))?,
                    session_id: Uuid::parse_str(&session_id)
                        .with_context(|| format!("Invalid session_id: {}", session_id))?,
                    timestamp: parse_datetime(&timestamp),
                    question,
                    answer,
                    is_helpful,
                    feedback_text,
                });
            }

            Ok(records)
        })
        .await
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 테이블 이름 검증 (SQL 식별자로 직접 삽입되므로)
fn validate_table_name(table: &str) -> Result<()> {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")?;
    if !re.is_match(table) {
        anyhow::bail!("Invalid feedback table name: {:?}", table);
    }
    Ok(())
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
