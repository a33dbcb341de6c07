//! Glossary Store - 용어집 로드 및 프로세스 캐시
//!
//! CSV(`abbreviation,english,korean`)에서 용어 트리플을 읽습니다.
//! 최초 접근 시 한 번만 로드하며, 실패하면 빈 용어집으로 동작합니다.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Types
// ============================================================================

/// 용어집 엔트리 (약어, 영문, 국문)
///
/// 세 필드 중 최소 하나는 비어있지 않습니다. 중복 엔트리는 허용됩니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    #[serde(default, alias = "약어")]
    pub abbreviation: String,
    #[serde(default, alias = "영문")]
    pub english: String,
    #[serde(default, alias = "국문", alias = "한글")]
    pub korean: String,
}

impl GlossaryEntry {
    pub fn new(abbreviation: &str, english: &str, korean: &str) -> Self {
        Self {
            abbreviation: abbreviation.trim().to_string(),
            english: english.trim().to_string(),
            korean: korean.trim().to_string(),
        }
    }

    /// 세 필드가 모두 비어있는지
    pub fn is_blank(&self) -> bool {
        self.abbreviation.is_empty() && self.english.is_empty() && self.korean.is_empty()
    }
}

// ============================================================================
// Loading
// ============================================================================

/// CSV 파일에서 용어집 로드
///
/// 헤더는 `abbreviation,english,korean` (또는 `약어,영문,국문`).
/// 세 필드가 모두 빈 행은 건너뜁니다.
pub fn load_entries(path: &Path) -> Result<Vec<GlossaryEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open glossary file {:?}", path))?;

    let mut entries = Vec::new();
    for (i, row) in reader.deserialize::<GlossaryEntry>().enumerate() {
        // 헤더가 1행이므로 데이터는 2행부터
        let entry = row.with_context(|| format!("Malformed glossary row {}", i + 2))?;
        if entry.is_blank() {
            tracing::debug!("Skipping blank glossary row {}", i + 2);
            continue;
        }
        entries.push(entry);
    }

    Ok(entries)
}

// ============================================================================
// GlossaryStore
// ============================================================================

static GLOBAL_STORE: OnceLock<Arc<GlossaryStore>> = OnceLock::new();

/// 용어집 저장소
///
/// 엔트리는 최초 [`GlossaryStore::load`] 호출 시 한 번만 읽히고 이후 불변입니다.
/// 동시 최초 접근은 `OnceLock`이 하나의 초기화로 직렬화합니다.
#[derive(Debug)]
pub struct GlossaryStore {
    path: Option<PathBuf>,
    entries: OnceLock<Arc<[GlossaryEntry]>>,
}

impl GlossaryStore {
    /// 파일 경로로 생성 (지연 로드)
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            entries: OnceLock::new(),
        }
    }

    /// 메모리상의 엔트리로 생성
    pub fn from_entries(entries: Vec<GlossaryEntry>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Arc::from(entries));
        Self { path: None, entries: cell }
    }

    /// 프로세스 전역 저장소
    ///
    /// 최초 호출의 경로로 한 번만 생성되며, 이후 호출의 경로는 무시됩니다.
    pub fn global(path: impl Into<PathBuf>) -> Arc<GlossaryStore> {
        GLOBAL_STORE
            .get_or_init(|| Arc::new(Self::open(path)))
            .clone()
    }

    /// 용어집 엔트리 반환 (최초 호출 시 로드)
    ///
    /// 로드 실패는 로그만 남기고 빈 목록을 캐시합니다.
    pub fn load(&self) -> Arc<[GlossaryEntry]> {
        self.entries
            .get_or_init(|| {
                let Some(path) = self.path.as_deref() else {
                    return Arc::from(Vec::new());
                };

                match load_entries(path) {
                    Ok(entries) => {
                        tracing::info!("Loaded {} glossary entries from {:?}", entries.len(), path);
                        Arc::from(entries)
                    }
                    Err(e) => {
                        tracing::error!("Error loading glossary: {:#}", e);
                        Arc::from(Vec::new())
                    }
                }
            })
            .clone()
    }

    /// 이미 로드되었는지
    pub fn is_loaded(&self) -> bool {
        self.entries.get().is_some()
    }

    /// 원본 파일 경로
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

// ============================================================================
// Tests
// ============================================================================
