//! Feedback Service - 평가 저장 및 통계
//!
//! 저장소 오류는 로그만 남기고 호출자에게는 `false`/0 통계로 전달됩니다.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Settings;

use super::store::{FeedbackRecord, FeedbackStore, SqliteFeedbackStore};

/// 피드백 집계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeedbackStats {
    pub total_feedback: usize,
    pub helpful_count: usize,
    pub not_helpful_count: usize,
    /// 도움됨 비율 (%), 피드백이 없으면 0
    pub helpful_rate: f64,
}

impl FeedbackStats {
    /// 레코드 목록에서 집계
    pub fn from_records(records: &[FeedbackRecord]) -> Self {
        let total = records.len();
        let helpful = records.iter().filter(|r| r.is_helpful).count();

        Self {
            total_feedback: total,
            helpful_count: helpful,
            not_helpful_count: total - helpful,
            helpful_rate: if total > 0 {
                helpful as f64 / total as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

/// 피드백 서비스
#[derive(Clone)]
pub struct FeedbackService {
    store: Arc<dyn FeedbackStore>,
}

impl FeedbackService {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        Self { store }
    }

    /// 설정의 데이터 디렉토리/테이블 이름으로 SQLite 저장소 구성
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let store = SqliteFeedbackStore::open_in(&settings.data_dir, &settings.feedback_table)?;
        tracing::debug!("Feedback store at {:?}", store.db_path());
        Ok(Self::new(Arc::new(store)))
    }

    /// 평가 저장
    ///
    /// # Returns
    /// 저장 성공 여부 (실패 원인은 로그로만 남김)
    pub async fn save_feedback(
        &self,
        question: &str,
        answer: &str,
        is_helpful: bool,
        feedback_text: &str,
        session_id: Option<Uuid>,
    ) -> bool {
        let record = FeedbackRecord::new(question, answer, is_helpful, feedback_text, session_id);

        match self.try_save(&record).await {
            Ok(()) => {
                tracing::info!("Feedback saved successfully: {}", record.feedback_id);
                true
            }
            Err(e) => {
                tracing::error!("Error saving feedback: {:#}", e);
                false
            }
        }
    }

    async fn try_save(&self, record: &FeedbackRecord) -> Result<()> {
        self.store.ensure_table().await?;
        self.store.put(record).await
    }

    /// 피드백 통계 (실패 시 전부 0)
    pub async fn stats(&self) -> FeedbackStats {
        let records = async {
            self.store.ensure_table().await?;
            self.store.scan_all().await
        };

        match records.await {
            Ok(records) => FeedbackStats::from_records(&records),
            Err(e) => {
                tracing::error!("Error getting feedback stats: {:#}", e);
                FeedbackStats::default()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// 항상 실패하는 저장소
    struct BrokenStore;

    #[async_trait]
    impl FeedbackStore for BrokenStore {
        async fn ensure_table(&self) -> Result<()> {
            anyhow::bail!("store unavailable")
        }

        async fn put(&self, _record: &FeedbackRecord) -> Result<()> {
            anyhow::bail!("store unavailable")
        }

        async fn scan_all(&self) -> Result<Vec<FeedbackRecord>> {
            anyhow::bail!("store unavailable")
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn sqlite_service(dir: &TempDir) -> FeedbackService {
        let store = SqliteFeedbackStore::open_in(dir.path(), "user_feedback").unwrap();
        FeedbackService::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_save_and_stats() {
        let dir = TempDir::new().unwrap();
        let service = sqlite_service(&dir);

        let session = Some(Uuid::new_v4());
        assert!(service.save_feedback("q1", "a1", true, "", session).await);
        assert!(service.save_feedback("q2", "a2", true, "좋아요", session).await);
        assert!(service.save_feedback("q3", "a3", false, "부정확", None).await);

        let stats = service.stats().await;
        assert_eq!(stats.total_feedback, 3);
        assert_eq!(stats.helpful_count, 2);
        assert_eq!(stats.not_helpful_count, 1);
        assert!((stats.helpful_rate - 66.666).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_stats_empty_table() {
        let dir = TempDir::new().unwrap();
        let service = sqlite_service(&dir);

        assert_eq!(service.stats().await, FeedbackStats::default());
    }

    #[tokio::test]
    async fn test_failures_degrade() {
        let service = FeedbackService::new(Arc::new(BrokenStore));

        assert!(!service.save_feedback("q", "a", true, "", None).await);
        assert_eq!(service.stats().await, FeedbackStats::default());
    }

    #[test]
    fn test_from_records_rate() {
        let records = vec![
            FeedbackRecord::new("q", "a", true, "", None),
            FeedbackRecord::new("q", "a", false, "", None),
        ];
        let stats = FeedbackStats::from_records(&records);
        assert_eq!(stats.helpful_rate, 50.0);
        assert_eq!(stats.not_helpful_count, 1);
    }
}
