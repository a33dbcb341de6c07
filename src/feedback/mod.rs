//! Feedback 모듈 - 사용자 평가 저장 + 집계
//!
//! - Store: `feedback_id` 키 기반 저장소 계약 + SQLite 구현
//! - Service: 저장/통계 (실패는 로그 후 `false`/0으로 흡수)

mod service;
mod store;

// Re-exports
pub use service::{FeedbackService, FeedbackStats};
pub use store::{FeedbackRecord, FeedbackStore, SqliteFeedbackStore, FEEDBACK_DB_FILE};
