//! Glossary 모듈 - 제약 용어집 + 쿼리 확장
//!
//! - Store: 약어/영문/국문 용어 트리플을 CSV에서 한 번만 로드
//! - Enricher: 사용자 쿼리에서 용어를 찾아 관련 용어 목록을 생성

mod enricher;
mod store;

// Re-exports
pub use enricher::{enrich_query, QueryEnricher};
pub use store::{load_entries, GlossaryEntry, GlossaryStore};
