//! Knowledge 모듈 - Knowledge Base RAG
//!
//! - Service: 외부 검색 서비스 (Bedrock Knowledge Base Retrieve API)
//! - Client: 결과 정규화 + 포맷팅, 설정 오류 조기 실패
//! - Tool: 모델이 호출하는 `retrieve_from_knowledge_base` 도구

mod client;
mod service;
mod tool;

// Re-exports
pub use client::{
    format_results, RagClient, RetrievalOutcome, RetrievalResult, NO_RESULTS_MESSAGE,
    RESULT_SEPARATOR,
};
pub use service::{
    BedrockRetrievalService, RawContent, RawLocation, RawRetrievalResult, RawS3Location, Rerank,
    RetrievalService,
};
pub use tool::{KnowledgeBaseTool, KNOWLEDGE_BASE_TOOL};
