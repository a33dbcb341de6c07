//! sop-chat - 제약 SOP 챗봇
//!
//! 용어집 기반 쿼리 확장 + Knowledge Base 검색(RAG)으로
//! 제약 SOP 질문에 근거 기반 답변을 생성합니다.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod feedback;
pub mod glossary;
pub mod knowledge;

// Re-exports
pub use agent::{
    AnthropicBackend, ChatBackend, ChatRequest, ConversationWindow, ResponseStream, Role, Session,
    SopAgent, Tool, ToolRegistry, ToolSpec, Turn, GREETING, SYSTEM_PROMPT,
};
pub use config::{get_data_dir, resolve_model, ModelOption, Settings, MODEL_OPTIONS};
pub use error::{render_error, ErrorKind, ErrorScope, SopError};
pub use feedback::{
    FeedbackRecord, FeedbackService, FeedbackStats, FeedbackStore, SqliteFeedbackStore,
};
pub use glossary::{enrich_query, GlossaryEntry, GlossaryStore, QueryEnricher};
pub use knowledge::{
    BedrockRetrievalService, KnowledgeBaseTool, RagClient, RetrievalOutcome, RetrievalResult,
    RetrievalService,
};
