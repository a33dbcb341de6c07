//! Agent 모듈 - SOP 챗봇 오케스트레이션
//!
//! - Tool: 모델이 호출할 수 있는 도구 인터페이스 + 레지스트리
//! - Window/Session: 최근 N개 턴만 유지하는 대화 메모리
//! - Backend: 생성 모델 인터페이스 (Anthropic Messages API 구현)
//! - Orchestrator: 쿼리 확장 → 모델 호출 → 응답 (일괄/스트리밍)

mod anthropic;
mod backend;
mod orchestrator;
mod prompt;
mod session;
mod tool;
mod window;

// Re-exports
pub use anthropic::AnthropicBackend;
pub use backend::{ChatBackend, ChatRequest};
pub use orchestrator::{ResponseStream, SopAgent};
pub use prompt::{GREETING, SYSTEM_PROMPT};
pub use session::Session;
pub use tool::{Tool, ToolRegistry, ToolSpec};
pub use window::{ConversationWindow, Role, Turn};
