//! 에러 타입 - 외부 호출 경계의 구조화된 에러
//!
//! 검색/생성 백엔드에서 발생한 실패는 `SopError`로 표현되고,
//! 사용자에게 보이는 문자열은 오직 [`render_error`]에서 만들어집니다.

use thiserror::Error;

/// 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 설정 누락/오류 (외부 호출 전 즉시 실패)
    Configuration,
    /// 네트워크/전송 실패
    Transport,
    /// 서비스 측 오류 (4xx/5xx, 스로틀링, 응답 파싱 실패)
    Service,
    /// 스트림 소비자가 연결을 끊음
    Cancelled,
}

const MISSING_KB_MESSAGE: &str =
    "Knowledge Base ID is not configured. Please set the KNOWLEDGE_BASE_ID environment variable.";

/// 외부 협력자 호출 에러
#[derive(Debug, Error)]
pub enum SopError {
    #[error("{}", MISSING_KB_MESSAGE)]
    MissingKnowledgeBase,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("service error ({status}): {message}")]
    Service { status: u16, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("response stream closed by consumer")]
    StreamClosed,
}

impl SopError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SopError::MissingKnowledgeBase | SopError::Config(_) => ErrorKind::Configuration,
            SopError::Transport(_) => ErrorKind::Transport,
            SopError::Service { .. } | SopError::Decode(_) => ErrorKind::Service,
            SopError::StreamClosed => ErrorKind::Cancelled,
        }
    }

    /// 재시도 가치가 있는 에러인지 (429, 5xx, 전송 실패)
    pub fn is_retryable(&self) -> bool {
        match self {
            SopError::Transport(_) => true,
            SopError::Service { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SopError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SopError::Decode(e.to_string())
        } else {
            SopError::Transport(e.to_string())
        }
    }
}

/// 에러가 발생한 경계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// Knowledge Base 검색 도구
    Retrieval,
    /// 에이전트 응답 생성
    Agent,
}

/// 에러를 사용자 표시용 문자열로 변환
///
/// 모든 사용자 노출 에러 메시지는 이 함수 하나에서 생성됩니다.
pub fn render_error(scope: ErrorScope, error: &SopError) -> String {
    match (error.kind(), scope) {
        (ErrorKind::Configuration, _) => format!("Error: {}", error),
        (_, ErrorScope::Retrieval) => format!("Error retrieving from knowledge base: {}", error),
        (_, ErrorScope::Agent) => format!("Error: {}", error),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_kb_message() {
        let msg = render_error(ErrorScope::Retrieval, &SopError::MissingKnowledgeBase);
        assert_eq!(
            msg,
            "Error: Knowledge Base ID is not configured. \
             Please set the KNOWLEDGE_BASE_ID environment variable."
        );
    }

    #[test]
    fn test_retrieval_scope_prefix() {
        let err = SopError::Service {
            status: 503,
            message: "unavailable".to_string(),
        };
        let msg = render_error(ErrorScope::Retrieval, &err);
        assert!(msg.starts_with("Error retrieving from knowledge base:"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_agent_scope_prefix() {
        let err = SopError::Transport("connection reset".to_string());
        assert_eq!(
            render_error(ErrorScope::Agent, &err),
            "Error: transport error: connection reset"
        );
    }

    #[test]
    fn test_kinds_and_retry() {
        assert_eq!(SopError::StreamClosed.kind(), ErrorKind::Cancelled);
        assert_eq!(SopError::Config("x".into()).kind(), ErrorKind::Configuration);
        assert!(SopError::Service { status: 429, message: String::new() }.is_retryable());
        assert!(SopError::Service { status: 500, message: String::new() }.is_retryable());
        assert!(!SopError::Service { status: 400, message: String::new() }.is_retryable());
        assert!(!SopError::MissingKnowledgeBase.is_retryable());
    }
}
