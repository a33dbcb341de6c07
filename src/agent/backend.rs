//! 생성 모델 백엔드 인터페이스

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ModelOption;
use crate::error::SopError;

use super::tool::ToolRegistry;
use super::window::Turn;

/// 모델 호출 요청
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ModelOption,
    pub system: String,
    /// 대화 윈도우 스냅샷 (오래된 순)
    pub history: Vec<Turn>,
    /// 이번 턴 사용자 입력 (용어 확장 포함)
    pub prompt: String,
}

/// 생성 모델 백엔드
///
/// 도구 호출 루프는 백엔드가 소유합니다. 모델이 도구를 요청하면
/// `tools`로 실행하고 결과를 돌려준 뒤 생성을 계속합니다.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// 전체 응답 텍스트 반환
    async fn converse(
        &self,
        request: &ChatRequest,
        tools: &ToolRegistry,
    ) -> Result<String, SopError>;

    /// 텍스트 조각을 생성 순서대로 `sink`에 전송하고, 완료되면 전체 텍스트를 반환
    ///
    /// `sink`가 닫히면 생성을 멈추고 [`SopError::StreamClosed`]를 반환합니다.
    async fn converse_stream(
        &self,
        request: &ChatRequest,
        tools: &ToolRegistry,
        sink: mpsc::Sender<String>,
    ) -> Result<String, SopError>;

    fn name(&self) -> &str;
}
