//! SOP 에이전트 - 쿼리 확장 + 모델 호출 + 대화 윈도우 관리
//!
//! 사용자 질문 → 용어 확장 → 모델 백엔드 (필요 시 KB 검색 도구 호출) → 응답

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::config::{resolve_model, Settings};
use crate::error::{render_error, ErrorScope, SopError};
use crate::glossary::{enrich_query, GlossaryStore, QueryEnricher};
use crate::knowledge::{BedrockRetrievalService, KnowledgeBaseTool, RagClient};

use super::anthropic::AnthropicBackend;
use super::backend::{ChatBackend, ChatRequest};
use super::prompt::SYSTEM_PROMPT;
use super::session::{record_exchange, Session};
use super::tool::ToolRegistry;

/// 스트리밍 채널 버퍼 크기
const STREAM_BUFFER: usize = 32;

// ============================================================================
// ResponseStream
// ============================================================================

/// 응답 텍스트 조각 스트림
///
/// 생성 순서대로 조각을 내보내고, 생성이 끝나면 닫힙니다.
/// 스트림을 drop하면 백엔드 생성도 중단됩니다.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<String>,
}

impl ResponseStream {
    /// 다음 조각
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// 남은 조각을 모두 이어붙임
    pub async fn collect_text(mut self) -> String {
        let mut text = String::new();
        while let Some(chunk) = self.rx.recv().await {
            text.push_str(&chunk);
        }
        text
    }
}

impl Stream for ResponseStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        self.rx.poll_recv(cx)
    }
}

// ============================================================================
// SopAgent
// ============================================================================

/// SOP 챗봇 에이전트
#[derive(Clone)]
pub struct SopAgent {
    backend: Arc<dyn ChatBackend>,
    tools: ToolRegistry,
    enricher: Arc<QueryEnricher>,
    system_prompt: String,
}

impl SopAgent {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        tools: ToolRegistry,
        enricher: Arc<QueryEnricher>,
    ) -> Self {
        Self {
            backend,
            tools,
            enricher,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    /// 설정으로 전체 구성 (KB 검색 도구 + Messages API 백엔드 + 전역 용어집)
    pub fn from_settings(settings: &Settings) -> Result<Self, SopError> {
        let retrieval = Arc::new(BedrockRetrievalService::from_settings(settings)?);
        let rag = RagClient::from_settings(retrieval, settings);
        let tools = ToolRegistry::new().register(Arc::new(KnowledgeBaseTool::new(rag)));
        let backend = Arc::new(AnthropicBackend::from_settings(settings)?);
        let glossary = GlossaryStore::global(settings.glossary_path.clone());
        let enricher = Arc::new(QueryEnricher::new(glossary));

        Ok(Self::new(backend, tools, enricher))
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn enricher(&self) -> &QueryEnricher {
        &self.enricher
    }

    /// 모델 요청 구성
    ///
    /// 관련 용어가 있으면 원본 질문 뒤 별도 블록으로 붙입니다.
    pub fn build_request(
        &self,
        session: &Session,
        query: &str,
        model_selector: &str,
    ) -> ChatRequest {
        let model = *resolve_model(model_selector);
        let terms = self.enricher.find_related_terms(query);
        if !terms.is_empty() {
            tracing::info!("Enriched query with {} related terms", terms.len());
        }

        ChatRequest {
            model,
            system: self.system_prompt.clone(),
            history: session.history(),
            prompt: enrich_query(query, &terms),
        }
    }

    /// 응답 전체를 한 번에 생성 (에러는 구조화된 형태로 반환)
    pub async fn try_run(
        &self,
        session: &Session,
        query: &str,
        model_selector: &str,
    ) -> Result<String, SopError> {
        tracing::info!("User query: {}", query);
        let request = self.build_request(session, query, model_selector);

        let answer = self.backend.converse(&request, &self.tools).await?;
        record_exchange(&session.window_handle(), &request.prompt, &answer);
        Ok(answer)
    }

    /// 응답 전체를 한 번에 생성
    ///
    /// 백엔드 에러는 로그를 남기고 에러 문자열로 반환합니다.
    pub async fn run(&self, session: &Session, query: &str, model_selector: &str) -> String {
        match self.try_run(session, query, model_selector).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!("Error running agent: {}", e);
                render_error(ErrorScope::Agent, &e)
            }
        }
    }

    /// 스트리밍 응답
    ///
    /// 백엔드 에러는 마지막 조각 하나로 전달됩니다. tokio 런타임 안에서 호출해야 합니다.
    pub fn run_stream(
        &self,
        session: &Session,
        query: &str,
        model_selector: &str,
    ) -> ResponseStream {
        tracing::info!("User query (stream): {}", query);
        let request = self.build_request(session, query, model_selector);

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let backend = self.backend.clone();
        let tools = self.tools.clone();
        let window = session.window_handle();

        tokio::spawn(async move {
            match backend.converse_stream(&request, &tools, tx.clone()).await {
                Ok(answer) => record_exchange(&window, &request.prompt, &answer),
                Err(SopError::StreamClosed) => {
                    tracing::debug!("Stream consumer detached; turn not recorded");
                }
                Err(e) => {
                    tracing::error!("Error in streaming agent: {}", e);
                    let _ = tx.send(render_error(ErrorScope::Agent, &e)).await;
                }
            }
        });

        ResponseStream { rx }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Role, Turn};
    use crate::glossary::GlossaryEntry;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    /// 요청을 기록하고 정해진 응답을 돌려주는 백엔드
    #[derive(Default)]
    struct ScriptedBackend {
        chunks: Vec<String>,
        fail: bool,
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn converse(
            &self,
            request: &ChatRequest,
            _tools: &ToolRegistry,
        ) -> Result<String, SopError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(SopError::Service {
                    status: 503,
                    message: "overloaded".to_string(),
                });
            }
            Ok(self.chunks.concat())
        }

        async fn converse_stream(
            &self,
            request: &ChatRequest,
            _tools: &ToolRegistry,
            sink: mpsc::Sender<String>,
        ) -> Result<String, SopError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(SopError::Transport("connection reset".to_string()));
            }
            for chunk in &self.chunks {
                sink.send(chunk.clone()).await.map_err(|_| SopError::StreamClosed)?;
            }
            Ok(self.chunks.concat())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn agent(backend: Arc<ScriptedBackend>) -> SopAgent {
        let enricher = Arc::new(QueryEnricher::from_entries(vec![GlossaryEntry::new(
            "GMP",
            "Good Manufacturing Practice",
            "우수제조관리기준",
        )]));
        SopAgent::new(backend, ToolRegistry::new(), enricher)
    }

    fn scripted(chunks: &[&str]) -> Arc<ScriptedBackend> {
        Arc::new(ScriptedBackend {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_run_enriches_and_records() {
        let backend = scripted(&["GMP는 ", "우수제조관리기준입니다."]);
        let agent = agent(backend.clone());
        let session = Session::new();

        let answer = agent.run(&session, "GMP 기준이 뭐야?", "Claude Haiku 4.5").await;
        assert_eq!(answer, "GMP는 우수제조관리기준입니다.");

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].model.model_id, "claude-haiku-4-5-20251001");
        assert_eq!(
            requests[0].prompt,
            "GMP 기준이 뭐야?\n\n[관련 용어: Good Manufacturing Practice, 우수제조관리기준]"
        );
        assert_eq!(requests[0].system, SYSTEM_PROMPT);

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1], Turn::assistant("GMP는 우수제조관리기준입니다."));
    }

    #[tokio::test]
    async fn test_unmatched_query_sent_unchanged() {
        let backend = scripted(&["ok"]);
        let agent = agent(backend.clone());
        let session = Session::new();

        agent.run(&session, "점심 뭐 먹지", "unknown-model").await;
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].prompt, "점심 뭐 먹지");
        assert_eq!(requests[0].model.name, crate::config::DEFAULT_MODEL_NAME);
    }

    #[tokio::test]
    async fn test_history_passed_on_next_turn() {
        let backend = scripted(&["a"]);
        let agent = agent(backend.clone());
        let session = Session::new();

        agent.run(&session, "first", "").await;
        agent.run(&session, "second", "").await;

        let requests = backend.requests.lock().unwrap();
        assert!(requests[0].history.is_empty());
        assert_eq!(requests[1].history, vec![Turn::user("first"), Turn::assistant("a")]);
    }

    #[tokio::test]
    async fn test_run_error_becomes_text() {
        let backend = Arc::new(ScriptedBackend {
            fail: true,
            ..Default::default()
        });
        let agent = agent(backend);
        let session = Session::new();

        let answer = agent.run(&session, "GMP", "").await;
        assert_eq!(answer, "Error: service error (503): overloaded");
        assert!(session.is_empty());

        let err = agent.try_run(&session, "GMP", "").await.unwrap_err();
        assert!(matches!(err, SopError::Service { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_stream_in_order_and_recorded() {
        let backend = scripted(&["하나", "둘", "셋"]);
        let agent = agent(backend);
        let session = Session::new();

        let chunks: Vec<String> = agent.run_stream(&session, "질문", "").collect().await;
        assert_eq!(chunks, vec!["하나", "둘", "셋"]);

        // 채널이 닫힌 뒤에는 기록이 끝나 있음
        let history = session.history();
        assert_eq!(history, vec![Turn::user("질문"), Turn::assistant("하나둘셋")]);
    }

    #[tokio::test]
    async fn test_stream_error_single_chunk() {
        let backend = Arc::new(ScriptedBackend {
            fail: true,
            ..Default::default()
        });
        let agent = agent(backend);
        let session = Session::new();

        let text = agent.run_stream(&session, "질문", "").collect_text().await;
        assert_eq!(text, "Error: transport error: connection reset");
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn test_empty_answer_keeps_history_clean() {
        let backend = scripted(&[]);
        let agent = agent(backend.clone());
        let session = Session::new();

        assert_eq!(agent.run(&session, "first", "").await, "");
        let streamed = agent.run_stream(&session, "second", "").collect_text().await;
        assert_eq!(streamed, "");

        assert!(session.is_empty());
        let requests = backend.requests.lock().unwrap();
        assert!(requests[1].history.is_empty());
    }

    #[tokio::test]
    async fn test_reset_between_turns() {
        let backend = scripted(&["a"]);
        let agent = agent(backend.clone());
        let mut session = Session::new();

        agent.run(&session, "first", "").await;
        session.reset();
        agent.run(&session, "second", "").await;

        let requests = backend.requests.lock().unwrap();
        assert!(requests[1].history.is_empty());
    }
}
