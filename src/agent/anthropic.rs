//! Messages API 백엔드 - 도구 호출 루프 + SSE 스트리밍
//!
//! source: https://docs.anthropic.com/en/api/messages
//! source: https://docs.anthropic.com/en/api/messages-streaming
//!
//! `stop_reason == "tool_use"`이면 등록된 도구를 실행하고 `tool_result`를 붙여 다시 요청합니다.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::config::{ClientSettings, Settings};
use crate::error::SopError;

use super::backend::{ChatBackend, ChatRequest};
use super::tool::{ToolRegistry, ToolSpec};
use super::window::Role;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// 한 응답 안에서 허용하는 최대 도구 호출 라운드
const MAX_TOOL_ROUNDS: usize = 8;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: Role,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
    #[serde(skip_serializing_if = "is_false")]
    stream: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {},
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: Delta,
    },
    ContentBlockStop {},
    MessageDelta {
        delta: MessageDeltaBody,
    },
    MessageStop {},
    Ping {},
    Error {
        error: ApiErrorDetail,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// 한 라운드(요청 1회)의 결과
#[derive(Debug, Default)]
struct RoundOutput {
    blocks: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

impl RoundOutput {
    fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn wants_tools(&self) -> bool {
        self.stop_reason.as_deref() == Some("tool_use")
            && self.blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }
}

/// 스트리밍 중 조립 중인 블록
#[derive(Debug)]
struct PendingBlock {
    block: ContentBlock,
    input_json: String,
}

impl PendingBlock {
    fn finish(self) -> ContentBlock {
        match self.block {
            ContentBlock::ToolUse { id, name, input } if !self.input_json.is_empty() => {
                let input = serde_json::from_str(&self.input_json).unwrap_or(input);
                ContentBlock::ToolUse { id, name, input }
            }
            other => other,
        }
    }
}

// ============================================================================
// AnthropicBackend
// ============================================================================

/// Messages API 백엔드
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    messages_url: Url,
    api_key: Option<String>,
    settings: ClientSettings,
}

impl AnthropicBackend {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        settings: ClientSettings,
    ) -> Result<Self, SopError> {
        let mut messages_url = Url::parse(base_url).map_err(|e| {
            SopError::Config(format!("invalid model endpoint {:?}: {}", base_url, e))
        })?;
        messages_url
            .path_segments_mut()
            .map_err(|_| SopError::Config(format!("endpoint cannot be a base: {}", base_url)))?
            .pop_if_empty()
            .extend(["v1", "messages"]);

        let client = settings
            .build_client()
            .map_err(|e| SopError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            messages_url,
            api_key,
            settings,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SopError> {
        Self::new(&settings.model_endpoint, settings.model_api_key.clone(), settings.client)
    }

    fn request(&self, body: &MessagesBody<'_>) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(self.messages_url.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-api-key", key);
        }
        builder
    }

    /// 비스트리밍 요청 1회
    async fn send_once(&self, body: &MessagesBody<'_>) -> Result<RoundOutput, SopError> {
        let response = self.request(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(service_error(status.as_u16(), &text));
        }

        let parsed: MessagesResponse =
            serde_json::from_str(&text).map_err(|e| SopError::Decode(e.to_string()))?;
        Ok(RoundOutput {
            blocks: parsed.content,
            stop_reason: parsed.stop_reason,
        })
    }

    /// 재시도 포함 비스트리밍 요청
    async fn send_with_retry(&self, body: &MessagesBody<'_>) -> Result<RoundOutput, SopError> {
        let mut attempt = 0;
        loop {
            match self.send_once(body).await {
                Ok(output) => return Ok(output),
                Err(e) if e.is_retryable() && attempt + 1 < self.settings.max_attempts => {
                    let backoff: Duration = self.settings.backoff(attempt);
                    tracing::warn!(
                        "Model request failed ({}), retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt + 1,
                        self.settings.max_attempts
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 스트리밍 요청 1회
    ///
    /// 텍스트 조각을 보냈으면 `emitted`를 true로 바꿉니다 (이후에는 재시도 불가).
    async fn stream_once(
        &self,
        body: &MessagesBody<'_>,
        sink: &mpsc::Sender<String>,
        emitted: &mut bool,
    ) -> Result<RoundOutput, SopError> {
        let mut es = EventSource::new(self.request(body))
            .map_err(|e| SopError::Config(format!("cannot stream request: {}", e)))?;
        es.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let mut pending: Vec<Option<PendingBlock>> = Vec::new();
        let mut stop_reason = None;
        let mut saw_message_stop = false;

        while let Some(event) = es.next().await {
            let message = match event {
                Ok(Event::Open) => {
                    tracing::debug!("Model stream opened");
                    continue;
                }
                Ok(Event::Message(message)) => message,
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    es.close();
                    let text = response.text().await.unwrap_or_default();
                    return Err(service_error(status.as_u16(), &text));
                }
                Err(e) => {
                    es.close();
                    return Err(SopError::Transport(e.to_string()));
                }
            };

            let parsed: StreamEvent = match serde_json::from_str(&message.data) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::debug!("Skipping unparsable stream event {:?}: {}", message.event, e);
                    continue;
                }
            };

            match parsed {
                StreamEvent::ContentBlockStart { index, content_block } => {
                    if pending.len() <= index {
                        pending.resize_with(index + 1, || None);
                    }
                    pending[index] = Some(PendingBlock {
                        block: content_block,
                        input_json: String::new(),
                    });
                }
                StreamEvent::ContentBlockDelta { index, delta } => {
                    let Some(Some(block)) = pending.get_mut(index) else {
                        continue;
                    };
                    match delta {
                        Delta::TextDelta { text } => {
                            if let ContentBlock::Text { text: ref mut acc } = block.block {
                                acc.push_str(&text);
                            }
                            if sink.send(text).await.is_err() {
                                tracing::debug!("Response consumer detached, stopping generation");
                                es.close();
                                return Err(SopError::StreamClosed);
                            }
                            *emitted = true;
                        }
                        Delta::InputJsonDelta { partial_json } => {
                            block.input_json.push_str(&partial_json);
                        }
                        Delta::Other => {}
                    }
                }
                StreamEvent::MessageDelta { delta } => {
                    if delta.stop_reason.is_some() {
                        stop_reason = delta.stop_reason;
                    }
                }
                StreamEvent::MessageStop {} => {
                    saw_message_stop = true;
                    es.close();
                    break;
                }
                StreamEvent::Error { error } => {
                    es.close();
                    return Err(SopError::Service {
                        status: 500,
                        message: format!("{}: {}", error.kind, error.message),
                    });
                }
                StreamEvent::MessageStart {}
                | StreamEvent::ContentBlockStop {}
                | StreamEvent::Ping {}
                | StreamEvent::Unknown => {}
            }
        }

        // message_stop 없이 끝난 스트림은 잘린 응답
        if !saw_message_stop {
            return Err(SopError::Transport(
                "stream ended before message_stop".to_string(),
            ));
        }

        Ok(RoundOutput {
            blocks: pending.into_iter().flatten().map(PendingBlock::finish).collect(),
            stop_reason,
        })
    }

    /// 재시도 포함 스트리밍 요청 (아직 아무것도 보내지 않았을 때만 재시도)
    async fn stream_with_retry(
        &self,
        body: &MessagesBody<'_>,
        sink: &mpsc::Sender<String>,
    ) -> Result<RoundOutput, SopError> {
        let mut attempt = 0;
        loop {
            let mut emitted = false;
            match self.stream_once(body, sink, &mut emitted).await {
                Ok(output) => return Ok(output),
                Err(e)
                    if !emitted && e.is_retryable() && attempt + 1 < self.settings.max_attempts =>
                {
                    let backoff = self.settings.backoff(attempt);
                    tracing::warn!(
                        "Model stream failed ({}), retrying in {:?} (attempt {}/{})",
                        e,
                        backoff,
                        attempt + 1,
                        self.settings.max_attempts
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    async fn converse(
        &self,
        request: &ChatRequest,
        tools: &ToolRegistry,
    ) -> Result<String, SopError> {
        let mut messages = initial_messages(request);
        let mut answer = String::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let body = messages_body(request, &messages, tools, false);
            let output = self.send_with_retry(&body).await?;
            answer.push_str(&output.text());

            if !output.wants_tools() {
                tracing::info!(
                    "Model {} answered after {} round(s)",
                    request.model.model_id,
                    round + 1
                );
                return Ok(answer);
            }
            append_tool_round(&mut messages, output.blocks, tools).await;
        }

        tracing::warn!("Tool loop stopped after {} rounds", MAX_TOOL_ROUNDS);
        Ok(answer)
    }

    async fn converse_stream(
        &self,
        request: &ChatRequest,
        tools: &ToolRegistry,
        sink: mpsc::Sender<String>,
    ) -> Result<String, SopError> {
        let mut messages = initial_messages(request);
        let mut answer = String::new();

        for round in 0..MAX_TOOL_ROUNDS {
            ensure_open(&sink)?;
            let body = messages_body(request, &messages, tools, true);
            let output = self.stream_with_retry(&body, &sink).await?;
            answer.push_str(&output.text());

            if !output.wants_tools() {
                tracing::info!(
                    "Model {} streamed answer after {} round(s)",
                    request.model.model_id,
                    round + 1
                );
                return Ok(answer);
            }
            append_tool_round(&mut messages, output.blocks, tools).await;
            ensure_open(&sink)?;
        }

        tracing::warn!("Tool loop stopped after {} rounds", MAX_TOOL_ROUNDS);
        Ok(answer)
    }

    fn name(&self) -> &str {
        "anthropic-messages"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 대화 기록 + 이번 질문을 메시지 목록으로 변환
///
/// Messages API는 user 턴으로 시작해야 하므로 앞쪽 assistant 턴은 버립니다.
fn initial_messages(request: &ChatRequest) -> Vec<Message> {
    request
        .history
        .iter()
        .skip_while(|t| t.role != Role::User)
        .map(|t| Message {
            role: t.role,
            content: vec![ContentBlock::Text {
                text: t.content.clone(),
            }],
        })
        .chain(std::iter::once(Message {
            role: Role::User,
            content: vec![ContentBlock::Text {
                text: request.prompt.clone(),
            }],
        }))
        .collect()
}

fn messages_body<'a>(
    request: &'a ChatRequest,
    messages: &'a [Message],
    tools: &ToolRegistry,
    stream: bool,
) -> MessagesBody<'a> {
    MessagesBody {
        model: request.model.model_id,
        max_tokens: request.model.max_tokens,
        system: &request.system,
        messages,
        tools: tools.specs(),
        stream,
    }
}

/// assistant의 tool_use 블록을 기록하고, 도구를 실행해 tool_result를 user 메시지로 추가
async fn append_tool_round(
    messages: &mut Vec<Message>,
    blocks: Vec<ContentBlock>,
    tools: &ToolRegistry,
) {
    let blocks: Vec<ContentBlock> = blocks
        .into_iter()
        .filter(|b| !matches!(b, ContentBlock::Unknown))
        .collect();

    let mut results = Vec::new();
    for block in &blocks {
        if let ContentBlock::ToolUse { id, name, input } = block {
            let content = tools.invoke(name, input).await;
            results.push(ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content,
            });
        }
    }

    messages.push(Message {
        role: Role::Assistant,
        content: blocks,
    });
    messages.push(Message {
        role: Role::User,
        content: results,
    });
}

/// 소비자가 떠났으면 다음 라운드를 시작하지 않음
fn ensure_open(sink: &mpsc::Sender<String>) -> Result<(), SopError> {
    if sink.is_closed() {
        tracing::debug!("Response consumer detached, stopping tool loop");
        return Err(SopError::StreamClosed);
    }
    Ok(())
}

fn service_error(status: u16, body: &str) -> SopError {
    let message = serde_json::from_str::<ApiError>(body)
        .map(|e| format!("{}: {}", e.error.kind, e.error.message))
        .unwrap_or_else(|_| body.to_string());
    SopError::Service { status, message }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Tool, Turn};
    use crate::config::resolve_model;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StaticTool;

    #[async_trait]
    impl Tool for StaticTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "retrieve_from_knowledge_base".to_string(),
                description: "test".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, input: &Value) -> String {
            format!("[Result 1] for {}", input["query"].as_str().unwrap_or_default())
        }
    }

    fn fast_settings() -> ClientSettings {
        ClientSettings {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn request(history: Vec<Turn>) -> ChatRequest {
        ChatRequest {
            model: *resolve_model("Claude Sonnet 4.5"),
            system: "system".to_string(),
            history,
            prompt: "GMP 기준이 뭐야?".to_string(),
        }
    }

    fn tools() -> ToolRegistry {
        ToolRegistry::new().register(Arc::new(StaticTool))
    }

    #[test]
    fn test_initial_messages_start_with_user() {
        let req = request(vec![
            Turn::assistant("orphan"),
            Turn::user("q1"),
            Turn::assistant("a1"),
        ]);
        let messages = initial_messages(&req);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[2].role, Role::User);
        assert_eq!(
            messages[2].content,
            vec![ContentBlock::Text { text: "GMP 기준이 뭐야?".to_string() }]
        );
    }

    #[test]
    fn test_messages_url() {
        let backend =
            AnthropicBackend::new("https://api.anthropic.com", None, fast_settings()).unwrap();
        assert_eq!(backend.messages_url.as_str(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn test_pending_tool_input_parsed() {
        let block = PendingBlock {
            block: ContentBlock::ToolUse {
                id: "t1".into(),
                name: "x".into(),
                input: json!({}),
            },
            input_json: r#"{"query":"일탈"}"#.to_string(),
        };
        match block.finish() {
            ContentBlock::ToolUse { input, .. } => assert_eq!(input["query"], "일탈"),
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_converse_runs_tool_loop() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_string_contains("tool_result"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "SOP-QA-001에 따르면..."}],
                "stop_reason": "end_turn"
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key"))
            .and(body_partial_json(json!({"tools": [{"name": "retrieve_from_knowledge_base"}]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "검색합니다. "},
                    {
                        "type": "tool_use",
                        "id": "toolu_1",
                        "name": "retrieve_from_knowledge_base",
                        "input": {"query": "GMP"}
                    }
                ],
                "stop_reason": "tool_use"
            })))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        let backend =
            AnthropicBackend::new(&server.uri(), Some("key".to_string()), fast_settings()).unwrap();
        let answer = backend.converse(&request(vec![]), &tools()).await.unwrap();
        assert_eq!(answer, "검색합니다. SOP-QA-001에 따르면...");
    }

    #[tokio::test]
    async fn test_converse_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "error",
                "error": {"type": "invalid_request_error", "message": "bad model"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(&server.uri(), None, fast_settings()).unwrap();
        let err = backend.converse(&request(vec![]), &tools()).await.unwrap_err();
        match err {
            SopError::Service { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "invalid_request_error: bad model");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn sse(events: &[Value]) -> String {
        events
            .iter()
            .map(|e| format!("event: {}\ndata: {}\n\n", e["type"].as_str().unwrap_or_default(), e))
            .collect()
    }

    fn text_start() -> Value {
        json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "text", "text": ""}
        })
    }

    fn text_delta(text: &str) -> Value {
        json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": text}
        })
    }

    fn tool_start(id: &str, input: Value) -> Value {
        json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {
                "type": "tool_use",
                "id": id,
                "name": "retrieve_from_knowledge_base",
                "input": input
            }
        })
    }

    fn input_delta(partial_json: &str) -> Value {
        json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "input_json_delta", "partial_json": partial_json}
        })
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_in_order() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"type": "message_start", "message": {"id": "msg_1"}}),
            text_start(),
            json!({"type": "ping"}),
            text_delta("GMP는 "),
            text_delta("우수제조관리기준"),
            text_delta("입니다."),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}),
            json!({"type": "message_stop"}),
        ]);

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(&server.uri(), None, fast_settings()).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let answer = backend
            .converse_stream(&request(vec![]), &ToolRegistry::new(), tx)
            .await
            .unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks, vec!["GMP는 ", "우수제조관리기준", "입니다."]);
        assert_eq!(answer, "GMP는 우수제조관리기준입니다.");
    }

    #[tokio::test]
    async fn test_stream_tool_round() {
        let server = MockServer::start().await;

        let final_round = sse(&[
            text_start(),
            text_delta("답변"),
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}}),
            json!({"type": "message_stop"}),
        ]);
        Mock::given(method("POST"))
            .and(body_string_contains("tool_result"))
            .and(body_string_contains("[Result 1] for 일탈"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(final_round, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let tool_round = sse(&[
            tool_start("toolu_9", json!({})),
            input_delta("{\"query\":"),
            input_delta("\"일탈\"}"),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
            json!({"type": "message_stop"}),
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(tool_round, "text/event-stream"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(&server.uri(), None, fast_settings()).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let answer = backend.converse_stream(&request(vec![]), &tools(), tx).await.unwrap();

        assert_eq!(answer, "답변");
        assert_eq!(rx.recv().await.as_deref(), Some("답변"));
    }

    #[tokio::test]
    async fn test_stream_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "type": "error",
                "error": {"type": "authentication_error", "message": "invalid x-api-key"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(&server.uri(), None, fast_settings()).unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let err = backend
            .converse_stream(&request(vec![]), &ToolRegistry::new(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SopError::Service { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_stream_cut_before_message_stop() {
        let server = MockServer::start().await;
        let body = sse(&[
            text_start(),
            text_delta("GMP는 우수"),
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(&server.uri(), None, fast_settings()).unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let err = backend
            .converse_stream(&request(vec![]), &ToolRegistry::new(), tx)
            .await
            .unwrap_err();

        // 이미 보낸 조각이 있으므로 재시도하지 않음
        assert!(matches!(err, SopError::Transport(_)));
        assert_eq!(rx.recv().await.as_deref(), Some("GMP는 우수"));
    }

    /// 호출되는 순간 응답 수신측을 drop하는 도구
    struct DetachingTool {
        receiver: std::sync::Mutex<Option<mpsc::Receiver<String>>>,
    }

    #[async_trait]
    impl Tool for DetachingTool {
        fn spec(&self) -> ToolSpec {
            StaticTool.spec()
        }

        async fn invoke(&self, _input: &Value) -> String {
            self.receiver.lock().unwrap().take();
            "[Result 1]".to_string()
        }
    }

    #[tokio::test]
    async fn test_stream_detach_during_tool_round() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(body_string_contains("tool_result"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let tool_round = sse(&[
            tool_start("toolu_1", json!({"query": "GMP"})),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}}),
            json!({"type": "message_stop"}),
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(tool_round, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let (tx, rx) = mpsc::channel(16);
        let tools = ToolRegistry::new().register(Arc::new(DetachingTool {
            receiver: std::sync::Mutex::new(Some(rx)),
        }));

        let backend = AnthropicBackend::new(&server.uri(), None, fast_settings()).unwrap();
        let err = backend.converse_stream(&request(vec![]), &tools, tx).await.unwrap_err();
        assert!(matches!(err, SopError::StreamClosed));
    }

    #[tokio::test]
    async fn test_stream_not_started_when_detached() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let backend = AnthropicBackend::new(&server.uri(), None, fast_settings()).unwrap();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let err = backend
            .converse_stream(&request(vec![]), &tools(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SopError::StreamClosed));
    }
}
