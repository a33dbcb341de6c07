//! Retrieval Service - 외부 Knowledge Base 검색 서비스
//!
//! Bedrock Agent Runtime `Retrieve` API 형식으로 요청합니다.
//! source: https://docs.aws.amazon.com/bedrock/latest/APIReference/API_agent-runtime_Retrieve.html

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{ClientSettings, Settings};
use crate::error::SopError;

// ============================================================================
// Request / Response Types
// ============================================================================

/// 리랭킹 지시 (모델 + 상위 N개)
#[derive(Debug, Clone, PartialEq)]
pub struct Rerank {
    pub model_arn: String,
    pub top_n: usize,
}

/// 서비스 원본 검색 결과
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRetrievalResult {
    #[serde(default)]
    pub content: Option<RawContent>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub location: Option<RawLocation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawContent {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawLocation {
    #[serde(default)]
    pub s3_location: Option<RawS3Location>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawS3Location {
    #[serde(default)]
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(default)]
    retrieval_results: Vec<RawRetrievalResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveBody<'a> {
    retrieval_query: QueryText<'a>,
    retrieval_configuration: RetrievalConfiguration,
}

#[derive(Debug, Serialize)]
struct QueryText<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalConfiguration {
    vector_search_configuration: VectorSearchConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VectorSearchConfiguration {
    number_of_results: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reranking_configuration: Option<RerankingConfiguration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RerankingConfiguration {
    #[serde(rename = "type")]
    kind: &'static str,
    bedrock_reranking_configuration: BedrockRerankingConfiguration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BedrockRerankingConfiguration {
    model_configuration: ModelConfiguration,
    number_of_reranked_results: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ModelConfiguration {
    model_arn: String,
}

impl<'a> RetrieveBody<'a> {
    fn new(query: &'a str, result_count: usize, rerank: Option<&Rerank>) -> Self {
        Self {
            retrieval_query: QueryText { text: query },
            retrieval_configuration: RetrievalConfiguration {
                vector_search_configuration: VectorSearchConfiguration {
                    number_of_results: result_count,
                    reranking_configuration: rerank.map(|r| RerankingConfiguration {
                        kind: "BEDROCK_RERANKING_MODEL",
                        bedrock_reranking_configuration: BedrockRerankingConfiguration {
                            model_configuration: ModelConfiguration {
                                model_arn: r.model_arn.clone(),
                            },
                            number_of_reranked_results: r.top_n,
                        },
                    }),
                },
            },
        }
    }
}

/// 서비스 에러 응답 (`{"message": "..."}`)
#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default, alias = "Message")]
    message: String,
}

// ============================================================================
// RetrievalService Trait
// ============================================================================

/// 외부 검색 서비스 인터페이스
#[async_trait]
pub trait RetrievalService: Send + Sync {
    /// Knowledge Base 검색 (서비스 랭킹 순서 그대로 반환)
    async fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
        result_count: usize,
        rerank: Option<&Rerank>,
    ) -> Result<Vec<RawRetrievalResult>, SopError>;

    /// 서비스 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Bedrock Knowledge Base
// ============================================================================

/// Bedrock Agent Runtime 검색 클라이언트
#[derive(Debug, Clone)]
pub struct BedrockRetrievalService {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    settings: ClientSettings,
}

impl BedrockRetrievalService {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        settings: ClientSettings,
    ) -> Result<Self, SopError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            SopError::Config(format!("invalid retrieval endpoint {:?}: {}", endpoint, e))
        })?;

        let client = settings
            .build_client()
            .map_err(|e| SopError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            settings,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SopError> {
        Self::new(
            &settings.retrieval_endpoint,
            settings.retrieval_api_key.clone(),
            settings.client,
        )
    }

    /// `{endpoint}/knowledgebases/{id}/retrieve`
    fn retrieve_url(&self, knowledge_base_id: &str) -> Result<Url, SopError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SopError::Config(format!("endpoint cannot be a base: {}", self.endpoint)))?
            .pop_if_empty()
            .extend(["knowledgebases", knowledge_base_id, "retrieve"]);
        Ok(url)
    }

    async fn send_once(
        &self,
        url: &Url,
        body: &RetrieveBody<'_>,
    ) -> Result<Vec<RawRetrievalResult>, SopError> {
        let mut request = self.client.post(url.clone()).json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ServiceError>(&text)
                .map(|e| e.message)
                .unwrap_or(text);
            return Err(SopError::Service {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: RetrieveResponse =
            serde_json::from_str(&text).map_err(|e| SopError::Decode(e.to_string()))?;
        Ok(parsed.retrieval_results)
    }
}

#[async_trait]
impl RetrievalService for BedrockRetrievalService {
    async fn retrieve(
        &self,
        knowledge_base_id: &str,
        query: &str,
        result_count: usize,
        rerank: Option<&Rerank>,
    ) -> Result<Vec<RawRetrievalResult>, SopError> {
        let url = self.retrieve_url(knowledge_base_id)?;
        let body = RetrieveBody::new(query, result_count, rerank);

        let mut attempt = 0;
        loop {
            match self.send_once(&url, &body).await {
                Ok(results) => {
                    tracing::info!(
                        "Retrieved {} results from {}",
                        results.len(),
                        knowledge_base_id
                    );
                    return Ok(results);
                }
                Err(e) if e.is_retryable() && attempt + 1 < self.settings.max_attempts => {
                    let backoff: Duration = self.settings.backoff(attempt);
                    tracing::warn!(
                        "Retrieve failed ({}), retrying in {:?} (attempt {}/{})",
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

    fn name(&self) -> &str {
        "bedrock-knowledge-base"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::reranker_model_arn;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_settings() -> ClientSettings {
        ClientSettings {
            initial_backoff: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn rerank() -> Rerank {
        Rerank {
            model_arn: reranker_model_arn("us-east-1"),
            top_n: 5,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let r = rerank();
        let body = serde_json::to_value(RetrieveBody::new("GMP", 10, Some(&r))).unwrap();
        assert_eq!(body["retrievalQuery"]["text"], "GMP");

        let vector = &body["retrievalConfiguration"]["vectorSearchConfiguration"];
        assert_eq!(vector["numberOfResults"], 10);
        assert_eq!(vector["rerankingConfiguration"]["type"], "BEDROCK_RERANKING_MODEL");
        let reranking = &vector["rerankingConfiguration"]["bedrockRerankingConfiguration"];
        assert_eq!(reranking["numberOfRerankedResults"], 5);
    }

    #[test]
    fn test_request_body_without_rerank() {
        let body = serde_json::to_value(RetrieveBody::new("GMP", 3, None)).unwrap();
        let vector = &body["retrievalConfiguration"]["vectorSearchConfiguration"];
        assert!(vector.get("rerankingConfiguration").is_none());
    }

    #[test]
    fn test_retrieve_url() {
        let service =
            BedrockRetrievalService::new("https://example.com/", None, fast_settings()).unwrap();
        assert_eq!(
            service.retrieve_url("KB123").unwrap().as_str(),
            "https://example.com/knowledgebases/KB123/retrieve"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = BedrockRetrievalService::new("not a url", None, fast_settings());
        assert!(matches!(result, Err(SopError::Config(_))));
    }

    #[tokio::test]
    async fn test_retrieve_parses_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/knowledgebases/KB123/retrieve"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({"retrievalQuery": {"text": "일탈 처리"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "retrievalResults": [
                    {
                        "content": {"text": "SOP-QA-001 일탈 관리"},
                        "score": 0.91,
                        "location": {"type": "S3", "s3Location": {"uri": "s3://sop/qa-001.pdf"}}
                    },
                    {"content": {"text": "no location"}, "score": 0.5}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api_key = Some("secret".to_string());
        let service =
            BedrockRetrievalService::new(&server.uri(), api_key, fast_settings()).unwrap();
        let results = service.retrieve("KB123", "일탈 처리", 10, Some(&rerank())).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content.as_ref().unwrap().text, "SOP-QA-001 일탈 관리");
        assert_eq!(
            results[0].location.as_ref().unwrap().s3_location.as_ref().unwrap().uri,
            "s3://sop/qa-001.pdf"
        );
        assert!(results[1].location.is_none());
    }

    #[tokio::test]
    async fn test_retrieve_retries_throttling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"message": "Too many requests"})),
            )
            .expect(3)
            .mount(&server)
            .await;

        let service = BedrockRetrievalService::new(&server.uri(), None, fast_settings()).unwrap();
        let err = service.retrieve("KB123", "q", 10, None).await.unwrap_err();

        match err {
            SopError::Service { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "Too many requests");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_retrieve_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"message": "KB not found"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let service = BedrockRetrievalService::new(&server.uri(), None, fast_settings()).unwrap();
        let err = service.retrieve("missing", "q", 10, None).await.unwrap_err();
        assert!(matches!(err, SopError::Service { status: 404, .. }));
    }
}
