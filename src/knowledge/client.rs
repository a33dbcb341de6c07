//! RAG Client - Knowledge Base 검색 + 결과 포맷팅
//!
//! 서비스 원본 결과를 [`RetrievalResult`]로 정규화하고,
//! 모델에 전달할 텍스트 블록으로 렌더링합니다.

use std::sync::Arc;

use crate::config::{Settings, RAG_NUMBER_OF_RERANKED_RESULTS, RAG_NUMBER_OF_RESULTS};
use crate::error::SopError;

use super::service::{RawRetrievalResult, Rerank, RetrievalService};

/// 검색 결과가 없을 때의 메시지
pub const NO_RESULTS_MESSAGE: &str =
    "No relevant information found in the knowledge base for the given query.";

/// 결과 블록 구분자
pub const RESULT_SEPARATOR: &str = "\n\n---\n\n";

// ============================================================================
// Types
// ============================================================================

/// 정규화된 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    /// 본문 텍스트
    pub content: String,
    /// 관련도 점수
    pub score: f64,
    /// 출처 URI (S3 위치)
    pub source_uri: Option<String>,
}

impl From<RawRetrievalResult> for RetrievalResult {
    fn from(raw: RawRetrievalResult) -> Self {
        Self {
            content: raw.content.map(|c| c.text).unwrap_or_default(),
            score: raw.score.unwrap_or(0.0),
            source_uri: raw
                .location
                .and_then(|l| l.s3_location)
                .map(|s3| s3.uri)
                .filter(|uri| !uri.is_empty()),
        }
    }
}

/// 검색 결과 (빈 결과는 에러가 아닌 별도 상태)
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    /// 서비스 랭킹 순서의 결과
    Found(Vec<RetrievalResult>),
    /// 관련 정보 없음
    NoResults,
}

impl RetrievalOutcome {
    /// 모델/사용자에게 보여줄 텍스트
    pub fn render(&self) -> String {
        match self {
            RetrievalOutcome::Found(results) => format_results(results),
            RetrievalOutcome::NoResults => NO_RESULTS_MESSAGE.to_string(),
        }
    }
}

/// 결과를 번호 블록으로 렌더링
///
/// ```text
/// [Result 1] (Relevance Score: 0.9100)
/// <content>
/// Source: s3://...
/// ```
pub fn format_results(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut block = format!(
                "[Result {}] (Relevance Score: {:.4})\n{}",
                i + 1,
                r.score,
                r.content
            );
            if let Some(ref uri) = r.source_uri {
                block.push_str("\nSource: ");
                block.push_str(uri);
            }
            block
        })
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}

// ============================================================================
// RagClient
// ============================================================================

/// Knowledge Base 검색 클라이언트
#[derive(Clone)]
pub struct RagClient {
    service: Arc<dyn RetrievalService>,
    knowledge_base_id: Option<String>,
    result_count: usize,
    rerank: Option<Rerank>,
}

impl RagClient {
    pub fn new(service: Arc<dyn RetrievalService>, knowledge_base_id: Option<String>) -> Self {
        Self {
            service,
            knowledge_base_id: knowledge_base_id.filter(|id| !id.trim().is_empty()),
            result_count: RAG_NUMBER_OF_RESULTS,
            rerank: None,
        }
    }

    /// 설정 기반 생성 (결과 10개, Cohere 리랭킹 상위 5개)
    pub fn from_settings(service: Arc<dyn RetrievalService>, settings: &Settings) -> Self {
        Self::new(service, settings.knowledge_base_id.clone()).with_rerank(Some(Rerank {
            model_arn: settings.reranker_model_arn(),
            top_n: RAG_NUMBER_OF_RERANKED_RESULTS,
        }))
    }

    pub fn with_result_count(mut self, result_count: usize) -> Self {
        self.result_count = result_count;
        self
    }

    pub fn with_rerank(mut self, rerank: Option<Rerank>) -> Self {
        self.rerank = rerank;
        self
    }

    pub fn knowledge_base_id(&self) -> Option<&str> {
        self.knowledge_base_id.as_deref()
    }

    /// 검색 실행
    ///
    /// Knowledge Base ID가 없으면 네트워크 호출 없이 즉시 실패합니다.
    pub async fn retrieve(
        &self,
        query: &str,
        result_count: usize,
        rerank: Option<&Rerank>,
    ) -> Result<RetrievalOutcome, SopError> {
        let kb_id = self
            .knowledge_base_id
            .as_deref()
            .ok_or(SopError::MissingKnowledgeBase)?;

        let raw = self.service.retrieve(kb_id, query, result_count, rerank).await?;
        if raw.is_empty() {
            tracing::info!("No results for query in {}", kb_id);
            return Ok(RetrievalOutcome::NoResults);
        }

        Ok(RetrievalOutcome::Found(
            raw.into_iter().map(RetrievalResult::from).collect(),
        ))
    }

    /// 기본 결과 수/리랭킹 설정으로 검색
    pub async fn search(&self, query: &str) -> Result<RetrievalOutcome, SopError> {
        self.retrieve(query, self.result_count, self.rerank.as_ref())
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
