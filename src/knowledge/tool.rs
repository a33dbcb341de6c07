//! Knowledge Base 검색 도구 (`retrieve_from_knowledge_base`)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::agent::{Tool, ToolSpec};
use crate::error::{render_error, ErrorScope};

use super::client::RagClient;

/// 도구 이름
pub const KNOWLEDGE_BASE_TOOL: &str = "retrieve_from_knowledge_base";

#[derive(Debug, Deserialize)]
struct RetrieveInput {
    query: String,
}

/// 제약 SOP Knowledge Base 검색 도구
#[derive(Clone)]
pub struct KnowledgeBaseTool {
    client: RagClient,
}

impl KnowledgeBaseTool {
    pub fn new(client: RagClient) -> Self {
        Self { client }
    }

    /// 쿼리 문자열로 직접 호출
    pub async fn run(&self, query: &str) -> String {
        match self.client.search(query).await {
            Ok(outcome) => outcome.render(),
            Err(e) => {
                tracing::error!("Error retrieving from knowledge base: {}", e);
                render_error(ErrorScope::Retrieval, &e)
            }
        }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: KNOWLEDGE_BASE_TOOL.to_string(),
            description: "Retrieve relevant information from the pharma SOP knowledge base \
                          with reranking. Returns document chunks about pharmaceutical \
                          procedures, regulations, and guidelines, each with a relevance \
                          score and source."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to find relevant SOP information"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn invoke(&self, input: &Value) -> String {
        match serde_json::from_value::<RetrieveInput>(input.clone()) {
            Ok(input) => self.run(&input.query).await,
            Err(e) => format!("Error: invalid tool input: {}", e),
        }
    }
}
