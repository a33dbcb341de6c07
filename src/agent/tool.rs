//! 도구(capability) 등록
//!
//! 모델 백엔드가 생성 도중 0회 이상 호출할 수 있는 이름 붙은 함수입니다.
//! 호출 루프는 백엔드가 소유하고, 여기서는 도구 정의와 디스패치만 담당합니다.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// 도구 정의 (모델에 노출되는 스키마)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema
    pub input_schema: Value,
}

/// 호출 가능한 도구
///
/// 실패도 텍스트로 돌려줍니다. 모델은 도구 실패를 제어 흐름이 아닌 출력으로 받습니다.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn invoke(&self, input: &Value) -> String;
}

/// 등록된 도구 모음
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 이름으로 도구 호출
    pub async fn invoke(&self, name: &str, input: &Value) -> String {
        match self.tools.iter().find(|t| t.spec().name == name) {
            Some(tool) => {
                tracing::info!("Invoking tool {}", name);
                tool.invoke(input).await
            }
            None => {
                tracing::warn!("Model requested unknown tool {}", name);
                format!("Error: unknown tool '{}'", name)
            }
        }
    }
}
