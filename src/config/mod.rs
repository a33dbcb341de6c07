//! 설정 모듈 - 환경변수 + 고정 모델 테이블
//!
//! 리전, Knowledge Base ID, 피드백 테이블, 엔드포인트/API 키는 환경변수에서 읽고
//! 모델 선택지와 RAG 파라미터는 프로세스 내 상수로 고정합니다.

use std::path::{Path, PathBuf};
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// 기본 AWS 리전
pub const DEFAULT_REGION: &str = "us-east-1";

/// 기본 피드백 테이블 이름
pub const DEFAULT_FEEDBACK_TABLE: &str = "user_feedback";

/// Knowledge Base 1차 검색 결과 수
pub const RAG_NUMBER_OF_RESULTS: usize = 10;

/// 리랭킹 후 남길 결과 수
pub const RAG_NUMBER_OF_RERANKED_RESULTS: usize = 5;

/// 대화 윈도우 크기 (턴 수)
pub const CONVERSATION_WINDOW_SIZE: usize = 10;

/// 기본 모델 선택지 이름
pub const DEFAULT_MODEL_NAME: &str = "Claude Sonnet 4.5";

const DEFAULT_MODEL_ENDPOINT: &str = "https://api.anthropic.com";

/// 패키지에 동봉된 용어집
const BUNDLED_GLOSSARY_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/glossary.csv");

// ============================================================================
// Model Table
// ============================================================================

/// 모델 선택지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelOption {
    /// UI/CLI에 노출되는 이름
    pub name: &'static str,
    /// 백엔드 모델 ID
    pub model_id: &'static str,
    /// 최대 출력 토큰
    pub max_tokens: u32,
}

/// 사용 가능한 모델 목록
pub const MODEL_OPTIONS: &[ModelOption] = &[
    ModelOption {
        name: "Claude Sonnet 4",
        model_id: "claude-sonnet-4-20250514",
        max_tokens: 4096,
    },
    ModelOption {
        name: "Claude Sonnet 4.5",
        model_id: "claude-sonnet-4-5-20250929",
        max_tokens: 4096,
    },
    ModelOption {
        name: "Claude Haiku 4.5",
        model_id: "claude-haiku-4-5-20251001",
        max_tokens: 4096,
    },
];

/// 모델 선택자 해석
///
/// 알 수 없는 이름이면 기본 모델(Claude Sonnet 4.5)로 대체합니다. 에러는 없습니다.
pub fn resolve_model(selector: &str) -> &'static ModelOption {
    MODEL_OPTIONS
        .iter()
        .find(|m| m.name == selector)
        .or_else(|| MODEL_OPTIONS.iter().find(|m| m.name == DEFAULT_MODEL_NAME))
        .unwrap_or(&MODEL_OPTIONS[0])
}

/// 리랭커 모델 ARN
pub fn reranker_model_arn(region: &str) -> String {
    format!(
        "arn:aws:bedrock:{}::foundation-model/cohere.rerank-v3-5:0",
        region
    )
}

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.sop-chat/)
///
/// `SOP_CHAT_DATA_DIR` 환경변수가 있으면 우선합니다.
pub fn get_data_dir() -> PathBuf {
    if let Some(dir) = env_non_empty("SOP_CHAT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sop-chat")
}

// ============================================================================
// Settings
// ============================================================================

/// HTTP 클라이언트 설정 (외부 서비스 클라이언트에 그대로 전달)
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 재시도 초기 백오프
    pub initial_backoff: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(300),
            read_timeout: Duration::from_secs(300),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1000),
        }
    }
}

impl ClientSettings {
    /// reqwest 클라이언트 생성
    pub fn build_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("sop-chat/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(self.connect_timeout)
            .timeout(self.read_timeout)
            .build()
    }

    /// n번째 재시도(0-based) 전 대기 시간 (지수 백오프)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt)
    }
}

/// 런타임 설정
#[derive(Debug, Clone)]
pub struct Settings {
    pub region: String,
    pub knowledge_base_id: Option<String>,
    pub feedback_table: String,
    pub glossary_path: PathBuf,
    pub data_dir: PathBuf,
    pub retrieval_endpoint: String,
    pub retrieval_api_key: Option<String>,
    pub model_endpoint: String,
    pub model_api_key: Option<String>,
    pub client: ClientSettings,
}

impl Settings {
    /// 환경변수에서 설정 로드
    pub fn from_env() -> Self {
        let region = env_non_empty("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.to_string());
        let data_dir = get_data_dir();

        let glossary_path = env_non_empty("GLOSSARY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_glossary_path(&data_dir));

        let retrieval_endpoint = env_non_empty("BEDROCK_AGENT_ENDPOINT")
            .unwrap_or_else(|| format!("https://bedrock-agent-runtime.{}.amazonaws.com", region));

        let feedback_table = env_non_empty("FEEDBACK_TABLE_NAME")
            .or_else(|| env_non_empty("DYNAMODB_TABLE_NAME"))
            .unwrap_or_else(|| DEFAULT_FEEDBACK_TABLE.to_string());

        let settings = Self {
            knowledge_base_id: env_non_empty("KNOWLEDGE_BASE_ID"),
            feedback_table,
            glossary_path,
            data_dir,
            retrieval_endpoint,
            retrieval_api_key: env_non_empty("AWS_BEARER_TOKEN_BEDROCK"),
            model_endpoint: env_non_empty("ANTHROPIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_MODEL_ENDPOINT.to_string()),
            model_api_key: env_non_empty("ANTHROPIC_API_KEY"),
            client: ClientSettings::default(),
            region,
        };

        tracing::debug!(
            "Loaded settings: region={}, kb={:?}",
            settings.region,
            settings.knowledge_base_id
        );
        settings
    }

    /// Knowledge Base ID 덮어쓰기 (CLI 플래그)
    pub fn with_knowledge_base_id(mut self, kb_id: Option<String>) -> Self {
        if let Some(id) = kb_id.filter(|id| !id.trim().is_empty()) {
            self.knowledge_base_id = Some(id);
        }
        self
    }

    /// 현재 리전의 리랭커 ARN
    pub fn reranker_model_arn(&self) -> String {
        reranker_model_arn(&self.region)
    }
}

/// 작업 디렉토리(또는 상위)의 `.env` 로드
///
/// 이미 설정된 환경변수는 덮어쓰지 않습니다.
/// 로깅 초기화 전에 호출되므로 로드된 경로만 돌려줍니다.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// 지정한 `.env` 파일 로드
pub fn load_dotenv_from(path: &Path) -> bool {
    match dotenvy::from_path(path) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("No env file at {:?}: {}", path, e);
            false
        }
    }
}

/// 기본 용어집 경로 (데이터 디렉토리에 없으면 패키지 동봉 파일)
fn default_glossary_path(data_dir: &Path) -> PathBuf {
    let local = data_dir.join("glossary.csv");
    if local.exists() {
        local
    } else {
        PathBuf::from(BUNDLED_GLOSSARY_PATH)
    }
}

/// 비어있지 않은 환경변수 값
fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// ============================================================================
// Tests
// ============================================================================
