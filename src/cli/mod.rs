//! CLI 모듈
//!
//! sop-chat CLI 명령어 정의 및 구현

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::agent::{Session, SopAgent, GREETING};
use crate::config::{resolve_model, Settings, DEFAULT_MODEL_NAME, MODEL_OPTIONS};
use crate::error::SopError;
use crate::feedback::{FeedbackService, FeedbackStats};
use crate::glossary::{enrich_query, GlossaryStore, QueryEnricher};
use crate::knowledge::{BedrockRetrievalService, KnowledgeBaseTool, RagClient};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "sop-chat")]
#[command(version, about = "제약 SOP 챗봇", long_about = None)]
pub struct Cli {
    /// 모델 이름 (`sop-chat models` 참고)
    #[arg(long, global = true, default_value = DEFAULT_MODEL_NAME)]
    pub model: String,

    /// Knowledge Base ID (KNOWLEDGE_BASE_ID 덮어쓰기)
    #[arg(long = "kb-id", global = true)]
    pub kb_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 대화형 채팅
    Chat,

    /// 질문 한 번 하고 종료
    Ask {
        /// 질문
        query: String,

        /// 스트리밍 없이 전체 응답을 한 번에 출력
        #[arg(long)]
        no_stream: bool,
    },

    /// 용어집 기반 쿼리 확장 결과 확인
    Enrich {
        /// 질문
        query: String,
    },

    /// Knowledge Base 직접 검색
    Retrieve {
        /// 검색 쿼리
        query: String,

        /// 결과 개수
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// 피드백 통계
    FeedbackStats,

    /// 사용 가능한 모델 목록
    Models,

    /// 설정 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::from_env().with_knowledge_base_id(cli.kb_id);
    let model = cli.model;

    match cli.command {
        Commands::Chat => cmd_chat(&settings, &model).await,
        Commands::Ask { query, no_stream } => cmd_ask(&settings, &model, &query, no_stream).await,
        Commands::Enrich { query } => cmd_enrich(&settings, &query),
        Commands::Retrieve { query, limit } => cmd_retrieve(&settings, &query, limit).await,
        Commands::FeedbackStats => cmd_feedback_stats(&settings).await,
        Commands::Models => cmd_models(),
        Commands::Status => cmd_status(&settings),
    }
}

// ============================================================================
// REPL Input
// ============================================================================

/// 채팅 입력 한 줄의 해석 결과
#[derive(Debug, Clone, PartialEq)]
enum ReplInput {
    Empty,
    Quit,
    Reset,
    Stats,
    Help,
    Feedback { is_helpful: bool, text: String },
    Query(String),
}

/// 입력 한 줄 해석 (`/`로 시작하면 명령어)
fn parse_repl_input(line: &str) -> ReplInput {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }

    let Some(command) = line.strip_prefix('/') else {
        return ReplInput::Query(line.to_string());
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map(|(n, r)| (n, r.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" | "q" => ReplInput::Quit,
        "reset" => ReplInput::Reset,
        "stats" => ReplInput::Stats,
        "good" => ReplInput::Feedback {
            is_helpful: true,
            text: rest.to_string(),
        },
        "bad" => ReplInput::Feedback {
            is_helpful: false,
            text: rest.to_string(),
        },
        _ => ReplInput::Help,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 대화형 채팅 명령어 (chat)
///
/// 응답은 스트리밍으로 출력되며, 직전 답변에 한 번 평가를 남길 수 있습니다.
async fn cmd_chat(settings: &Settings, model: &str) -> Result<()> {
    let model = resolve_model(model);
    let agent = SopAgent::from_settings(settings).context("에이전트 초기화 실패")?;
    let feedback = FeedbackService::from_settings(settings).context("피드백 저장소 열기 실패")?;
    let mut session = Session::new();

    println!("{}", GREETING);
    println!();
    println!("[*] 모델: {}", model.name);
    if settings.knowledge_base_id.is_none() {
        println!("[!] {}", SopError::MissingKnowledgeBase);
    }
    print_repl_help();

    // 평가 대기 중인 (질문, 답변)
    let mut awaiting_feedback: Option<(String, String)> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("입력 읽기 실패")? else {
            break;
        };

        match parse_repl_input(&line) {
            ReplInput::Empty => continue,
            ReplInput::Quit => break,
            ReplInput::Help => print_repl_help(),
            ReplInput::Reset => {
                session.reset();
                awaiting_feedback = None;
                println!("[OK] 대화가 초기화되었습니다 (세션: {})", session.id());
            }
            ReplInput::Stats => print_stats(&feedback.stats().await),
            ReplInput::Feedback { is_helpful, text } => {
                let Some((question, answer)) = awaiting_feedback.take() else {
                    println!("[!] 평가할 답변이 없습니다.");
                    continue;
                };

                let saved = feedback
                    .save_feedback(&question, &answer, is_helpful, &text, Some(session.id()))
                    .await;

                match (saved, is_helpful) {
                    (true, true) => println!("[OK] 피드백이 저장되었습니다. 감사합니다!"),
                    (true, false) => {
                        println!("[OK] 피드백이 저장되었습니다. 더 나은 답변을 위해 노력하겠습니다.")
                    }
                    (false, _) => println!("[!] 피드백 저장 실패"),
                }
            }
            ReplInput::Query(query) => {
                println!();
                let answer = print_stream(&agent, &session, &query, model.name).await?;
                println!();
                println!("[*] 이 답변이 도움이 되셨나요? /good 또는 /bad [의견]");
                awaiting_feedback = Some((query, answer));
            }
        }
    }

    println!("[OK] 종료합니다.");
    Ok(())
}

/// 단일 질문 명령어 (ask)
async fn cmd_ask(settings: &Settings, model: &str, query: &str, no_stream: bool) -> Result<()> {
    let agent = SopAgent::from_settings(settings).context("에이전트 초기화 실패")?;
    let session = Session::new();

    if no_stream {
        let answer = agent.run(&session, query, model).await;
        println!("{}", answer);
    } else {
        print_stream(&agent, &session, query, model).await?;
        println!();
    }

    Ok(())
}

/// 쿼리 확장 명령어 (enrich)
///
/// 모델 호출 없이 용어집 매칭 결과만 출력합니다.
fn cmd_enrich(settings: &Settings, query: &str) -> Result<()> {
    let enricher = QueryEnricher::new(GlossaryStore::global(settings.glossary_path.clone()));
    let entry_count = enricher.glossary().load().len();
    let terms = enricher.find_related_terms(query);

    println!("[*] 용어집: {} 건 ({})", entry_count, settings.glossary_path.display());

    if terms.is_empty() {
        println!("[!] 관련 용어가 없습니다.");
    } else {
        println!("[OK] 관련 용어 ({} 건):", terms.len());
        for term in &terms {
            println!("  - {}", term);
        }
    }

    println!();
    println!("{}", enrich_query(query, &terms));
    Ok(())
}

/// 검색 명령어 (retrieve)
///
/// 모델을 거치지 않고 Knowledge Base 도구를 직접 실행합니다.
async fn cmd_retrieve(settings: &Settings, query: &str, limit: Option<usize>) -> Result<()> {
    let service = BedrockRetrievalService::from_settings(settings).context("검색 서비스 초기화 실패")?;
    let mut client = RagClient::from_settings(Arc::new(service), settings);
    if let Some(limit) = limit {
        client = client.with_result_count(limit);
    }

    println!("[*] 검색 중: \"{}\"", truncate_text(query, 80));
    println!();

    let output = KnowledgeBaseTool::new(client).run(query).await;
    println!("{}", output);
    Ok(())
}

/// 피드백 통계 명령어 (feedback-stats)
async fn cmd_feedback_stats(settings: &Settings) -> Result<()> {
    let feedback = FeedbackService::from_settings(settings).context("피드백 저장소 열기 실패")?;
    print_stats(&feedback.stats().await);
    Ok(())
}

/// 모델 목록 명령어 (models)
fn cmd_models() -> Result<()> {
    println!("[OK] 사용 가능한 모델 ({} 건):\n", MODEL_OPTIONS.len());

    for option in MODEL_OPTIONS {
        let marker = if option.name == DEFAULT_MODEL_NAME { "*" } else { " " };
        println!(
            "  {} {:<20} {} (max_tokens: {})",
            marker, option.name, option.model_id, option.max_tokens
        );
    }

    Ok(())
}

/// 상태 명령어 (status)
fn cmd_status(settings: &Settings) -> Result<()> {
    println!("sop-chat v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 리전: {}", settings.region);
    println!("[*] 데이터 디렉토리: {}", settings.data_dir.display());

    match &settings.knowledge_base_id {
        Some(id) => println!("[OK] Knowledge Base: {}", id),
        None => {
            println!("[!] Knowledge Base: 미설정");
            println!("    설정: export KNOWLEDGE_BASE_ID=your-kb-id");
        }
    }

    println!("[*] 검색 엔드포인트: {}", settings.retrieval_endpoint);
    print_key_status("검색 API 키", settings.retrieval_api_key.is_some(), "AWS_BEARER_TOKEN_BEDROCK");

    println!("[*] 모델 엔드포인트: {}", settings.model_endpoint);
    print_key_status("모델 API 키", settings.model_api_key.is_some(), "ANTHROPIC_API_KEY");

    if settings.glossary_path.exists() {
        println!("[OK] 용어집: {}", settings.glossary_path.display());
    } else {
        println!("[!] 용어집 파일 없음: {}", settings.glossary_path.display());
        println!("    설정: export GLOSSARY_PATH=/path/to/glossary.csv");
    }

    println!("[*] 피드백 테이블: {}", settings.feedback_table);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 스트리밍 응답을 출력하면서 전체 텍스트를 모음
async fn print_stream(
    agent: &SopAgent,
    session: &Session,
    query: &str,
    model: &str,
) -> Result<String> {
    let mut stream = agent.run_stream(session, query, model);
    let mut stdout = std::io::stdout();
    let mut answer = String::new();

    while let Some(chunk) = stream.next_chunk().await {
        print!("{}", chunk);
        stdout.flush()?;
        answer.push_str(&chunk);
    }

    println!();
    Ok(answer)
}

fn print_repl_help() {
    println!("    명령: /reset, /good [의견], /bad [의견], /stats, /quit");
}

fn print_stats(stats: &FeedbackStats) {
    println!("[OK] 피드백 통계:");
    println!("     전체: {} 건", stats.total_feedback);
    println!("     도움됨: {} 건", stats.helpful_count);
    println!("     아쉬움: {} 건", stats.not_helpful_count);
    println!("     만족도: {:.1}%", stats.helpful_rate);
}

fn print_key_status(label: &str, configured: bool, env_key: &str) {
    if configured {
        println!("[OK] {}: 설정됨", label);
    } else {
        println!("[!] {}: 미설정", label);
        println!("    설정: export {}=your-key", env_key);
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

// ============================================================================
// Tests
// ============================================================================
