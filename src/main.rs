//! sop-chat CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // .env가 있으면 환경변수로 로드
    let dotenv_loaded = sop_chat::config::load_dotenv();

    // 로깅 초기화 (stdout은 응답 출력용)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .init();

    if let Some(path) = dotenv_loaded {
        tracing::debug!("Loaded environment from {:?}", path);
    }

    // CLI 실행
    let cli = sop_chat::cli::Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(sop_chat::cli::run(cli))
}
