//! FLO 서버 - 구간 처리량 측정 서버
//!
//! 세션을 수락하고, PSK가 설정되어 있으면 HMAC 인증을 수행한 뒤
//! 협상된 방향으로 데이터 페이즈를 구동함.
//!
//! 사용법:
//!   cargo run --release --bin flo_server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 실행 (인증 없음)
//!   cargo run --release --bin flo_server -- --port 9000
//!
//!   # HMAC 인증 + 동시 측정 4개
//!   cargo run --release --bin flo_server -- -k secret -m 4

use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use flo::config::ServerConfig;
use flo::server::TcpServer;

fn parse_args() -> (ServerConfig, bool) {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();
    let mut verbose = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" | "-H" => {
                if i + 1 < args.len() {
                    config.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    config.port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--psk" | "-k" => {
                if i + 1 < args.len() {
                    config.psk = args[i + 1].clone().into_bytes();
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.timeout = Duration::from_secs(secs);
                    i += 1;
                }
            }
            "--max-tests" | "-m" => {
                if i + 1 < args.len() {
                    config.max_concurrent_tests = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"FLO Server - 구간 처리량 측정 서버

사용법:
  cargo run --release --bin flo_server -- [OPTIONS]

옵션:
  -H, --host <HOST>       바인드 호스트 (기본: 0.0.0.0)
  -p, --port <PORT>       바인드 포트 (기본: 9000)
  -k, --psk <KEY>         HMAC 인증용 사전 공유 키 (없으면 인증 비활성)
  -m, --max-tests <N>     동시 측정 세션 한도 (기본: 1)
  --timeout <SECS>        컨트롤 플레인 타임아웃 초 (기본: 3)
  -v, --verbose           디버그 로그 출력
  -h, --help              이 도움말 출력

예시:
  # 인증 없이 실행
  cargo run --release --bin flo_server -- --port 9000

  # HMAC 인증 + 동시 측정 4개
  cargo run --release --bin flo_server -- -k secret -m 4
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    (config, verbose)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (config, verbose) = parse_args();

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("FLO server starting...");
    info!("Bind address: {}:{}", config.host, config.port);
    info!(
        "Authentication: {}",
        if config.psk.is_empty() {
            "disabled"
        } else {
            "HMAC-SHA256"
        }
    );
    info!(
        "Max concurrent tests: {}",
        config.max_concurrent_tests.max(1)
    );

    let server = TcpServer::bind(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    server.run(shutdown_rx).await?;
    info!("FLO server stopped");

    Ok(())
}
