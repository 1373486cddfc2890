//! FLO 클라이언트 - 구간 처리량 측정 클라이언트
//!
//! 서버에 세션을 열고 협상된 방향으로 측정을 구동함.
//!
//! 사용법:
//!   cargo run --release --bin flo_client -- [OPTIONS]
//!
//! 예시:
//!   # 10초 양방향 측정
//!   cargo run --release --bin flo_client -- -s 127.0.0.1 -p 9000
//!
//!   # HMAC 인증 + 다운로드 측정
//!   cargo run --release --bin flo_client -- -s 10.0.0.5 -k secret -d download

use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use flo::client::TcpClient;
use flo::config::RunOpts;
use flo::packet::Direction;
use flo::Error;

struct ClientArgs {
    host: String,
    port: u16,
    psk: Vec<u8>,
    timeout: Duration,
    opts: RunOpts,
    verbose: bool,
}

impl Default for ClientArgs {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9000,
            psk: Vec::new(),
            timeout: Duration::from_secs(3),
            opts: RunOpts::default(),
            verbose: false,
        }
    }
}

fn parse_direction(s: &str) -> Direction {
    match s {
        "bidi" => Direction::Bidi,
        "up" | "upload" => Direction::Upload,
        "down" | "download" => Direction::Download,
        _ => {
            eprintln!("알 수 없는 방향: {} (bidi/upload/download)", s);
            std::process::exit(1);
        }
    }
}

fn parse_args() -> ClientArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = ClientArgs::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.host = args[i + 1].clone();
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < args.len() {
                    parsed.port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--psk" | "-k" => {
                if i + 1 < args.len() {
                    parsed.psk = args[i + 1].clone().into_bytes();
                    i += 1;
                }
            }
            "--direction" | "-d" => {
                if i + 1 < args.len() {
                    parsed.opts.direction = parse_direction(&args[i + 1]);
                    i += 1;
                }
            }
            "--duration" | "-t" => {
                if i + 1 < args.len() {
                    let secs: f64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.opts.duration = Duration::from_secs_f64(secs);
                    i += 1;
                }
            }
            "--warmup" | "-w" => {
                if i + 1 < args.len() {
                    let secs: f64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.opts.warmup = Duration::from_secs_f64(secs);
                    i += 1;
                }
            }
            "--chunk-size" | "-c" => {
                if i + 1 < args.len() {
                    parsed.opts.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    parsed.timeout = Duration::from_secs(secs);
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                parsed.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"FLO Client - 구간 처리량 측정 클라이언트

사용법:
  cargo run --release --bin flo_client -- [OPTIONS]

옵션:
  -s, --server <HOST>     서버 호스트 (기본: 127.0.0.1)
  -p, --port <PORT>       서버 포트 (기본: 9000)
  -k, --psk <KEY>         HMAC 인증용 사전 공유 키
  -d, --direction <DIR>   방향: bidi/upload/download (기본: bidi)
  -t, --duration <SECS>   측정 시간 초 (기본: 10)
  -w, --warmup <SECS>     워밍업 시간 초 (기본: 1)
  -c, --chunk-size <N>    청크 크기 바이트, 10 ~ 10000000 (기본: 1024)
  --timeout <SECS>        컨트롤 플레인 타임아웃 초 (기본: 3)
  -v, --verbose           디버그 로그 출력
  -h, --help              이 도움말 출력

예시:
  # 10초 양방향 측정
  cargo run --release --bin flo_client -- -s 127.0.0.1

  # HMAC 인증 + 8KiB 청크 다운로드
  cargo run --release --bin flo_client -- -s 10.0.0.5 -k secret -d download -c 8192
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("FLO client starting...");
    info!("Server: {}:{}", args.host, args.port);
    info!("Direction: {:?}", args.opts.direction);
    info!(
        "Duration: {:?} (warmup {:?})",
        args.opts.duration, args.opts.warmup
    );
    info!("Chunk size: {} bytes", args.opts.chunk_size);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let client = TcpClient::new(args.host, args.port, args.psk, Some(args.timeout));
    match client.run(args.opts, shutdown_rx).await {
        Ok(_) => Ok(()),
        Err(e @ Error::AuthFailed) => {
            error!("{}", e);
            std::process::exit(2);
        }
        Err(e @ Error::Busy) => {
            error!("{}", e);
            std::process::exit(3);
        }
        Err(e) => {
            error!("Client error: {}", e);
            std::process::exit(1);
        }
    }
}
