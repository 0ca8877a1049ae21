//! gs-server - 위성측 파일 서버 시뮬레이터
//!
//! UDP 링크로 지상국 요청('s', 'e', send_file 명령)에 응답
//! - 지정한 루트 디렉터리 아래 파일만 전송
//! - 청크 프레임 손실 주입 (시드 고정)
//!
//! 사용법:
//!   cargo run --release --bin gs-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 서버
//!   cargo run --release --bin gs-server -- --root ./sat_fs
//!
//!   # 청크 30% 손실
//!   cargo run --release --bin gs-server -- -r ./sat_fs --loss 0.3 --seed 7
//!
//!   # ACK와 명령 응답까지 10% 손실
//!   cargo run --release --bin gs-server -- -r ./sat_fs --loss-all 0.1

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gslink::link::{chunk_loss, random_loss};
use gslink::{Config, FileTransfer, UdpLink};

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    root: PathBuf,
    loss: f64,
    loss_all: f64,
    seed: u64,
    once: bool,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9100)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 9101)),
            root: PathBuf::from("."),
            loss: 0.0,
            loss_all: 0.0,
            seed: 0,
            once: false,
            config: Config::bench(),
        }
    }
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} 값 필요", flag))
}

fn parse_args() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();
    // 프리셋은 다른 옵션보다 먼저 적용
    if args.iter().any(|arg| arg == "--long-range") {
        config.config = Config::long_range();
    }

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--bind" | "-b" => config.bind_addr = next_value(&args, &mut i, flag)?.parse()?,
            "--peer" | "-p" => config.peer_addr = next_value(&args, &mut i, flag)?.parse()?,
            "--root" | "-r" => config.root = PathBuf::from(next_value(&args, &mut i, flag)?),
            "--loss" => config.loss = next_value(&args, &mut i, flag)?.parse()?,
            "--loss-all" => config.loss_all = next_value(&args, &mut i, flag)?.parse()?,
            "--seed" => config.seed = next_value(&args, &mut i, flag)?.parse()?,
            "--chunk-size" => {
                config.config.chunk_size = next_value(&args, &mut i, flag)?.parse()?
            }
            "--idle-rounds" => {
                config.config.idle_rounds = next_value(&args, &mut i, flag)?.parse()?
            }
            "--secret" => {
                config.config.command_secret = next_value(&args, &mut i, flag)?.as_bytes().to_vec()
            }
            "--once" => config.once = true,
            "--long-range" => {}
            "--verbose" | "-v" => config.config.log_packets = true,
            "--help" | "-h" => {
                println!(
                    r#"gs-server - 위성측 파일 서버 시뮬레이터

지상국의 파일 요청에 응답하는 반이중 링크 서버 (UDP)
- 'e' 부분 요청으로 누락 청크만 재전송
- 청크 프레임 손실 주입으로 무선 구간 흉내

사용법:
  cargo run --release --bin gs-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 127.0.0.1:9100)
  -p, --peer <ADDR>       지상국 주소 (기본: 127.0.0.1:9101)
  -r, --root <DIR>        파일 루트 디렉터리 (기본: .)
  --loss <RATE>           청크 프레임 손실률 0.0~1.0 (기본: 0)
  --loss-all <RATE>       모든 송신 프레임 손실률, ACK 포함 (--loss 대신 적용)
  --seed <N>              손실 난수 시드 (기본: 0)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 245, 최대 247)
  --idle-rounds <N>       대기 사이클 종료 전 빈 수신 횟수 (기본: 20)
  --secret <TEXT>         위성 명령 비밀값
  --once                  대기 사이클 한 번만 실행
  --long-range            실제 무선 구간용 타이밍 (긴 타임아웃)
  -v, --verbose           패킷 단위 로그
  -h, --help              이 도움말 출력

예시:
  # 청크 30% 손실
  cargo run --release --bin gs-server -- -r ./sat_fs --loss 0.3 --seed 7
"#
                );
                std::process::exit(0);
            }
            other => warn!("Unknown argument: {}", other),
        }
        i += 1;
    }

    config.config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG 우선)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let server_config = parse_args()?;

    info!("gs-server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("Ground station: {}", server_config.peer_addr);
    info!("Root: {:?}", server_config.root);
    info!("Chunk size: {} bytes", server_config.config.chunk_size);
    info!("Chunk loss: {:.1}%", server_config.loss * 100.0);

    let mut link = UdpLink::connect(
        server_config.bind_addr,
        server_config.peer_addr,
        &server_config.config,
    )
    .await?;
    if server_config.loss_all > 0.0 {
        info!("Frame loss: {:.1}% (all frames)", server_config.loss_all * 100.0);
        link = link.with_drop_filter(random_loss(server_config.loss_all, server_config.seed));
    } else if server_config.loss > 0.0 {
        link = link.with_drop_filter(chunk_loss(server_config.loss, server_config.seed));
    }
    info!("Listening on {}", link.local_addr()?);

    let mut transfer = FileTransfer::new(link, server_config.config.clone())?;

    loop {
        tokio::select! {
            served = transfer.serve(&server_config.root) => {
                let served = served?;
                if served > 0 {
                    info!("Cycle finished: {} requests served", served);
                    info!("{}", transfer.stats().summary());
                }
                if server_config.once {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    info!("{}", transfer.stats().summary());
    Ok(())
}
