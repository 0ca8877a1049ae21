//! gs-client - 지상국 클라이언트
//!
//! UDP 링크로 위성측 서버에 파일을 요청하고 누락 청크는 부분 요청으로 복구
//! - 실패 시 체크포인트 저장, 다음 실행에서 재개
//! - 위성 명령 전송 (공유 비밀값 접두사)
//!
//! 사용법:
//!   cargo run --release --bin gs-client -- [OPTIONS]
//!
//! 예시:
//!   # 파일 요청
//!   cargo run --release --bin gs-client -- --remote /sd/img0021.jpg --output img.jpg
//!
//!   # 실패한 전송 재개
//!   cargo run --release --bin gs-client -- --resume img.ckpt

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use gslink::{
    Config, GroundStation, ReassemblyMode, SatelliteCommand, TransferCheckpoint, TransferReport,
    UdpLink,
};

/// 클라이언트 설정
struct ClientConfig {
    bind_addr: SocketAddr,
    peer_addr: SocketAddr,
    remote_path: Option<String>,
    output_path: Option<PathBuf>,
    checkpoint_path: Option<PathBuf>,
    resume_path: Option<PathBuf>,
    command: Option<String>,
    command_arg: Option<String>,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 9101)),
            peer_addr: SocketAddr::from(([127, 0, 0, 1], 9100)),
            remote_path: None,
            output_path: None,
            checkpoint_path: None,
            resume_path: None,
            command: None,
            command_arg: None,
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

fn parse_args() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();
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
            "--remote" | "-r" => {
                config.remote_path = Some(next_value(&args, &mut i, flag)?.to_string())
            }
            "--output" | "-o" => {
                config.output_path = Some(PathBuf::from(next_value(&args, &mut i, flag)?))
            }
            "--retries" => config.config.max_retries = next_value(&args, &mut i, flag)?.parse()?,
            "--chunk-size" => {
                config.config.chunk_size = next_value(&args, &mut i, flag)?.parse()?
            }
            "--timeout" => {
                config.config.receive_timeout_ms = next_value(&args, &mut i, flag)?.parse()?
            }
            "--positional" => config.config.reassembly = ReassemblyMode::Positional,
            "--checkpoint" => {
                config.checkpoint_path = Some(PathBuf::from(next_value(&args, &mut i, flag)?))
            }
            "--resume" => {
                config.resume_path = Some(PathBuf::from(next_value(&args, &mut i, flag)?))
            }
            "--secret" => {
                config.config.command_secret = next_value(&args, &mut i, flag)?.as_bytes().to_vec()
            }
            "--command" | "-c" => {
                config.command = Some(next_value(&args, &mut i, flag)?.to_string())
            }
            "--arg" => config.command_arg = Some(next_value(&args, &mut i, flag)?.to_string()),
            "--long-range" => {}
            "--verbose" | "-v" => config.config.log_packets = true,
            "--help" | "-h" => {
                println!(
                    r#"gs-client - 지상국 클라이언트

반이중 링크로 위성측 파일을 요청하고 누락 청크를 선택적으로 복구
- 전체 요청 후 누락분만 부분 요청 (재시도 한도 내)
- 실패 시 체크포인트 저장 후 다음 사이클에서 재개

사용법:
  cargo run --release --bin gs-client -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 127.0.0.1:9101)
  -p, --peer <ADDR>       위성측 주소 (기본: 127.0.0.1:9100)
  -r, --remote <PATH>     원격 파일 경로
  -o, --output <PATH>     저장 경로 (기본: 원격 파일 이름)
  --retries <N>           부분 요청 재시도 횟수 (기본: 3)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 245, 최대 247)
  --timeout <MS>          프레임 수신 타임아웃 (기본: 500)
  --positional            청크를 인덱스 위치에 바로 기록
  --checkpoint <PATH>     실패 시 체크포인트 저장 경로
  --resume <PATH>         체크포인트에서 재개
  --secret <TEXT>         위성 명령 비밀값
  -c, --command <NAME>    위성 명령 (no-op, hreset, shutdown, query, exec_cmd, send_file)
  --arg <TEXT>            위성 명령 인자
  --long-range            실제 무선 구간용 타이밍 (긴 타임아웃, 재시도 6)
  -v, --verbose           패킷 단위 로그
  -h, --help              이 도움말 출력

예시:
  # 파일 요청, 실패 시 체크포인트 저장
  cargo run --release --bin gs-client -- -r /sd/img0021.jpg -o img.jpg --checkpoint img.ckpt

  # 위성 명령
  cargo run --release --bin gs-client -- --secret p4ss -c query --arg cubesat.f_deployed
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

/// 출력 경로가 없으면 원격 파일 이름 사용
fn output_for(config: &ClientConfig, remote: &str) -> PathBuf {
    config.output_path.clone().unwrap_or_else(|| {
        PathBuf::from(remote.rsplit('/').next().unwrap_or(remote))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG 우선)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client_config = parse_args()?;

    info!("gs-client starting...");
    info!("Bind address: {}", client_config.bind_addr);
    info!("Satellite: {}", client_config.peer_addr);
    info!("Chunk size: {} bytes", client_config.config.chunk_size);
    info!("Retries: {}", client_config.config.max_retries);

    let link = UdpLink::connect(
        client_config.bind_addr,
        client_config.peer_addr,
        &client_config.config,
    )
    .await?;
    let mut station = GroundStation::new(link, client_config.config.clone())?;

    let (remote, output, report): (String, PathBuf, TransferReport) =
        if let Some(name) = client_config.command.as_deref() {
            let arg = client_config.command_arg.as_deref();
            let Some(command) = SatelliteCommand::from_name(name, arg) else {
                return Err(format!("unknown command: {}", name).into());
            };
            match command {
                SatelliteCommand::SendFile(remote) => {
                    let output = output_for(&client_config, &remote);
                    let report = station.download(&remote, &output).await?;
                    (remote, output, report)
                }
                command => {
                    let acked = station.send_command(&command).await;
                    info!("{}", station.stats().summary());
                    if !acked {
                        return Err(format!("command not acknowledged: {}", command.name()).into());
                    }
                    return Ok(());
                }
            }
        } else if let Some(path) = &client_config.resume_path {
            let checkpoint = TransferCheckpoint::load(path)?;
            info!(
                "Resuming {} ({} chunks missing)",
                checkpoint.remote_path,
                checkpoint.missing.len()
            );
            let report = station.resume(&checkpoint).await?;
            (checkpoint.remote_path, checkpoint.local_path, report)
        } else if let Some(remote) = client_config.remote_path.clone() {
            let output = output_for(&client_config, &remote);
            let report = station.request_file(&remote, &output).await?;
            (remote, output, report)
        } else {
            return Err("--remote, --resume or --command required (see --help)".into());
        };

    info!("{}", station.stats().summary());

    if report.complete {
        info!("Saved {:?} ({} chunks)", output, report.total_chunks);
        if let Some(path) = &client_config.resume_path {
            // 완료된 체크포인트 정리
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove checkpoint {:?}: {}", path, e);
            }
        }
        return Ok(());
    }

    warn!(
        "Transfer incomplete: {} of {} chunks missing",
        report.missing.len(),
        report.total_chunks
    );
    let checkpoint_path = client_config
        .checkpoint_path
        .clone()
        .or_else(|| client_config.resume_path.clone());
    if let Some(path) = checkpoint_path {
        report.checkpoint(&remote, &output).save(&path)?;
        info!("Checkpoint saved: {:?}", path);
    }
    Err(format!("transfer of {} incomplete", remote).into())
}
