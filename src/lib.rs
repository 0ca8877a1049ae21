//! # gslink
//!
//! 위성 지상국용 반이중 무선 링크 프로토콜 스택
//!
//! ## 구성
//! - **PTP (Packet Transfer Protocol)**: 3바이트 헤더 + MessagePack 페이로드, 명령 패킷 ACK
//! - **FTP (File Transfer Protocol)**: 청크 분할 전송, 누락 추적, 선택적 재요청/복구
//! - **Link**: 신뢰할 수 없는 반이중 전송 계층 추상화 (메모리 / UDP)
//! - **GroundStation**: 웨이크 사이클 단위 컨텍스트

pub mod command;
pub mod config;
pub mod error;
pub mod link;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod session;
pub mod station;
pub mod stats;
pub mod storage;
pub mod transfer;

pub use command::{Command, SatelliteCommand};
pub use config::{Config, ReassemblyMode};
pub use error::{Error, Result};
pub use link::{Link, MemoryLink, UdpLink};
pub use packet::{Packet, PacketHeader, PacketKind};
pub use session::{PacketSession, Received};
pub use station::GroundStation;
pub use stats::TransferStats;
pub use transfer::{FileTransfer, MissingSet, TransferCheckpoint, TransferReport, TransferState};

/// 무선 프레임 최대 크기 (바이트)
pub const FRAME_SIZE: usize = 252;

/// 패킷 헤더 길이 (바이트)
pub const HEADER_LEN: usize = 3;

/// 페이로드 최대 길이 (프레임 - 헤더)
pub const MAX_PAYLOAD_LEN: usize = FRAME_SIZE - HEADER_LEN;

/// 최대 시퀀스 번호 (15비트)
pub const MAX_SEQUENCE: u16 = (1 << 15) - 1;

/// 순서 없는 제어 패킷용 시퀀스
pub const SENTINEL_SEQUENCE: u16 = MAX_SEQUENCE;

/// 기본 청크 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 245;

/// 최대 청크 크기: bin8 인코딩 오버헤드 2바이트를 빼고 페이로드에 들어가는 크기
pub const MAX_CHUNK_SIZE: usize = MAX_PAYLOAD_LEN - 2;

/// 기본 재시도 횟수
pub const DEFAULT_RETRIES: u32 = 3;

/// 명령 패킷 수신 확인 토큰
pub const ACK_TOKEN: &[u8; 3] = b"ACK";
