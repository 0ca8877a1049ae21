//! 에러 타입 정의

use thiserror::Error;

/// gslink 에러 타입
///
/// 일반적인 링크 손실은 에러가 아니라 `Received::NoPacket` / 누락 집합으로 표현됨.
/// 여기 있는 것은 계약 위반과 저장소 에러뿐
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("체크포인트 직렬화 에러: {0}")]
    Checkpoint(#[from] bincode::Error),

    #[error("페이로드 인코딩 에러: {0}")]
    Encode(String),

    #[error("페이로드 디코딩 에러: {0}")]
    Decode(String),

    #[error("페이로드 크기 초과: {len} bytes (최대 {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("시퀀스 범위 초과: {sequence} (최대 {max})")]
    SequenceOutOfRange { sequence: u32, max: u16 },

    #[error("헤더 길이 부족: {len} bytes")]
    TruncatedHeader { len: usize },

    #[error("유효하지 않은 청크 크기: {chunk_size} (허용 범위 1..={max})")]
    InvalidChunkSize { chunk_size: usize, max: usize },

    #[error("파일이 너무 큼: {chunks} 청크 필요 (최대 {max})")]
    FileTooLarge { chunks: u64, max: u16 },

    #[error("청크 수 프레임 수신 실패")]
    ChunkCountUnavailable,

    #[error("유효하지 않은 원격 경로: {0}")]
    InvalidRemotePath(String),

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
