//! 프로토콜 설정

use std::time::Duration;

use crate::{Error, Result, DEFAULT_CHUNK_SIZE, DEFAULT_RETRIES, MAX_CHUNK_SIZE, MAX_SEQUENCE};

/// 수신 청크를 로컬 파일에 조립하는 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReassemblyMode {
    /// 도착 순서대로 append, 누락분은 삽입 복구
    ///
    /// 첫 수신에서 순서가 뒤바뀌면 바이트 순서도 도착 순서를 따름
    #[default]
    Append,

    /// 각 청크를 `index * chunk_size` 위치에 바로 기록
    Positional,
}

/// gslink 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 청크 크기 (바이트)
    pub chunk_size: usize,

    /// 부분 재요청 최대 횟수
    pub max_retries: u32,

    /// 프레임 수신 대기 타임아웃 (밀리초)
    pub receive_timeout_ms: u64,

    /// 명령 ACK 대기 타임아웃 (밀리초)
    pub ack_timeout_ms: u64,

    /// 조립 방식
    pub reassembly: ReassemblyMode,

    /// 응답 루프 종료 전 허용하는 연속 빈 수신 횟수
    pub idle_rounds: u32,

    /// 위성 명령 앞에 붙는 공유 비밀값
    pub command_secret: Vec<u8>,

    /// 패킷 단위 상세 로그
    pub log_packets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_retries: DEFAULT_RETRIES,
            receive_timeout_ms: 10_000,       // 10초
            ack_timeout_ms: 2_000,            // 2초
            reassembly: ReassemblyMode::Append,
            idle_rounds: 6,
            command_secret: Vec::new(),
            log_packets: false,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::InvalidChunkSize {
                chunk_size: self.chunk_size,
                max: MAX_CHUNK_SIZE,
            });
        }
        Ok(())
    }

    /// 파일 크기로부터 청크 수 계산
    ///
    /// 인덱스 0..=32766만 시퀀스 번호로 쓸 수 있으므로 32767개를 넘으면 거부
    pub fn chunks_for(&self, file_size: u64) -> Result<u32> {
        self.validate()?;
        let chunk_size = self.chunk_size as u64;
        let chunks = (file_size + chunk_size - 1) / chunk_size;
        if chunks > MAX_SEQUENCE as u64 {
            return Err(Error::FileTooLarge {
                chunks,
                max: MAX_SEQUENCE,
            });
        }
        Ok(chunks as u32)
    }

    /// 청크 인덱스의 파일 내 오프셋
    pub fn chunk_offset(&self, index: u32) -> u64 {
        index as u64 * self.chunk_size as u64
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// 장거리/저속 링크용 설정 (긴 대기, 재시도 증가)
    pub fn long_range() -> Self {
        Self {
            receive_timeout_ms: 30_000,
            ack_timeout_ms: 5_000,
            max_retries: 6,
            idle_rounds: 10,
            ..Self::default()
        }
    }

    /// UDP 루프백 벤치 테스트용 설정
    pub fn bench() -> Self {
        Self {
            receive_timeout_ms: 500,
            ack_timeout_ms: 200,
            idle_rounds: 20,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_for() {
        let config = Config::default();
        assert_eq!(config.chunks_for(0).unwrap(), 0);
        assert_eq!(config.chunks_for(245).unwrap(), 1);
        assert_eq!(config.chunks_for(246).unwrap(), 2);
        assert_eq!(config.chunks_for(1024).unwrap(), 5);
    }

    #[test]
    fn test_rejects_oversized_file() {
        let config = Config::default();
        let too_big = config.chunk_size as u64 * MAX_SEQUENCE as u64 + 1;
        assert!(matches!(
            config.chunks_for(too_big),
            Err(Error::FileTooLarge { .. })
        ));
    }

    #[test]
    fn test_chunk_count_boundary() {
        let config = Config::default();
        let at_limit = config.chunk_size as u64 * MAX_SEQUENCE as u64;
        assert_eq!(config.chunks_for(at_limit).unwrap(), MAX_SEQUENCE as u32);
        assert!(config.chunks_for(at_limit + 1).is_err());
    }

    #[test]
    fn test_long_range_preset() {
        let config = Config::long_range();
        assert!(config.validate().is_ok());
        assert!(config.receive_timeout() > Config::default().receive_timeout());
        assert!(config.ack_timeout() > Config::default().ack_timeout());
        assert!(config.max_retries > Config::default().max_retries);
    }

    #[test]
    fn test_validate_chunk_size() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.chunk_size = 0;
        assert!(config.validate().is_err());

        config.chunk_size = MAX_CHUNK_SIZE + 1;
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidChunkSize { .. })
        ));
    }
}
