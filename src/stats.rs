//! 전송 통계

use std::time::{Duration, Instant};

/// 세션 단위 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신 프레임 수
    pub frames_sent: u64,

    /// 송신 바이트
    pub bytes_sent: u64,

    /// 정상 수신 프레임 수
    pub frames_received: u64,

    /// 수신 바이트
    pub bytes_received: u64,

    /// 페이로드 디코딩 실패 수
    pub malformed_frames: u64,

    /// 수신 타임아웃 수
    pub receive_timeouts: u64,

    /// 인코딩 실패로 버린 송신 수
    pub encode_failures: u64,

    /// ACK 받은 명령 수
    pub commands_acked: u64,

    /// ACK 못 받은 명령 수
    pub commands_unacked: u64,

    /// 보낸 ACK 수
    pub acks_sent: u64,

    /// 기록된 청크 수 (첫 수신)
    pub chunks_written: u64,

    /// 복구된 청크 수 (부분 재요청)
    pub chunks_repaired: u64,

    /// 무시한 중복/범위 밖 청크 수
    pub chunks_ignored: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            frames_sent: 0,
            bytes_sent: 0,
            frames_received: 0,
            bytes_received: 0,
            malformed_frames: 0,
            receive_timeouts: 0,
            encode_failures: 0,
            commands_acked: 0,
            commands_unacked: 0,
            acks_sent: 0,
            chunks_written: 0,
            chunks_repaired: 0,
            chunks_ignored: 0,
        }
    }

    /// 프레임 송신 기록
    pub fn record_sent(&mut self, frame_len: usize) {
        self.frames_sent += 1;
        self.bytes_sent += frame_len as u64;
    }

    /// 프레임 수신 기록
    pub fn record_received(&mut self, frame_len: usize) {
        self.frames_received += 1;
        self.bytes_received += frame_len as u64;
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 수신 손실률 (타임아웃 + 손상 / 전체 수신 시도)
    pub fn loss_rate(&self) -> f64 {
        let lost = self.receive_timeouts + self.malformed_frames;
        let total = self.frames_received + lost;
        if total == 0 {
            return 0.0;
        }
        lost as f64 / total as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} frames ({} B) | Received: {} frames ({} B) | Loss: {:.1}% | Cmd ack: {}/{} | Chunks: {} written, {} repaired",
            self.elapsed().as_secs_f64(),
            self.frames_sent,
            self.bytes_sent,
            self.frames_received,
            self.bytes_received,
            self.loss_rate() * 100.0,
            self.commands_acked,
            self.commands_acked + self.commands_unacked,
            self.chunks_written,
            self.chunks_repaired,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_rate() {
        let mut stats = TransferStats::new();
        assert_eq!(stats.loss_rate(), 0.0);

        for _ in 0..7 {
            stats.record_received(100);
        }
        stats.receive_timeouts = 2;
        stats.malformed_frames = 1;

        assert!((stats.loss_rate() - 0.3).abs() < 1e-9);
        assert_eq!(stats.bytes_received, 700);
    }
}
