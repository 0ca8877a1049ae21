//! 패킷 전송 세션 (PTP)
//!
//! - 패킷 하나 단위 송수신
//! - 명령 패킷 수신 시 즉시 ACK 토큰 응답
//! - 재시도 정책 없음 (FTP 계층 담당)

use rmpv::Value;
use tracing::{debug, warn};

use crate::link::Link;
use crate::packet::{self, Packet, PacketHeader, PacketKind};
use crate::stats::TransferStats;
use crate::{Config, ACK_TOKEN, HEADER_LEN, SENTINEL_SEQUENCE};

/// 수신 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// 정상 패킷
    Packet(Packet),

    /// 페이로드 손상 또는 잘림
    Malformed,

    /// 타임아웃 (수신된 프레임 없음)
    NoPacket,
}

impl Received {
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Received::Packet(packet) => Some(packet),
            _ => None,
        }
    }
}

/// 링크를 독점하는 패킷 세션
pub struct PacketSession<L> {
    link: L,
    stats: TransferStats,
    log_packets: bool,
}

impl<L: Link> PacketSession<L> {
    pub fn new(link: L, config: &Config) -> Self {
        Self {
            link,
            stats: TransferStats::new(),
            log_packets: config.log_packets,
        }
    }

    /// 명령 패킷 전송 후 ACK 대기
    ///
    /// 시퀀스는 항상 sentinel. ACK를 받았는지만 반환
    pub async fn send_command(&mut self, command: &Value) -> bool {
        let frame = match packet::encode(PacketKind::Command, command, SENTINEL_SEQUENCE) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("명령 인코딩 실패: {}", e);
                self.stats.encode_failures += 1;
                return false;
            }
        };

        self.trace("명령 송신", &frame);
        self.stats.record_sent(frame.len());

        let acked = self.link.send_with_ack(&frame).await;
        if acked {
            self.stats.commands_acked += 1;
        } else {
            debug!("ACK 미수신");
            self.stats.commands_unacked += 1;
        }
        acked
    }

    /// 데이터 패킷 전송 (ACK 없음)
    ///
    /// 인코딩 실패 시에만 false
    pub async fn send_data(&mut self, payload: &Value, sequence: u16) -> bool {
        let frame = match packet::encode(PacketKind::Data, payload, sequence) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("데이터 인코딩 실패: seq={}, {}", sequence, e);
                self.stats.encode_failures += 1;
                return false;
            }
        };

        self.trace("데이터 송신", &frame);
        self.stats.record_sent(frame.len());

        if let Err(e) = self.link.send(&frame).await {
            warn!("데이터 전송 실패: seq={}, {}", sequence, e);
        }
        true
    }

    /// 패킷 하나 수신
    ///
    /// 헤더 3바이트, 페이로드 순으로 대기. 손상/타임아웃은 에러 대신 variant로 반환
    pub async fn receive(&mut self) -> Received {
        let header_bytes = match self.link.receive(HEADER_LEN).await {
            Some(bytes) => bytes,
            None => {
                self.stats.receive_timeouts += 1;
                return Received::NoPacket;
            }
        };

        let header = match PacketHeader::decode(&header_bytes) {
            Ok(header) => header,
            Err(e) => {
                warn!("헤더 디코딩 실패: {}", e);
                self.stats.malformed_frames += 1;
                return Received::Malformed;
            }
        };

        let body = match self.link.receive(header.payload_len as usize).await {
            Some(body) => body,
            None => {
                warn!(
                    "페이로드 잘림: seq={}, expected {} bytes",
                    header.sequence, header.payload_len
                );
                self.stats.malformed_frames += 1;
                return Received::Malformed;
            }
        };

        let payload = match packet::decode_payload(&body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("페이로드 디코딩 실패: seq={}, {}", header.sequence, e);
                self.stats.malformed_frames += 1;
                return Received::Malformed;
            }
        };

        if header.kind == PacketKind::Command {
            match self.link.send(ACK_TOKEN).await {
                Ok(()) => self.stats.acks_sent += 1,
                Err(e) => warn!("ACK 전송 실패: {}", e),
            }
        }

        self.stats.record_received(header.frame_len());
        if self.log_packets {
            debug!(
                "패킷 수신: kind={:?}, seq={}, len={}",
                header.kind, header.sequence, header.payload_len
            );
        }

        Received::Packet(Packet {
            kind: header.kind,
            sequence: header.sequence,
            payload,
        })
    }

    fn trace(&self, what: &str, frame: &[u8]) {
        if self.log_packets {
            debug!(
                "{}: len={}, crc={:08X}",
                what,
                frame.len(),
                packet::checksum(frame)
            );
        }
    }

    /// 통계 반환
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub(crate) fn stats_mut(&mut self) -> &mut TransferStats {
        &mut self.stats
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::MemoryLink;

    fn sessions() -> (PacketSession<MemoryLink>, PacketSession<MemoryLink>) {
        let config = Config {
            receive_timeout_ms: 100,
            ack_timeout_ms: 50,
            log_packets: true,
            ..Config::default()
        };
        let (a, b) = MemoryLink::pair(&config);
        (PacketSession::new(a, &config), PacketSession::new(b, &config))
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_is_acked() {
        let (mut ground, mut sat) = sessions();
        let command = Value::Array(vec![Value::from("s"), Value::from("/sd/a.bin")]);

        let (acked, received) = tokio::join!(ground.send_command(&command), sat.receive());

        assert!(acked);
        let packet = received.into_packet().unwrap();
        assert_eq!(packet.kind, PacketKind::Command);
        assert_eq!(packet.sequence, SENTINEL_SEQUENCE);
        assert_eq!(packet.payload, command);
        assert_eq!(sat.stats().acks_sent, 1);
        assert_eq!(ground.stats().commands_acked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_after_pending_data_frame() {
        let (mut ground, mut sat) = sessions();

        // 이전 사이클에서 늦게 보낸 청크가 ACK보다 먼저 도착
        assert!(sat.send_data(&Value::Binary(vec![4, 5, 6]), 2).await);
        let command = Value::from("s");
        let (acked, received) = tokio::join!(ground.send_command(&command), sat.receive());

        assert!(acked);
        assert!(received.into_packet().is_some());
        let packet = ground.receive().await.into_packet().unwrap();
        assert_eq!(packet.sequence, 2);
        assert_eq!(packet.binary(), Some(&[4u8, 5, 6][..]));
        assert_eq!(ground.stats().malformed_frames, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ack_does_not_break_framing() {
        let (mut ground, mut sat) = sessions();

        // 위성이 ACK 타임아웃 뒤에 명령을 처리
        assert!(!ground.send_command(&Value::from("s")).await);
        assert!(sat.receive().await.into_packet().is_some());
        sat.send_data(&Value::from(-3), SENTINEL_SEQUENCE).await;

        let packet = ground.receive().await.into_packet().unwrap();
        assert_eq!(packet.payload.as_i64(), Some(-3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_without_listener_times_out() {
        let (mut ground, _sat) = sessions();
        assert!(!ground.send_command(&Value::from("s")).await);
        assert_eq!(ground.stats().commands_unacked, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_data_packet() {
        let (mut ground, mut sat) = sessions();

        assert!(sat.send_data(&Value::Binary(vec![1, 2, 3]), 7).await);
        let packet = ground.receive().await.into_packet().unwrap();

        assert_eq!(packet.kind, PacketKind::Data);
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.binary(), Some(&[1u8, 2, 3][..]));
        // 데이터 패킷에는 ACK가 없음
        assert_eq!(ground.stats().acks_sent, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_data_rejects_oversized() {
        let (mut ground, _sat) = sessions();
        assert!(!ground.send_data(&Value::Binary(vec![0; 248]), 0).await);
        assert_eq!(ground.stats().frames_sent, 0);
        assert_eq!(ground.stats().encode_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_then_recovery() {
        let (mut ground, mut sat) = sessions();

        // 헤더는 2바이트 페이로드를 가리키지만 0xc1은 MessagePack에서 쓰이지 않는 바이트
        let header = PacketHeader::new(PacketKind::Data, 2, 3).unwrap();
        let mut raw = header.to_bytes().to_vec();
        raw.extend_from_slice(&[0xc1, 0xc1]);
        sat.link_mut().send(&raw).await.unwrap();
        sat.send_data(&Value::from(-2), SENTINEL_SEQUENCE).await;

        assert_eq!(ground.receive().await, Received::Malformed);
        let packet = ground.receive().await.into_packet().unwrap();
        assert_eq!(packet.payload.as_i64(), Some(-2));
        assert_eq!(ground.stats().malformed_frames, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_no_packet() {
        let (mut ground, _sat) = sessions();
        assert_eq!(ground.receive().await, Received::NoPacket);
        assert_eq!(ground.stats().receive_timeouts, 1);
    }
}
