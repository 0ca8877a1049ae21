//! 링크 계층
//!
//! 신뢰할 수 없는 반이중 전송 추상화. 실제 무선 드라이버는 이 트레이트를 구현하면 됨
//! - `MemoryLink`: 프로세스 내 양방향 채널 (테스트용, 결정적 손실 주입)
//! - `UdpLink`: 프레임 하나 = 데이터그램 하나 (무선 장비 없는 벤치 테스트용)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::packet::{PacketHeader, PacketKind};
use crate::{Config, Error, Result, ACK_TOKEN, FRAME_SIZE, HEADER_LEN, SENTINEL_SEQUENCE};

/// 송신 프레임 손실 여부 판정 (true = 버림)
pub type DropFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// 반이중 링크
pub trait Link {
    /// 프레임 전송 (수신 확인 없음)
    fn send(&mut self, frame: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// 프레임 전송 후 ACK 토큰 대기
    fn send_with_ack(&mut self, frame: &[u8]) -> impl Future<Output = bool> + Send;

    /// 정확히 `len` 바이트 수신. 타임아웃 또는 종료 시 `None`
    fn receive(&mut self, len: usize) -> impl Future<Output = Option<Bytes>> + Send;
}

/// 메시지 단위 수신원 (채널 메시지 하나 또는 데이터그램 하나)
trait MessageSource {
    /// 마감 시각까지 다음 메시지 대기
    fn next_message(&mut self, deadline: Instant) -> impl Future<Output = Option<Bytes>> + Send;

    /// 아직 읽지 않은 수신 바이트
    fn inbound(&mut self) -> &mut BytesMut;
}

/// 정확히 `len` 바이트가 모일 때까지 수신
///
/// 단독 메시지로 온 ACK 토큰은 늦게 도착한 확인 응답이므로 버림
async fn read_exact<S: MessageSource + Send>(
    source: &mut S,
    len: usize,
    wait: Duration,
) -> Option<Bytes> {
    let deadline = Instant::now() + wait;
    while source.inbound().len() < len {
        let message = source.next_message(deadline).await?;
        if message.as_ref() == ACK_TOKEN {
            debug!("늦은 ACK 무시");
            continue;
        }
        source.inbound().extend_from_slice(&message);
    }
    Some(source.inbound().split_to(len).freeze())
}

/// 마감 시각까지 ACK 토큰 탐색
///
/// 그 사이 도착한 다른 메시지는 다음 수신을 위해 보관
async fn wait_for_ack<S: MessageSource + Send>(source: &mut S, wait: Duration) -> bool {
    let deadline = Instant::now() + wait;
    while let Some(message) = source.next_message(deadline).await {
        if message.as_ref() == ACK_TOKEN {
            return true;
        }
        debug!("ACK 대기 중 수신한 {} bytes 보관", message.len());
        source.inbound().extend_from_slice(&message);
    }
    false
}

/// 모든 프레임을 `rate` 확률로 버리는 필터 (시드 고정)
pub fn random_loss(rate: f64, seed: u64) -> DropFilter {
    let rate = rate.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);
    Box::new(move |_frame| rng.gen_bool(rate))
}

/// 청크 프레임만 `rate` 확률로 버리는 필터
///
/// 명령, 청크 수, 동기 프레임, ACK 토큰은 항상 통과
pub fn chunk_loss(rate: f64, seed: u64) -> DropFilter {
    let rate = rate.clamp(0.0, 1.0);
    let mut rng = StdRng::seed_from_u64(seed);
    Box::new(move |frame| is_chunk_frame(frame) && rng.gen_bool(rate))
}

/// 시퀀스 번호가 붙은 데이터 프레임인지
pub fn is_chunk_frame(frame: &[u8]) -> bool {
    if frame.len() <= HEADER_LEN || frame == ACK_TOKEN {
        return false;
    }
    match PacketHeader::decode(frame) {
        Ok(header) => header.kind == PacketKind::Data && header.sequence != SENTINEL_SEQUENCE,
        Err(_) => false,
    }
}

/// 프로세스 내 링크 (한 쌍으로 생성)
pub struct MemoryLink {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    inbound: BytesMut,
    receive_timeout: Duration,
    ack_timeout: Duration,
    drop_filter: Option<DropFilter>,
    delivered: Arc<Mutex<Vec<Bytes>>>,
}

impl MemoryLink {
    /// 연결된 링크 한 쌍 생성
    pub fn pair(config: &Config) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self::new(a_tx, a_rx, config),
            Self::new(b_tx, b_rx, config),
        )
    }

    fn new(
        tx: mpsc::UnboundedSender<Bytes>,
        rx: mpsc::UnboundedReceiver<Bytes>,
        config: &Config,
    ) -> Self {
        Self {
            tx,
            rx,
            inbound: BytesMut::with_capacity(FRAME_SIZE),
            receive_timeout: config.receive_timeout(),
            ack_timeout: config.ack_timeout(),
            drop_filter: None,
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 송신 손실 필터 설정
    pub fn with_drop_filter(mut self, filter: DropFilter) -> Self {
        self.drop_filter = Some(filter);
        self
    }

    /// 이 쪽에서 실제로 전달된 프레임 기록 (손실 필터 통과분)
    pub fn delivered_log(&self) -> Arc<Mutex<Vec<Bytes>>> {
        self.delivered.clone()
    }
}

impl MessageSource for MemoryLink {
    async fn next_message(&mut self, deadline: Instant) -> Option<Bytes> {
        timeout_at(deadline, self.rx.recv()).await.ok().flatten()
    }

    fn inbound(&mut self) -> &mut BytesMut {
        &mut self.inbound
    }
}

impl Link for MemoryLink {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(filter) = self.drop_filter.as_mut() {
            if filter(frame) {
                debug!("프레임 손실 주입: {} bytes", frame.len());
                return Ok(());
            }
        }
        let frame = Bytes::copy_from_slice(frame);
        self.delivered.lock().push(frame.clone());
        self.tx.send(frame).map_err(|_| Error::ConnectionClosed)
    }

    async fn send_with_ack(&mut self, frame: &[u8]) -> bool {
        if let Err(e) = self.send(frame).await {
            warn!("명령 전송 실패: {}", e);
            return false;
        }
        let wait = self.ack_timeout;
        wait_for_ack(self, wait).await
    }

    async fn receive(&mut self, len: usize) -> Option<Bytes> {
        let wait = self.receive_timeout;
        read_exact(self, len, wait).await
    }
}

/// UDP 링크 (연결된 소켓, 프레임당 데이터그램 하나)
pub struct UdpLink {
    socket: UdpSocket,
    inbound: BytesMut,
    recv_buf: Vec<u8>,
    receive_timeout: Duration,
    ack_timeout: Duration,
    drop_filter: Option<DropFilter>,
}

impl UdpLink {
    /// 소켓 바인딩 후 상대 주소로 연결
    pub async fn connect(bind_addr: SocketAddr, peer_addr: SocketAddr, config: &Config) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(peer_addr).await?;
        Ok(Self::from_socket(socket, config))
    }

    /// 이미 연결된 소켓으로 생성
    pub fn from_socket(socket: UdpSocket, config: &Config) -> Self {
        Self {
            socket,
            inbound: BytesMut::with_capacity(FRAME_SIZE),
            recv_buf: vec![0u8; 2048],
            receive_timeout: config.receive_timeout(),
            ack_timeout: config.ack_timeout(),
            drop_filter: None,
        }
    }

    /// 송신 손실 필터 설정
    pub fn with_drop_filter(mut self, filter: DropFilter) -> Self {
        self.drop_filter = Some(filter);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl MessageSource for UdpLink {
    async fn next_message(&mut self, deadline: Instant) -> Option<Bytes> {
        loop {
            match timeout_at(deadline, self.socket.recv(&mut self.recv_buf)).await {
                Ok(Ok(n)) => return Some(Bytes::copy_from_slice(&self.recv_buf[..n])),
                Ok(Err(e)) => {
                    // 상대가 아직 떠 있지 않으면 ICMP 거부가 올 수 있음
                    debug!("UDP 수신 에러: {}", e);
                }
                Err(_) => return None,
            }
        }
    }

    fn inbound(&mut self) -> &mut BytesMut {
        &mut self.inbound
    }
}

impl Link for UdpLink {
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        if let Some(filter) = self.drop_filter.as_mut() {
            if filter(frame) {
                debug!("프레임 손실 주입: {} bytes", frame.len());
                return Ok(());
            }
        }
        self.socket.send(frame).await?;
        Ok(())
    }

    async fn send_with_ack(&mut self, frame: &[u8]) -> bool {
        if let Err(e) = self.send(frame).await {
            warn!("명령 전송 실패: {}", e);
            return false;
        }
        let wait = self.ack_timeout;
        wait_for_ack(self, wait).await
    }

    async fn receive(&mut self, len: usize) -> Option<Bytes> {
        let wait = self.receive_timeout;
        read_exact(self, len, wait).await
    }
}
