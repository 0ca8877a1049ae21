//! 송신측 (위성/원격)
//!
//! - 청크 수 프레임 + 청크 전체 전송
//! - 동기 프레임 + 요청된 청크만 재전송
//! - 명령 대기 루프

use std::fs::File;
use std::path::Path;

use rmpv::Value;
use tracing::{debug, info, warn};

use crate::command::{Command, SatelliteCommand};
use crate::link::Link;
use crate::packet::PacketKind;
use crate::session::Received;
use crate::storage::{self, ChunkReader};
use crate::transfer::{resolve_remote_path, FileTransfer};
use crate::{Result, SENTINEL_SEQUENCE};

impl<L: Link> FileTransfer<L> {
    /// 파일 전체 전송
    ///
    /// `-(청크 수)` 프레임(sentinel 시퀀스) 후 각 청크를 인덱스 시퀀스로 전송.
    /// 실제로 링크에 넘긴 청크 수 반환
    pub async fn send_file(&mut self, path: &Path) -> Result<u32> {
        let size = storage::file_size(path)?;
        let total_chunks = self.config.chunks_for(size)?;
        info!(
            "파일 전송 시작: {:?}, {} bytes, {} chunks",
            path, size, total_chunks
        );

        let count = Value::from(-i64::from(total_chunks));
        if !self.session.send_data(&count, SENTINEL_SEQUENCE).await {
            warn!("청크 수 프레임 전송 실패: {:?}", path);
        }

        let mut sent = 0;
        for chunk in ChunkReader::open(path, self.config.chunk_size)? {
            let (index, data) = chunk?;
            // stat 이후 파일이 커진 경우 알린 청크 수까지만
            if index >= total_chunks {
                break;
            }
            if self.session.send_data(&Value::Binary(data), index as u16).await {
                sent += 1;
            }
        }

        debug!("파일 전송 완료: {:?}, {}/{} chunks", path, sent, total_chunks);
        Ok(sent)
    }

    /// 요청된 청크만 재전송
    ///
    /// 먼저 동기 프레임(nil, sentinel 시퀀스)을 보내고 요청 순서대로 청크 전송.
    /// 파일 끝 이후 인덱스는 건너뜀
    pub async fn send_partial_file(&mut self, path: &Path, indices: &[u32]) -> Result<u32> {
        let mut file = File::open(path)?;
        info!("부분 전송: {:?}, {} chunks", path, indices.len());

        self.session.send_data(&Value::Nil, SENTINEL_SEQUENCE).await;

        let mut sent = 0;
        for &index in indices {
            if index >= u32::from(SENTINEL_SEQUENCE) {
                warn!("시퀀스 범위 밖 청크 요청: {}", index);
                continue;
            }
            let offset = self.config.chunk_offset(index);
            let data = storage::read_chunk_at(&mut file, offset, self.config.chunk_size)?;
            if data.is_empty() {
                warn!("파일 범위 밖 청크 요청: {:?} chunk={}", path, index);
                continue;
            }
            if self.session.send_data(&Value::Binary(data), index as u16).await {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// FTP 요청 하나 처리
    pub async fn handle_command(&mut self, root: &Path, command: &Command) -> Result<u32> {
        let path = resolve_remote_path(root, command.path())?;
        match command {
            Command::RequestFile { .. } => self.send_file(&path).await,
            Command::RequestPartialFile { missing, .. } => {
                self.send_partial_file(&path, missing).await
            }
        }
    }

    /// 명령 대기 루프
    ///
    /// `root` 아래 파일에 대한 요청에 응답. 연속 `idle_rounds`번 빈 수신이면 종료.
    /// 요청별 실패는 로그만 남기고 계속 진행. 처리한 요청 수 반환
    pub async fn serve(&mut self, root: &Path) -> Result<u32> {
        let idle_limit = self.config.idle_rounds;
        let mut idle = 0;
        let mut served = 0;
        info!("명령 대기 시작: root={:?}", root);

        while idle < idle_limit {
            let packet = match self.session.receive().await {
                Received::Packet(packet) => packet,
                Received::Malformed | Received::NoPacket => {
                    idle += 1;
                    continue;
                }
            };
            idle = 0;

            if packet.kind != PacketKind::Command {
                debug!("명령이 아닌 패킷 무시: seq={}", packet.sequence);
                continue;
            }

            let outcome = if let Some(command) = Command::from_value(&packet.payload) {
                self.handle_command(root, &command).await
            } else if let Some(command) = packet
                .binary()
                .and_then(|bytes| SatelliteCommand::parse(&self.config.command_secret, bytes))
            {
                self.handle_satellite_command(root, &command).await
            } else {
                warn!("알 수 없는 명령 무시");
                continue;
            };

            match outcome {
                Ok(sent) => {
                    served += 1;
                    debug!("요청 처리: {} chunks 전송", sent);
                }
                Err(e) => warn!("요청 처리 실패: {}", e),
            }
        }

        info!("명령 대기 종료: {}건 처리", served);
        Ok(served)
    }

    async fn handle_satellite_command(
        &mut self,
        root: &Path,
        command: &SatelliteCommand,
    ) -> Result<u32> {
        info!("위성 명령 수신: {}", command.name());
        match command {
            SatelliteCommand::SendFile(name) => {
                let path = resolve_remote_path(root, name)?;
                self.send_file(&path).await
            }
            _ => Ok(0),
        }
    }
}
