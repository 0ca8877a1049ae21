//! 수신측 (지상국)
//!
//! - 청크 수 프레임 대기 후 청크 수신/조립
//! - 누락 청크 부분 재요청 (재시도 한도 내)
//! - 체크포인트에서 재개

use std::path::Path;

use rmpv::Value;
use tracing::{debug, info, warn};

use crate::command::{repair_batch, Command};
use crate::link::Link;
use crate::session::Received;
use crate::storage::ChunkWriter;
use crate::transfer::{FileTransfer, MissingSet, TransferCheckpoint, TransferReport, TransferState};
use crate::{Error, Result, MAX_SEQUENCE, SENTINEL_SEQUENCE};

impl<L: Link> FileTransfer<L> {
    /// 파일 전체 수신
    ///
    /// 청크 수 프레임을 받은 뒤 정확히 그 수만큼 수신을 시도하고 남은 누락 집합 반환.
    /// 중복, 범위 밖, 바이너리가 아닌 프레임은 무시
    pub async fn receive_file(&mut self, local_path: &Path) -> Result<MissingSet> {
        self.set_state(TransferState::AwaitCount);
        let Some(total_chunks) = self.receive_chunk_count().await else {
            self.set_state(TransferState::Failed);
            return Err(Error::ChunkCountUnavailable);
        };
        self.total_chunks = total_chunks;
        self.set_state(TransferState::Receiving);
        info!("청크 {}개 수신 시작: {:?}", total_chunks, local_path);

        let mut missing: MissingSet = (0..total_chunks).collect();
        let mut writer =
            ChunkWriter::for_first_pass(local_path, self.config.reassembly, self.config.chunk_size)?;

        for _ in 0..total_chunks {
            let Some((index, data)) = self.receive_chunk().await else {
                continue;
            };
            if !missing.remove(&index) {
                debug!("중복/범위 밖 청크 무시: {}", index);
                self.session.stats_mut().chunks_ignored += 1;
                continue;
            }
            writer.write_chunk(index, &data)?;
            self.session.stats_mut().chunks_written += 1;
        }

        info!(
            "첫 수신 완료: {}/{} chunks, 누락 {}",
            total_chunks as usize - missing.len(),
            total_chunks,
            missing.len()
        );
        if missing.is_empty() {
            self.set_state(TransferState::Done);
        }
        Ok(missing)
    }

    /// 부분 재전송 수신
    ///
    /// 첫 프레임(동기 프레임)은 버리고 `requested` 개수만큼 수신 시도.
    /// 누락 집합에 있는 청크만 복구하고 갱신된 집합 반환
    pub async fn receive_partial_file(
        &mut self,
        local_path: &Path,
        mut missing: MissingSet,
        requested: &[u32],
    ) -> Result<MissingSet> {
        self.set_state(TransferState::ReceivingPartial);

        if self.session.receive().await == Received::NoPacket {
            debug!("동기 프레임 미수신");
        }

        let mut writer =
            ChunkWriter::for_repair(local_path, self.config.reassembly, self.config.chunk_size)?;

        for _ in requested {
            let Some((index, data)) = self.receive_chunk().await else {
                continue;
            };
            if !missing.remove(&index) {
                debug!("요청하지 않은 청크 무시: {}", index);
                self.session.stats_mut().chunks_ignored += 1;
                continue;
            }
            writer.repair_chunk(index, &data)?;
            self.session.stats_mut().chunks_repaired += 1;
        }

        if missing.is_empty() {
            self.set_state(TransferState::Done);
        }
        Ok(missing)
    }

    /// 원격 파일 요청 후 재요청까지 수행
    ///
    /// 링크 문제(ACK 없음, 청크 수 프레임 손실, 재시도 소진)는 실패 리포트로,
    /// 로컬 I/O 에러는 `Err`로 반환
    pub async fn request_file(
        &mut self,
        remote_path: &str,
        local_path: &Path,
        retries: u32,
    ) -> Result<TransferReport> {
        let request = Command::request_file(remote_path).to_value();
        self.fetch(&request, remote_path, local_path, retries).await
    }

    /// `request`를 보내 전체 전송을 시작시키고, 누락분은 `remote_path`로 재요청
    pub(crate) async fn fetch(
        &mut self,
        request: &Value,
        remote_path: &str,
        local_path: &Path,
        retries: u32,
    ) -> Result<TransferReport> {
        self.set_state(TransferState::Idle);
        self.total_chunks = 0;
        info!("파일 요청: {} -> {:?}", remote_path, local_path);

        let mut remaining = retries;
        while !self.session.send_command(request).await {
            if remaining == 0 {
                warn!("파일 요청 ACK 없음: {}", remote_path);
                return Ok(self.failed_report(retries));
            }
            remaining -= 1;
            warn!("파일 요청 ACK 없음, 재전송 (남은 재시도 {})", remaining);
        }

        let missing = match self.receive_file(local_path).await {
            Ok(missing) => missing,
            Err(Error::ChunkCountUnavailable) => {
                warn!("청크 수 프레임 미수신: {}", remote_path);
                return Ok(self.failed_report(retries - remaining));
            }
            Err(e) => {
                self.set_state(TransferState::Failed);
                return Err(e);
            }
        };

        self.repair(remote_path, local_path, missing, retries, remaining)
            .await
    }

    /// 체크포인트의 누락 청크부터 재개
    ///
    /// 청크 수를 모르는 체크포인트면 처음부터 다시 요청
    pub async fn resume(
        &mut self,
        checkpoint: &TransferCheckpoint,
        retries: u32,
    ) -> Result<TransferReport> {
        if checkpoint.total_chunks == 0 {
            return self
                .request_file(&checkpoint.remote_path, &checkpoint.local_path, retries)
                .await;
        }

        self.set_state(TransferState::Idle);
        self.total_chunks = checkpoint.total_chunks;
        let missing = checkpoint.missing_set();
        info!(
            "전송 재개: {} ({}개 누락)",
            checkpoint.remote_path,
            missing.len()
        );

        self.repair(
            &checkpoint.remote_path,
            &checkpoint.local_path,
            missing,
            retries,
            retries,
        )
        .await
    }

    async fn repair(
        &mut self,
        remote_path: &str,
        local_path: &Path,
        mut missing: MissingSet,
        retries: u32,
        mut remaining: u32,
    ) -> Result<TransferReport> {
        while !missing.is_empty() && remaining > 0 {
            self.set_state(TransferState::Repairing);
            remaining -= 1;

            let batch = repair_batch(remote_path, &missing);
            if batch.is_empty() {
                warn!("경로가 길어 부분 요청 불가: {}", remote_path);
                break;
            }
            info!(
                "누락 {}개 중 {}개 재요청 (남은 재시도 {})",
                missing.len(),
                batch.len(),
                remaining
            );

            let command = Command::request_partial_file(remote_path, batch.clone()).to_value();
            if !self.session.send_command(&command).await {
                warn!("부분 요청 ACK 없음: {}", remote_path);
                continue;
            }

            missing = match self.receive_partial_file(local_path, missing, &batch).await {
                Ok(missing) => missing,
                Err(e) => {
                    self.set_state(TransferState::Failed);
                    return Err(e);
                }
            };
        }

        let complete = missing.is_empty();
        if complete {
            self.set_state(TransferState::Done);
            info!("파일 수신 완료: {:?}", local_path);
        } else {
            self.set_state(TransferState::Failed);
            warn!("재시도 소진: {:?}, 누락 {}개", local_path, missing.len());
        }

        Ok(TransferReport {
            complete,
            total_chunks: self.total_chunks,
            missing,
            retries_used: retries - remaining,
        })
    }

    async fn receive_chunk_count(&mut self) -> Option<u32> {
        let packet = self.session.receive().await.into_packet()?;
        // 청크 수는 음수로 전송됨
        match packet.payload.as_i64().and_then(i64::checked_neg) {
            Some(count) if (0..=i64::from(MAX_SEQUENCE)).contains(&count) => Some(count as u32),
            _ => {
                warn!(
                    "청크 수 프레임이 아님: seq={}, payload={}",
                    packet.sequence, packet.payload
                );
                None
            }
        }
    }

    async fn receive_chunk(&mut self) -> Option<(u32, Vec<u8>)> {
        let packet = self.session.receive().await.into_packet()?;
        match packet.payload {
            Value::Binary(data) if packet.sequence != SENTINEL_SEQUENCE => {
                Some((u32::from(packet.sequence), data))
            }
            payload => {
                debug!(
                    "청크가 아닌 프레임 무시: seq={}, payload={}",
                    packet.sequence, payload
                );
                self.session.stats_mut().chunks_ignored += 1;
                None
            }
        }
    }

    fn failed_report(&mut self, retries_used: u32) -> TransferReport {
        self.set_state(TransferState::Failed);
        TransferReport {
            complete: false,
            total_chunks: 0,
            missing: MissingSet::new(),
            retries_used,
        }
    }
}
