//! 지상국 컨텍스트
//!
//! 웨이크 사이클 하나 동안 링크, 설정, 전송 엔진을 묶어서 들고 다님

use std::path::Path;

use tracing::{info, warn};

use crate::command::SatelliteCommand;
use crate::link::Link;
use crate::stats::TransferStats;
use crate::transfer::{FileTransfer, TransferCheckpoint, TransferReport};
use crate::{Config, Result};

/// 지상국
pub struct GroundStation<L> {
    transfer: FileTransfer<L>,
}

impl<L: Link> GroundStation<L> {
    pub fn new(link: L, config: Config) -> Result<Self> {
        Ok(Self {
            transfer: FileTransfer::new(link, config)?,
        })
    }

    pub fn config(&self) -> &Config {
        self.transfer.config()
    }

    /// 원격 파일 요청 (설정의 재시도 한도 사용)
    pub async fn request_file(
        &mut self,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<TransferReport> {
        let retries = self.config().max_retries;
        let report = self
            .transfer
            .request_file(remote_path, local_path, retries)
            .await?;
        self.log_report(remote_path, &report);
        Ok(report)
    }

    /// 이전 사이클의 체크포인트에서 재개
    pub async fn resume(&mut self, checkpoint: &TransferCheckpoint) -> Result<TransferReport> {
        let retries = self.config().max_retries;
        let report = self.transfer.resume(checkpoint, retries).await?;
        self.log_report(&checkpoint.remote_path, &report);
        Ok(report)
    }

    /// 위성 명령 전송 (비밀값 접두사 포함). ACK 여부 반환
    pub async fn send_command(&mut self, command: &SatelliteCommand) -> bool {
        let payload = command.to_value(&self.config().command_secret);
        let acked = self.transfer.session_mut().send_command(&payload).await;
        if acked {
            info!("명령 ACK 수신: {}", command.name());
        } else {
            warn!("명령 ACK 없음: {}", command.name());
        }
        acked
    }

    /// `send_file` 위성 명령으로 파일을 받아옴
    ///
    /// 누락분은 같은 이름으로 부분 요청
    pub async fn download(&mut self, name: &str, local_path: &Path) -> Result<TransferReport> {
        let command = SatelliteCommand::SendFile(name.to_string());
        let payload = command.to_value(&self.config().command_secret);
        let retries = self.config().max_retries;
        let report = self
            .transfer
            .fetch(&payload, name, local_path, retries)
            .await?;
        self.log_report(name, &report);
        Ok(report)
    }

    fn log_report(&self, remote_path: &str, report: &TransferReport) {
        if report.complete {
            info!(
                "전송 완료: {} ({} chunks, 재시도 {})",
                remote_path, report.total_chunks, report.retries_used
            );
        } else {
            warn!(
                "전송 미완료: {} ({}/{} chunks 누락)",
                remote_path,
                report.missing.len(),
                report.total_chunks
            );
        }
    }

    pub fn stats(&self) -> &TransferStats {
        self.transfer.stats()
    }

    pub fn transfer_mut(&mut self) -> &mut FileTransfer<L> {
        &mut self.transfer
    }

    pub fn into_link(self) -> L {
        self.transfer.into_link()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use crate::link::{is_chunk_frame, DropFilter, MemoryLink};
    use crate::packet::PacketHeader;

    fn test_config() -> Config {
        Config {
            receive_timeout_ms: 100,
            ack_timeout_ms: 50,
            idle_rounds: 20,
            command_secret: b"p4ss".to_vec(),
            ..Config::default()
        }
    }

    fn satellite_root(len: usize) -> (tempfile::TempDir, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sd")).unwrap();
        let data: Vec<u8> = (0..len).map(|i| (i % 253) as u8).collect();
        fs::write(dir.path().join("sd/img0021.jpg"), &data).unwrap();
        (dir, data)
    }

    /// 첫 번째 청크 2만 버림
    fn drop_first_chunk_two() -> DropFilter {
        let mut seen = HashSet::new();
        Box::new(move |frame: &[u8]| {
            is_chunk_frame(frame)
                && PacketHeader::decode(frame)
                    .map(|h| seen.insert(h.sequence) && h.sequence == 2)
                    .unwrap_or(false)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_file_end_to_end() {
        let (root, data) = satellite_root(1024);
        let local = root.path().join("received.jpg");

        let config = test_config();
        let (ground, sat) = MemoryLink::pair(&config);
        let mut sat = FileTransfer::new(sat, config.clone()).unwrap();
        let mut station = GroundStation::new(ground, config).unwrap();

        let out = local.clone();
        let fetch = async move {
            let report = station.request_file("/sd/img0021.jpg", &out).await.unwrap();
            let acked = station.stats().commands_acked;
            drop(station);
            (report, acked)
        };
        let ((report, acked), _) = tokio::join!(fetch, sat.serve(root.path()));

        assert!(report.complete);
        assert_eq!(report.total_chunks, 5);
        assert_eq!(report.retries_used, 0);
        assert_eq!(acked, 1);
        assert_eq!(fs::read(&local).unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_with_secret() {
        let (root, data) = satellite_root(700);
        let local = root.path().join("received.jpg");

        let config = test_config();
        let (ground, sat) = MemoryLink::pair(&config);
        let mut sat = FileTransfer::new(sat, config.clone()).unwrap();
        let mut station = GroundStation::new(ground, config).unwrap();

        let out = local.clone();
        let fetch = async move {
            let report = station.download("sd/img0021.jpg", &out).await.unwrap();
            drop(station);
            report
        };
        let (report, served) = tokio::join!(fetch, sat.serve(root.path()));

        assert!(report.complete);
        assert_eq!(served.unwrap(), 1);
        assert_eq!(fs::read(&local).unwrap(), data);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_secret_is_ignored() {
        let (root, _) = satellite_root(700);
        let local = root.path().join("received.jpg");

        let (ground, sat) = MemoryLink::pair(&test_config());
        let mut sat = FileTransfer::new(sat, test_config()).unwrap();
        let ground_config = Config {
            command_secret: b"wrong".to_vec(),
            ..test_config()
        };
        let mut station = GroundStation::new(ground, ground_config).unwrap();

        let out = local.clone();
        let fetch = async move {
            // ACK는 오지만 위성은 명령을 무시
            let acked = station.send_command(&SatelliteCommand::NoOp).await;
            let report = station.download("sd/img0021.jpg", &out).await.unwrap();
            drop(station);
            (acked, report)
        };
        let ((acked, report), served) = tokio::join!(fetch, sat.serve(root.path()));

        assert!(acked);
        assert!(!report.complete);
        assert_eq!(report.total_chunks, 0);
        assert_eq!(served.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_from_checkpoint() {
        let (root, data) = satellite_root(1024);
        let local = root.path().join("received.jpg");
        let checkpoint_path: PathBuf = root.path().join("received.ckpt");

        let config = Config {
            max_retries: 0,
            ..test_config()
        };
        let (ground, sat) = MemoryLink::pair(&config);
        let sat = sat.with_drop_filter(drop_first_chunk_two());
        let mut sat = FileTransfer::new(sat, config.clone()).unwrap();
        let mut station = GroundStation::new(ground, config).unwrap();

        let out = local.clone();
        let ckpt = checkpoint_path.clone();
        let fetch = async move {
            // 재시도 없이 한 번 실패
            let first = station.request_file("/sd/img0021.jpg", &out).await.unwrap();
            first.checkpoint("/sd/img0021.jpg", &out).save(&ckpt).unwrap();
            let partial = fs::read(&out).unwrap();

            // 다음 사이클
            station.transfer_mut().config.max_retries = 2;
            let checkpoint = TransferCheckpoint::load(&ckpt).unwrap();
            let second = station.resume(&checkpoint).await.unwrap();
            drop(station);
            (first, partial, second)
        };
        let ((first, partial, second), _) = tokio::join!(fetch, sat.serve(root.path()));

        assert!(!first.complete);
        assert_eq!(first.missing, [2].into_iter().collect());
        assert_eq!(partial.len(), 1024 - 245);

        assert!(second.complete);
        assert_eq!(second.total_chunks, 5);
        assert_eq!(second.retries_used, 1);
        assert_eq!(fs::read(&local).unwrap(), data);
    }
}
