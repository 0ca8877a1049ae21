//! 파일 전송 엔진 (FTP)
//!
//! 상태 흐름:
//! `Idle -> AwaitCount -> Receiving -> {Done | Repairing -> ReceivingPartial -> {Done | Repairing | Failed}}`
//!
//! 송신 연산은 `sender`, 수신/재요청 연산은 `receiver` 모듈에 있음

use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::link::Link;
use crate::session::PacketSession;
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 아직 받지 못한 청크 인덱스 (오름차순)
pub type MissingSet = BTreeSet<u32>;

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    AwaitCount,
    Receiving,
    Repairing,
    ReceivingPartial,
    Done,
    Failed,
}

/// 파일 요청 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// 모든 청크 수신 여부
    pub complete: bool,

    /// 전체 청크 수 (청크 수 프레임을 못 받았으면 0)
    pub total_chunks: u32,

    /// 남은 누락 청크
    pub missing: MissingSet,

    /// 사용한 재시도 횟수
    pub retries_used: u32,
}

impl TransferReport {
    /// 나중에 이어받기 위한 체크포인트
    pub fn checkpoint(&self, remote_path: &str, local_path: &Path) -> TransferCheckpoint {
        TransferCheckpoint {
            remote_path: remote_path.to_string(),
            local_path: local_path.to_path_buf(),
            total_chunks: self.total_chunks,
            missing: self.missing.iter().copied().collect(),
        }
    }
}

/// 실패한 전송의 누락 상태 (다음 웨이크 사이클에서 재개)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCheckpoint {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub total_chunks: u32,
    pub missing: Vec<u32>,
}

impl TransferCheckpoint {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }

    pub fn missing_set(&self) -> MissingSet {
        self.missing
            .iter()
            .copied()
            .filter(|&i| i < self.total_chunks)
            .collect()
    }
}

/// 원격 경로를 로컬 루트 아래 경로로 변환
///
/// 앞의 `/`는 제거, `..`이나 빈 경로는 거부
pub fn resolve_remote_path(root: &Path, remote: &str) -> Result<PathBuf> {
    let relative = Path::new(remote.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        return Err(Error::InvalidRemotePath(remote.to_string()));
    }
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => return Err(Error::InvalidRemotePath(remote.to_string())),
        }
    }
    Ok(root.join(relative))
}

/// 파일 전송 엔진
///
/// 세션(링크)을 독점하며 한 번에 하나의 전송만 처리
pub struct FileTransfer<L> {
    pub(crate) session: PacketSession<L>,
    pub(crate) config: Config,
    pub(crate) state: TransferState,
    pub(crate) total_chunks: u32,
}

impl<L: Link> FileTransfer<L> {
    pub fn new(link: L, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            session: PacketSession::new(link, &config),
            config,
            state: TransferState::Idle,
            total_chunks: 0,
        })
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TransferState) {
        if self.state != state {
            debug!("전송 상태: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// 마지막으로 알려진 전체 청크 수
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_mut(&mut self) -> &mut PacketSession<L> {
        &mut self.session
    }

    /// 통계 반환
    pub fn stats(&self) -> &TransferStats {
        self.session.stats()
    }

    pub fn into_link(self) -> L {
        self.session.into_link()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_remote_path() {
        let root = Path::new("/srv/sat");
        assert_eq!(
            resolve_remote_path(root, "/sd/img0021.jpg").unwrap(),
            PathBuf::from("/srv/sat/sd/img0021.jpg")
        );
        assert_eq!(
            resolve_remote_path(root, "log.txt").unwrap(),
            PathBuf::from("/srv/sat/log.txt")
        );
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let root = Path::new("/srv/sat");
        assert!(matches!(
            resolve_remote_path(root, "/sd/../../etc/passwd"),
            Err(Error::InvalidRemotePath(_))
        ));
        assert!(resolve_remote_path(root, "/").is_err());
        assert!(resolve_remote_path(root, "").is_err());
    }

    #[test]
    fn test_checkpoint_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let report = TransferReport {
            complete: false,
            total_chunks: 9,
            missing: [1, 4, 8].into_iter().collect(),
            retries_used: 3,
        };
        let checkpoint = report.checkpoint("/sd/img.jpg", &dir.path().join("img.jpg"));

        let path = dir.path().join("img.ckpt");
        checkpoint.save(&path).unwrap();
        let loaded = TransferCheckpoint::load(&path).unwrap();

        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.missing_set(), report.missing);
    }

    #[test]
    fn test_checkpoint_rejects_garbage() {
        assert!(matches!(
            TransferCheckpoint::from_bytes(&[0xff]),
            Err(Error::Checkpoint(_))
        ));
    }
}
