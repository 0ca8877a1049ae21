//! 파일 저장소
//!
//! - 청크 단위 읽기 (송신측)
//! - 도착 순서 append / 위치 지정 기록 (수신측)
//! - 삽입 복구: 누락 청크를 오프셋 위치에 끼워 넣고 뒤쪽을 밀어냄

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{ReassemblyMode, Result};

/// 파일 크기 (stat)
pub fn file_size(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)?.len())
}

/// 파일을 고정 크기 청크로 순차 읽기
pub struct ChunkReader {
    file: File,
    chunk_size: usize,
    index: u32,
}

impl ChunkReader {
    pub fn open(path: &Path, chunk_size: usize) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            chunk_size,
            index: 0,
        })
    }
}

impl Iterator for ChunkReader {
    type Item = io::Result<(u32, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::with_capacity(self.chunk_size);
        match Read::by_ref(&mut self.file).take(self.chunk_size as u64).read_to_end(&mut buf) {
            Ok(0) => None,
            Ok(_) => {
                let index = self.index;
                self.index += 1;
                Some(Ok((index, buf)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

/// 지정한 오프셋에서 최대 `chunk_size` 바이트 읽기
///
/// 파일 끝 이후면 빈 벡터
pub fn read_chunk_at(file: &mut File, offset: u64, chunk_size: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(chunk_size);
    Read::by_ref(file).take(chunk_size as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// 수신 청크 기록기
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
    mode: ReassemblyMode,
    chunk_size: usize,
}

impl ChunkWriter {
    /// 첫 수신용: 기존 내용은 비움. append 모드는 파일 끝에 이어 쓰기
    pub fn for_first_pass(path: &Path, mode: ReassemblyMode, chunk_size: usize) -> Result<Self> {
        let mut options = OpenOptions::new();
        match mode {
            ReassemblyMode::Append => {
                // append와 truncate는 같이 열 수 없음
                File::create(path)?;
                options.append(true)
            }
            ReassemblyMode::Positional => options.create(true).write(true).truncate(true),
        };
        Self::open_with(options, path, mode, chunk_size)
    }

    /// 복구용: 읽기/쓰기 임의 접근
    pub fn for_repair(path: &Path, mode: ReassemblyMode, chunk_size: usize) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).read(true).write(true).truncate(false);
        Self::open_with(options, path, mode, chunk_size)
    }

    fn open_with(
        options: OpenOptions,
        path: &Path,
        mode: ReassemblyMode,
        chunk_size: usize,
    ) -> Result<Self> {
        Ok(Self {
            file: options.open(path)?,
            path: path.to_path_buf(),
            mode,
            chunk_size,
        })
    }

    fn offset_of(&self, index: u32) -> u64 {
        index as u64 * self.chunk_size as u64
    }

    /// 첫 수신 청크 기록 후 동기화
    pub fn write_chunk(&mut self, index: u32, data: &[u8]) -> Result<()> {
        match self.mode {
            ReassemblyMode::Append => self.file.write_all(data)?,
            ReassemblyMode::Positional => {
                let offset = self.offset_of(index);
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.write_all(data)?;
            }
        }
        self.file.sync_data()?;
        Ok(())
    }

    /// 누락 청크 복구 기록 후 동기화
    pub fn repair_chunk(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let offset = self.offset_of(index);
        match self.mode {
            ReassemblyMode::Append => {
                debug!("삽입 복구: {:?} chunk={} offset={}", self.path, index, offset);
                insert_at(&mut self.file, offset, data)?;
            }
            ReassemblyMode::Positional => {
                self.file.seek(SeekFrom::Start(offset))?;
                self.file.write_all(data)?;
                self.file.sync_data()?;
            }
        }
        Ok(())
    }
}

/// 파일의 `offset` 위치에 `data` 삽입
///
/// `[0, offset)`은 그대로, `data`가 `[offset, offset + len)`을 차지하고
/// 기존 `offset` 이후 내용은 그 뒤로 이어짐. offset이 파일 끝 이후여도 안전 (꼬리 없음)
pub fn insert_into_file(path: &Path, offset: u64, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    insert_at(&mut file, offset, data)
}

fn insert_at(file: &mut File, offset: u64, data: &[u8]) -> Result<()> {
    // 꼬리 보존용 임시 저장소 (drop 시 삭제)
    let mut tail = tempfile::tempfile()?;

    file.seek(SeekFrom::Start(offset))?;
    io::copy(&mut *file, &mut tail)?;

    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)?;

    // 커서는 offset + data.len()
    tail.seek(SeekFrom::Start(0))?;
    io::copy(&mut tail, &mut *file)?;
    file.sync_all()?;
    Ok(())
}
