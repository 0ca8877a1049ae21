//! 명령 페이로드
//!
//! - FTP 요청: `['s', path]`, `['e', path, [missing...]]`
//! - 위성 명령: `secret ‖ code ‖ args` 바이너리 (공유 비밀값 접두사)

use std::collections::BTreeSet;

use rmpv::Value;

use crate::packet::encode_payload;
use crate::MAX_PAYLOAD_LEN;

/// 전체 파일 요청 연산자
pub const REQUEST_FILE_OP: &str = "s";

/// 부분 파일 요청 연산자
pub const REQUEST_PARTIAL_FILE_OP: &str = "e";

/// FTP 요청 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 파일 전체 전송 요청
    RequestFile { path: String },

    /// 누락 청크 재전송 요청
    RequestPartialFile { path: String, missing: Vec<u32> },
}

impl Command {
    pub fn request_file(path: impl Into<String>) -> Self {
        Command::RequestFile { path: path.into() }
    }

    pub fn request_partial_file(path: impl Into<String>, missing: Vec<u32>) -> Self {
        Command::RequestPartialFile {
            path: path.into(),
            missing,
        }
    }

    /// MessagePack 값으로 변환
    pub fn to_value(&self) -> Value {
        match self {
            Command::RequestFile { path } => {
                Value::Array(vec![Value::from(REQUEST_FILE_OP), Value::from(path.as_str())])
            }
            Command::RequestPartialFile { path, missing } => partial_value(path, missing),
        }
    }

    /// 수신 페이로드에서 명령 복원. FTP 명령이 아니면 `None`
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let op = items.first()?.as_str()?;
        let path = items.get(1)?.as_str()?.to_string();

        match op {
            REQUEST_FILE_OP if items.len() == 2 => Some(Command::RequestFile { path }),
            REQUEST_PARTIAL_FILE_OP if items.len() == 3 => {
                let missing = items[2]
                    .as_array()?
                    .iter()
                    .map(|v| v.as_u64().and_then(|i| u32::try_from(i).ok()))
                    .collect::<Option<Vec<u32>>>()?;
                Some(Command::RequestPartialFile { path, missing })
            }
            _ => None,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Command::RequestFile { path } | Command::RequestPartialFile { path, .. } => path,
        }
    }
}

fn partial_value(path: &str, missing: &[u32]) -> Value {
    Value::Array(vec![
        Value::from(REQUEST_PARTIAL_FILE_OP),
        Value::from(path),
        Value::Array(missing.iter().map(|&i| Value::from(i)).collect()),
    ])
}

fn encoded_len(value: &Value) -> usize {
    encode_payload(value).map(|b| b.len()).unwrap_or(usize::MAX)
}

/// 한 프레임에 들어가는 부분 요청 목록
///
/// 누락 집합의 오름차순 앞부분 중 인코딩 결과가 페이로드 한도에 맞는 최대 길이.
/// 경로만으로 한도를 넘으면 빈 목록
pub fn repair_batch(path: &str, missing: &BTreeSet<u32>) -> Vec<u32> {
    // 인덱스 하나는 최소 1바이트
    let mut batch: Vec<u32> = missing.iter().copied().take(MAX_PAYLOAD_LEN).collect();
    while !batch.is_empty() && encoded_len(&partial_value(path, &batch)) > MAX_PAYLOAD_LEN {
        batch.pop();
    }
    batch
}

/// 셧다운 확인 코드
pub const SHUTDOWN_CONFIRMATION: [u8; 4] = [0x0b, 0xfd, 0x49, 0xec];

/// 지상국 → 위성 명령
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SatelliteCommand {
    NoOp,
    HardReset,
    /// 확인 코드가 함께 전송됨
    Shutdown,
    Query(String),
    Exec(String),
    SendFile(String),
}

impl SatelliteCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SatelliteCommand::NoOp => "no-op",
            SatelliteCommand::HardReset => "hreset",
            SatelliteCommand::Shutdown => "shutdown",
            SatelliteCommand::Query(_) => "query",
            SatelliteCommand::Exec(_) => "exec_cmd",
            SatelliteCommand::SendFile(_) => "send_file",
        }
    }

    pub fn code(&self) -> [u8; 2] {
        match self {
            SatelliteCommand::NoOp => [0x8e, 0x62],
            SatelliteCommand::HardReset => [0xd4, 0x9f],
            SatelliteCommand::Shutdown => [0x12, 0x06],
            SatelliteCommand::Query(_) => [0x38, 0x93],
            SatelliteCommand::Exec(_) => [0x96, 0xa2],
            SatelliteCommand::SendFile(_) => [0x48, 0x6f],
        }
    }

    /// 이름 + 인자로 생성 (CLI용)
    pub fn from_name(name: &str, arg: Option<&str>) -> Option<Self> {
        let arg = arg.unwrap_or_default().to_string();
        match name {
            "no-op" => Some(SatelliteCommand::NoOp),
            "hreset" => Some(SatelliteCommand::HardReset),
            "shutdown" => Some(SatelliteCommand::Shutdown),
            "query" => Some(SatelliteCommand::Query(arg)),
            "exec_cmd" => Some(SatelliteCommand::Exec(arg)),
            "send_file" => Some(SatelliteCommand::SendFile(arg)),
            _ => None,
        }
    }

    /// `secret ‖ code ‖ args`
    pub fn to_bytes(&self, secret: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(secret.len() + 2 + 16);
        buf.extend_from_slice(secret);
        buf.extend_from_slice(&self.code());
        match self {
            SatelliteCommand::Shutdown => buf.extend_from_slice(&SHUTDOWN_CONFIRMATION),
            SatelliteCommand::Query(arg)
            | SatelliteCommand::Exec(arg)
            | SatelliteCommand::SendFile(arg) => buf.extend_from_slice(arg.as_bytes()),
            SatelliteCommand::NoOp | SatelliteCommand::HardReset => {}
        }
        buf
    }

    /// 명령 패킷 페이로드
    pub fn to_value(&self, secret: &[u8]) -> Value {
        Value::Binary(self.to_bytes(secret))
    }

    /// 비밀값 접두사를 확인하고 명령 복원
    pub fn parse(secret: &[u8], bytes: &[u8]) -> Option<Self> {
        let rest = bytes.strip_prefix(secret)?;
        if rest.len() < 2 {
            return None;
        }
        let (code, args) = rest.split_at(2);
        let text = || String::from_utf8(args.to_vec()).ok();

        match [code[0], code[1]] {
            [0x8e, 0x62] if args.is_empty() => Some(SatelliteCommand::NoOp),
            [0xd4, 0x9f] if args.is_empty() => Some(SatelliteCommand::HardReset),
            [0x12, 0x06] if args == SHUTDOWN_CONFIRMATION => Some(SatelliteCommand::Shutdown),
            [0x38, 0x93] => text().map(SatelliteCommand::Query),
            [0x96, 0xa2] => text().map(SatelliteCommand::Exec),
            [0x48, 0x6f] => text().map(SatelliteCommand::SendFile),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::decode_payload;

    #[test]
    fn test_command_value_layout() {
        let value = Command::request_file("/sd/img0021.jpg").to_value();
        let items = value.as_array().unwrap();
        assert_eq!(items[0].as_str(), Some("s"));
        assert_eq!(items[1].as_str(), Some("/sd/img0021.jpg"));

        let value = Command::request_partial_file("/sd/a", vec![1, 4]).to_value();
        let items = value.as_array().unwrap();
        assert_eq!(items[0].as_str(), Some("e"));
        assert_eq!(items[2].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_command_from_wire_value() {
        let command = Command::request_partial_file("/sd/a", vec![0, 300, 32766]);
        let bytes = encode_payload(&command.to_value()).unwrap();
        let decoded = Command::from_value(&decode_payload(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, command);
        assert_eq!(decoded.path(), "/sd/a");
    }

    #[test]
    fn test_from_value_rejects_foreign_payloads() {
        assert!(Command::from_value(&Value::from(-3)).is_none());
        assert!(Command::from_value(&Value::Array(vec![Value::from("x"), Value::from("p")])).is_none());
        let bad_list = Value::Array(vec![
            Value::from("e"),
            Value::from("p"),
            Value::Array(vec![Value::from(-1)]),
        ]);
        assert!(Command::from_value(&bad_list).is_none());
    }

    #[test]
    fn test_repair_batch_small_set_is_whole_set() {
        let missing: BTreeSet<u32> = [2, 5, 9].into_iter().collect();
        assert_eq!(repair_batch("/sd/a", &missing), vec![2, 5, 9]);
    }

    #[test]
    fn test_repair_batch_fits_one_frame() {
        let missing: BTreeSet<u32> = (1000..2000).collect();
        let batch = repair_batch("/sd/img0021.jpg", &missing);

        assert!(!batch.is_empty());
        assert!(batch.len() < missing.len());
        assert_eq!(batch[0], 1000);
        assert!(batch.windows(2).all(|w| w[0] < w[1]));

        let value = Command::request_partial_file("/sd/img0021.jpg", batch.clone()).to_value();
        assert!(encode_payload(&value).unwrap().len() <= MAX_PAYLOAD_LEN);

        // 하나 더 넣으면 넘침
        let mut bigger = batch.clone();
        bigger.push(1000 + batch.len() as u32);
        let value = Command::request_partial_file("/sd/img0021.jpg", bigger).to_value();
        assert!(encode_payload(&value).unwrap().len() > MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_satellite_command_prefix() {
        let secret = b"p4ss";
        let bytes = SatelliteCommand::Shutdown.to_bytes(secret);
        assert_eq!(&bytes[..4], secret);
        assert_eq!(&bytes[4..6], &[0x12u8, 0x06]);
        assert_eq!(&bytes[6..], &SHUTDOWN_CONFIRMATION);

        let query = SatelliteCommand::Query("cubesat.f_deployed".into());
        assert_eq!(
            SatelliteCommand::parse(secret, &query.to_bytes(secret)),
            Some(query)
        );
    }

    #[test]
    fn test_satellite_command_rejects_wrong_secret() {
        let bytes = SatelliteCommand::NoOp.to_bytes(b"right");
        assert!(SatelliteCommand::parse(b"wrong", &bytes).is_none());
        assert_eq!(
            SatelliteCommand::parse(b"right", &bytes),
            Some(SatelliteCommand::NoOp)
        );

        // 확인 코드 없는 셧다운은 거부
        let mut bare = b"right".to_vec();
        bare.extend_from_slice(&[0x12, 0x06]);
        assert!(SatelliteCommand::parse(b"right", &bare).is_none());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(
            SatelliteCommand::from_name("send_file", Some("img0021.jpg")),
            Some(SatelliteCommand::SendFile("img0021.jpg".into()))
        );
        assert_eq!(SatelliteCommand::from_name("hreset", None), Some(SatelliteCommand::HardReset));
        assert!(SatelliteCommand::from_name("launch", None).is_none());
    }
}
