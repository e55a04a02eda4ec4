//! FORMAT_DESCRIPTION 레코드
//!
//! 모든 binlog 파일은 정확히 하나의 FORMAT_DESCRIPTION 이벤트로 시작하며,
//! 이후 이벤트들의 헤더 길이, post-header 길이, 체크섬 알고리즘을 결정합니다.

use crate::checksum::{ChecksumAlgorithm, CHECKSUM_ALG_DESC_LEN, CHECKSUM_LEN};
use crate::error::{CdcError, Result};
use crate::events::{read_bytes, EventType, EVENT_HEADER_SIZE};
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::io::Cursor;

const SERVER_VERSION_LEN: usize = 50;

/// binlog_version + server_version + create_timestamp + header_length
const FIXED_PART_LEN: usize = 2 + SERVER_VERSION_LEN + 4 + 1;

/// 체크섬을 지원하는 최초 서버 버전
const CHECKSUM_VERSION: (u32, u32, u32) = (5, 6, 1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescription {
    pub binlog_version: u16,
    pub server_version: String,
    pub create_timestamp: u32,
    /// 공통 헤더 길이 (v4 는 19)
    pub header_length: u8,
    /// 이벤트 타입 코드 - 1 을 인덱스로 하는 post-header 길이 표
    pub post_header_lengths: Vec<u8>,
    pub checksum: ChecksumAlgorithm,
}

impl Default for FormatDescription {
    fn default() -> Self {
        FormatDescription {
            binlog_version: 4,
            server_version: String::new(),
            create_timestamp: 0,
            header_length: EVENT_HEADER_SIZE as u8,
            post_header_lengths: Vec::new(),
            checksum: ChecksumAlgorithm::Off,
        }
    }
}

impl FormatDescription {
    /// 스트림 밖에서 체크섬 알고리즘을 이미 알고 있을 때 사용 (체크포인트 복원 등)
    pub fn with_checksum(checksum: ChecksumAlgorithm) -> Self {
        FormatDescription {
            checksum,
            ..Default::default()
        }
    }

    /// FORMAT_DESCRIPTION 이벤트 본문 파싱 (공통 헤더 제외, 체크섬 꼬리 포함)
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() < FIXED_PART_LEN {
            return Err(CdcError::BinlogParseError(
                "Invalid format description event: too short".to_string(),
            ));
        }

        let mut cursor = Cursor::new(body);
        let binlog_version = cursor.read_u16::<LittleEndian>()?;
        let version_bytes = read_bytes(&mut cursor, SERVER_VERSION_LEN)?;
        let server_version = String::from_utf8_lossy(&version_bytes)
            .trim_end_matches('\0')
            .to_string();
        let create_timestamp = cursor.read_u32::<LittleEndian>()?;
        let header_length = cursor.read_u8()?;

        let rest = &body[FIXED_PART_LEN..];
        let (post_header_lengths, checksum) = if supports_checksum(&server_version) {
            let tail = CHECKSUM_ALG_DESC_LEN + CHECKSUM_LEN;
            if rest.len() < tail {
                return Err(CdcError::BinlogParseError(
                    "format description event missing checksum descriptor".to_string(),
                ));
            }
            let alg = rest[rest.len() - tail];
            (
                rest[..rest.len() - tail].to_vec(),
                ChecksumAlgorithm::try_from(alg)?,
            )
        } else {
            (rest.to_vec(), ChecksumAlgorithm::Off)
        };

        Ok(FormatDescription {
            binlog_version,
            server_version,
            create_timestamp,
            header_length,
            post_header_lengths,
            checksum,
        })
    }

    /// 이벤트 타입별 post-header 길이
    pub fn post_header_len(&self, event_type: EventType) -> u8 {
        let code = event_type as usize;
        code.checked_sub(1)
            .and_then(|idx| self.post_header_lengths.get(idx).copied())
            .unwrap_or_else(|| default_post_header_len(event_type))
    }
}

fn default_post_header_len(event_type: EventType) -> u8 {
    match event_type {
        EventType::QueryEvent => 13,
        EventType::RotateEvent => 8,
        EventType::TableMapEvent => 8,
        EventType::WriteRowsEventV1
        | EventType::UpdateRowsEventV1
        | EventType::DeleteRowsEventV1 => 8,
        EventType::WriteRowsEvent | EventType::UpdateRowsEvent | EventType::DeleteRowsEvent => 10,
        _ => 0,
    }
}

/// "5.7.30-log" 같은 버전 문자열을 (major, minor, patch) 로 분해
fn parse_version(version: &str) -> (u32, u32, u32) {
    let mut parts = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

fn supports_checksum(version: &str) -> bool {
    parse_version(version) >= CHECKSUM_VERSION
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 테스트용 FORMAT_DESCRIPTION 본문 생성
    pub(crate) fn fde_body(server_version: &str, checksum: Option<u8>) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&4u16.to_le_bytes());
        let mut version = server_version.as_bytes().to_vec();
        version.resize(SERVER_VERSION_LEN, 0);
        body.extend_from_slice(&version);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(19);
        // QUERY=13, ROTATE=8, TABLE_MAP=8, ROWS v1=8, ROWS v2=10
        let mut post = vec![0u8; 35];
        post[EventType::QueryEvent as usize - 1] = 13;
        post[EventType::RotateEvent as usize - 1] = 8;
        post[EventType::TableMapEvent as usize - 1] = 8;
        for t in [23usize, 24, 25] {
            post[t - 1] = 8;
        }
        for t in [30usize, 31, 32] {
            post[t - 1] = 10;
        }
        body.extend_from_slice(&post);
        if let Some(alg) = checksum {
            body.push(alg);
            body.extend_from_slice(&[0u8; CHECKSUM_LEN]);
        }
        body
    }

    #[test]
    fn test_default_is_checksum_off() {
        let fde = FormatDescription::default();
        assert_eq!(fde.checksum, ChecksumAlgorithm::Off);
        assert_eq!(fde.header_length, 19);
        assert_eq!(
            FormatDescription::with_checksum(ChecksumAlgorithm::Crc32).checksum,
            ChecksumAlgorithm::Crc32
        );
    }

    #[test]
    fn test_parse_checksum_capable_server() {
        let fde = FormatDescription::parse(&fde_body("8.0.34", Some(1))).unwrap();
        assert_eq!(fde.server_version, "8.0.34");
        assert_eq!(fde.checksum, ChecksumAlgorithm::Crc32);
        assert_eq!(fde.post_header_lengths.len(), 35);
        assert_eq!(fde.post_header_len(EventType::WriteRowsEvent), 10);
    }

    #[test]
    fn test_parse_old_server_has_no_checksum() {
        let fde = FormatDescription::parse(&fde_body("5.5.62-log", None)).unwrap();
        assert_eq!(fde.checksum, ChecksumAlgorithm::Off);
        assert_eq!(fde.post_header_len(EventType::TableMapEvent), 8);
    }

    #[test]
    fn test_parse_unknown_algorithm() {
        assert!(matches!(
            FormatDescription::parse(&fde_body("5.7.44", Some(9))),
            Err(CdcError::UnsupportedChecksum(9))
        ));
    }

    #[test]
    fn test_version_compare() {
        assert!(supports_checksum("5.6.1"));
        assert!(supports_checksum("10.6.12-MariaDB-log"));
        assert!(!supports_checksum("5.6.0"));
        assert!(!supports_checksum("5.1.73"));
    }
}
