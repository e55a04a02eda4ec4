//! Binlog 이벤트 체크섬 처리
//!
//! 체크섬이 켜진 스트림에서는 모든 이벤트 끝에 4 바이트 CRC32 가 붙습니다.

use crate::error::{CdcError, Result};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// 체크섬 길이 (바이트)
pub const CHECKSUM_LEN: usize = 4;

/// FORMAT_DESCRIPTION 이벤트에 기록되는 알고리즘 식별자 길이
pub const CHECKSUM_ALG_DESC_LEN: usize = 1;

/// 이벤트 체크섬 알고리즘
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChecksumAlgorithm {
    /// 체크섬 없음
    #[default]
    Off = 0,
    /// zlib CRC32
    Crc32 = 1,
}

impl TryFrom<u8> for ChecksumAlgorithm {
    type Error = CdcError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ChecksumAlgorithm::Off),
            1 => Ok(ChecksumAlgorithm::Crc32),
            other => Err(CdcError::UnsupportedChecksum(other)),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" | "OFF" | "0" => Ok(ChecksumAlgorithm::Off),
            "CRC32" | "1" => Ok(ChecksumAlgorithm::Crc32),
            other => Err(CdcError::ConfigError(format!(
                "unknown binlog checksum: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Off => f.write_str("NONE"),
            ChecksumAlgorithm::Crc32 => f.write_str("CRC32"),
        }
    }
}

impl ChecksumAlgorithm {
    /// 이벤트 끝에 체크섬이 붙는지 여부
    pub fn has_trailer(&self) -> bool {
        *self != ChecksumAlgorithm::Off
    }

    /// 이벤트를 (체크섬 제외 본문, 저장된 체크섬) 으로 분리
    pub fn split<'a>(&self, event: &'a [u8]) -> Result<(&'a [u8], Option<u32>)> {
        if !self.has_trailer() {
            return Ok((event, None));
        }
        split_trailer(event)
    }

    /// 저장된 체크섬과 계산된 체크섬 비교
    pub fn verify(&self, event: &[u8]) -> Result<()> {
        match self {
            ChecksumAlgorithm::Off => Ok(()),
            ChecksumAlgorithm::Crc32 => verify_crc32(event),
        }
    }
}

pub(crate) fn split_trailer(event: &[u8]) -> Result<(&[u8], Option<u32>)> {
    if event.len() < CHECKSUM_LEN {
        return Err(CdcError::BinlogParseError(
            "event shorter than checksum trailer".to_string(),
        ));
    }
    let (body, trailer) = event.split_at(event.len() - CHECKSUM_LEN);
    Ok((body, Some(LittleEndian::read_u32(trailer))))
}

pub(crate) fn verify_crc32(event: &[u8]) -> Result<()> {
    let (body, stored) = split_trailer(event)?;
    let expected = stored.unwrap_or_default();
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CdcError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}
