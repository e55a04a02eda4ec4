//! Binlog 처리 위치 추적 (커서 및 체크포인트)
//!
//! Binlog 파일명 + 위치로 정확한 재시작 지점을 추적합니다.
//! 예: "mysql-bin.000003" 파일의 4097 바이트 위치

use crate::checksum::ChecksumAlgorithm;
use crate::context::ReplicationContext;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// binlog 파일은 4 바이트 매직 넘버 뒤에서 시작
pub const BINLOG_START_POSITION: u64 = 4;

/// Binlog 파일 위치 정보
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BinlogPosition {
    /// 바이너리 로그 파일명 (e.g., "mysql-bin.000001")
    pub filename: String,
    /// 다음에 읽을 바이트 위치
    pub position: u64,
}

impl BinlogPosition {
    pub fn new(filename: impl Into<String>, position: u64) -> Self {
        BinlogPosition {
            filename: filename.into(),
            position,
        }
    }

    /// 파일명에서 시퀀스 번호 추출
    pub fn file_sequence(&self) -> Option<u64> {
        self.filename
            .rsplit('.')
            .next()
            .and_then(|s| s.parse().ok())
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.filename, self.position)
    }
}

/// 중단된 스트림을 재개하기 위한 체크포인트
///
/// 저장소 자체는 이 크레이트 밖의 책임이며, 여기서는 JSON 형식만 정의합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub position: BinlogPosition,
    pub checksum: ChecksumAlgorithm,
}

impl Checkpoint {
    pub fn capture(ctx: &ReplicationContext) -> Self {
        Checkpoint {
            position: ctx.cursor().clone(),
            checksum: ctx.format_description().checksum,
        }
    }

    /// 체크포인트로부터 컨텍스트 복원 (테이블 매핑은 비어 있음)
    pub fn restore(&self) -> Result<ReplicationContext> {
        let mut ctx = ReplicationContext::with_checksum(self.checksum);
        ctx.advance_cursor(&self.position.filename, self.position.position)?;
        Ok(ctx)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
