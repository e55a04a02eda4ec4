//! 바이너리 로그 상태 추적 관련 에러 타입

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CdcError {
    /// 테이블 맵 없이 row 이벤트가 도착함 (스트림 재동기화 필요)
    #[error("테이블 매핑 없음: table_id={table_id}")]
    OrderingViolation { table_id: u64 },

    #[error("잘못된 상태 전이: {0}")]
    InvalidStateTransition(String),

    #[error("지원하지 않는 체크섬 알고리즘: {0}")]
    UnsupportedChecksum(u8),

    #[error("체크섬 불일치: expected={expected:#010x}, actual={actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Binlog 파싱 에러: {0}")]
    BinlogParseError(String),

    #[error("유효하지 않은 이벤트: {0}")]
    InvalidEvent(String),

    #[error("설정 에러: {0}")]
    ConfigError(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;
