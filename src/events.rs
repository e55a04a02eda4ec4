//! MySQL Binlog 이벤트 타입 및 공통 헤더 정의

use crate::error::{CdcError, Result};
use crate::row::RowImage;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};

/// 공통 이벤트 헤더 크기 (binlog v4)
pub const EVENT_HEADER_SIZE: usize = 19;

/// 서버가 만들어 낸 가짜 이벤트 (파일에 존재하지 않음)
pub const LOG_EVENT_ARTIFICIAL_F: u16 = 0x20;

/// MySQL Binlog 이벤트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventType {
    Unknown = 0,
    QueryEvent = 2,
    StopEvent = 3,
    RotateEvent = 4,
    FormatDescriptionEvent = 15,
    XidEvent = 16,
    TableMapEvent = 19,
    WriteRowsEventV1 = 23,
    UpdateRowsEventV1 = 24,
    DeleteRowsEventV1 = 25,
    HeartbeatEvent = 27,
    RowsQueryEvent = 29,
    WriteRowsEvent = 30,
    UpdateRowsEvent = 31,
    DeleteRowsEvent = 32,
    GtidEvent = 33,
    AnonymousGtidEvent = 34,
    PreviousGtidsEvent = 35,
}

impl EventType {
    pub fn from_u8(val: u8) -> Self {
        match val {
            2 => EventType::QueryEvent,
            3 => EventType::StopEvent,
            4 => EventType::RotateEvent,
            15 => EventType::FormatDescriptionEvent,
            16 => EventType::XidEvent,
            19 => EventType::TableMapEvent,
            23 => EventType::WriteRowsEventV1,
            24 => EventType::UpdateRowsEventV1,
            25 => EventType::DeleteRowsEventV1,
            27 => EventType::HeartbeatEvent,
            29 => EventType::RowsQueryEvent,
            30 => EventType::WriteRowsEvent,
            31 => EventType::UpdateRowsEvent,
            32 => EventType::DeleteRowsEvent,
            33 => EventType::GtidEvent,
            34 => EventType::AnonymousGtidEvent,
            35 => EventType::PreviousGtidsEvent,
            _ => EventType::Unknown,
        }
    }

    /// row 이벤트이면 종류 반환
    pub fn rows_kind(&self) -> Option<RowsEventKind> {
        match self {
            EventType::WriteRowsEventV1 | EventType::WriteRowsEvent => Some(RowsEventKind::Write),
            EventType::UpdateRowsEventV1 | EventType::UpdateRowsEvent => {
                Some(RowsEventKind::Update)
            }
            EventType::DeleteRowsEventV1 | EventType::DeleteRowsEvent => {
                Some(RowsEventKind::Delete)
            }
            _ => None,
        }
    }

    /// v2 row 이벤트는 post-header 뒤에 extra data 블록을 가짐
    pub fn is_rows_v2(&self) -> bool {
        matches!(
            self,
            EventType::WriteRowsEvent | EventType::UpdateRowsEvent | EventType::DeleteRowsEvent
        )
    }
}

/// row 이벤트 종류 (INSERT / UPDATE / DELETE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowsEventKind {
    Write,
    Update,
    Delete,
}

impl RowsEventKind {
    pub fn has_before(&self) -> bool {
        matches!(self, RowsEventKind::Update | RowsEventKind::Delete)
    }

    pub fn has_after(&self) -> bool {
        matches!(self, RowsEventKind::Write | RowsEventKind::Update)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RowsEventKind::Write => "INSERT",
            RowsEventKind::Update => "UPDATE",
            RowsEventKind::Delete => "DELETE",
        }
    }
}

/// Binlog 이벤트 헤더
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventHeader {
    /// 이벤트 타임스탬프 (초 단위)
    pub timestamp: u32,
    /// 이벤트 타입
    pub event_type: EventType,
    /// 원시 타입 코드
    pub type_code: u8,
    /// MySQL 서버 ID
    pub server_id: u32,
    /// 이벤트 길이 (헤더, 체크섬 포함)
    pub event_length: u32,
    /// 다음 이벤트 위치
    pub next_pos: u32,
    /// 이벤트 플래그
    pub flags: u16,
}

impl EventHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < EVENT_HEADER_SIZE {
            return Err(CdcError::BinlogParseError(
                "Invalid event header: too short".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let type_code = cursor.read_u8()?;
        let server_id = cursor.read_u32::<LittleEndian>()?;
        let event_length = cursor.read_u32::<LittleEndian>()?;
        let next_pos = cursor.read_u32::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;

        Ok(EventHeader {
            timestamp,
            event_type: EventType::from_u8(type_code),
            type_code,
            server_id,
            event_length,
            next_pos,
            flags,
        })
    }

    /// 커서를 전진시키면 안 되는 이벤트 (서버가 만든 가짜 이벤트)
    pub fn is_artificial(&self) -> bool {
        self.next_pos == 0 || self.flags & LOG_EVENT_ARTIFICIAL_F != 0
    }
}

/// 파이프라인이 한 이벤트를 처리한 결과
#[derive(Debug, Clone, Serialize)]
pub enum DecodedEvent {
    FormatDescription {
        server_version: String,
        checksum: crate::checksum::ChecksumAlgorithm,
    },
    TableMap {
        table_id: u64,
        database: String,
        table: String,
    },
    Rows {
        kind: RowsEventKind,
        table_id: u64,
        rows: Vec<RowImage>,
    },
    Rotate {
        next_binlog_name: String,
        position: u64,
    },
    Query {
        database: String,
        query: String,
    },
    Xid {
        xid: u64,
    },
    Other(EventType),
}

/// LCB (Length-Coded Binary) 읽기
pub(crate) fn read_lcb(cursor: &mut Cursor<&[u8]>) -> Result<u64> {
    let byte = cursor.read_u8()?;
    match byte {
        0..=0xfa => Ok(byte as u64),
        0xfb => Ok(0),
        0xfc => Ok(cursor.read_u16::<LittleEndian>()? as u64),
        0xfd => Ok(cursor.read_u24::<LittleEndian>()? as u64),
        0xfe => Ok(cursor.read_u64::<LittleEndian>()?),
        0xff => Err(CdcError::BinlogParseError("Invalid LCB value".to_string())),
    }
}

/// 고정 길이 바이트 읽기
pub(crate) fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<Vec<u8>> {
    let remaining = remaining(cursor);
    if len > remaining {
        return Err(CdcError::BinlogParseError(format!(
            "need {} bytes, {} remaining",
            len, remaining
        )));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor
        .get_ref()
        .len()
        .saturating_sub(cursor.position() as usize)
}

/// 테이블 ID 읽기 (post-header 길이에 따라 4 또는 6 바이트)
pub(crate) fn read_table_id(cursor: &mut Cursor<&[u8]>, post_header_len: u8) -> Result<u64> {
    if post_header_len == 6 {
        Ok(cursor.read_u32::<LittleEndian>()? as u64)
    } else {
        Ok(cursor.read_u48::<LittleEndian>()?)
    }
}
