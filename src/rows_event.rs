//! WRITE/UPDATE/DELETE ROWS 이벤트 -> RowImage 변환
//!
//! 1. 테이블 ID 로 매핑 조회 (없으면 순서 위반, 즉시 실패)
//! 2. presence 비트맵 (UPDATE 는 before/after 두 개)
//! 3. 각 row: presence 컬럼 수만큼의 NULL 비트맵 + NULL 이 아닌 값들
//! 컨텍스트는 읽기만 합니다.

use crate::context::ReplicationContext;
use crate::error::{CdcError, Result};
use crate::events::{read_bytes, read_lcb, read_table_id, remaining, EventType, RowsEventKind};
use crate::row::{Column, ColumnValue, Presence, RowImage, RowSide};
use crate::table_map::TableMapping;
use crate::value::{session_offset, ValueDecoder};
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::FixedOffset;
use std::io::Cursor;
use tracing::debug;

/// 디코딩된 row 이벤트 (rows 는 와이어 순서 그대로)
#[derive(Debug, Clone)]
pub struct RowsEvent {
    pub kind: RowsEventKind,
    pub table_id: u64,
    pub flags: u16,
    pub rows: Vec<RowImage>,
}

pub fn decode_rows<D: ValueDecoder>(
    ctx: &ReplicationContext,
    event_type: EventType,
    data: &[u8],
    decoder: &D,
) -> Result<RowsEvent> {
    let kind = event_type.rows_kind().ok_or_else(|| {
        CdcError::InvalidEvent(format!("{:?} is not a rows event", event_type))
    })?;

    let mut cursor = Cursor::new(data);
    let post_header_len = ctx.format_description().post_header_len(event_type);
    let table_id = read_table_id(&mut cursor, post_header_len)?;
    let mapping = ctx.require_table_mapping(table_id)?;

    let flags = cursor.read_u16::<LittleEndian>()?;
    if event_type.is_rows_v2() {
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        if extra_len < 2 {
            return Err(CdcError::BinlogParseError(format!(
                "invalid rows extra data length: {}",
                extra_len
            )));
        }
        read_bytes(&mut cursor, extra_len - 2)?;
    }

    let column_count = read_lcb(&mut cursor)? as usize;
    if column_count != mapping.column_count() {
        return Err(CdcError::InvalidEvent(format!(
            "table {}.{} (id {}) maps {} columns, rows event has {}",
            mapping.database,
            mapping.table,
            table_id,
            mapping.column_count(),
            column_count
        )));
    }

    // UPDATE 는 before, after 비트맵이 차례로 옴
    let before_presence = if kind.has_before() {
        Some(read_presence(&mut cursor, column_count)?)
    } else {
        None
    };
    let after_presence = if kind.has_after() {
        Some(read_presence(&mut cursor, column_count)?)
    } else {
        None
    };

    let tz = session_offset(ctx.time_zone());
    let mut rows = Vec::new();
    while remaining(&cursor) > 0 {
        let before = before_presence
            .as_ref()
            .map(|presence| decode_side(&mut cursor, &mapping, presence, &tz, decoder))
            .transpose()?;
        let after = after_presence
            .as_ref()
            .map(|presence| decode_side(&mut cursor, &mapping, presence, &tz, decoder))
            .transpose()?;
        rows.push(RowImage::new(before, after));
    }

    debug!(
        "{} rows event: {}.{} (id {}), {} rows",
        kind.as_str(),
        mapping.database,
        mapping.table,
        table_id,
        rows.len()
    );

    Ok(RowsEvent {
        kind,
        table_id,
        flags,
        rows,
    })
}

fn read_bitmap(cursor: &mut Cursor<&[u8]>, bits: usize) -> Result<Presence> {
    let mut bitmap = Presence::from_vec(read_bytes(cursor, (bits + 7) / 8)?);
    bitmap.truncate(bits);
    Ok(bitmap)
}

/// 컬럼 presence 비트맵. 비어 있으면 row 가 바이트를 소비하지 않으므로 거부
fn read_presence(cursor: &mut Cursor<&[u8]>, column_count: usize) -> Result<Presence> {
    let presence = read_bitmap(cursor, column_count)?;
    if presence.not_any() {
        return Err(CdcError::InvalidEvent(
            "rows event presence bitmap has no columns".to_string(),
        ));
    }
    Ok(presence)
}

fn decode_side<D: ValueDecoder>(
    cursor: &mut Cursor<&[u8]>,
    mapping: &TableMapping,
    presence: &Presence,
    tz: &FixedOffset,
    decoder: &D,
) -> Result<RowSide> {
    let nulls = read_bitmap(cursor, presence.count_ones())?;
    let mut columns = Vec::with_capacity(nulls.len());

    for (slot, index) in presence.iter_ones().enumerate() {
        let def = &mapping.columns[index];
        let value = if nulls[slot] {
            ColumnValue::Null
        } else {
            decoder.decode(def, tz, cursor)?
        };
        columns.push(Column {
            index,
            column_type: def.column_type,
            value,
        });
    }

    RowSide::new(presence.clone(), columns)
}
