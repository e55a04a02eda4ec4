//! 이벤트 디코딩 파이프라인
//!
//! 원시 이벤트 바이트를 받아 컨텍스트를 읽고 (체크섬, 테이블 매핑, 타임존)
//! 필요한 경우 갱신합니다. 처리 도중 에러가 나면 컨텍스트는 변경되지 않습니다.

use crate::checksum::{verify_crc32, ChecksumAlgorithm};
use crate::context::ReplicationContext;
use crate::error::{CdcError, Result};
use crate::events::{
    read_bytes, remaining, DecodedEvent, EventHeader, EventType, EVENT_HEADER_SIZE,
};
use crate::format::FormatDescription;
use crate::rows_event::decode_rows;
use crate::table_map::TableMapping;
use crate::value::{BasicValueDecoder, ValueDecoder};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use tracing::{debug, info};

/// QUERY 이벤트 status 변수 코드
const Q_FLAGS2_CODE: u8 = 0;
const Q_SQL_MODE_CODE: u8 = 1;
const Q_CATALOG_CODE: u8 = 2;
const Q_AUTO_INCREMENT: u8 = 3;
const Q_CHARSET_CODE: u8 = 4;
const Q_TIME_ZONE_CODE: u8 = 5;
const Q_CATALOG_NZ_CODE: u8 = 6;
const Q_LC_TIME_NAMES_CODE: u8 = 7;
const Q_CHARSET_DATABASE_CODE: u8 = 8;
const Q_TABLE_MAP_FOR_UPDATE_CODE: u8 = 9;
const Q_MASTER_DATA_WRITTEN_CODE: u8 = 10;
const Q_INVOKER: u8 = 11;
const Q_UPDATED_DB_NAMES: u8 = 12;
const Q_MICROSECONDS: u8 = 13;
const Q_EXPLICIT_DEFAULTS_FOR_TIMESTAMP: u8 = 16;
const Q_DDL_LOGGED_WITH_XID: u8 = 17;
const Q_DEFAULT_COLLATION_FOR_UTF8MB4: u8 = 18;
const Q_SQL_REQUIRE_PRIMARY_KEY: u8 = 19;
const Q_DEFAULT_TABLE_ENCRYPTION: u8 = 20;

/// Q_UPDATED_DB_NAMES 에서 DB 목록이 생략되었음을 뜻하는 값
const OVER_MAX_DBS_IN_EVENT_MTS: u8 = 254;

/// 파싱이 끝난 뒤 컨텍스트에 반영할 변경
enum Pending {
    FormatDescription(FormatDescription),
    TableMapping(TableMapping),
    TimeZone(String),
    Rotate(String, u64),
    Nothing,
}

pub struct EventPipeline<D = BasicValueDecoder> {
    decoder: D,
    verify_checksum: bool,
}

impl Default for EventPipeline<BasicValueDecoder> {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPipeline<BasicValueDecoder> {
    pub fn new() -> Self {
        Self::with_decoder(BasicValueDecoder)
    }
}

impl<D: ValueDecoder> EventPipeline<D> {
    pub fn with_decoder(decoder: D) -> Self {
        EventPipeline {
            decoder,
            verify_checksum: true,
        }
    }

    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// 이벤트 하나 처리 (헤더부터 체크섬까지 포함된 완전한 이벤트)
    pub fn handle(&self, ctx: &mut ReplicationContext, raw: &[u8]) -> Result<DecodedEvent> {
        let header = EventHeader::parse(raw)?;
        if header.event_length as usize != raw.len() {
            return Err(CdcError::InvalidEvent(format!(
                "event length {} does not match {} received bytes",
                header.event_length,
                raw.len()
            )));
        }

        let (decoded, pending) = if header.event_type == EventType::FormatDescriptionEvent {
            self.format_description(raw)?
        } else {
            let body = self.event_body(ctx, raw)?;
            self.dispatch(ctx, &header, body)?
        };

        let advance_to = match pending {
            Pending::Rotate(..) => None,
            _ if header.is_artificial() => None,
            _ => Some(header.next_pos as u64),
        };
        if let Some(position) = advance_to {
            if position < ctx.binlog_position() {
                return Err(CdcError::InvalidStateTransition(format!(
                    "{:?} at {} points back to {}",
                    header.event_type,
                    ctx.cursor(),
                    position
                )));
            }
        }

        match pending {
            Pending::FormatDescription(fde) => ctx.record_format_description(fde),
            Pending::TableMapping(mapping) => {
                ctx.record_table_mapping(mapping.table_id, mapping);
            }
            Pending::TimeZone(tz) => ctx.set_time_zone(Some(tz)),
            Pending::Rotate(file, position) => ctx.rotate(&file, position),
            Pending::Nothing => {}
        }
        if let Some(position) = advance_to {
            let file = ctx.binlog_file_name().to_string();
            ctx.advance_cursor(&file, position)?;
        }

        Ok(decoded)
    }

    fn format_description(&self, raw: &[u8]) -> Result<(DecodedEvent, Pending)> {
        let fde = FormatDescription::parse(&raw[EVENT_HEADER_SIZE..])?;
        // FORMAT_DESCRIPTION 은 자기 자신의 알고리즘으로 검증
        if self.verify_checksum && fde.checksum == ChecksumAlgorithm::Crc32 {
            verify_crc32(raw)?;
        }
        info!(
            "Format description: server {} binlog v{}, checksum {}",
            fde.server_version, fde.binlog_version, fde.checksum
        );
        let decoded = DecodedEvent::FormatDescription {
            server_version: fde.server_version.clone(),
            checksum: fde.checksum,
        };
        Ok((decoded, Pending::FormatDescription(fde)))
    }

    /// 체크섬 검증 후 공통 헤더와 체크섬을 뗀 본문
    fn event_body<'a>(&self, ctx: &ReplicationContext, raw: &'a [u8]) -> Result<&'a [u8]> {
        let fde = ctx.format_description();
        if self.verify_checksum {
            fde.checksum.verify(raw)?;
        }
        let (event, _) = fde.checksum.split(raw)?;
        let header_len = fde.header_length as usize;
        if event.len() < header_len {
            return Err(CdcError::InvalidEvent(
                "event shorter than common header".to_string(),
            ));
        }
        Ok(&event[header_len..])
    }

    fn dispatch(
        &self,
        ctx: &ReplicationContext,
        header: &EventHeader,
        body: &[u8],
    ) -> Result<(DecodedEvent, Pending)> {
        let event_type = header.event_type;

        if event_type.rows_kind().is_some() {
            let event = decode_rows(ctx, event_type, body, &self.decoder)?;
            let decoded = DecodedEvent::Rows {
                kind: event.kind,
                table_id: event.table_id,
                rows: event.rows,
            };
            return Ok((decoded, Pending::Nothing));
        }

        match event_type {
            EventType::TableMapEvent => {
                let mapping = TableMapping::parse(body, ctx.format_description())?;
                debug!(
                    "Table map: {}.{} -> id {} ({} columns)",
                    mapping.database,
                    mapping.table,
                    mapping.table_id,
                    mapping.column_count()
                );
                let decoded = DecodedEvent::TableMap {
                    table_id: mapping.table_id,
                    database: mapping.database.clone(),
                    table: mapping.table.clone(),
                };
                Ok((decoded, Pending::TableMapping(mapping)))
            }
            EventType::RotateEvent => {
                if body.len() < 8 {
                    return Err(CdcError::BinlogParseError("Invalid rotate event".to_string()));
                }
                let mut cursor = Cursor::new(body);
                let position = cursor.read_u64::<LittleEndian>()?;
                let next_binlog_name = String::from_utf8_lossy(&body[8..]).to_string();
                let decoded = DecodedEvent::Rotate {
                    next_binlog_name: next_binlog_name.clone(),
                    position,
                };
                Ok((decoded, Pending::Rotate(next_binlog_name, position)))
            }
            EventType::QueryEvent => {
                let post_header_len = ctx.format_description().post_header_len(event_type);
                let (database, query, time_zone) = parse_query(body, post_header_len)?;
                let pending = match time_zone {
                    Some(tz) => Pending::TimeZone(tz),
                    None => Pending::Nothing,
                };
                Ok((DecodedEvent::Query { database, query }, pending))
            }
            EventType::XidEvent => {
                let xid = Cursor::new(body).read_u64::<LittleEndian>()?;
                Ok((DecodedEvent::Xid { xid }, Pending::Nothing))
            }
            other => Ok((DecodedEvent::Other(other), Pending::Nothing)),
        }
    }
}

/// QUERY 이벤트: (데이터베이스, 쿼리, 세션 타임존)
fn parse_query(body: &[u8], post_header_len: u8) -> Result<(String, String, Option<String>)> {
    if body.len() < 13 || (post_header_len as usize) < 13 {
        return Err(CdcError::BinlogParseError("Invalid query event".to_string()));
    }

    let mut cursor = Cursor::new(body);
    let _thread_id = cursor.read_u32::<LittleEndian>()?;
    let _exec_time = cursor.read_u32::<LittleEndian>()?;
    let db_len = cursor.read_u8()? as usize;
    let _error_code = cursor.read_u16::<LittleEndian>()?;
    let status_len = cursor.read_u16::<LittleEndian>()? as usize;
    read_bytes(&mut cursor, post_header_len as usize - 13)?;

    let status = read_bytes(&mut cursor, status_len)?;
    let time_zone = find_time_zone(&status)?;

    let database = String::from_utf8_lossy(&read_bytes(&mut cursor, db_len)?).to_string();
    cursor.read_u8()?;

    let query = String::from_utf8_lossy(&body[cursor.position() as usize..]).to_string();
    Ok((database, query, time_zone))
}

/// status 변수 블록에서 Q_TIME_ZONE_CODE 검색. 모르는 코드를 만나면 중단.
fn find_time_zone(status: &[u8]) -> Result<Option<String>> {
    let mut cursor = Cursor::new(status);
    while remaining(&cursor) > 0 {
        let code = cursor.read_u8()?;
        let skip = match code {
            Q_TIME_ZONE_CODE => {
                let len = cursor.read_u8()? as usize;
                let tz = read_bytes(&mut cursor, len)?;
                return Ok(Some(String::from_utf8_lossy(&tz).to_string()));
            }
            Q_FLAGS2_CODE | Q_AUTO_INCREMENT | Q_MASTER_DATA_WRITTEN_CODE => 4,
            Q_SQL_MODE_CODE | Q_TABLE_MAP_FOR_UPDATE_CODE | Q_DDL_LOGGED_WITH_XID => 8,
            Q_CHARSET_CODE => 6,
            Q_LC_TIME_NAMES_CODE | Q_CHARSET_DATABASE_CODE | Q_DEFAULT_COLLATION_FOR_UTF8MB4 => 2,
            Q_MICROSECONDS => 3,
            Q_EXPLICIT_DEFAULTS_FOR_TIMESTAMP
            | Q_SQL_REQUIRE_PRIMARY_KEY
            | Q_DEFAULT_TABLE_ENCRYPTION => 1,
            Q_CATALOG_CODE => cursor.read_u8()? as usize + 1,
            Q_CATALOG_NZ_CODE => cursor.read_u8()? as usize,
            Q_INVOKER => {
                let user_len = cursor.read_u8()? as usize;
                read_bytes(&mut cursor, user_len)?;
                cursor.read_u8()? as usize
            }
            Q_UPDATED_DB_NAMES => {
                let count = cursor.read_u8()?;
                if count != OVER_MAX_DBS_IN_EVENT_MTS {
                    for _ in 0..count {
                        while cursor.read_u8()? != 0 {}
                    }
                }
                0
            }
            _ => return Ok(None),
        };
        read_bytes(&mut cursor, skip)?;
    }
    Ok(None)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::format::tests::fde_body;
    use crate::row::ColumnValue;
    use crate::rows_event::tests::rows_header;
    use crate::table_map::tests::table_map_body;

    /// 헤더 + 본문 (+ CRC32) 으로 완전한 이벤트 생성
    pub(crate) fn event(type_code: u8, next_pos: u32, body: &[u8], crc: bool) -> Vec<u8> {
        let length = EVENT_HEADER_SIZE + body.len() + if crc { 4 } else { 0 };
        let mut raw = Vec::new();
        raw.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        raw.push(type_code);
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.extend_from_slice(&(length as u32).to_le_bytes());
        raw.extend_from_slice(&next_pos.to_le_bytes());
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.extend_from_slice(body);
        if crc {
            let checksum = crc32fast::hash(&raw);
            raw.extend_from_slice(&checksum.to_le_bytes());
        }
        raw
    }

    pub(crate) fn crc_fde(next_pos: u32) -> Vec<u8> {
        let body = fde_body("8.0.34", Some(1));
        event(15, next_pos, &body[..body.len() - 4], true)
    }

    fn query_body(query: &str, time_zone: Option<&str>) -> Vec<u8> {
        let mut status = Vec::new();
        status.push(Q_FLAGS2_CODE);
        status.extend_from_slice(&0u32.to_le_bytes());
        status.push(Q_SQL_MODE_CODE);
        status.extend_from_slice(&0u64.to_le_bytes());
        status.push(Q_CATALOG_NZ_CODE);
        status.push(3);
        status.extend_from_slice(b"std");
        if let Some(tz) = time_zone {
            status.push(Q_TIME_ZONE_CODE);
            status.push(tz.len() as u8);
            status.extend_from_slice(tz.as_bytes());
        }

        let mut body = Vec::new();
        body.extend_from_slice(&9u32.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.push(4);
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(status.len() as u16).to_le_bytes());
        body.extend_from_slice(&status);
        body.extend_from_slice(b"shop\0");
        body.extend_from_slice(query.as_bytes());
        body
    }

    fn started() -> ReplicationContext {
        let mut ctx = ReplicationContext::new();
        ctx.rotate("mysql-bin.000001", 4);
        ctx
    }

    #[test]
    fn test_full_stream_scenario() {
        let pipeline = EventPipeline::new();
        let mut ctx = started();

        pipeline.handle(&mut ctx, &crc_fde(124)).unwrap();
        assert_eq!(ctx.format_description().checksum, ChecksumAlgorithm::Crc32);
        assert_eq!(ctx.binlog_position(), 124);

        let table_map = table_map_body(42, &[3, 15], &[0xff, 0x00]);
        match pipeline.handle(&mut ctx, &event(19, 200, &table_map, true)).unwrap() {
            DecodedEvent::TableMap { table_id, table, .. } => {
                assert_eq!(table_id, 42);
                assert_eq!(table, "orders");
            }
            other => panic!("unexpected {:?}", other),
        }

        let begin = query_body("BEGIN", Some("+09:00"));
        pipeline.handle(&mut ctx, &event(2, 260, &begin, true)).unwrap();
        assert_eq!(ctx.time_zone(), Some("+09:00"));

        let mut rows = rows_header(42, 2, &[0b01, 0b11]);
        rows.push(0x00);
        rows.extend_from_slice(&1i32.to_le_bytes());
        rows.push(0x00);
        rows.extend_from_slice(&1i32.to_le_bytes());
        rows.extend_from_slice(b"\x02ok");

        match pipeline.handle(&mut ctx, &event(31, 320, &rows, true)).unwrap() {
            DecodedEvent::Rows { table_id, rows, .. } => {
                assert_eq!(table_id, 42);
                assert_eq!(rows.len(), 1);
                assert_eq!(rows[0].before_columns().len(), 1);
                assert_eq!(rows[0].after_columns().len(), 2);
                assert_eq!(
                    rows[0].after_columns()[1].value,
                    ColumnValue::String("ok".to_string())
                );
            }
            other => panic!("unexpected {:?}", other),
        }

        match pipeline
            .handle(&mut ctx, &event(16, 351, &77u64.to_le_bytes(), true))
            .unwrap()
        {
            DecodedEvent::Xid { xid } => assert_eq!(xid, 77),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(ctx.cursor().to_string(), "mysql-bin.000001:351");
    }

    #[test]
    fn test_ordering_violation_leaves_context_untouched() {
        let pipeline = EventPipeline::new();
        let mut ctx = started();
        pipeline.handle(&mut ctx, &crc_fde(124)).unwrap();

        let mut rows = rows_header(99, 1, &[0b1]);
        rows.push(0x00);
        rows.extend_from_slice(&1i32.to_le_bytes());

        let before = ctx.cursor().clone();
        assert!(matches!(
            pipeline.handle(&mut ctx, &event(30, 200, &rows, true)),
            Err(CdcError::OrderingViolation { table_id: 99 })
        ));
        assert_eq!(ctx.cursor(), &before);
        assert_eq!(ctx.table_mapping_count(), 0);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let pipeline = EventPipeline::new();
        let mut ctx = started();
        pipeline.handle(&mut ctx, &crc_fde(124)).unwrap();

        let mut raw = event(19, 200, &table_map_body(1, &[3], &[]), true);
        raw[EVENT_HEADER_SIZE] ^= 0xff;
        assert!(matches!(
            pipeline.handle(&mut ctx, &raw),
            Err(CdcError::ChecksumMismatch { .. })
        ));
        assert_eq!(ctx.binlog_position(), 124);
        assert!(ctx.lookup_table_mapping(1).is_none());
    }

    #[test]
    fn test_checksum_off_stream() {
        let pipeline = EventPipeline::new();
        let mut ctx = started();
        let fde = fde_body("5.5.62", None);
        pipeline.handle(&mut ctx, &event(15, 120, &fde, false)).unwrap();

        let raw = event(19, 180, &table_map_body(5, &[3], &[]), false);
        pipeline.handle(&mut ctx, &raw).unwrap();
        assert!(ctx.lookup_table_mapping(5).is_some());
    }

    #[test]
    fn test_rotate_and_artificial_events() {
        let pipeline = EventPipeline::new();
        let mut ctx = started();
        pipeline.handle(&mut ctx, &crc_fde(124)).unwrap();

        let mut rotate = 4u64.to_le_bytes().to_vec();
        rotate.extend_from_slice(b"mysql-bin.000002");
        pipeline.handle(&mut ctx, &event(4, 170, &rotate, true)).unwrap();
        assert_eq!(ctx.cursor().to_string(), "mysql-bin.000002:4");

        // 서버가 다시 보내는 FORMAT_DESCRIPTION (log_pos = 0)
        pipeline.handle(&mut ctx, &crc_fde(0)).unwrap();
        assert_eq!(ctx.binlog_position(), 4);
    }

    #[test]
    fn test_backwards_event_rejected() {
        let pipeline = EventPipeline::new();
        let mut ctx = started();
        pipeline.handle(&mut ctx, &crc_fde(500)).unwrap();

        let raw = event(19, 300, &table_map_body(1, &[3], &[]), true);
        assert!(matches!(
            pipeline.handle(&mut ctx, &raw),
            Err(CdcError::InvalidStateTransition(_))
        ));
        assert!(ctx.lookup_table_mapping(1).is_none());
    }

    #[test]
    fn test_find_time_zone_stops_at_unknown_code() {
        assert_eq!(find_time_zone(&[0x63, 5, 1, b'x']).unwrap(), None);
        assert_eq!(
            find_time_zone(&[Q_MICROSECONDS, 0, 0, 0, Q_TIME_ZONE_CODE, 3, b'U', b'T', b'C'])
                .unwrap(),
            Some("UTC".to_string())
        );
    }
}
