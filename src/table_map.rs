//! TABLE_MAP 레코드 (테이블 ID -> 컬럼 레이아웃)
//!
//! row 이벤트는 컬럼 타입 정보를 담지 않으므로, 직전에 받은 TABLE_MAP 이벤트의
//! 매핑이 있어야만 값을 해석할 수 있습니다.

use crate::error::{CdcError, Result};
use crate::events::{read_bytes, read_lcb, read_table_id, EventType};
use crate::format::FormatDescription;
use bitvec::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// MySQL 컬럼 타입 (와이어 코드)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ColumnType {
    Decimal = 0,
    Tiny = 1,
    Short = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    Null = 6,
    Timestamp = 7,
    LongLong = 8,
    Int24 = 9,
    Date = 10,
    Time = 11,
    DateTime = 12,
    Year = 13,
    NewDate = 14,
    Varchar = 15,
    Bit = 16,
    Timestamp2 = 17,
    DateTime2 = 18,
    Time2 = 19,
    TypedArray = 20,
    Json = 245,
    NewDecimal = 246,
    Enum = 247,
    Set = 248,
    TinyBlob = 249,
    MediumBlob = 250,
    LongBlob = 251,
    Blob = 252,
    VarString = 253,
    String = 254,
    Geometry = 255,
}

impl ColumnType {
    pub fn from_u8(val: u8) -> Result<Self> {
        let ty = match val {
            0 => ColumnType::Decimal,
            1 => ColumnType::Tiny,
            2 => ColumnType::Short,
            3 => ColumnType::Long,
            4 => ColumnType::Float,
            5 => ColumnType::Double,
            6 => ColumnType::Null,
            7 => ColumnType::Timestamp,
            8 => ColumnType::LongLong,
            9 => ColumnType::Int24,
            10 => ColumnType::Date,
            11 => ColumnType::Time,
            12 => ColumnType::DateTime,
            13 => ColumnType::Year,
            14 => ColumnType::NewDate,
            15 => ColumnType::Varchar,
            16 => ColumnType::Bit,
            17 => ColumnType::Timestamp2,
            18 => ColumnType::DateTime2,
            19 => ColumnType::Time2,
            20 => ColumnType::TypedArray,
            245 => ColumnType::Json,
            246 => ColumnType::NewDecimal,
            247 => ColumnType::Enum,
            248 => ColumnType::Set,
            249 => ColumnType::TinyBlob,
            250 => ColumnType::MediumBlob,
            251 => ColumnType::LongBlob,
            252 => ColumnType::Blob,
            253 => ColumnType::VarString,
            254 => ColumnType::String,
            255 => ColumnType::Geometry,
            other => {
                return Err(CdcError::BinlogParseError(format!(
                    "unknown column type: {}",
                    other
                )))
            }
        };
        Ok(ty)
    }

    /// 테이블 맵 메타데이터 블록에서 이 타입이 차지하는 바이트 수
    fn meta_len(&self) -> usize {
        match self {
            ColumnType::Float
            | ColumnType::Double
            | ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Blob
            | ColumnType::Geometry
            | ColumnType::Json
            | ColumnType::Timestamp2
            | ColumnType::DateTime2
            | ColumnType::Time2 => 1,
            ColumnType::Varchar
            | ColumnType::VarString
            | ColumnType::Bit
            | ColumnType::NewDecimal
            | ColumnType::String
            | ColumnType::Enum
            | ColumnType::Set => 2,
            _ => 0,
        }
    }
}

/// 테이블의 한 컬럼 정의
///
/// `meta` 는 서버가 기록한 타입별 메타데이터입니다:
/// - VARCHAR: 최대 바이트 길이
/// - BLOB/JSON/GEOMETRY: 길이 prefix 바이트 수
/// - NEWDECIMAL: `precision << 8 | scale`
/// - STRING/ENUM/SET: `real_type << 8 | length`
/// - BIT: `bytes << 8 | bits % 8`
/// - TIMESTAMP2/DATETIME2/TIME2: 소수 초 자릿수
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub index: usize,
    pub column_type: ColumnType,
    pub meta: u16,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(index: usize, column_type: ColumnType) -> Self {
        ColumnDef {
            index,
            column_type,
            meta: 0,
            nullable: true,
        }
    }

    pub fn with_meta(mut self, meta: u16) -> Self {
        self.meta = meta;
        self
    }
}

/// 테이블 ID 에 대응하는 스키마 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMapping {
    pub table_id: u64,
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
}

impl TableMapping {
    pub fn new(
        table_id: u64,
        database: impl Into<String>,
        table: impl Into<String>,
        columns: Vec<ColumnDef>,
    ) -> Self {
        TableMapping {
            table_id,
            database: database.into(),
            table: table.into(),
            columns,
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// TABLE_MAP 이벤트 본문 파싱 (공통 헤더, 체크섬 제외)
    pub fn parse(data: &[u8], fde: &FormatDescription) -> Result<Self> {
        if data.len() < 8 {
            return Err(CdcError::BinlogParseError(
                "Invalid table map event".to_string(),
            ));
        }

        let mut cursor = Cursor::new(data);

        let table_id = read_table_id(&mut cursor, fde.post_header_len(EventType::TableMapEvent))?;
        let _flags = cursor.read_u16::<LittleEndian>()?;

        // 데이터베이스명 (길이 + 문자열 + NUL)
        let db_len = cursor.read_u8()? as usize;
        let database = String::from_utf8_lossy(&read_bytes(&mut cursor, db_len)?).to_string();
        cursor.read_u8()?;

        // 테이블명 (길이 + 문자열 + NUL)
        let tbl_len = cursor.read_u8()? as usize;
        let table = String::from_utf8_lossy(&read_bytes(&mut cursor, tbl_len)?).to_string();
        cursor.read_u8()?;

        let column_count = read_lcb(&mut cursor)? as usize;
        let type_codes = read_bytes(&mut cursor, column_count)?;
        let column_types = type_codes
            .iter()
            .map(|code| ColumnType::from_u8(*code))
            .collect::<Result<Vec<_>>>()?;

        let metadata_length = read_lcb(&mut cursor)? as usize;
        let metadata = read_bytes(&mut cursor, metadata_length)?;
        let metas = parse_metadata(&column_types, &metadata)?;

        let nullable_bytes = read_bytes(&mut cursor, (column_count + 7) / 8)?;
        let nullable = BitVec::<u8, Lsb0>::from_vec(nullable_bytes);

        // 이후의 optional metadata (컬럼 이름, 부호 등)는 사용하지 않음
        let columns = column_types
            .into_iter()
            .zip(metas)
            .enumerate()
            .map(|(index, (column_type, meta))| ColumnDef {
                index,
                column_type,
                meta,
                nullable: nullable.get(index).map(|b| *b).unwrap_or(true),
            })
            .collect();

        Ok(TableMapping {
            table_id,
            database,
            table,
            columns,
        })
    }
}

fn parse_metadata(types: &[ColumnType], metadata: &[u8]) -> Result<Vec<u16>> {
    let mut cursor = Cursor::new(metadata);
    types
        .iter()
        .map(|ty| -> Result<u16> {
            let meta = match ty {
                ColumnType::Varchar | ColumnType::VarString | ColumnType::Bit => {
                    cursor.read_u16::<LittleEndian>()?
                }
                _ if ty.meta_len() == 2 => {
                    let hi = cursor.read_u8()? as u16;
                    let lo = cursor.read_u8()? as u16;
                    hi << 8 | lo
                }
                _ if ty.meta_len() == 1 => cursor.read_u8()? as u16,
                _ => 0,
            };
            Ok(meta)
        })
        .collect()
}
