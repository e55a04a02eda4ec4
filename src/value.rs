//! 컬럼 값 디코더
//!
//! row 이벤트 페이로드에서 NULL 이 아닌 값 하나를 읽어 `ColumnValue` 로 변환합니다.
//! 타입별 디코딩은 `ValueDecoder` 구현체가 담당하고, 파이프라인은 이 트레잇만 봅니다.

use crate::error::{CdcError, Result};
use crate::events::read_bytes;
use crate::row::ColumnValue;
use crate::table_map::{ColumnDef, ColumnType};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::io::Cursor;
use tracing::warn;

const DIG_PER_DEC: usize = 9;
const DIG2BYTES: [usize; DIG_PER_DEC + 1] = [0, 1, 1, 2, 2, 3, 3, 4, 4, 4];

const DATETIMEF_INT_OFS: i64 = 0x80_0000_0000;
const TIMEF_INT_OFS: i64 = 0x80_0000;

pub trait ValueDecoder {
    /// `cursor` 위치에서 값 하나를 읽음. `tz` 는 TIMESTAMP 해석용 세션 타임존.
    fn decode(
        &self,
        column: &ColumnDef,
        tz: &FixedOffset,
        cursor: &mut Cursor<&[u8]>,
    ) -> Result<ColumnValue>;
}

/// 기본 디코더. JSON/GEOMETRY 는 원시 바이트로 남깁니다.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValueDecoder;

impl ValueDecoder for BasicValueDecoder {
    fn decode(
        &self,
        column: &ColumnDef,
        tz: &FixedOffset,
        cursor: &mut Cursor<&[u8]>,
    ) -> Result<ColumnValue> {
        let meta = column.meta;
        let value = match column.column_type {
            ColumnType::Null => ColumnValue::Null,
            ColumnType::Tiny => ColumnValue::Int8(cursor.read_i8()?),
            ColumnType::Short => ColumnValue::Int16(cursor.read_i16::<LittleEndian>()?),
            ColumnType::Int24 => ColumnValue::Int32(cursor.read_i24::<LittleEndian>()?),
            ColumnType::Long => ColumnValue::Int32(cursor.read_i32::<LittleEndian>()?),
            ColumnType::LongLong => ColumnValue::Int64(cursor.read_i64::<LittleEndian>()?),
            ColumnType::Float => ColumnValue::Float(cursor.read_f32::<LittleEndian>()?),
            ColumnType::Double => ColumnValue::Double(cursor.read_f64::<LittleEndian>()?),
            ColumnType::Year => {
                let year = cursor.read_u8()? as u16;
                ColumnValue::Year(if year == 0 { 0 } else { 1900 + year })
            }
            ColumnType::Date | ColumnType::NewDate => {
                let v = cursor.read_u24::<LittleEndian>()?;
                ColumnValue::Date(format!("{:04}-{:02}-{:02}", v >> 9, (v >> 5) & 0x0f, v & 0x1f))
            }
            ColumnType::Time => {
                let v = cursor.read_i24::<LittleEndian>()?;
                let sign = if v < 0 { "-" } else { "" };
                let v = v.unsigned_abs();
                ColumnValue::Time(format!(
                    "{}{:02}:{:02}:{:02}",
                    sign,
                    v / 10000,
                    (v / 100) % 100,
                    v % 100
                ))
            }
            ColumnType::Time2 => decode_time2(cursor, meta)?,
            ColumnType::DateTime => {
                let v = cursor.read_u64::<LittleEndian>()?;
                let (date, time) = (v / 1_000_000, v % 1_000_000);
                ColumnValue::DateTime(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    date / 10000,
                    (date / 100) % 100,
                    date % 100,
                    time / 10000,
                    (time / 100) % 100,
                    time % 100
                ))
            }
            ColumnType::DateTime2 => decode_datetime2(cursor, meta)?,
            ColumnType::Timestamp => {
                let secs = cursor.read_u32::<LittleEndian>()?;
                timestamp(secs, 0, tz)?
            }
            ColumnType::Timestamp2 => {
                let secs = cursor.read_u32::<BigEndian>()?;
                let micros = read_fraction(cursor, meta)?;
                timestamp(secs, micros, tz)?
            }
            ColumnType::NewDecimal => ColumnValue::Decimal(decode_decimal(
                cursor,
                (meta >> 8) as usize,
                (meta & 0xff) as usize,
            )?),
            ColumnType::Bit => {
                let len = (meta >> 8) as usize + usize::from(meta & 0xff > 0);
                ColumnValue::Bit(read_uint_be(cursor, len)?)
            }
            ColumnType::Enum => {
                ColumnValue::Enum(read_uint_le(cursor, (meta & 0xff) as usize)? as u16)
            }
            ColumnType::Set => ColumnValue::Set(read_uint_le(cursor, (meta & 0xff) as usize)?),
            ColumnType::Varchar | ColumnType::VarString => {
                let len = if meta < 256 {
                    cursor.read_u8()? as usize
                } else {
                    cursor.read_u16::<LittleEndian>()? as usize
                };
                text_or_bytes(read_bytes(cursor, len)?)
            }
            ColumnType::String => decode_string(cursor, meta)?,
            ColumnType::TinyBlob
            | ColumnType::MediumBlob
            | ColumnType::LongBlob
            | ColumnType::Blob
            | ColumnType::Geometry
            | ColumnType::Json => {
                let len = read_uint_le(cursor, meta as usize)? as usize;
                ColumnValue::Bytes(read_bytes(cursor, len)?)
            }
            ColumnType::Decimal | ColumnType::TypedArray => {
                return Err(CdcError::BinlogParseError(format!(
                    "unsupported column type {:?} at index {}",
                    column.column_type, column.index
                )))
            }
        };
        Ok(value)
    }
}

/// 세션 타임존 문자열을 오프셋으로 변환. 이름 있는 타임존은 UTC 로 취급합니다.
pub fn session_offset(time_zone: Option<&str>) -> FixedOffset {
    match time_zone {
        None => Utc.fix(),
        Some(tz) => parse_time_zone(tz).unwrap_or_else(|| {
            warn!("Unsupported session time zone {:?}, using UTC", tz);
            Utc.fix()
        }),
    }
}

fn parse_time_zone(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("UTC") || tz.eq_ignore_ascii_case("GMT") || tz == "Z" {
        return Some(Utc.fix());
    }
    let (sign, rest) = match tz.as_bytes().first()? {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if minutes >= 60 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn timestamp(secs: u32, micros: u32, tz: &FixedOffset) -> Result<ColumnValue> {
    let utc = DateTime::<Utc>::from_timestamp(secs as i64, micros * 1000).ok_or_else(|| {
        CdcError::BinlogParseError(format!("timestamp out of range: {}", secs))
    })?;
    Ok(ColumnValue::Timestamp(utc.with_timezone(tz)))
}

fn read_uint_le(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<u64> {
    match len {
        0 => Ok(0),
        1..=8 => Ok(cursor.read_uint::<LittleEndian>(len)?),
        _ => Err(CdcError::BinlogParseError(format!("invalid integer width: {}", len))),
    }
}

fn read_uint_be(cursor: &mut Cursor<&[u8]>, len: usize) -> Result<u64> {
    match len {
        0 => Ok(0),
        1..=8 => Ok(cursor.read_uint::<BigEndian>(len)?),
        _ => Err(CdcError::BinlogParseError(format!("invalid integer width: {}", len))),
    }
}

/// 소수 초 부분 (fsp 에 따라 0~3 바이트, big-endian) -> 마이크로초
fn read_fraction(cursor: &mut Cursor<&[u8]>, fsp: u16) -> Result<u32> {
    let len = fraction_len(fsp);
    let raw = read_uint_be(cursor, len)?;
    fraction_micros(raw, len)
}

fn fraction_micros(raw: u64, len: usize) -> Result<u32> {
    let micros = raw * 100u64.pow(3 - len as u32);
    if micros >= 1_000_000 {
        return Err(CdcError::BinlogParseError(format!(
            "fractional seconds out of range: {}",
            micros
        )));
    }
    Ok(micros as u32)
}

fn fraction_len(fsp: u16) -> usize {
    (fsp.min(6) as usize + 1) / 2
}

fn format_fraction(micros: u32, fsp: u16) -> String {
    let fsp = fsp.min(6) as u32;
    if fsp == 0 {
        return String::new();
    }
    format!(".{:0width$}", micros / 10u32.pow(6 - fsp), width = fsp as usize)
}

fn decode_datetime2(cursor: &mut Cursor<&[u8]>, fsp: u16) -> Result<ColumnValue> {
    let packed = read_uint_be(cursor, 5)? as i64 - DATETIMEF_INT_OFS;
    let micros = read_fraction(cursor, fsp)?;
    let packed = packed.unsigned_abs();

    let ymd = packed >> 17;
    let ym = ymd >> 5;
    let hms = packed & 0x1ffff;
    Ok(ColumnValue::DateTime(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}{}",
        ym / 13,
        ym % 13,
        ymd & 0x1f,
        hms >> 12,
        (hms >> 6) & 0x3f,
        hms & 0x3f,
        format_fraction(micros, fsp)
    )))
}

fn decode_time2(cursor: &mut Cursor<&[u8]>, fsp: u16) -> Result<ColumnValue> {
    let frac_len = fraction_len(fsp);
    let raw = read_uint_be(cursor, 3 + frac_len)? as i64;
    let shift = 8 * frac_len as u32;
    let packed = raw - (TIMEF_INT_OFS << shift);

    let sign = if packed < 0 { "-" } else { "" };
    let packed = packed.unsigned_abs();
    let int_part = packed >> shift;
    let micros = fraction_micros(packed & ((1u64 << shift) - 1), frac_len)?;

    Ok(ColumnValue::Time(format!(
        "{}{:02}:{:02}:{:02}{}",
        sign,
        (int_part >> 12) & 0x3ff,
        (int_part >> 6) & 0x3f,
        int_part & 0x3f,
        format_fraction(micros, fsp)
    )))
}

/// NEWDECIMAL 바이너리 형식 디코딩 (9 자리씩 4 바이트 묶음)
fn decode_decimal(cursor: &mut Cursor<&[u8]>, precision: usize, scale: usize) -> Result<String> {
    if scale > precision {
        return Err(CdcError::BinlogParseError(format!(
            "invalid decimal({}, {})",
            precision, scale
        )));
    }
    let intg = precision - scale;
    let (intg0, intg0x) = (intg / DIG_PER_DEC, intg % DIG_PER_DEC);
    let (frac0, frac0x) = (scale / DIG_PER_DEC, scale % DIG_PER_DEC);
    let size = intg0 * 4 + DIG2BYTES[intg0x] + frac0 * 4 + DIG2BYTES[frac0x];

    let mut buf = read_bytes(cursor, size)?;
    if buf.is_empty() {
        return Ok("0".to_string());
    }
    let negative = buf[0] & 0x80 == 0;
    buf[0] ^= 0x80;
    if negative {
        buf.iter_mut().for_each(|b| *b ^= 0xff);
    }

    let mut digits = Cursor::new(buf.as_slice());
    let mut int_part = String::new();
    if intg0x > 0 {
        let v = read_uint_be(&mut digits, DIG2BYTES[intg0x])?;
        int_part.push_str(&format!("{:0width$}", v, width = intg0x));
    }
    for _ in 0..intg0 {
        let v = digits.read_u32::<BigEndian>()?;
        int_part.push_str(&format!("{:09}", v));
    }
    let int_part = int_part.trim_start_matches('0');

    let mut frac_part = String::new();
    for _ in 0..frac0 {
        let v = digits.read_u32::<BigEndian>()?;
        frac_part.push_str(&format!("{:09}", v));
    }
    if frac0x > 0 {
        let v = read_uint_be(&mut digits, DIG2BYTES[frac0x])?;
        frac_part.push_str(&format!("{:0width$}", v, width = frac0x));
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(if int_part.is_empty() { "0" } else { int_part });
    if scale > 0 {
        out.push('.');
        out.push_str(&frac_part);
    }
    Ok(out)
}

/// STRING 컬럼. 메타데이터의 상위 바이트가 실제 타입 (ENUM/SET 포함)
fn decode_string(cursor: &mut Cursor<&[u8]>, meta: u16) -> Result<ColumnValue> {
    let byte0 = (meta >> 8) as u8;
    let byte1 = (meta & 0xff) as u16;

    let (real_type, max_len) = if byte0 & 0x30 != 0x30 {
        (byte0 | 0x30, byte1 | ((((byte0 & 0x30) ^ 0x30) as u16) << 4))
    } else {
        (byte0, byte1)
    };

    if real_type == ColumnType::Enum as u8 {
        return Ok(ColumnValue::Enum(read_uint_le(cursor, byte1 as usize)? as u16));
    }
    if real_type == ColumnType::Set as u8 {
        return Ok(ColumnValue::Set(read_uint_le(cursor, byte1 as usize)?));
    }

    let len = if max_len < 256 {
        cursor.read_u8()? as usize
    } else {
        cursor.read_u16::<LittleEndian>()? as usize
    };
    Ok(text_or_bytes(read_bytes(cursor, len)?))
}

fn text_or_bytes(bytes: Vec<u8>) -> ColumnValue {
    match String::from_utf8(bytes) {
        Ok(s) => ColumnValue::String(s),
        Err(e) => ColumnValue::Bytes(e.into_bytes()),
    }
}
