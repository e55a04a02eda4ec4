//! row 변경 이미지 (before / after)
//!
//! 배열은 presence 비트 순서로 채워집니다. 비트가 꺼진 컬럼은 페이로드에서 아예
//! 빠진 것이고, SQL NULL 은 `ColumnValue::Null` 로 구분됩니다.

use crate::error::{CdcError, Result};
use crate::table_map::ColumnType;
use bitvec::prelude::*;
use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// 컬럼 presence 비트셋
pub type Presence = BitVec<u8, Lsb0>;

/// 셀 값 (다양한 MySQL 타입 지원)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnValue {
    Null,
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Decimal(String),
    Year(u16),
    Date(String),
    Time(String),
    DateTime(String),
    /// 세션 타임존으로 해석된 TIMESTAMP
    Timestamp(DateTime<FixedOffset>),
    Bit(u64),
    Enum(u16),
    Set(u64),
    String(String),
    Bytes(Vec<u8>),
}

/// 디코딩된 한 컬럼
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    /// 테이블 컬럼 인덱스
    pub index: usize,
    pub column_type: ColumnType,
    pub value: ColumnValue,
}

impl Column {
    pub fn is_null(&self) -> bool {
        self.value == ColumnValue::Null
    }
}

/// 한쪽 이미지 (presence 비트셋 + 살아남은 컬럼들)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSide {
    presence: Presence,
    columns: Vec<Column>,
}

impl RowSide {
    /// 컬럼 수와 인덱스가 presence 비트와 정확히 일치해야 함
    pub fn new(presence: Presence, columns: Vec<Column>) -> Result<Self> {
        if columns.len() != presence.count_ones() {
            return Err(CdcError::InvalidEvent(format!(
                "{} columns for {} presence bits",
                columns.len(),
                presence.count_ones()
            )));
        }
        if !presence
            .iter_ones()
            .zip(columns.iter())
            .all(|(bit, column)| bit == column.index)
        {
            return Err(CdcError::InvalidEvent(
                "column order does not follow presence bits".to_string(),
            ));
        }
        Ok(RowSide { presence, columns })
    }

    pub fn presence(&self) -> &BitSlice<u8, Lsb0> {
        &self.presence
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// 테이블 컬럼 인덱스로 조회 (페이로드에서 빠진 컬럼이면 None)
    pub fn get(&self, table_index: usize) -> Option<&Column> {
        if !*self.presence.get(table_index)? {
            return None;
        }
        let slot = self.presence[..table_index].count_ones();
        self.columns.get(slot)
    }
}

/// row 변경 하나. 어느 쪽이 의미 있는지는 원본 이벤트 종류가 결정합니다.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowImage {
    before: Option<RowSide>,
    after: Option<RowSide>,
}

impl RowImage {
    pub fn new(before: Option<RowSide>, after: Option<RowSide>) -> Self {
        RowImage { before, after }
    }

    pub fn before(&self) -> Option<&RowSide> {
        self.before.as_ref()
    }

    pub fn after(&self) -> Option<&RowSide> {
        self.after.as_ref()
    }

    pub fn before_columns(&self) -> &[Column] {
        self.before.as_ref().map(RowSide::columns).unwrap_or(&[])
    }

    pub fn after_columns(&self) -> &[Column] {
        self.after.as_ref().map(RowSide::columns).unwrap_or(&[])
    }
}
