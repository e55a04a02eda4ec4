//! 복제 연결 하나에 대한 세션 상태
//!
//! row 이벤트를 해석하려면 앞선 이벤트들에서 쌓인 상태가 필요합니다:
//! 체크섬 알고리즘, 테이블 ID 별 스키마, 현재 파일/위치 커서, semi-sync 협상 결과.
//! 모든 변경은 이름 있는 메서드를 거치므로 불변식이 한 곳에서 지켜집니다.

use crate::checksum::ChecksumAlgorithm;
use crate::error::{CdcError, Result};
use crate::format::FormatDescription;
use crate::offset::BinlogPosition;
use crate::table_map::TableMapping;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
pub struct ReplicationContext {
    semi_sync: bool,
    need_reply: bool,
    time_zone: Option<String>,
    cursor: BinlogPosition,
    format_description: FormatDescription,
    table_mappings: HashMap<u64, Arc<TableMapping>>,
}

impl ReplicationContext {
    /// 체크섬 OFF 로 시작하는 컨텍스트
    pub fn new() -> Self {
        Self::default()
    }

    /// 체크섬 알고리즘을 스트림 밖에서 이미 알고 있을 때 (체크포인트 복원 등)
    pub fn with_checksum(checksum: ChecksumAlgorithm) -> Self {
        ReplicationContext {
            format_description: FormatDescription::with_checksum(checksum),
            ..Default::default()
        }
    }

    pub fn format_description(&self) -> &FormatDescription {
        &self.format_description
    }

    /// 활성 FORMAT_DESCRIPTION 을 통째로 교체
    pub fn record_format_description(&mut self, record: FormatDescription) {
        if record.checksum != self.format_description.checksum {
            info!(
                "Binlog checksum changed: {} -> {}",
                self.format_description.checksum, record.checksum
            );
        }
        debug!(
            "Format description recorded: server_version={}, binlog_version={}",
            record.server_version, record.binlog_version
        );
        self.format_description = record;
    }

    /// 테이블 매핑 등록 또는 덮어쓰기 (같은 ID 는 마지막 것이 유효)
    pub fn record_table_mapping(
        &mut self,
        table_id: u64,
        record: TableMapping,
    ) -> Option<Arc<TableMapping>> {
        let previous = self.table_mappings.insert(table_id, Arc::new(record));
        if let Some(ref old) = previous {
            debug!(
                "Table id {} remapped (was {}.{})",
                table_id, old.database, old.table
            );
        }
        previous
    }

    /// 등록되지 않은 ID 면 None - row 이벤트 입장에서는 순서 위반
    pub fn lookup_table_mapping(&self, table_id: u64) -> Option<Arc<TableMapping>> {
        self.table_mappings.get(&table_id).cloned()
    }

    /// 등록되지 않은 ID 를 에러로 변환
    pub fn require_table_mapping(&self, table_id: u64) -> Result<Arc<TableMapping>> {
        self.lookup_table_mapping(table_id)
            .ok_or(CdcError::OrderingViolation { table_id })
    }

    pub fn table_mapping_count(&self) -> usize {
        self.table_mappings.len()
    }

    pub fn cursor(&self) -> &BinlogPosition {
        &self.cursor
    }

    pub fn binlog_file_name(&self) -> &str {
        &self.cursor.filename
    }

    pub fn binlog_position(&self) -> u64 {
        self.cursor.position
    }

    /// 이벤트 경계에서만 호출. 같은 파일 안에서 위치가 뒤로 가면 거부합니다.
    pub fn advance_cursor(&mut self, file_name: &str, position: u64) -> Result<()> {
        if self.cursor.filename == file_name && position < self.cursor.position {
            return Err(CdcError::InvalidStateTransition(format!(
                "cursor would move backwards: {} -> {}:{}",
                self.cursor, file_name, position
            )));
        }
        self.cursor = BinlogPosition::new(file_name, position);
        Ok(())
    }

    /// 파일 로테이션에 의한 명시적 커서 재설정
    pub fn rotate(&mut self, file_name: &str, position: u64) {
        if self.cursor.filename != file_name {
            info!("Binlog rotated: {} -> {}:{}", self.cursor, file_name, position);
        }
        self.cursor = BinlogPosition::new(file_name, position);
    }

    pub fn is_semi_sync(&self) -> bool {
        self.semi_sync
    }

    /// semi-sync 를 끄면 대기 중인 응답 요청도 사라짐
    pub fn set_semi_sync(&mut self, semi_sync: bool) {
        self.semi_sync = semi_sync;
        if !semi_sync {
            self.need_reply = false;
        }
    }

    pub fn need_reply(&self) -> bool {
        self.need_reply
    }

    pub fn set_need_reply(&mut self, need_reply: bool) -> Result<()> {
        if need_reply && !self.semi_sync {
            return Err(CdcError::InvalidStateTransition(
                "need_reply requires semi-sync replication".to_string(),
            ));
        }
        self.need_reply = need_reply;
        Ok(())
    }

    pub fn time_zone(&self) -> Option<&str> {
        self.time_zone.as_deref()
    }

    pub fn set_time_zone(&mut self, time_zone: Option<String>) {
        if self.time_zone != time_zone {
            debug!("Session time zone: {:?}", time_zone);
        }
        self.time_zone = time_zone;
    }
}

/// 여러 태스크가 공유하는 컨텍스트 핸들
///
/// 쓰기는 항상 락 안에서 직렬화됩니다. 락은 클로저 범위를 넘어 유지되지 않습니다.
#[derive(Debug, Clone, Default)]
pub struct ContextHandle {
    inner: Arc<Mutex<ReplicationContext>>,
}

impl ContextHandle {
    pub fn new(ctx: ReplicationContext) -> Self {
        ContextHandle {
            inner: Arc::new(Mutex::new(ctx)),
        }
    }

    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&ReplicationContext) -> R,
    {
        let ctx = self.inner.lock();
        f(&ctx)
    }

    pub fn update<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ReplicationContext) -> R,
    {
        let mut ctx = self.inner.lock();
        f(&mut ctx)
    }

    /// 현재 커서 복사본
    pub fn cursor(&self) -> BinlogPosition {
        self.read(|ctx| ctx.cursor().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_map::{ColumnDef, ColumnType};

    fn mapping(table: &str, types: &[ColumnType]) -> TableMapping {
        let columns = types
            .iter()
            .enumerate()
            .map(|(i, ty)| ColumnDef::new(i, *ty))
            .collect();
        TableMapping::new(42, "shop", table, columns)
    }

    #[test]
    fn test_default_checksum_off() {
        let ctx = ReplicationContext::new();
        assert_eq!(ctx.format_description().checksum, ChecksumAlgorithm::Off);
        let ctx = ReplicationContext::with_checksum(ChecksumAlgorithm::Crc32);
        assert_eq!(ctx.format_description().checksum, ChecksumAlgorithm::Crc32);
    }

    #[test]
    fn test_fresh_context_has_no_mappings() {
        let ctx = ReplicationContext::new();
        for id in [0u64, 1, 42, u64::MAX] {
            assert!(ctx.lookup_table_mapping(id).is_none());
        }
        assert!(matches!(
            ctx.require_table_mapping(99),
            Err(CdcError::OrderingViolation { table_id: 99 })
        ));
    }

    #[test]
    fn test_last_mapping_wins() {
        let mut ctx = ReplicationContext::new();
        let r1 = mapping("orders", &[ColumnType::Long]);
        let r2 = mapping("orders_v2", &[ColumnType::Long, ColumnType::Varchar]);

        assert!(ctx.record_table_mapping(42, r1.clone()).is_none());
        let previous = ctx.record_table_mapping(42, r2.clone()).unwrap();
        assert_eq!(*previous, r1);
        assert_eq!(*ctx.lookup_table_mapping(42).unwrap(), r2);
        assert_eq!(ctx.table_mapping_count(), 1);
    }

    #[test]
    fn test_format_description_replaced_wholesale() {
        let mut ctx = ReplicationContext::new();
        let mut record = FormatDescription::with_checksum(ChecksumAlgorithm::Crc32);
        record.server_version = "8.0.34".to_string();
        ctx.record_format_description(record.clone());
        assert_eq!(ctx.format_description(), &record);
    }

    #[test]
    fn test_advance_cursor() {
        let mut ctx = ReplicationContext::new();
        ctx.advance_cursor("mysql-bin.000001", 120).unwrap();
        ctx.advance_cursor("mysql-bin.000001", 120).unwrap();
        assert_eq!(ctx.cursor(), &BinlogPosition::new("mysql-bin.000001", 120));

        ctx.advance_cursor("mysql-bin.000001", 512).unwrap();
        assert_eq!(ctx.binlog_position(), 512);

        assert!(matches!(
            ctx.advance_cursor("mysql-bin.000001", 100),
            Err(CdcError::InvalidStateTransition(_))
        ));
        assert_eq!(ctx.binlog_position(), 512);

        ctx.advance_cursor("mysql-bin.000002", 4).unwrap();
        assert_eq!(ctx.binlog_file_name(), "mysql-bin.000002");
        assert_eq!(ctx.binlog_position(), 4);
    }

    #[test]
    fn test_rotate_resets_cursor() {
        let mut ctx = ReplicationContext::new();
        ctx.advance_cursor("mysql-bin.000001", 9000).unwrap();
        ctx.rotate("mysql-bin.000002", 4);
        assert_eq!(ctx.cursor(), &BinlogPosition::new("mysql-bin.000002", 4));
    }

    #[test]
    fn test_need_reply_requires_semi_sync() {
        let mut ctx = ReplicationContext::new();
        assert!(matches!(
            ctx.set_need_reply(true),
            Err(CdcError::InvalidStateTransition(_))
        ));
        assert!(!ctx.need_reply());
        assert!(ctx.set_need_reply(false).is_ok());

        ctx.set_semi_sync(true);
        ctx.set_need_reply(true).unwrap();
        assert!(ctx.need_reply());

        ctx.set_semi_sync(false);
        assert!(!ctx.need_reply());
    }

    #[test]
    fn test_time_zone() {
        let mut ctx = ReplicationContext::new();
        assert_eq!(ctx.time_zone(), None);
        ctx.set_time_zone(Some("+09:00".to_string()));
        assert_eq!(ctx.time_zone(), Some("+09:00"));
    }

    #[test]
    fn test_handle_serializes_writes() {
        let handle = ContextHandle::new(ReplicationContext::new());
        let workers: Vec<_> = (0..4u64)
            .map(|n| {
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        let id = n * 1000 + i;
                        handle.update(|ctx| {
                            ctx.record_table_mapping(id, mapping("t", &[ColumnType::Long]))
                        });
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(handle.read(|ctx| ctx.table_mapping_count()), 400);
        assert_eq!(handle.cursor(), BinlogPosition::default());
    }
}
