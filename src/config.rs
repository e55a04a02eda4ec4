//! 스트림 설정
//!
//! 환경 변수:
//! - BINLOG_FILE, BINLOG_POSITION: 재개 지점
//! - BINLOG_CHECKSUM: NONE | CRC32
//! - BINLOG_SEMI_SYNC, BINLOG_VERIFY_CHECKSUM: true | false
//! - BINLOG_TIME_ZONE: 세션 타임존 (e.g. "+09:00")
//! - BINLOG_SERVER_ID

use crate::checksum::ChecksumAlgorithm;
use crate::context::ReplicationContext;
use crate::error::{CdcError, Result};
use crate::offset::BINLOG_START_POSITION;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub server_id: u32,
    pub binlog_filename: String,
    pub binlog_position: u64,
    pub checksum: ChecksumAlgorithm,
    pub semi_sync: bool,
    pub time_zone: Option<String>,
    pub verify_checksum: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            server_id: 1,
            binlog_filename: String::new(),
            binlog_position: BINLOG_START_POSITION,
            checksum: ChecksumAlgorithm::Off,
            semi_sync: false,
            time_zone: None,
            verify_checksum: true,
        }
    }
}

impl StreamConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 테스트에서 환경 변수 대신 임의의 조회 함수를 쓰기 위한 진입점
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = StreamConfig::default();
        Ok(StreamConfig {
            server_id: parse_var(&lookup, "BINLOG_SERVER_ID")?.unwrap_or(defaults.server_id),
            binlog_filename: lookup("BINLOG_FILE").unwrap_or(defaults.binlog_filename),
            binlog_position: parse_var(&lookup, "BINLOG_POSITION")?
                .unwrap_or(defaults.binlog_position),
            checksum: parse_var(&lookup, "BINLOG_CHECKSUM")?.unwrap_or(defaults.checksum),
            semi_sync: parse_var(&lookup, "BINLOG_SEMI_SYNC")?.unwrap_or(defaults.semi_sync),
            time_zone: lookup("BINLOG_TIME_ZONE").filter(|tz| !tz.is_empty()),
            verify_checksum: parse_var(&lookup, "BINLOG_VERIFY_CHECKSUM")?
                .unwrap_or(defaults.verify_checksum),
        })
    }

    /// 설정으로부터 초기 컨텍스트 생성
    pub fn build_context(&self) -> Result<ReplicationContext> {
        let mut ctx = ReplicationContext::with_checksum(self.checksum);
        ctx.advance_cursor(&self.binlog_filename, self.binlog_position)?;
        ctx.set_semi_sync(self.semi_sync);
        ctx.set_time_zone(self.time_zone.clone());
        Ok(ctx)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CdcError::ConfigError(format!("invalid {}: {:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StreamConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StreamConfig::default());
        let ctx = config.build_context().unwrap();
        assert_eq!(ctx.format_description().checksum, ChecksumAlgorithm::Off);
        assert_eq!(ctx.binlog_position(), 4);
    }

    #[test]
    fn test_from_lookup() {
        let config = StreamConfig::from_lookup(lookup(&[
            ("BINLOG_FILE", "mysql-bin.000009"),
            ("BINLOG_POSITION", "2048"),
            ("BINLOG_CHECKSUM", "crc32"),
            ("BINLOG_SEMI_SYNC", "true"),
            ("BINLOG_TIME_ZONE", "+08:00"),
        ]))
        .unwrap();

        let ctx = config.build_context().unwrap();
        assert_eq!(ctx.format_description().checksum, ChecksumAlgorithm::Crc32);
        assert_eq!(ctx.cursor().to_string(), "mysql-bin.000009:2048");
        assert!(ctx.is_semi_sync());
        assert!(!ctx.need_reply());
        assert_eq!(ctx.time_zone(), Some("+08:00"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            StreamConfig::from_lookup(lookup(&[("BINLOG_POSITION", "abc")])),
            Err(CdcError::ConfigError(_))
        ));
        assert!(StreamConfig::from_lookup(lookup(&[("BINLOG_CHECKSUM", "sha1")])).is_err());
    }
}
