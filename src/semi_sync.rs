//! Semi-synchronous 복제 패킷 처리
//!
//! semi-sync 가 협상된 연결에서는 각 이벤트 앞에 2 바이트가 붙습니다:
//!   - 0xEF 매직
//!   - 플래그 (0x01 이면 이 이벤트 처리 후 ACK 필요)
//! ACK 패킷: 0xEF + binlog 위치 (8 bytes) + 파일명

use crate::context::ReplicationContext;
use crate::error::{CdcError, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;
use tracing::debug;

pub const SEMI_SYNC_INDICATOR: u8 = 0xef;
pub const SEMI_SYNC_ACK_REQUESTED: u8 = 0x01;

/// semi-sync 헤더를 떼어내고 need_reply 를 기록한 뒤 이벤트 바이트 반환
pub fn strip_semi_sync_header<'a>(
    ctx: &mut ReplicationContext,
    packet: &'a [u8],
) -> Result<&'a [u8]> {
    if !ctx.is_semi_sync() {
        return Ok(packet);
    }
    if packet.len() < 2 || packet[0] != SEMI_SYNC_INDICATOR {
        return Err(CdcError::InvalidEvent(
            "missing semi-sync indicator".to_string(),
        ));
    }
    ctx.set_need_reply(packet[1] == SEMI_SYNC_ACK_REQUESTED)?;
    Ok(&packet[2..])
}

/// 현재 커서로 ACK 패킷 생성
pub fn build_ack(ctx: &ReplicationContext) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.write_u8(SEMI_SYNC_INDICATOR)?;
    buffer.write_u64::<LittleEndian>(ctx.binlog_position())?;
    buffer.write_all(ctx.binlog_file_name().as_bytes())?;
    Ok(buffer)
}

/// 대기 중인 ACK 를 만들고 need_reply 해제. 전송은 호출자 몫입니다.
pub fn acknowledge(ctx: &mut ReplicationContext) -> Result<Vec<u8>> {
    if !ctx.need_reply() {
        return Err(CdcError::InvalidStateTransition(
            "no semi-sync reply pending".to_string(),
        ));
    }
    let ack = build_ack(ctx)?;
    ctx.set_need_reply(false)?;
    debug!("Semi-sync ack prepared for {}", ctx.cursor());
    Ok(ack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_without_semi_sync() {
        let mut ctx = ReplicationContext::new();
        let packet = [0xef, 0x01, 0xaa];
        assert_eq!(strip_semi_sync_header(&mut ctx, &packet).unwrap(), &packet[..]);
        assert!(!ctx.need_reply());
    }

    #[test]
    fn test_strip_and_acknowledge() {
        let mut ctx = ReplicationContext::new();
        ctx.set_semi_sync(true);
        let event = strip_semi_sync_header(&mut ctx, &[0xef, 0x01, 0xaa, 0xbb]).unwrap();
        assert_eq!(event, &[0xaa, 0xbb]);
        assert!(ctx.need_reply());

        ctx.advance_cursor("mysql-bin.000003", 1024).unwrap();
        let ack = acknowledge(&mut ctx).unwrap();
        assert_eq!(ack[0], SEMI_SYNC_INDICATOR);
        assert_eq!(&ack[1..9], &1024u64.to_le_bytes());
        assert_eq!(&ack[9..], b"mysql-bin.000003");
        assert!(!ctx.need_reply());

        assert!(acknowledge(&mut ctx).is_err());
    }

    #[test]
    fn test_no_ack_requested() {
        let mut ctx = ReplicationContext::new();
        ctx.set_semi_sync(true);
        strip_semi_sync_header(&mut ctx, &[0xef, 0x00, 0xaa]).unwrap();
        assert!(!ctx.need_reply());
    }

    #[test]
    fn test_missing_indicator() {
        let mut ctx = ReplicationContext::new();
        ctx.set_semi_sync(true);
        assert!(strip_semi_sync_header(&mut ctx, &[0x00, 0x01]).is_err());
    }
}
