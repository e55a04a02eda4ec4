//! Binlog 파일 리더
//!
//! 헤더: 4 바이트 매직 넘버 (0xfe 0x62 0x69 0x6e)
//! 이후 각 이벤트는 공통 헤더의 event_length 만큼 이어집니다.

use crate::context::ContextHandle;
use crate::error::{CdcError, Result};
use crate::events::{DecodedEvent, EventHeader, EVENT_HEADER_SIZE};
use crate::offset::BINLOG_START_POSITION;
use crate::pipeline::EventPipeline;
use crate::value::ValueDecoder;
use bytes::Bytes;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

const BINLOG_MAGIC: &[u8] = &[0xfe, 0x62, 0x69, 0x6e]; // ".bin" in ASCII

/// Binlog 파일 헤더 검증
pub fn verify_magic(data: &[u8]) -> Result<()> {
    if data.len() < BINLOG_MAGIC.len() {
        return Err(CdcError::BinlogParseError(
            "Invalid binlog: too short".to_string(),
        ));
    }

    if data[..BINLOG_MAGIC.len()] == BINLOG_MAGIC[..] {
        Ok(())
    } else {
        Err(CdcError::BinlogParseError(
            "Invalid binlog magic number".to_string(),
        ))
    }
}

pub struct BinlogFileReader {
    file_name: String,
    data: Bytes,
    offset: usize,
}

impl BinlogFileReader {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self::from_bytes(file_name, Bytes::from(data))
    }

    pub fn from_bytes(file_name: impl Into<String>, data: Bytes) -> Result<Self> {
        verify_magic(&data)?;
        Ok(BinlogFileReader {
            file_name: file_name.into(),
            data,
            offset: BINLOG_START_POSITION as usize,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 다음 이벤트의 파일 내 위치
    pub fn position(&self) -> u64 {
        self.offset as u64
    }

    /// 다음 완전한 이벤트. 파일 끝이면 None.
    pub fn next_event(&mut self) -> Result<Option<Bytes>> {
        let rest = self.data.len() - self.offset;
        if rest == 0 {
            return Ok(None);
        }
        if rest < EVENT_HEADER_SIZE {
            return Err(CdcError::BinlogParseError(format!(
                "truncated event header at {}:{}",
                self.file_name, self.offset
            )));
        }

        let header = EventHeader::parse(&self.data[self.offset..])?;
        let length = header.event_length as usize;
        if length < EVENT_HEADER_SIZE || length > rest {
            return Err(CdcError::BinlogParseError(format!(
                "invalid event length {} at {}:{}",
                length, self.file_name, self.offset
            )));
        }

        let event = self.data.slice(self.offset..self.offset + length);
        self.offset += length;
        Ok(Some(event))
    }

    /// 컨텍스트 커서가 이 파일의 중간을 가리키면 그 위치까지의 이벤트를 보내지 않고
    /// 다시 적용해 FDE 와 테이블 매핑을 복원합니다. 반환값은 다시 적용한 이벤트 수.
    fn replay_until<D: ValueDecoder>(
        &mut self,
        pipeline: &EventPipeline<D>,
        handle: &ContextHandle,
        resume: u64,
    ) -> Result<u64> {
        let mut replayed = 0u64;
        while self.position() < resume {
            let raw = self.next_event()?.ok_or_else(|| {
                CdcError::InvalidStateTransition(format!(
                    "resume position {}:{} is past the end of the file",
                    self.file_name, resume
                ))
            })?;
            if self.position() > resume {
                return Err(CdcError::InvalidStateTransition(format!(
                    "resume position {}:{} is not an event boundary",
                    self.file_name, resume
                )));
            }
            handle.update(|ctx| pipeline.handle(ctx, &raw))?;
            replayed += 1;
        }
        Ok(replayed)
    }

    /// 백그라운드 태스크에서 파일 전체를 파이프라인에 흘려보냄.
    /// 첫 에러를 보낸 뒤 중단합니다.
    pub fn stream<D>(
        mut self,
        pipeline: EventPipeline<D>,
        handle: ContextHandle,
    ) -> mpsc::UnboundedReceiver<Result<DecodedEvent>>
    where
        D: ValueDecoder + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let file_name = self.file_name.clone();
            let start = self.position();
            let saved = handle.cursor();
            let resume = (same_file(&saved.filename, &file_name) && saved.position > start)
                .then_some(saved.position);
            handle.update(|ctx| ctx.rotate(&file_name, start));

            if let Some(resume) = resume {
                match self.replay_until(&pipeline, &handle, resume) {
                    Ok(replayed) => info!(
                        "Resuming {} at {} after replaying {} events",
                        file_name, resume, replayed
                    ),
                    Err(e) => {
                        error!("Cannot resume {} at {}: {}", file_name, resume, e);
                        let _ = tx.send(Err(e));
                        return;
                    }
                }
            } else {
                info!("Reading binlog {} from {}", file_name, start);
            }

            let mut event_count = 0u64;
            loop {
                let decoded = match self.next_event() {
                    Ok(Some(raw)) => handle.update(|ctx| pipeline.handle(ctx, &raw)),
                    Ok(None) => break,
                    Err(e) => Err(e),
                };

                let failed = decoded.is_err();
                if let Err(ref e) = decoded {
                    error!("Binlog decoding stopped at {}: {}", handle.cursor(), e);
                }
                if tx.send(decoded).is_err() {
                    debug!("Event receiver dropped");
                    break;
                }
                if failed {
                    break;
                }
                event_count += 1;
            }

            info!(
                "Binlog reading ended. Total events: {}, cursor: {}",
                event_count,
                handle.cursor()
            );
        });

        rx
    }
}

/// 커서 파일명은 경로일 수도 있으므로 파일 이름만 비교
fn same_file(cursor_file: &str, file_name: &str) -> bool {
    Path::new(cursor_file)
        .file_name()
        .map_or(false, |name| name == file_name)
}
