//! MySQL Binlog 복제 스트림의 세션 상태 추적
//!
//! row 이벤트를 올바르게 해석하려면 같은 스트림의 앞선 이벤트들에서 쌓인 상태가 필요합니다.
//! 주요 기능:
//! - 복제 컨텍스트 (체크섬, 테이블 매핑, 커서, semi-sync, 세션 타임존)
//! - row 변경 이미지 (before / after + presence 비트셋)
//! - 이벤트 파이프라인 및 binlog 파일 리더
//! - 체크포인트 저장/복원

pub mod checksum;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod format;
pub mod offset;
pub mod pipeline;
pub mod reader;
pub mod row;
pub mod rows_event;
pub mod semi_sync;
pub mod table_map;
pub mod value;

pub use checksum::ChecksumAlgorithm;
pub use config::StreamConfig;
pub use context::{ContextHandle, ReplicationContext};
pub use error::{CdcError, Result};
pub use events::{DecodedEvent, EventType, RowsEventKind};
pub use format::FormatDescription;
pub use offset::{BinlogPosition, Checkpoint};
pub use pipeline::EventPipeline;
pub use reader::BinlogFileReader;
pub use row::{Column, ColumnValue, RowImage, RowSide};
pub use table_map::{ColumnDef, ColumnType, TableMapping};
