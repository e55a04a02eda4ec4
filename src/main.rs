//! Binlog 파일 디코딩 예제
//!
//! 인자 또는 BINLOG_FILE 로 지정한 binlog 파일을 읽어 row 이벤트를 JSON 으로 출력합니다.
use mysql_binlog_state::{
    BinlogFileReader, Checkpoint, ContextHandle, DecodedEvent, EventPipeline, StreamConfig,
};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = StreamConfig::from_env()?;
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| config.binlog_filename.clone());
    if path.is_empty() {
        return Err("usage: mysql_binlog_state <binlog file> (or BINLOG_FILE)".into());
    }

    let handle = ContextHandle::new(config.build_context()?);
    let pipeline = EventPipeline::new().verify_checksum(config.verify_checksum);
    let reader = BinlogFileReader::open(&path).await?;
    info!("Decoding {}", path);

    let mut rx = reader.stream(pipeline, handle.clone());
    while let Some(event) = rx.recv().await {
        match event? {
            DecodedEvent::Rows {
                kind,
                table_id,
                rows,
            } => {
                let table = handle
                    .read(|ctx| ctx.lookup_table_mapping(table_id))
                    .map(|m| format!("{}.{}", m.database, m.table))
                    .unwrap_or_default();
                for row in rows {
                    let line = serde_json::json!({
                        "op": kind.as_str(),
                        "table": table,
                        "before": row.before_columns(),
                        "after": row.after_columns(),
                    });
                    println!("{}", line);
                }
            }
            DecodedEvent::Rotate {
                next_binlog_name, ..
            } => warn!("Rotated to {}, stopping at file boundary", next_binlog_name),
            _ => {}
        }
    }

    let checkpoint = handle.read(Checkpoint::capture);
    info!("Final checkpoint: {}", checkpoint.to_json()?);
    Ok(())
}
