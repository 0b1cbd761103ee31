//! Record serialization
//!
//! Each record becomes one standalone compact JSON document. No delimiter is
//! added between chunks; framing belongs to the consumer.

use super::fetcher::RecordStream;
use crate::error::CollectorError;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};

/// Lazy sequence of serialized records
pub type ChunkStream = BoxStream<'static, Result<String, CollectorError>>;

/// Serialize records one-to-one as they arrive
pub fn serialize(records: RecordStream) -> ChunkStream {
    records.map_ok(|record| record.to_string()).boxed()
}
