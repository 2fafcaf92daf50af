// RecordBatch header handling
//
// Produced batches are stored as opaque backend entries, so only the header
// is ever inspected: record count and max timestamp on the way in, and the
// base offset rewritten on the way out so each batch reports the offset of
// the entry that holds it.
//
// RecordBatch v2 header layout (first 61 bytes):
// - baseOffset: i64 (8 bytes) - offset 0
// - batchLength: i32 (4 bytes) - offset 8
// - partitionLeaderEpoch: i32 (4 bytes) - offset 12
// - magic: i8 (1 byte, should be 2) - offset 16
// - crc: u32 (4 bytes) - offset 17
// - attributes: i16 (2 bytes) - offset 21
// - lastOffsetDelta: i32 (4 bytes) - offset 23
// - baseTimestamp: i64 (8 bytes) - offset 27
// - maxTimestamp: i64 (8 bytes) - offset 35
// - producerId: i64 (8 bytes) - offset 43
// - producerEpoch: i16 (2 bytes) - offset 51
// - baseSequence: i32 (4 bytes) - offset 53
// - recordsCount: i32 (4 bytes) - offset 57

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use super::super::error::{KafkaError, Result};

const BATCH_HEADER_LEN: usize = 61;
/// baseOffset + batchLength, not counted by batchLength itself
const LOG_OVERHEAD: usize = 12;
const MAGIC_OFFSET: usize = 16;
const MAX_TIMESTAMP_OFFSET: usize = 35;
const RECORDS_COUNT_OFFSET: usize = 57;
const CURRENT_MAGIC: i8 = 2;

/// What the backend needs to know about a produced payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Number of batches in the payload
    pub batch_count: usize,
    /// Records across every batch
    pub record_count: i32,
    /// Largest max timestamp across every batch
    pub max_timestamp: i64,
}

/// Walk every batch header in `payload`
///
/// Fails on truncated batches, legacy message sets (magic 0/1) and empty
/// payloads.
pub fn summarize(payload: &Bytes) -> Result<BatchSummary> {
    if payload.is_empty() {
        return Err(KafkaError::CorruptBatch("empty record set".to_string()));
    }

    let mut summary = BatchSummary {
        batch_count: 0,
        record_count: 0,
        max_timestamp: -1,
    };
    let mut rest = payload.clone();

    while rest.has_remaining() {
        if rest.remaining() < BATCH_HEADER_LEN {
            return Err(KafkaError::CorruptBatch(format!(
                "truncated batch header: {} bytes",
                rest.remaining()
            )));
        }
        let magic = rest[MAGIC_OFFSET] as i8;
        if magic != CURRENT_MAGIC {
            return Err(KafkaError::CorruptBatch(format!(
                "unsupported record batch magic {}",
                magic
            )));
        }

        let batch_length = (&rest[8..12]).get_i32();
        let total = LOG_OVERHEAD as i64 + batch_length as i64;
        if batch_length < (BATCH_HEADER_LEN - LOG_OVERHEAD) as i32
            || total > rest.remaining() as i64
        {
            return Err(KafkaError::CorruptBatch(format!(
                "batch length {} does not fit in {} remaining bytes",
                batch_length,
                rest.remaining()
            )));
        }

        let max_timestamp = (&rest[MAX_TIMESTAMP_OFFSET..MAX_TIMESTAMP_OFFSET + 8]).get_i64();
        let records = (&rest[RECORDS_COUNT_OFFSET..RECORDS_COUNT_OFFSET + 4]).get_i32();
        if records < 0 {
            return Err(KafkaError::CorruptBatch(format!(
                "negative record count {}",
                records
            )));
        }

        summary.batch_count += 1;
        summary.record_count = summary.record_count.saturating_add(records);
        summary.max_timestamp = summary.max_timestamp.max(max_timestamp);
        rest.advance(total as usize);
    }

    debug!(
        batches = summary.batch_count,
        records = summary.record_count,
        "summarized record set"
    );
    Ok(summary)
}

/// Copy of `payload` with every batch renumbered to start at `base_offset`
///
/// Batches after the first continue from the previous batch's last offset.
/// Bytes that do not parse as a batch are passed through untouched.
pub fn rewrite_base_offset(payload: &Bytes, base_offset: i64) -> Bytes {
    let mut out = BytesMut::from(&payload[..]);
    let mut position = 0usize;
    let mut next_offset = base_offset;

    while out.len() - position >= BATCH_HEADER_LEN {
        let batch_length = (&out[position + 8..position + 12]).get_i32();
        if batch_length < 0 {
            break;
        }
        let total = LOG_OVERHEAD + batch_length as usize;
        if position + total > out.len() {
            break;
        }
        let last_offset_delta = (&out[position + 23..position + 27]).get_i32();

        let mut slot = &mut out[position..position + 8];
        slot.put_i64(next_offset);

        next_offset += last_offset_delta as i64 + 1;
        position += total;
    }
    out.freeze()
}
