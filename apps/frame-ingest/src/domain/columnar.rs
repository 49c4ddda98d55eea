//! Columnar Data
//!
//! The engine ships datasets as Arrow IPC *stream* payloads, one or more per
//! wire chunk. [`RecordBatchSet`] is the reassembled, in-memory table; the
//! free functions convert between events, record batches and IPC bytes.

use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{Float64Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;

use super::event::StreamEvent;

/// A table reassembled from zero or more wire chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatchSet {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

impl RecordBatchSet {
    /// Build a set from batches sharing `schema`.
    #[must_use]
    pub const fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        Self { schema, batches }
    }

    /// Table schema.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Batches in arrival order.
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total row count.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Column count.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.schema.fields().len()
    }

    /// Concatenate into a single batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the batches disagree with the schema.
    pub fn concat(&self) -> Result<RecordBatch, ArrowError> {
        arrow::compute::concat_batches(&self.schema, &self.batches)
    }

    /// Consume into the underlying batches.
    #[must_use]
    pub fn into_batches(self) -> Vec<RecordBatch> {
        self.batches
    }
}

/// Schema used when persisting stream events.
#[must_use]
pub fn event_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("symbol", DataType::Utf8, true),
        Field::new("timestamp", DataType::Int64, false),
        Field::new("price", DataType::Float64, false),
        Field::new("volume", DataType::Float64, false),
    ]))
}

/// Convert events into one record batch, preserving order.
///
/// # Errors
///
/// Returns an error if the columns cannot be assembled.
pub fn events_to_record_batch(events: &[StreamEvent]) -> Result<RecordBatch, ArrowError> {
    let symbols: StringArray = events.iter().map(|e| e.symbol.as_deref()).collect();
    let timestamps: Int64Array = events.iter().map(|e| Some(e.timestamp)).collect();
    let prices: Float64Array = events.iter().map(|e| Some(e.price)).collect();
    let volumes: Float64Array = events.iter().map(|e| Some(e.volume)).collect();

    RecordBatch::try_new(
        event_schema(),
        vec![
            Arc::new(symbols),
            Arc::new(timestamps),
            Arc::new(prices),
            Arc::new(volumes),
        ],
    )
}

/// Serialize a batch as an Arrow IPC stream.
///
/// # Errors
///
/// Returns an error if IPC encoding fails.
pub fn encode_ipc(batch: &RecordBatch) -> Result<Vec<u8>, ArrowError> {
    let mut writer = StreamWriter::try_new(Vec::new(), &batch.schema())?;
    writer.write(batch)?;
    writer.finish()?;
    writer.into_inner()
}

/// Decode every batch in an Arrow IPC stream payload. Empty payloads yield
/// no batches.
///
/// # Errors
///
/// Returns an error if the payload is not a valid IPC stream.
pub fn decode_ipc(payload: &[u8]) -> Result<Vec<RecordBatch>, ArrowError> {
    if payload.is_empty() {
        return Ok(Vec::new());
    }
    StreamReader::try_new(Cursor::new(payload), None)?.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    fn sample() -> Vec<StreamEvent> {
        vec![
            StreamEvent::new(1, 10.0, 1.0).with_symbol("A"),
            StreamEvent::new(2, 11.0, 2.0),
            StreamEvent::new(3, 12.0, 3.0).with_symbol("B"),
        ]
    }

    #[test]
    fn events_keep_order_and_nulls() {
        let batch = events_to_record_batch(&sample()).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 4);

        let symbols = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(symbols.value(0), "A");
        assert!(symbols.is_null(1));

        let ts = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ts.values().to_vec(), vec![1, 2, 3]);
    }

    #[test]
    fn ipc_payload_decodes_to_same_batch() {
        let batch = events_to_record_batch(&sample()).unwrap();
        let payload = encode_ipc(&batch).unwrap();
        let decoded = decode_ipc(&payload).unwrap();
        assert_eq!(decoded, vec![batch]);
    }

    #[test]
    fn empty_payload_has_no_batches() {
        assert!(decode_ipc(&[]).unwrap().is_empty());
    }

    #[test]
    fn garbage_payload_is_an_error() {
        assert!(decode_ipc(b"definitely not arrow").is_err());
    }

    #[test]
    fn batch_set_concat_and_counts() {
        let first = events_to_record_batch(&sample()[..2]).unwrap();
        let second = events_to_record_batch(&sample()[2..]).unwrap();
        let set = RecordBatchSet::new(event_schema(), vec![first, second]);
        assert_eq!(set.num_rows(), 3);
        assert_eq!(set.num_columns(), 4);
        assert_eq!(set.concat().unwrap().num_rows(), 3);
    }
}
