//! Postgres `COPY ... (FORMAT BINARY)` stream encoding.
//!
//! Layout: an 11-byte signature, a flags word and a header-extension length,
//! then per row a 16-bit field count followed by each field as a 32-bit
//! length (-1 for NULL) and its big-endian payload, and finally a 16-bit -1
//! trailer.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{DbAccessError, Result};
use crate::orm::SqlValue;

const SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";

/// Seconds between the Unix epoch and the Postgres epoch (2000-01-01).
const PG_EPOCH_SECS: i64 = 946_684_800;
const PG_EPOCH_DAYS: i64 = 10_957;
const SECS_PER_DAY: i64 = 86_400;

/// Buffer for a binary COPY stream. Drain it with [`take`](Self::take) to
/// send the stream in chunks.
#[derive(Debug)]
pub(crate) struct BinaryCopyWriter {
    buf: Vec<u8>,
    rows: u64,
}

impl BinaryCopyWriter {
    pub(crate) fn new() -> Self {
        let mut buf = Vec::with_capacity(64 * 1024);
        buf.extend_from_slice(SIGNATURE);
        buf.extend_from_slice(&0i32.to_be_bytes());
        buf.extend_from_slice(&0i32.to_be_bytes());
        Self { buf, rows: 0 }
    }

    /// Append one encoded row; `None` fields are written as NULL.
    pub(crate) fn write_row(&mut self, fields: &[Option<Vec<u8>>]) {
        self.buf
            .extend_from_slice(&(fields.len() as i16).to_be_bytes());
        for field in fields {
            match field {
                Some(bytes) => {
                    self.buf
                        .extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    self.buf.extend_from_slice(bytes);
                }
                None => self.buf.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        self.rows += 1;
    }

    pub(crate) fn rows(&self) -> u64 {
        self.rows
    }

    /// Buffered bytes not yet taken.
    pub(crate) fn pending(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }

    /// Append the trailer and return the remaining bytes.
    pub(crate) fn finish(mut self) -> Vec<u8> {
        self.buf.extend_from_slice(&(-1i16).to_be_bytes());
        self.buf
    }
}

fn conversion(column: &str, pg_type: &str, value: &SqlValue) -> DbAccessError {
    DbAccessError::Conversion {
        column: column.to_string(),
        pg_type: pg_type.to_string(),
        value: value.to_string(),
    }
}

fn pg_micros(t: &DateTime<Utc>) -> i64 {
    t.timestamp_micros() - PG_EPOCH_SECS * 1_000_000
}

fn pg_days(t: &DateTime<Utc>) -> i32 {
    (t.timestamp().div_euclid(SECS_PER_DAY) - PG_EPOCH_DAYS) as i32
}

/// Encode a non-null value for a column of `pg_type`, as reported by
/// `information_schema.columns.data_type`.
///
/// Text values are parsed when the column is typed (uuid, integers,
/// booleans, json), which lets string-typed sources feed typed columns.
pub(crate) fn encode(value: &SqlValue, column: &str, pg_type: &str) -> Result<Vec<u8>> {
    let fail = || conversion(column, pg_type, value);

    let bytes = match (pg_type, value) {
        (_, SqlValue::Null(_)) => return Err(fail()),

        ("uuid", SqlValue::Uuid(u)) => u.as_bytes().to_vec(),
        ("uuid", SqlValue::Text(s)) => Uuid::parse_str(s).map_err(|_| fail())?.as_bytes().to_vec(),

        ("text" | "character varying" | "character", v) => match v {
            SqlValue::Text(s) => s.as_bytes().to_vec(),
            SqlValue::Timestamp(t) => t.to_rfc3339().into_bytes(),
            other => other.to_string().into_bytes(),
        },

        ("smallint", v) => {
            let n = integer(v).ok_or_else(fail)?;
            i16::try_from(n).map_err(|_| fail())?.to_be_bytes().to_vec()
        }
        ("integer", v) => {
            let n = integer(v).ok_or_else(fail)?;
            i32::try_from(n).map_err(|_| fail())?.to_be_bytes().to_vec()
        }
        ("bigint", v) => integer(v).ok_or_else(fail)?.to_be_bytes().to_vec(),

        ("double precision", v) => float(v).ok_or_else(fail)?.to_be_bytes().to_vec(),
        ("real", v) => (float(v).ok_or_else(fail)? as f32).to_be_bytes().to_vec(),

        ("boolean", SqlValue::Bool(b)) => vec![u8::from(*b)],
        ("boolean", SqlValue::Text(s)) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => vec![1],
            "false" | "f" | "0" => vec![0],
            _ => return Err(fail()),
        },

        ("timestamp with time zone" | "timestamp without time zone", SqlValue::Timestamp(t)) => {
            pg_micros(t).to_be_bytes().to_vec()
        }
        ("date", SqlValue::Timestamp(t)) => pg_days(t).to_be_bytes().to_vec(),

        ("json", v) => json_text(v).ok_or_else(fail)?.into_bytes(),
        ("jsonb", v) => {
            let mut bytes = vec![1u8];
            bytes.extend_from_slice(json_text(v).ok_or_else(fail)?.as_bytes());
            bytes
        }

        _ => return Err(fail()),
    };
    Ok(bytes)
}

fn integer(value: &SqlValue) -> Option<i64> {
    match value {
        SqlValue::Int(i) => Some(i64::from(*i)),
        SqlValue::BigInt(i) => Some(*i),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float(value: &SqlValue) -> Option<f64> {
    match value {
        SqlValue::Float(f) => Some(*f),
        SqlValue::Int(i) => Some(f64::from(*i)),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_text(value: &SqlValue) -> Option<String> {
    match value {
        SqlValue::Json(v) => Some(v.to_string()),
        SqlValue::Text(s) => serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .map(|v| v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use crate::orm::ColumnKind;

    #[test]
    fn test_stream_layout() {
        let mut writer = BinaryCopyWriter::new();
        writer.write_row(&[Some(vec![0, 0, 0, 7]), None]);
        assert_eq!(writer.rows(), 1);
        let bytes = writer.finish();

        assert_eq!(&bytes[..11], SIGNATURE);
        assert_eq!(&bytes[11..19], &[0u8; 8]);
        // field count, then a 4-byte int4, then NULL
        assert_eq!(&bytes[19..21], &2i16.to_be_bytes());
        assert_eq!(&bytes[21..25], &4i32.to_be_bytes());
        assert_eq!(&bytes[25..29], &[0, 0, 0, 7]);
        assert_eq!(&bytes[29..33], &(-1i32).to_be_bytes());
        assert_eq!(&bytes[33..], &(-1i16).to_be_bytes());
    }

    #[test]
    fn test_take_drains_buffer() {
        let mut writer = BinaryCopyWriter::new();
        let header = writer.take();
        assert_eq!(header.len(), 19);
        assert_eq!(writer.pending(), 0);

        writer.write_row(&[None]);
        assert_eq!(writer.pending(), 6);
        assert_eq!(writer.finish().len(), 8);
    }

    #[test]
    fn test_encode_scalars() {
        let id = Uuid::new_v4();
        assert_eq!(encode(&SqlValue::Uuid(id), "id", "uuid").unwrap(), id.as_bytes().to_vec());
        assert_eq!(
            encode(&SqlValue::Text(id.to_string()), "id", "uuid").unwrap(),
            id.as_bytes().to_vec()
        );
        assert_eq!(
            encode(&SqlValue::from("dagl"), "code", "text").unwrap(),
            b"dagl".to_vec()
        );
        assert_eq!(encode(&SqlValue::Int(7), "n", "bigint").unwrap(), 7i64.to_be_bytes().to_vec());
        assert_eq!(encode(&SqlValue::from("12"), "n", "integer").unwrap(), 12i32.to_be_bytes().to_vec());
        assert_eq!(encode(&SqlValue::Bool(true), "b", "boolean").unwrap(), vec![1]);
    }

    #[test]
    fn test_encode_timestamps_from_postgres_epoch() {
        let epoch = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            encode(&SqlValue::Timestamp(epoch), "t", "timestamp with time zone").unwrap(),
            0i64.to_be_bytes().to_vec()
        );

        let next_day = Utc.with_ymd_and_hms(2000, 1, 2, 0, 0, 1).unwrap();
        assert_eq!(
            encode(&SqlValue::Timestamp(next_day), "t", "timestamp with time zone").unwrap(),
            86_401_000_000i64.to_be_bytes().to_vec()
        );
        assert_eq!(
            encode(&SqlValue::Timestamp(next_day), "d", "date").unwrap(),
            1i32.to_be_bytes().to_vec()
        );
    }

    #[test]
    fn test_encode_jsonb_has_version_prefix() {
        let value = SqlValue::Json(serde_json::json!({"a": 1}));
        let bytes = encode(&value, "data", "jsonb").unwrap();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..], br#"{"a":1}"#);
    }

    #[test]
    fn test_encode_failures() {
        assert_matches!(
            encode(&SqlValue::from("not-a-uuid"), "id", "uuid"),
            Err(DbAccessError::Conversion { column, .. }) if column == "id"
        );
        assert_matches!(
            encode(&SqlValue::BigInt(i64::MAX), "n", "integer"),
            Err(DbAccessError::Conversion { .. })
        );
        assert_matches!(
            encode(&SqlValue::Null(ColumnKind::Text), "name", "text"),
            Err(DbAccessError::Conversion { .. })
        );
        assert_matches!(
            encode(&SqlValue::Bool(true), "v", "numeric"),
            Err(DbAccessError::Conversion { .. })
        );
    }
}
