//! Column encodings shared by the sync and async handles.

use chrono::{DateTime, SecondsFormat, Utc};

/// UTC, millisecond precision, `Z` suffix. Sorts lexicographically and
/// its first 10 characters are the calendar day.
pub(crate) fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_timestamp(column: &str, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("invalid {column} '{value}': {e}").into(),
            )
        })
}

/// Little-endian f32 packing for embedding BLOBs.
pub(crate) fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_vector(bytes: &[u8]) -> rusqlite::Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Blob,
            format!("embedding blob of {} bytes is not a whole number of f32s", bytes.len()).into(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
