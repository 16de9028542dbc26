//! Record framing for chunk and snapshot files.
//!
//! On-disk format, repeated once per record:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (compact-encoded entity)]
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use strata_types::compact;
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};

/// Header size: 4 bytes length + 4 bytes CRC.
pub const HEADER_SIZE: usize = 8;

/// Frame `payload` with its length and checksum.
pub fn frame(payload: &[u8]) -> LedgerResult<Vec<u8>> {
    let length = u32::try_from(payload.len()).map_err(|_| {
        LedgerError::InternalConsistency(format!("record of {} bytes is too large", payload.len()))
    })?;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Compact-encode `value` and frame it.
pub fn encode_record<T: Serialize + ?Sized>(value: &T) -> LedgerResult<Vec<u8>> {
    frame(&compact::encode(value)?)
}

/// Records decoded from one file.
#[derive(Debug)]
pub struct DecodedRecords<T> {
    pub records: Vec<T>,
    /// Byte length of the intact prefix.
    pub valid_len: usize,
    /// Whether trailing bytes were cut short or failed their checksum.
    pub torn: bool,
}

/// Decode every intact record in `data`, stopping at the first torn one.
///
/// A frame whose payload checks out but does not decode is corruption, not
/// a torn write, and is returned as an error.
pub fn decode_records<T: DeserializeOwned>(data: &[u8]) -> LedgerResult<DecodedRecords<T>> {
    let mut records = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let Some(payload) = next_payload(data, offset) else {
            warn!(offset, len = data.len(), "torn record tail; stopping decode");
            return Ok(DecodedRecords {
                records,
                valid_len: offset,
                torn: true,
            });
        };
        records.push(compact::decode(payload)?);
        offset += HEADER_SIZE + payload.len();
    }
    Ok(DecodedRecords {
        records,
        valid_len: offset,
        torn: false,
    })
}

/// Decode a file that must hold exactly one intact record.
pub fn decode_single<T: DeserializeOwned>(data: &[u8], name: &str) -> LedgerResult<T> {
    let decoded = decode_records(data)?;
    let count = decoded.records.len();
    match (decoded.torn, decoded.records.into_iter().next()) {
        (false, Some(value)) if count == 1 => Ok(value),
        _ => Err(LedgerError::InternalConsistency(format!(
            "{name} does not hold exactly one intact record"
        ))),
    }
}

fn next_payload(data: &[u8], offset: usize) -> Option<&[u8]> {
    let header = data.get(offset..offset + HEADER_SIZE)?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    let start = offset + HEADER_SIZE;
    let payload = data.get(start..start.checked_add(length)?)?;
    (length > 0 && crc32fast::hash(payload) == crc).then_some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(values: &[&str]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| encode_record(*v).unwrap())
            .collect()
    }

    #[test]
    fn frame_layout() {
        let framed = frame(b"abc").unwrap();
        assert_eq!(&framed[..4], &3u32.to_le_bytes());
        assert_eq!(&framed[4..8], &crc32fast::hash(b"abc").to_le_bytes());
        assert_eq!(&framed[8..], b"abc");
    }

    #[test]
    fn decodes_concatenated_records() {
        let data = records(&["one", "two", "three"]);
        let decoded: DecodedRecords<String> = decode_records(&data).unwrap();
        assert_eq!(decoded.records, vec!["one", "two", "three"]);
        assert_eq!(decoded.valid_len, data.len());
        assert!(!decoded.torn);
    }

    #[test]
    fn truncated_tail_keeps_the_intact_prefix() {
        let data = records(&["one", "two"]);
        let first_len = encode_record("one").unwrap().len();
        for cut in [first_len + 1, first_len + HEADER_SIZE, data.len() - 1] {
            let decoded: DecodedRecords<String> = decode_records(&data[..cut]).unwrap();
            assert_eq!(decoded.records, vec!["one"]);
            assert_eq!(decoded.valid_len, first_len);
            assert!(decoded.torn);
        }
    }

    #[test]
    fn checksum_mismatch_counts_as_torn() {
        let mut data = records(&["one", "two"]);
        let last = data.len() - 1;
        data[last] ^= 0xff;
        let decoded: DecodedRecords<String> = decode_records(&data).unwrap();
        assert_eq!(decoded.records.len(), 1);
        assert!(decoded.torn);
    }

    #[test]
    fn single_record_files() {
        let data = records(&["only"]);
        let value: String = decode_single(&data, "f").unwrap();
        assert_eq!(value, "only");

        let two = records(&["a", "b"]);
        assert!(matches!(
            decode_single::<String>(&two, "f"),
            Err(LedgerError::InternalConsistency(_))
        ));
        assert!(matches!(
            decode_single::<String>(&data[..data.len() - 1], "f"),
            Err(LedgerError::InternalConsistency(_))
        ));
    }
}
