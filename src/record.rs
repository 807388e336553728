//! Log record codec.
//!
//! A log record is one key-value operation as persisted in the WAL. The
//! encoding is self-delimited and stable across restarts:
//!
//! ```text
//! [type (1)] [batch_id (8, LE)] [key_len (varint)] [value_len (varint)] [key] [value]
//! ```
//!
//! Records are written as chunk payloads; the chunk framing supplies the
//! CRC and length, so the codec carries neither.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Kind of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live key-value pair.
    Normal = 0,
    /// A deletion marker (tombstone).
    Deleted = 1,
    /// Terminal marker of a committed batch; its key holds the batch id.
    BatchFinished = 2,
}

impl LogRecordType {
    /// Create from byte value.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(LogRecordType::Normal),
            1 => Some(LogRecordType::Deleted),
            2 => Some(LogRecordType::BatchFinished),
            _ => None,
        }
    }

    /// Convert to byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// A single encoded key-value operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Record kind.
    pub record_type: LogRecordType,
    /// Id of the owning batch; stamped at commit time.
    pub batch_id: u64,
    /// Key bytes. For BatchFinished this holds the batch id.
    pub key: Bytes,
    /// Value bytes; empty for Deleted and BatchFinished.
    pub value: Bytes,
}

impl LogRecord {
    /// Create a Normal record.
    pub fn normal(key: Bytes, value: Bytes) -> Self {
        Self {
            record_type: LogRecordType::Normal,
            batch_id: 0,
            key,
            value,
        }
    }

    /// Create a Deleted record (tombstone).
    pub fn deleted(key: Bytes) -> Self {
        Self {
            record_type: LogRecordType::Deleted,
            batch_id: 0,
            key,
            value: Bytes::new(),
        }
    }

    /// Create the terminal marker for the given batch id.
    pub fn batch_finished(batch_id: u64) -> Self {
        Self {
            record_type: LogRecordType::BatchFinished,
            batch_id: 0,
            key: Bytes::copy_from_slice(&batch_id.to_be_bytes()),
            value: Bytes::new(),
        }
    }

    /// Whether this record is a deletion marker.
    pub fn is_deleted(&self) -> bool {
        self.record_type == LogRecordType::Deleted
    }

    /// Encode the record into a self-delimited byte string.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + 8 + 10 + self.key.len() + self.value.len());
        buf.put_u8(self.record_type.to_byte());
        buf.put_u64_le(self.batch_id);
        encode_varint(&mut buf, self.key.len() as u64);
        encode_varint(&mut buf, self.value.len() as u64);
        buf.put_slice(&self.key);
        buf.put_slice(&self.value);
        buf.freeze()
    }

    /// Decode a record previously produced by [`encode`](Self::encode).
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < 9 {
            return Err(Error::corruption("log record too short"));
        }

        let record_type = LogRecordType::from_byte(data.get_u8())
            .ok_or_else(|| Error::corruption("invalid log record type"))?;
        let batch_id = data.get_u64_le();

        let key_len = decode_varint(&mut data)
            .ok_or_else(|| Error::corruption("invalid key length"))? as usize;
        let value_len = decode_varint(&mut data)
            .ok_or_else(|| Error::corruption("invalid value length"))? as usize;

        if data.len() < key_len + value_len {
            return Err(Error::corruption("log record truncated"));
        }
        let key = Bytes::copy_from_slice(&data[..key_len]);
        data.advance(key_len);
        let value = Bytes::copy_from_slice(&data[..value_len]);

        Ok(Self {
            record_type,
            batch_id,
            key,
            value,
        })
    }

    /// Parse the batch id out of a BatchFinished record's key.
    pub fn parse_batch_id(key: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| Error::corruption("malformed batch id in finished marker"))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

fn encode_varint(buf: &mut BytesMut, mut value: u64) {
    while value >= 0x80 {
        buf.put_u8((value as u8) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

fn decode_varint(buf: &mut &[u8]) -> Option<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        if buf.is_empty() {
            return None;
        }

        let byte = buf.get_u8();
        result |= ((byte & 0x7F) as u64) << shift;

        if byte & 0x80 == 0 {
            return Some(result);
        }

        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_roundtrip() {
        for rt in [
            LogRecordType::Normal,
            LogRecordType::Deleted,
            LogRecordType::BatchFinished,
        ] {
            assert_eq!(LogRecordType::from_byte(rt.to_byte()), Some(rt));
        }
        assert_eq!(LogRecordType::from_byte(3), None);
        assert_eq!(LogRecordType::from_byte(255), None);
    }

    #[test]
    fn test_encode_decode_normal() {
        let mut record = LogRecord::normal(Bytes::from("key"), Bytes::from("value"));
        record.batch_id = 0xDEAD_BEEF_CAFE_F00D;

        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_encode_decode_empty_value() {
        let record = LogRecord::deleted(Bytes::from("gone"));
        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.record_type, LogRecordType::Deleted);
        assert_eq!(decoded.key.as_ref(), b"gone");
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn test_encode_decode_large_value() {
        let value: Vec<u8> = (0..100_000).map(|i| (i % 251) as u8).collect();
        let record = LogRecord::normal(Bytes::from("big"), Bytes::from(value.clone()));
        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.value.as_ref(), value.as_slice());
    }

    #[test]
    fn test_batch_finished_carries_id() {
        let record = LogRecord::batch_finished(42);
        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded.record_type, LogRecordType::BatchFinished);
        assert_eq!(LogRecord::parse_batch_id(&decoded.key).unwrap(), 42);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(LogRecord::decode(&[]).is_err());
        assert!(LogRecord::decode(&[9; 9]).is_err());

        // Truncate a valid encoding mid-payload.
        let record = LogRecord::normal(Bytes::from("key"), Bytes::from("value"));
        let encoded = record.encode();
        assert!(LogRecord::decode(&encoded[..encoded.len() - 2]).is_err());
    }

    #[test]
    fn test_parse_batch_id_rejects_bad_length() {
        assert!(LogRecord::parse_batch_id(b"short").is_err());
        assert!(LogRecord::parse_batch_id(b"way too long key").is_err());
    }
}
