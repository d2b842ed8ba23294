//! Tests for the record codec
//!
//! These tests verify:
//! - Field layout of encoded records
//! - Key/value size limits
//! - Detection of corruption (checksum, lengths, flags)
//! - Tombstone and expiry flag handling

use bytes::Bytes;
use filekv::error::KvError;
use filekv::record::{
    decode, encode, encoded_len, frame_len, DecodeError, Record, MAX_KEY_SIZE, MAX_VALUE_SIZE,
    RECORD_HEADER_SIZE,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn sample_record() -> Record {
    Record::live(&b"user:42"[..], &b"{\"name\":\"ada\"}"[..], Some(1_700_000_000_000))
}

fn assert_corrupt(result: filekv::Result<Record>) {
    match result {
        Err(KvError::CorruptRecord { .. }) => {}
        other => panic!("expected CorruptRecord, got {:?}", other),
    }
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_encoded_layout() {
    let record = sample_record();
    let bytes = encode(&record).unwrap();

    assert_eq!(bytes.len(), encoded_len(record.key.len(), record.value.len()));
    assert_eq!(bytes.len(), RECORD_HEADER_SIZE + 7 + 14);

    // flags: has-expiry only
    assert_eq!(bytes[4], 0b10);
    assert_eq!(bytes[5] as usize, record.key.len());
    assert_eq!(
        u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize,
        record.value.len()
    );
    assert_eq!(
        u64::from_le_bytes(bytes[10..18].try_into().unwrap()),
        1_700_000_000_000
    );
    assert_eq!(&bytes[18..25], b"user:42");

    let crc = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    assert_eq!(crc, crc32fast::hash(&bytes[4..]));
}

#[test]
fn test_decode_restores_fields() {
    let record = sample_record();
    let decoded = decode(&encode(&record).unwrap()).unwrap();
    assert_eq!(decoded, record);

    let plain = Record::live(&b"k"[..], &b""[..], None);
    let decoded = decode(&encode(&plain).unwrap()).unwrap();
    assert_eq!(decoded.expires_at, None);
    assert!(decoded.value.is_empty());
    assert!(!decoded.tombstone);
}

#[test]
fn test_tombstone_encoding() {
    let bytes = encode(&Record::tombstone(&b"gone"[..])).unwrap();
    assert_eq!(bytes.len(), RECORD_HEADER_SIZE + 4);
    assert_eq!(bytes[4], 0b01);

    let decoded = decode(&bytes).unwrap();
    assert!(decoded.tombstone);
    assert!(decoded.value.is_empty());
}

#[test]
fn test_trailing_bytes_ignored() {
    let mut bytes = encode(&sample_record()).unwrap().to_vec();
    let len = bytes.len();
    bytes.extend_from_slice(&encode(&Record::tombstone(&b"x"[..])).unwrap());

    assert_eq!(frame_len(&bytes).unwrap(), len);
    assert_eq!(decode(&bytes).unwrap(), sample_record());
}

// =============================================================================
// Limit Tests
// =============================================================================

#[test]
fn test_key_limits() {
    let key = vec![b'k'; MAX_KEY_SIZE];
    assert!(encode(&Record::live(key, &b"v"[..], None)).is_ok());

    let key = vec![b'k'; MAX_KEY_SIZE + 1];
    assert!(matches!(
        encode(&Record::live(key, &b"v"[..], None)),
        Err(KvError::Validation(_))
    ));

    assert!(matches!(
        encode(&Record::live(Bytes::new(), &b"v"[..], None)),
        Err(KvError::Validation(_))
    ));
}

#[test]
fn test_value_limits() {
    let value = vec![0u8; MAX_VALUE_SIZE];
    let bytes = encode(&Record::live(&b"k"[..], value, None)).unwrap();
    assert_eq!(decode(&bytes).unwrap().value.len(), MAX_VALUE_SIZE);

    let value = vec![0u8; MAX_VALUE_SIZE + 1];
    assert!(matches!(
        encode(&Record::live(&b"k"[..], value, None)),
        Err(KvError::Validation(_))
    ));
}

#[test]
fn test_tombstone_with_value_rejected() {
    let record = Record {
        key: Bytes::from_static(b"k"),
        value: Bytes::from_static(b"v"),
        expires_at: None,
        tombstone: true,
    };
    assert!(matches!(encode(&record), Err(KvError::Validation(_))));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_every_single_bit_flip_detected() {
    let bytes = encode(&sample_record()).unwrap();

    for byte in 0..bytes.len() {
        for bit in 0..8 {
            let mut damaged = bytes.to_vec();
            damaged[byte] ^= 1 << bit;
            assert_corrupt(decode(&damaged));
        }
    }
}

#[test]
fn test_truncated_input() {
    let bytes = encode(&sample_record()).unwrap();

    assert!(matches!(
        frame_len(&bytes[..RECORD_HEADER_SIZE - 1]),
        Err(DecodeError::Truncated { .. })
    ));
    assert_corrupt(decode(&bytes[..bytes.len() - 1]));
    assert_corrupt(decode(&[]));
}

#[test]
fn test_frame_len_rejects_bad_headers() {
    let mut bytes = encode(&sample_record()).unwrap().to_vec();

    bytes[5] = 0;
    assert_eq!(frame_len(&bytes), Err(DecodeError::KeyLength(0)));

    bytes[5] = (MAX_KEY_SIZE + 1) as u8;
    assert_eq!(frame_len(&bytes), Err(DecodeError::KeyLength(MAX_KEY_SIZE + 1)));

    bytes[5] = 7;
    bytes[4] = 0b100;
    assert_eq!(frame_len(&bytes), Err(DecodeError::Flags(0b100)));

    bytes[4] = 0b10;
    bytes[6..10].copy_from_slice(&((MAX_VALUE_SIZE + 1) as u32).to_le_bytes());
    assert_eq!(
        frame_len(&bytes),
        Err(DecodeError::ValueLength(MAX_VALUE_SIZE + 1))
    );
}

#[test]
fn test_checksum_errors_are_skippable() {
    let mut bytes = encode(&sample_record()).unwrap().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    // Lengths are intact, so a scanner can step over this frame.
    assert!(frame_len(&bytes).is_ok());
    let err = DecodeError::Checksum {
        stored: 0,
        computed: 1,
    };
    assert!(err.is_skippable());
    assert!(!DecodeError::KeyLength(0).is_skippable());

    match err.at(64) {
        KvError::CorruptRecord { offset, .. } => assert_eq!(offset, 64),
        other => panic!("unexpected error {:?}", other),
    }
}

// =============================================================================
// Expiry Tests
// =============================================================================

#[test]
fn test_record_expiry_boundary() {
    let record = Record::live(&b"k"[..], &b"v"[..], Some(1_000));
    assert!(!record.is_expired(999));
    assert!(record.is_expired(1_000));
    assert!(record.is_expired(1_001));

    let forever = Record::live(&b"k"[..], &b"v"[..], None);
    assert!(!forever.is_expired(u64::MAX));
}
