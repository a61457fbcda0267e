//! Log scanning and recovery.

use crate::error::{CoreError, CoreResult};
use crate::log::record::{LogRecord, LogRecordType, CRC_SIZE, HEADER_SIZE, LOG_MAGIC, LOG_VERSION};
use subsync_storage::StorageBackend;

/// Result of scanning a subscription log from the start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogScan {
    /// Every intact record with the offset it starts at.
    pub records: Vec<(u64, LogRecord)>,
    /// Length of the intact prefix of the log.
    pub valid_len: u64,
    /// Total length of the log, including any torn tail.
    pub total_len: u64,
}

impl LogScan {
    /// Returns true if the log ends in an incomplete record.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.total_len
    }

    /// Returns the number of bytes after the last intact record.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Reads every record in `backend`.
///
/// A record cut short by a crash mid-append ends the scan cleanly; the
/// incomplete bytes are reported through [`LogScan::has_torn_tail`]. A complete
/// record that fails its checksum, carries an unknown type or a newer format
/// version, or does not decode is corruption and fails the scan.
///
/// # Errors
///
/// Returns [`CoreError::ChecksumMismatch`] or [`CoreError::Corruption`] on
/// damaged records, or a storage error if the backend cannot be read.
pub fn read_records(backend: &dyn StorageBackend) -> CoreResult<LogScan> {
    let total_len = backend.size()?;
    let mut records = Vec::new();
    let mut offset = 0u64;

    while total_len - offset >= HEADER_SIZE as u64 {
        let header = backend.read_at(offset, HEADER_SIZE)?;

        if header[0..4] != LOG_MAGIC {
            return Err(CoreError::corruption(offset, "invalid magic"));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > LOG_VERSION {
            return Err(CoreError::corruption(
                offset,
                format!("unsupported format version {version}"),
            ));
        }

        let type_byte = header[6];
        let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::corruption(offset, format!("unknown record type {type_byte}"))
        })?;

        let len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]) as usize;
        let frame_len = (HEADER_SIZE + len + CRC_SIZE) as u64;
        if total_len - offset < frame_len {
            break;
        }

        let body = backend.read_at(offset, HEADER_SIZE + len)?;
        let crc_bytes = backend.read_at(offset + (HEADER_SIZE + len) as u64, CRC_SIZE)?;
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let actual = crc32fast::hash(&body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }

        let record = LogRecord::decode_payload(record_type, &body[HEADER_SIZE..])
            .map_err(|e| CoreError::corruption(offset, e.to_string()))?;
        records.push((offset, record));
        offset += frame_len;
    }

    Ok(LogScan {
        records,
        valid_len: offset,
        total_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SubscriptionState;
    use crate::subscription::Subscription;
    use crate::types::SetVersion;
    use proptest::prelude::*;
    use subsync_storage::InMemoryBackend;

    fn committed(version: u64) -> LogRecord {
        LogRecord::SetCommitted {
            version: SetVersion::new(version),
            subscriptions: vec![Subscription::new("people", "Person", "age > 18").unwrap()],
        }
    }

    fn pending(version: u64) -> LogRecord {
        LogRecord::StateChanged {
            version: SetVersion::new(version),
            state: SubscriptionState::Pending,
            error_message: None,
        }
    }

    fn write(backend: &mut InMemoryBackend, records: &[LogRecord]) -> Vec<u64> {
        records
            .iter()
            .map(|r| backend.append(&r.encode_frame().unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn empty_log() {
        let backend = InMemoryBackend::new();
        let scan = read_records(&backend).unwrap();
        assert!(scan.records.is_empty());
        assert!(!scan.has_torn_tail());
    }

    #[test]
    fn reads_records_in_order_with_offsets() {
        let mut backend = InMemoryBackend::new();
        let records = vec![committed(1), pending(1), committed(2)];
        let offsets = write(&mut backend, &records);

        let scan = read_records(&backend).unwrap();
        assert_eq!(scan.records.len(), 3);
        for ((offset, record), (expected_offset, expected)) in
            scan.records.iter().zip(offsets.iter().zip(records.iter()))
        {
            assert_eq!(offset, expected_offset);
            assert_eq!(record, expected);
        }
        assert_eq!(scan.valid_len, scan.total_len);
    }

    #[test]
    fn torn_tail_ends_the_scan() {
        let mut backend = InMemoryBackend::new();
        write(&mut backend, &[committed(1), pending(1)]);
        let intact = backend.size().unwrap();

        let frame = committed(2).encode_frame().unwrap();
        backend.append(&frame[..frame.len() - 3]).unwrap();

        let scan = read_records(&backend).unwrap();
        assert_eq!(scan.records.len(), 2);
        assert_eq!(scan.valid_len, intact);
        assert!(scan.has_torn_tail());
        assert_eq!(scan.torn_bytes(), frame.len() as u64 - 3);
    }

    #[test]
    fn partial_header_is_a_torn_tail() {
        let mut backend = InMemoryBackend::new();
        write(&mut backend, &[committed(1)]);
        backend.append(&LOG_MAGIC).unwrap();

        let scan = read_records(&backend).unwrap();
        assert_eq!(scan.records.len(), 1);
        assert_eq!(scan.torn_bytes(), 4);
    }

    #[test]
    fn flipped_payload_byte_is_a_checksum_mismatch() {
        let mut frame = committed(1).encode_frame().unwrap();
        frame[HEADER_SIZE + 2] ^= 0x40;
        let backend = InMemoryBackend::with_data(frame);

        let err = read_records(&backend).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { offset: 0, .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut backend = InMemoryBackend::new();
        write(&mut backend, &[committed(1)]);
        let second = backend.size().unwrap();
        let mut frame = pending(1).encode_frame().unwrap();
        frame[0] = b'X';
        backend.append(&frame).unwrap();

        let err = read_records(&backend).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { offset, .. } if offset == second));
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut frame = pending(1).encode_frame().unwrap();
        frame[6] = 42;
        let backend = InMemoryBackend::with_data(frame);

        assert!(matches!(
            read_records(&backend),
            Err(CoreError::Corruption { .. })
        ));
    }

    proptest! {
        #[test]
        fn a_cut_anywhere_keeps_exactly_the_whole_records(
            commits in proptest::collection::vec(any::<bool>(), 1..6),
            cut in any::<prop::sample::Index>(),
        ) {
            let records: Vec<LogRecord> = (1u64..)
                .zip(&commits)
                .map(|(version, &commit)| if commit { committed(version) } else { pending(version) })
                .collect();
            let frames: Vec<Vec<u8>> = records.iter().map(|r| r.encode_frame().unwrap()).collect();
            let log = frames.concat();
            let cut = cut.index(log.len() + 1);

            let mut whole = 0;
            let mut end = 0;
            for frame in &frames {
                if end + frame.len() > cut {
                    break;
                }
                end += frame.len();
                whole += 1;
            }

            let backend = InMemoryBackend::with_data(log[..cut].to_vec());
            let scan = read_records(&backend).unwrap();
            prop_assert_eq!(scan.records.len(), whole);
            prop_assert_eq!(scan.valid_len, end as u64);
            prop_assert_eq!(scan.total_len, cut as u64);
            for ((_, read), written) in scan.records.iter().zip(&records) {
                prop_assert_eq!(read, written);
            }
        }
    }
}
