use std::future::Future;
use std::io;

use geos3_checksum::{ChecksumAlgorithm, ChecksumValue, combine_crc32, digest_reader};
use geos3_client::ClientError;

use crate::TransferError;
use crate::source::RangeReader;
use crate::state::PartState;

/// Whole-object checksum of a finished transfer.
///
/// CRC32 is folded from the part values when every part has one; any
/// other algorithm, or a missing part value, re-reads the object once.
pub(crate) async fn whole_object_checksum<F, Fut>(
    algorithm: ChecksumAlgorithm,
    parts: &[PartState],
    reread: F,
) -> Result<ChecksumValue, TransferError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = io::Result<RangeReader>>,
{
    if algorithm.is_combinable()
        && let Some(values) = parts
            .iter()
            .map(|p| p.crc32.clone())
            .collect::<Option<Vec<_>>>()
    {
        return combine_crc32(&values).map_err(|e| ClientError::from(e).into());
    }
    Ok(digest_reader(reread().await?, algorithm).await?)
}

/// Compares a caller-supplied expectation with what was transferred.
pub(crate) fn check_expected(
    expected: Option<&ChecksumValue>,
    actual: Option<&ChecksumValue>,
) -> Result<(), TransferError> {
    match (expected, actual) {
        (Some(expected), Some(actual)) if expected != actual => {
            Err(TransferError::ContentVerificationFailed {
                part_number: None,
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use bytes::Bytes;
    use geos3_checksum::RunningChecksum;

    use crate::plan::PartPlan;

    const DATA: &[u8] = b"the quick brown fox jumps over the lazy dog";

    fn parts_with_crc(plan: &PartPlan) -> Vec<PartState> {
        plan.parts()
            .map(|range| {
                let mut part = PartState::pending(range);
                part.crc32 = Some(RunningChecksum::digest(
                    ChecksumAlgorithm::Crc32,
                    &DATA[range.start as usize..range.end as usize],
                ));
                part
            })
            .collect()
    }

    async fn reread() -> io::Result<RangeReader> {
        Ok(Box::new(Cursor::new(Bytes::from_static(DATA))))
    }

    #[tokio::test]
    async fn crc32_is_folded_from_parts() {
        let plan = PartPlan::with_part_size(DATA.len() as u64, 10).unwrap();
        let parts = parts_with_crc(&plan);
        let whole = whole_object_checksum(ChecksumAlgorithm::Crc32, &parts, || async {
            Err(io::Error::other("must not re-read"))
        })
        .await
        .unwrap();
        assert_eq!(
            whole,
            RunningChecksum::digest(ChecksumAlgorithm::Crc32, DATA)
        );
    }

    #[tokio::test]
    async fn other_algorithms_reread() {
        let plan = PartPlan::with_part_size(DATA.len() as u64, 10).unwrap();
        let whole = whole_object_checksum(ChecksumAlgorithm::Sha256, &parts_with_crc(&plan), reread)
            .await
            .unwrap();
        assert_eq!(
            whole,
            RunningChecksum::digest(ChecksumAlgorithm::Sha256, DATA)
        );
    }

    #[test]
    fn expectation_mismatch_is_verification_failure() {
        let a = RunningChecksum::digest(ChecksumAlgorithm::Crc32, b"a");
        let b = RunningChecksum::digest(ChecksumAlgorithm::Crc32, b"b");
        assert!(check_expected(Some(&a), Some(&a)).is_ok());
        assert!(check_expected(None, Some(&a)).is_ok());
        assert!(matches!(
            check_expected(Some(&a), Some(&b)),
            Err(TransferError::ContentVerificationFailed {
                part_number: None,
                ..
            })
        ));
    }
}
