//! Partitioning of an object into numbered byte ranges.

use serde::{Deserialize, Serialize};

use geos3_client::ops::ByteRange;

use crate::TransferError;

const MIB: u64 = 1024 * 1024;

/// Smallest part S3 accepts for every part but the last.
pub const MIN_UPLOAD_PART_SIZE: u64 = 5 * MIB;
/// Largest part number S3 accepts.
pub const MAX_PARTS: u64 = 10_000;
pub const MIN_DOWNLOAD_PART_SIZE: u64 = MIB;
pub const DEFAULT_DOWNLOAD_PART_SIZE: u64 = 5 * MIB;

/// One part: the half-open byte range `[start, end)` of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartRange {
    pub number: u32,
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn byte_range(&self) -> ByteRange {
        ByteRange::new(self.start, self.end)
    }
}

/// Fixed-size partition of `total_size` bytes.
///
/// Parts are numbered from 1, contiguous and cover the object exactly;
/// only the last part may be shorter. An empty object has a single empty
/// part so that a multipart upload of it still completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    total_size: u64,
    part_size: u64,
    part_count: u32,
}

impl PartPlan {
    /// Plans an upload, raising the part size when `requested` would need
    /// more than [`MAX_PARTS`] parts.
    pub fn for_upload(
        total_size: u64,
        requested: u64,
        min_part_size: u64,
    ) -> Result<Self, TransferError> {
        if min_part_size == 0 {
            return Err(TransferError::InvalidPlan("minimum part size is zero".into()));
        }
        let part_size = requested
            .max(min_part_size)
            .max(total_size / MAX_PARTS + 1);
        Self::with_part_size(total_size, part_size)
    }

    pub fn for_download(total_size: u64, requested: u64) -> Result<Self, TransferError> {
        Self::with_part_size(total_size, requested.max(MIN_DOWNLOAD_PART_SIZE))
    }

    /// A plan with exactly `part_size`; used to rebuild a saved session.
    pub fn with_part_size(total_size: u64, part_size: u64) -> Result<Self, TransferError> {
        if part_size == 0 {
            return Err(TransferError::InvalidPlan("part size is zero".into()));
        }
        let count = if total_size == 0 {
            1
        } else {
            total_size.div_ceil(part_size)
        };
        if count > MAX_PARTS {
            return Err(TransferError::InvalidPlan(format!(
                "{total_size} bytes in {part_size}-byte parts needs {count} parts, \
                 limit is {MAX_PARTS}"
            )));
        }
        Ok(Self {
            total_size,
            part_size,
            part_count: count as u32,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    /// The range of part `number`, computed on demand.
    pub fn part(&self, number: u32) -> Option<PartRange> {
        if number == 0 || number > self.part_count {
            return None;
        }
        let start = u64::from(number - 1) * self.part_size;
        let end = (start + self.part_size).min(self.total_size);
        Some(PartRange { number, start, end })
    }

    pub fn parts(&self) -> impl Iterator<Item = PartRange> + '_ {
        (1..=self.part_count).filter_map(|n| self.part(n))
    }

    /// Checks that `ranges`, in order, are the first `ranges.len()` parts
    /// of this plan.
    pub fn check_prefix<'a>(
        &self,
        ranges: impl IntoIterator<Item = &'a PartRange>,
    ) -> Result<(), TransferError> {
        for (index, range) in ranges.into_iter().enumerate() {
            let expected = u32::try_from(index + 1)
                .ok()
                .and_then(|n| self.part(n))
                .ok_or_else(|| {
                    TransferError::InvalidPlan(format!("more than {} parts", self.part_count))
                })?;
            if *range != expected {
                return Err(TransferError::InvalidPlan(format!(
                    "part {} covers [{}, {}), expected part {} at [{}, {})",
                    range.number,
                    range.start,
                    range.end,
                    expected.number,
                    expected.start,
                    expected.end
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covered(plan: &PartPlan) -> u64 {
        plan.parts().map(|p| p.len()).sum()
    }

    #[test]
    fn upload_partition_is_contiguous() {
        let plan = PartPlan::for_upload(25 * MIB, 5 * MIB, MIN_UPLOAD_PART_SIZE).unwrap();
        assert_eq!(plan.part_count(), 5);
        let parts: Vec<_> = plan.parts().collect();
        for pair in parts.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(parts[0].start, 0);
        assert_eq!(parts[4].end, 25 * MIB);
    }

    #[test]
    fn last_part_is_short() {
        let plan = PartPlan::for_upload(11 * MIB + 3, 5 * MIB, MIN_UPLOAD_PART_SIZE).unwrap();
        assert_eq!(plan.part_count(), 3);
        assert_eq!(plan.part(3).unwrap().len(), MIB + 3);
        assert_eq!(covered(&plan), 11 * MIB + 3);
    }

    #[test]
    fn requested_size_is_raised_to_minimum() {
        let plan = PartPlan::for_upload(20 * MIB, MIB, MIN_UPLOAD_PART_SIZE).unwrap();
        assert_eq!(plan.part_size(), MIN_UPLOAD_PART_SIZE);
        assert_eq!(plan.part_count(), 4);
    }

    #[test]
    fn huge_objects_stay_under_part_limit() {
        let total = 100_000 * MIB;
        let plan = PartPlan::for_upload(total, 5 * MIB, MIN_UPLOAD_PART_SIZE).unwrap();
        assert_eq!(plan.part_size(), total / MAX_PARTS + 1);
        assert!(u64::from(plan.part_count()) <= MAX_PARTS);
        assert_eq!(covered(&plan), total);
    }

    #[test]
    fn empty_object_has_one_empty_part() {
        let plan = PartPlan::for_upload(0, 5 * MIB, MIN_UPLOAD_PART_SIZE).unwrap();
        assert_eq!(plan.part_count(), 1);
        let only = plan.part(1).unwrap();
        assert!(only.is_empty());
        assert!(plan.part(2).is_none());
        assert!(plan.part(0).is_none());
    }

    #[test]
    fn download_minimum_applies() {
        let plan = PartPlan::for_download(3 * MIB, 1024).unwrap();
        assert_eq!(plan.part_size(), MIN_DOWNLOAD_PART_SIZE);
        assert_eq!(plan.part_count(), 3);
    }

    #[test]
    fn rejects_degenerate_plans() {
        assert!(PartPlan::with_part_size(10, 0).is_err());
        assert!(PartPlan::for_upload(10, 10, 0).is_err());
        assert!(PartPlan::with_part_size(MAX_PARTS + 1, 1).is_err());
    }

    #[test]
    fn prefix_check_catches_gaps() {
        let plan = PartPlan::with_part_size(100, 10).unwrap();
        let mut parts: Vec<_> = plan.parts().take(3).collect();
        assert!(plan.check_prefix(&parts).is_ok());
        parts[1].end += 1;
        assert!(plan.check_prefix(&parts).is_err());
        let too_many: Vec<_> = plan.parts().chain(plan.part(1)).collect();
        assert!(plan.check_prefix(&too_many).is_err());
    }
}
