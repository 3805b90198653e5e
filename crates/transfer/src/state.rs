//! Per-part state and the arena workers claim parts from.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use geos3_checksum::ChecksumValue;
use geos3_client::AttemptBudget;

use crate::TransferError;
use crate::plan::{PartPlan, PartRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    InFlight,
    Verified,
    Failed,
}

/// Everything known about one part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartState {
    pub number: u32,
    pub start: u64,
    pub end: u64,
    pub status: PartStatus,
    /// Attempts across every session that worked on this part.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub md5: Option<ChecksumValue>,
    pub crc32: Option<ChecksumValue>,
    pub etag: Option<String>,
}

impl PartState {
    pub fn pending(range: PartRange) -> Self {
        Self {
            number: range.number,
            start: range.start,
            end: range.end,
            status: PartStatus::Pending,
            attempts: 0,
            last_error: None,
            md5: None,
            crc32: None,
            etag: None,
        }
    }

    pub fn range(&self) -> PartRange {
        PartRange {
            number: self.number,
            start: self.start,
            end: self.end,
        }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn requeue(&mut self) {
        self.status = PartStatus::Pending;
        self.md5 = None;
        self.crc32 = None;
        self.etag = None;
    }
}

/// Digests and server tag of a part that passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedPart {
    pub md5: ChecksumValue,
    pub crc32: ChecksumValue,
    pub etag: Option<String>,
}

/// Outcome of asking the arena for work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Claim {
    Part { range: PartRange, attempt: u32 },
    /// Only parts in backoff remain; the earliest is ready after this long.
    Wait(Duration),
    /// Nothing left to claim.
    Exhausted,
}

#[derive(Debug, Default)]
struct PartRuntime {
    budget: AttemptBudget,
    not_before: Option<Instant>,
}

struct ArenaInner {
    plan: PartPlan,
    /// Materialized parts; part `n` lives at index `n - 1`.
    parts: Vec<PartState>,
    /// Whether parts past `parts.len()` are created on demand.
    lazy: bool,
    runtime: HashMap<u32, PartRuntime>,
    halted: bool,
    failure: Option<TransferError>,
}

/// Mutex-guarded part table shared by the worker pool.
///
/// Every status change goes through the lock, so a part is never claimed
/// twice and snapshots never observe a half-applied transition.
pub struct PartArena {
    inner: Mutex<ArenaInner>,
}

impl PartArena {
    /// Every part materialized up front as `Pending`.
    pub fn eager(plan: PartPlan) -> Self {
        Self::with_parts(plan, plan.parts().map(PartState::pending).collect(), false)
    }

    /// Parts are materialized as they are claimed.
    pub fn lazy(plan: PartPlan) -> Self {
        Self::with_parts(plan, Vec::new(), true)
    }

    /// Rebuilds an arena from saved parts. Parts that were not verified
    /// go back to `Pending`; every part starts a fresh attempt budget.
    pub fn restore(
        plan: PartPlan,
        parts: Vec<PartState>,
        lazy: bool,
    ) -> Result<Self, TransferError> {
        let ranges: Vec<PartRange> = parts.iter().map(PartState::range).collect();
        plan.check_prefix(&ranges)?;
        if !lazy && parts.len() != plan.part_count() as usize {
            return Err(TransferError::InvalidResume(format!(
                "{} parts saved, plan has {}",
                parts.len(),
                plan.part_count()
            )));
        }
        let parts = parts
            .into_iter()
            .map(|mut part| {
                if part.status != PartStatus::Verified {
                    part.status = PartStatus::Pending;
                }
                part
            })
            .collect();
        Ok(Self::with_parts(plan, parts, lazy))
    }

    fn with_parts(plan: PartPlan, parts: Vec<PartState>, lazy: bool) -> Self {
        Self {
            inner: Mutex::new(ArenaInner {
                plan,
                parts,
                lazy,
                runtime: HashMap::new(),
                halted: false,
                failure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ArenaInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn plan(&self) -> PartPlan {
        self.lock().plan
    }

    /// Claims the lowest-numbered ready part and marks it `InFlight`.
    pub(crate) fn claim_next(&self, now: Instant) -> Claim {
        let mut inner = self.lock();
        if inner.halted {
            return Claim::Exhausted;
        }
        let ArenaInner {
            plan,
            parts,
            lazy,
            runtime,
            ..
        } = &mut *inner;

        let mut wait: Option<Duration> = None;
        let mut ready = None;
        for (index, part) in parts.iter().enumerate() {
            if part.status != PartStatus::Pending {
                continue;
            }
            match runtime.get(&part.number).and_then(|r| r.not_before) {
                Some(at) if at > now => {
                    let remaining = at - now;
                    wait = Some(wait.map_or(remaining, |w| w.min(remaining)));
                }
                _ => {
                    ready = Some(index);
                    break;
                }
            }
        }

        let index = match ready {
            Some(index) => index,
            None if *lazy && parts.len() < plan.part_count() as usize => {
                let number = parts.len() as u32 + 1;
                match plan.part(number) {
                    Some(range) => parts.push(PartState::pending(range)),
                    None => return Claim::Exhausted,
                }
                parts.len() - 1
            }
            None => return wait.map_or(Claim::Exhausted, Claim::Wait),
        };

        let part = &mut parts[index];
        part.status = PartStatus::InFlight;
        part.attempts += 1;
        let entry = runtime.entry(part.number).or_default();
        entry.not_before = None;
        entry.budget.record_attempt();
        Claim::Part {
            range: part.range(),
            attempt: entry.budget.attempts(),
        }
    }

    fn with_part<T>(&self, number: u32, f: impl FnOnce(&mut PartState) -> T) -> Option<T> {
        let mut inner = self.lock();
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        inner.parts.get_mut(index).map(f)
    }

    pub(crate) fn complete(&self, number: u32, verified: VerifiedPart) {
        self.with_part(number, |part| {
            part.status = PartStatus::Verified;
            part.last_error = None;
            part.md5 = Some(verified.md5);
            part.crc32 = Some(verified.crc32);
            part.etag = verified.etag;
        });
    }

    /// Returns an in-flight part to `Pending`, claimable after `delay`.
    pub(crate) fn release(&self, number: u32, error: String, delay: Option<Duration>) {
        let mut inner = self.lock();
        let Some(part) = number
            .checked_sub(1)
            .and_then(|i| inner.parts.get_mut(i as usize))
        else {
            return;
        };
        part.status = PartStatus::Pending;
        part.last_error = Some(error);
        inner.runtime.entry(number).or_default().not_before =
            delay.filter(|d| !d.is_zero()).map(|d| Instant::now() + d);
    }

    /// Marks a part `Failed` and halts the arena. The first failure is
    /// kept as the transfer's cause.
    pub(crate) fn fail(&self, number: u32, cause: TransferError) {
        let mut inner = self.lock();
        if let Some(part) = number
            .checked_sub(1)
            .and_then(|i| inner.parts.get_mut(i as usize))
        {
            part.status = PartStatus::Failed;
            part.last_error = Some(cause.to_string());
        }
        inner.halted = true;
        inner.failure.get_or_insert(cause);
    }

    pub(crate) fn record_mismatch(&self, number: u32) {
        self.lock()
            .runtime
            .entry(number)
            .or_default()
            .budget
            .record_mismatch();
    }

    pub(crate) fn budget(&self, number: u32) -> AttemptBudget {
        self.lock()
            .runtime
            .get(&number)
            .map(|r| r.budget.clone())
            .unwrap_or_default()
    }

    pub(crate) fn take_failure(&self) -> Option<TransferError> {
        self.lock().failure.take()
    }

    /// Sends a verified part back to `Pending`, dropping its digests.
    pub fn requeue(&self, number: u32) {
        self.with_part(number, PartState::requeue);
    }

    /// Sends every part back to `Pending`.
    pub fn requeue_all(&self) {
        let mut inner = self.lock();
        inner.parts.iter_mut().for_each(PartState::requeue);
        inner.runtime.clear();
    }

    pub fn get(&self, number: u32) -> Option<PartState> {
        self.with_part(number, |part| part.clone())
    }

    /// A consistent copy of every materialized part.
    pub fn snapshot(&self) -> Vec<PartState> {
        self.lock().parts.clone()
    }

    pub fn verified_bytes(&self) -> u64 {
        self.lock()
            .parts
            .iter()
            .filter(|p| p.status == PartStatus::Verified)
            .map(PartState::len)
            .sum()
    }

    pub fn verified_count(&self) -> usize {
        self.lock()
            .parts
            .iter()
            .filter(|p| p.status == PartStatus::Verified)
            .count()
    }

    pub fn all_verified(&self) -> bool {
        let inner = self.lock();
        inner.parts.len() == inner.plan.part_count() as usize
            && inner.parts.iter().all(|p| p.status == PartStatus::Verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geos3_checksum::{ChecksumAlgorithm, RunningChecksum};
    use geos3_client::ClientError;

    fn verified(data: &[u8]) -> VerifiedPart {
        VerifiedPart {
            md5: RunningChecksum::digest(ChecksumAlgorithm::Md5, data),
            crc32: RunningChecksum::digest(ChecksumAlgorithm::Crc32, data),
            etag: Some("e".into()),
        }
    }

    fn claimed(claim: Claim) -> PartRange {
        match claim {
            Claim::Part { range, .. } => range,
            other => panic!("expected a part, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn claims_in_order_and_never_twice() {
        let arena = PartArena::eager(PartPlan::with_part_size(30, 10).unwrap());
        let now = Instant::now();
        assert_eq!(claimed(arena.claim_next(now)).number, 1);
        assert_eq!(claimed(arena.claim_next(now)).number, 2);
        assert_eq!(claimed(arena.claim_next(now)).number, 3);
        assert_eq!(arena.claim_next(now), Claim::Exhausted);
        assert_eq!(arena.get(2).unwrap().status, PartStatus::InFlight);
    }

    #[tokio::test]
    async fn released_part_is_reclaimed_with_next_attempt() {
        let arena = PartArena::eager(PartPlan::with_part_size(20, 10).unwrap());
        let now = Instant::now();
        claimed(arena.claim_next(now));
        arena.release(1, "reset".into(), None);
        match arena.claim_next(now) {
            Claim::Part { range, attempt } => {
                assert_eq!(range.number, 1);
                assert_eq!(attempt, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(arena.get(1).unwrap().attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_reclaim() {
        let arena = PartArena::eager(PartPlan::with_part_size(10, 10).unwrap());
        claimed(arena.claim_next(Instant::now()));
        arena.release(1, "busy".into(), Some(Duration::from_secs(2)));
        assert_eq!(
            arena.claim_next(Instant::now()),
            Claim::Wait(Duration::from_secs(2))
        );
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(claimed(arena.claim_next(Instant::now())).number, 1);
    }

    #[tokio::test]
    async fn lazy_arena_materializes_on_claim() {
        let arena = PartArena::lazy(PartPlan::with_part_size(25, 10).unwrap());
        assert!(arena.snapshot().is_empty());
        let now = Instant::now();
        assert_eq!(claimed(arena.claim_next(now)).end, 10);
        assert_eq!(arena.snapshot().len(), 1);
        claimed(arena.claim_next(now));
        assert_eq!(claimed(arena.claim_next(now)).end, 25);
        assert_eq!(arena.claim_next(now), Claim::Exhausted);
        assert!(!arena.all_verified());
    }

    #[tokio::test]
    async fn failure_halts_and_keeps_first_cause() {
        let arena = PartArena::eager(PartPlan::with_part_size(30, 10).unwrap());
        let now = Instant::now();
        claimed(arena.claim_next(now));
        claimed(arena.claim_next(now));
        arena.fail(1, TransferError::Client(ClientError::NoHealthyEndpoint));
        arena.fail(2, TransferError::Aborted);
        assert_eq!(arena.claim_next(now), Claim::Exhausted);
        assert!(matches!(
            arena.take_failure(),
            Some(TransferError::Client(_))
        ));
        assert_eq!(arena.get(1).unwrap().status, PartStatus::Failed);
    }

    #[tokio::test]
    async fn verification_is_recorded() {
        let arena = PartArena::eager(PartPlan::with_part_size(10, 10).unwrap());
        claimed(arena.claim_next(Instant::now()));
        arena.complete(1, verified(b"0123456789"));
        assert!(arena.all_verified());
        assert_eq!(arena.verified_bytes(), 10);
        assert_eq!(arena.get(1).unwrap().etag.as_deref(), Some("e"));

        arena.requeue(1);
        let part = arena.get(1).unwrap();
        assert_eq!(part.status, PartStatus::Pending);
        assert!(part.md5.is_none());
    }

    #[test]
    fn restore_resets_unverified_parts() {
        let plan = PartPlan::with_part_size(30, 10).unwrap();
        let mut parts: Vec<_> = plan.parts().map(PartState::pending).collect();
        parts[0].status = PartStatus::Verified;
        parts[1].status = PartStatus::InFlight;
        parts[2].status = PartStatus::Failed;
        let arena = PartArena::restore(plan, parts, false).unwrap();
        let statuses: Vec<_> = arena.snapshot().iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            [PartStatus::Verified, PartStatus::Pending, PartStatus::Pending]
        );
    }

    #[test]
    fn restore_rejects_wrong_partition() {
        let plan = PartPlan::with_part_size(30, 10).unwrap();
        let parts: Vec<_> = plan.parts().take(2).map(PartState::pending).collect();
        assert!(PartArena::restore(plan, parts.clone(), false).is_err());
        assert!(PartArena::restore(plan, parts, true).is_ok());
    }
}
