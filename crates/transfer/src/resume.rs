//! Serializable snapshot of a transfer, sufficient to continue it later.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use geos3_checksum::ChecksumAlgorithm;

use crate::TransferError;
use crate::plan::{PartPlan, PartRange};
use crate::session::SessionStatus;
use crate::state::{PartState, PartStatus};

pub const RESUME_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Upload,
    Download,
    /// A byte-range upload; reported by handles but never resumed.
    RangeUpload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeContext {
    pub format_version: u32,
    pub session_id: String,
    pub kind: TransferKind,
    pub bucket: String,
    pub key: String,
    pub total_size: u64,
    pub part_size: u64,
    /// Multipart upload id; uploads only.
    pub upload_id: Option<String>,
    /// ETag the download is pinned to; downloads only.
    pub object_etag: Option<String>,
    pub status: SessionStatus,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub parts: Vec<PartState>,
    pub saved_at: DateTime<Utc>,
}

impl ResumeContext {
    pub fn plan(&self) -> Result<PartPlan, TransferError> {
        PartPlan::with_part_size(self.total_size, self.part_size)
    }

    /// Checks the version, the identifiers and that the parts are an
    /// ordered prefix of the plan (the whole plan for uploads).
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.format_version != RESUME_FORMAT_VERSION {
            return Err(TransferError::InvalidResume(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        if self.bucket.is_empty() || self.key.is_empty() {
            return Err(TransferError::InvalidResume("bucket and key are required".into()));
        }
        if self.status == SessionStatus::Completed {
            return Err(TransferError::InvalidResume("session already completed".into()));
        }
        let plan = self.plan()?;
        let ranges: Vec<PartRange> = self.parts.iter().map(PartState::range).collect();
        plan.check_prefix(&ranges)
            .map_err(|e| TransferError::InvalidResume(e.to_string()))?;
        match self.kind {
            TransferKind::Upload => {
                if self.upload_id.as_deref().is_none_or(str::is_empty) {
                    return Err(TransferError::InvalidResume("upload id is missing".into()));
                }
                if self.parts.len() != plan.part_count() as usize {
                    return Err(TransferError::InvalidResume(format!(
                        "{} parts saved, plan has {}",
                        self.parts.len(),
                        plan.part_count()
                    )));
                }
            }
            TransferKind::Download => {}
            TransferKind::RangeUpload => {
                return Err(TransferError::InvalidResume(
                    "byte-range uploads cannot be resumed".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn verified_parts(&self) -> impl Iterator<Item = &PartState> {
        self.parts
            .iter()
            .filter(|p| p.status == PartStatus::Verified)
    }

    pub fn to_json(&self) -> Result<String, TransferError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, TransferError> {
        let context: Self = serde_json::from_str(json)?;
        context.validate()?;
        Ok(context)
    }

    /// Writes the context to `path` atomically: a sibling temp file is
    /// written, synced and renamed over the target.
    pub fn save(&self, path: &Path) -> Result<(), TransferError> {
        let json = self.to_json()?;
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp = Path::new(&tmp_name);
        {
            let mut file = fs::File::create(tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(tmp, path)?;
        debug!(
            session = %self.session_id,
            path = %path.display(),
            "resume context saved"
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, TransferError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geos3_checksum::RunningChecksum;

    fn sample() -> ResumeContext {
        let plan = PartPlan::with_part_size(25, 10).unwrap();
        let mut parts: Vec<_> = plan.parts().map(PartState::pending).collect();
        parts[0].status = PartStatus::Verified;
        parts[0].md5 = Some(RunningChecksum::digest(ChecksumAlgorithm::Md5, b"0123456789"));
        parts[0].etag = Some("781e5e245d69b566979b86e28d23f2c7".into());
        parts[1].status = PartStatus::InFlight;
        parts[1].attempts = 2;
        parts[1].last_error = Some("connection reset".into());
        ResumeContext {
            format_version: RESUME_FORMAT_VERSION,
            session_id: "6f1c2a8e-0000-4000-8000-000000000000".into(),
            kind: TransferKind::Upload,
            bucket: "b".into(),
            key: "k".into(),
            total_size: 25,
            part_size: 10,
            upload_id: Some("u-1".into()),
            object_etag: None,
            status: SessionStatus::InProgress,
            checksum_algorithm: Some(ChecksumAlgorithm::Crc32),
            parts,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn saves_and_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.resume");
        let context = sample();
        context.save(&path).unwrap();
        assert!(!dir.path().join("upload.resume.tmp").exists());

        let loaded = ResumeContext::load(&path).unwrap();
        assert_eq!(loaded, context);
        assert_eq!(loaded.verified_parts().count(), 1);
    }

    #[test]
    fn json_uses_snake_case_tags() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"kind\": \"upload\""));
        assert!(json.contains("\"status\": \"in_flight\""));
        assert!(json.contains("\"checksum_algorithm\": \"crc32\""));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut context = sample();
        context.format_version = 2;
        let err = ResumeContext::from_json(&context.to_json().unwrap()).unwrap_err();
        assert!(matches!(err, TransferError::InvalidResume(_)));
    }

    #[test]
    fn rejects_broken_partition() {
        let mut context = sample();
        context.parts[1].end = 19;
        assert!(context.validate().is_err());

        let mut context = sample();
        context.parts.pop();
        assert!(context.validate().is_err());

        // Downloads may stop early: parts are created as they are claimed.
        context.kind = TransferKind::Download;
        context.upload_id = None;
        assert!(context.validate().is_ok());
    }

    #[test]
    fn upload_requires_id() {
        let mut context = sample();
        context.upload_id = None;
        assert!(context.validate().is_err());
    }

    #[test]
    fn range_uploads_do_not_resume() {
        let mut context = sample();
        context.kind = TransferKind::RangeUpload;
        context.upload_id = None;
        assert!(matches!(
            context.validate(),
            Err(TransferError::InvalidResume(_))
        ));
    }

    #[test]
    fn completed_sessions_do_not_resume() {
        let mut context = sample();
        context.status = SessionStatus::Completed;
        assert!(context.validate().is_err());
    }

    #[test]
    fn garbage_is_a_json_error() {
        assert!(matches!(
            ResumeContext::from_json("{ not json"),
            Err(TransferError::Json(_))
        ));
    }
}
