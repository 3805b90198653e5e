//! Multipart transfer engine.
//!
//! An object is split into numbered parts ([`PartPlan`]) tracked in a
//! [`PartArena`]. A bounded pool of workers claims parts, moves their bytes
//! through the client's single-attempt pipeline, verifies them and applies
//! the client's retry policy per part. Sessions report progress as
//! [`TransferEvent`]s, can be aborted through a [`TransferHandle`] and can
//! be resumed later from a [`ResumeContext`].
//!
//! [`ByteRangeUpload`] is the alternative upload path for servers that
//! accept ranged writes: it fills one object in place instead of
//! assembling a multipart upload.

mod download;
mod engine;
mod error;
mod events;
mod handle;
pub mod plan;
mod progress;
mod range_upload;
mod resume;
mod session;
mod source;
mod state;
mod upload;
mod verify;

pub use download::MultipartDownload;
pub use error::TransferError;
pub use events::{TransferEvent, TransferResult, TransferSummary};
pub use handle::TransferHandle;
pub use plan::{PartPlan, PartRange};
pub use progress::SpeedCalculator;
pub use range_upload::ByteRangeUpload;
pub use resume::{RESUME_FORMAT_VERSION, ResumeContext, TransferKind};
pub use session::SessionStatus;
pub use source::{FileSource, MemorySource, PartSource, RangeReader};
pub use state::{PartArena, PartState, PartStatus, VerifiedPart};
pub use upload::MultipartUpload;
