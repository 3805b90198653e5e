//! Built-in pipeline stages, listed in the order the client installs them.

mod checksum;
mod retry;
mod routing;
mod signing;

pub use checksum::ChecksumStage;
pub use retry::RetryStage;
pub use routing::RoutingStage;
pub use signing::SigningStage;
