//! Media download orchestration: platform policy, option profiles, the
//! retry engine, and its external-tool seams.

pub mod engine;
pub mod error;
pub mod invoker;
pub mod options;
pub mod platform;
pub mod proxy;
pub mod workspace;

pub use engine::{DownloadEngine, DownloadOutcome, DownloadRequest};
pub use error::{DownloadError, FailureKind};
pub use invoker::{Artifacts, Invoker, MediaFetcher, Transcoder};
pub use options::{build_profile, OptionProfile, RequestedKind};
pub use platform::{Platform, RetryPolicy};
