pub mod error;
pub mod config;
pub mod formats;
pub mod props;
pub mod metrics;
pub mod artifacts;
pub mod ffmpeg;
pub mod decoder;
pub mod case;
pub mod report;
pub mod suite;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Capabilities, HarnessConfig, Platform};
pub use case::{CaseState, DecodeTestCase, ExtraValidation, NoExtraValidation, RequireSource};
pub use decoder::DecodeConfiguration;
pub use error::CaseError;
pub use props::{CaseProps, DecodeSuite, RepeatCount};
pub use report::{CaseStatus, SuiteReport};
