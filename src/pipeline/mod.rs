//! Tone-band generation, caching and background verification.

mod anchors;
mod cache;
mod caller;
mod config;
mod lock;
mod prompts;
mod session;
mod status;
mod trace;
mod translator;
mod verify;

#[cfg(test)]
pub(crate) mod testing;

pub use anchors::{classify_token, MeaningAnchors, StructureContext, WordClass, WordClasses};
pub use cache::{BandCache, BandLinks, BandText, CacheEvent, CacheWrite};
pub use config::{init_default_config, ModelSettings, PipelineConfig};
pub use lock::LockStore;
pub use prompts::{render_template, tone_instruction, PromptSet};
pub use session::TranslationSession;
pub use status::{StatusBoard, StatusEvent};
pub use trace::TraceWriter;
pub use translator::{PipelineParts, TonePipeline};
pub use verify::{IssueType, Severity, VerificationIssue, VerificationReport, Verifier, VerifyJob};
