pub mod analyzer;
pub mod completion;
pub mod json;

pub use analyzer::{Analysis, HttpAnalyzer, NullAnalyzer, PartOfSpeech, StructuralAnalyzer, Token};
pub use completion::{CompletionBackend, CompletionRequest, HttpCompletionClient, Stage};
pub use json::{extract_json_object, parse_json_response};
