//! DKR Core — Domain Knowledge Rules engine
//!
//! Human-authored `.rules` files describe a knowledge domain: known facts,
//! question intents, search expansions, terminology fixes, correction rules
//! and synonyms. This crate parses those files and applies them to
//! question/answer pairs produced by an external retrieval pipeline.
//!
//! # Architecture
//!
//! ```text
//! source id → RuleStore ─ fetch → hash → Parser → Validator
//!                 ↓
//!            Arc<RuleSet>
//!                 ↓
//! (question, answer) → Engine → detect intent → expand query
//!                                   → normalize → evaluate rules → ProcessResult
//! ```
//!
//! # Example
//!
//! ```ignore
//! let store = RuleStore::new(FsSource::with_root("domain_rules"));
//! let rules = store.load("licencas")?;
//! let result = Engine::new().process(&rules, question, answer);
//! println!("{}", result.final_answer);
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod normalizer;
pub mod parser;
pub mod store;
pub mod verifier;

pub use config::DkrConfig;
pub use engine::{ConfidenceStrategy, DetectedIntent, Engine, ProcessResult, TriggerFraction};
pub use error::{Error, ParseError, Result};
pub use parser::ast::*;
pub use parser::{content_hash, parse, parse_source};
pub use store::{FsSource, MemorySource, RuleSource, RuleStore, StoreStats};
pub use verifier::{validate, Diagnostic, ValidationReport};

/// Version of the dkr-core library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
