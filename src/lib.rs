/// Clinical Extractor
///
/// Batch extraction of structured JSON answers from spreadsheet rows of
/// clinical report text, with schema validation, a single correction
/// round and resumable checkpoints.

pub mod config;
pub mod dataset;
pub mod error;
pub mod llm;
pub mod processing;
pub mod prompt;
pub mod schema;
pub mod storage;

// Re-export main types for easy access
pub use crate::config::{Config, ConfigBuilder};
pub use crate::dataset::{CellValue, Dataset};
pub use crate::error::{ConfigError, StorageError};
pub use crate::llm::correction::JsonCorrector;
pub use crate::llm::verification::Verifier;
pub use crate::llm::{LLMConfig, LLMProvider, ModelClient, ModelFailure, ModelReply};
pub use crate::processing::{BatchOptions, BatchProcessor, ProcessingResult};
pub use crate::prompt::PromptTemplate;
pub use crate::schema::{extract_json, FieldSchema, PlaceholderCheck, SchemaValidator, Validation};
pub use crate::storage::{open_input_store, open_store, CsvStore, TabularStore, XlsxStore};
