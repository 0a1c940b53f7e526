use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dataset::{CellValue, Dataset};
use crate::error::ConfigError;
use crate::llm::correction::JsonCorrector;
use crate::llm::verification::Verifier;
use crate::llm::{ModelClient, Stage};
use crate::prompt::PromptTemplate;
use crate::schema::{PlaceholderCheck, SchemaValidator};
use crate::storage::{open_input_store, open_store, TabularStore};

pub const RESPONSE_COLUMN: &str = "Response";
pub const RESPONSE2_COLUMN: &str = "Response2";
pub const RESPONSE3_COLUMN: &str = "Response3";
pub const TIME_COLUMN: &str = "Time";

/// Overall batch processing results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub total: usize,
    pub skipped: usize,
    pub processed: usize,
    /// Rows whose answer needed a correction round
    pub corrected: usize,
    /// Rows whose primary reply was a model failure
    pub failed_calls: usize,
    pub checkpoints: usize,
    pub output_path: String,
    pub total_time: Duration,
}

/// Loop settings independent of the model backend
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub input_column: String,
    pub checkpoint_interval: usize,
    pub show_progress: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            input_column: "Results".to_string(),
            checkpoint_interval: 10,
            show_progress: true,
        }
    }
}

/// Column indices resolved once per run
struct Columns {
    input: usize,
    response: usize,
    verification: Option<usize>,
    correction: usize,
    time: usize,
}

/// Sequential, resumable extraction over the rows of one dataset
pub struct BatchProcessor {
    client: Arc<ModelClient>,
    template: PromptTemplate,
    validator: SchemaValidator,
    corrector: JsonCorrector,
    verifier: Option<Verifier>,
    options: BatchOptions,
}

impl BatchProcessor {
    pub fn new(client: Arc<ModelClient>, template: PromptTemplate, check: PlaceholderCheck) -> Self {
        let validator = SchemaValidator::new(client.schema().clone(), check);
        let corrector = JsonCorrector::new(Arc::clone(&client));
        Self {
            client,
            template,
            validator,
            corrector,
            verifier: None,
            options: BatchOptions::default(),
        }
    }

    /// Build the processor for a configured run: templates, client, verifier
    pub async fn from_config(config: &Config) -> Result<Self> {
        let prompt_path = &config.paths.prompt_file;
        if !prompt_path.is_file() {
            return Err(ConfigError::MissingTemplate(prompt_path.clone()).into());
        }
        let template = PromptTemplate::load(prompt_path).await?;
        info!("📝 Loaded prompt: {}", prompt_path.display());

        let client = Arc::new(
            ModelClient::from_config(&config.llm, config.field_schema())
                .context("Failed to create model client")?,
        );
        info!("🤖 Using {} model {}", config.llm.provider, config.llm.model());

        let mut processor = Self::new(Arc::clone(&client), template, config.placeholder_check()).with_options(
            BatchOptions {
                input_column: config.schema.input_column.clone(),
                checkpoint_interval: config.batch.checkpoint_interval,
                show_progress: config.batch.show_progress,
            },
        );

        if config.llm.provider.uses_verifier() {
            let template = load_verifier_template(config.paths.verifier_prompt_file.as_deref()).await?;
            processor = processor.with_verifier(Verifier::new(client, template));
        }

        Ok(processor)
    }

    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_options(mut self, options: BatchOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the batch with stores opened from the configured paths
    pub async fn run_with_config(&self, config: &Config) -> Result<ProcessingResult> {
        let input = open_input_store(&config.paths.input_file)?;
        let output = open_store(&config.output_path())?;
        self.run(input.as_ref(), output.as_ref()).await
    }

    /// Process every row whose primary response is still empty.
    ///
    /// Resumes from `output` when it exists, otherwise starts from `input`.
    /// The dataset is saved every `checkpoint_interval` rows and once at
    /// the end, even when nothing needed processing.
    pub async fn run(&self, input: &dyn TabularStore, output: &dyn TabularStore) -> Result<ProcessingResult> {
        let start_time = Instant::now();

        info!("🚀 Starting batch extraction...");
        let mut dataset = if output.exists() {
            info!("♻️ Resuming from existing output: {}", output.location());
            output
                .load()
                .with_context(|| format!("Failed to load existing output {}", output.location()))?
        } else {
            info!("📁 Input: {}", input.location());
            input
                .load()
                .with_context(|| format!("Failed to load input {}", input.location()))?
        };
        info!("📂 Output: {}", output.location());

        let columns = self.provision_columns(&mut dataset)?;

        let total = dataset.len();
        let done: Vec<bool> = (0..total)
            .map(|row| !dataset.get(row, columns.response).is_blank())
            .collect();
        let skipped = done.iter().filter(|d| **d).count();
        info!("📊 {} rows total, {} already completed", total, skipped);

        let interval = self.options.checkpoint_interval.max(1);
        let progress = self.progress_bar(total as u64);
        progress.inc(skipped as u64);

        let mut result = ProcessingResult {
            total,
            skipped,
            processed: 0,
            corrected: 0,
            failed_calls: 0,
            checkpoints: 0,
            output_path: output.location(),
            total_time: Duration::ZERO,
        };

        for row in 0..total {
            if done[row] {
                debug!("⏭️ Row {} already has a response, skipping", row + 1);
                continue;
            }

            progress.set_message(format!("row {}", row + 1));
            self.process_row(&mut dataset, row, &columns, &mut result).await;
            result.processed += 1;
            progress.inc(1);

            if (row + 1) % interval == 0 {
                output
                    .save(&dataset)
                    .with_context(|| format!("Failed to save checkpoint to {}", output.location()))?;
                result.checkpoints += 1;
                progress.println(format!("💾 Checkpoint saved at row {}", row + 1));
                info!("💾 Checkpoint saved at row {}: {}", row + 1, output.location());
            }
        }

        output
            .save(&dataset)
            .with_context(|| format!("Failed to save results to {}", output.location()))?;
        progress.finish_and_clear();

        result.total_time = start_time.elapsed();
        info!("💾 Results saved to: {}", output.location());
        Ok(result)
    }

    fn provision_columns(&self, dataset: &mut Dataset) -> Result<Columns, ConfigError> {
        let input = dataset
            .column_index(&self.options.input_column)
            .ok_or_else(|| ConfigError::MissingInputColumn {
                column: self.options.input_column.clone(),
                available: dataset.columns().join(", "),
            })?;

        // Missing columns are appended as Response, Response2, (Response3), Time.
        let response = dataset.ensure_column(RESPONSE_COLUMN);
        let second = dataset.ensure_column(RESPONSE2_COLUMN);
        let (verification, correction) = if self.verifier.is_some() {
            (Some(second), dataset.ensure_column(RESPONSE3_COLUMN))
        } else {
            (None, second)
        };
        let time = dataset.ensure_column(TIME_COLUMN);

        Ok(Columns {
            input,
            response,
            verification,
            correction,
            time,
        })
    }

    /// Prompt, (verify), validate, (correct), time. Never fails.
    async fn process_row(&self, dataset: &mut Dataset, row: usize, columns: &Columns, result: &mut ProcessingResult) {
        let started = Instant::now();
        let report = dataset.get(row, columns.input).as_text();

        let prompt = self.template.render(report.as_deref().unwrap_or_default());
        let primary = self.client.request(&prompt).await;
        if let Some(failure) = primary.failure() {
            result.failed_calls += 1;
            warn!("❌ Row {}: primary request failed ({})", row + 1, failure.kind);
        }
        let primary_cell = self.client.render(&primary, Stage::Primary);
        dataset.set(row, columns.response, primary_cell.clone());

        let candidate = match (&self.verifier, columns.verification) {
            (Some(verifier), Some(col)) => {
                let verified = verifier.verify(report.as_deref(), Some(&primary_cell)).await;
                let cell = self.client.render(&verified, Stage::Verification);
                dataset.set(row, col, cell.clone());
                cell
            }
            _ => primary_cell,
        };

        let validation = self.validator.validate_reply(&candidate);
        if validation.is_valid() {
            debug!("✅ Row {}: answer is valid", row + 1);
            dataset.set(row, columns.correction, String::new());
        } else {
            info!("🔧 Row {}: {}, requesting correction", row + 1, validation);
            let corrected = self.corrector.correct(&candidate).await;
            // Correction output is stored as-is; a second validation is only reported.
            let still_invalid = corrected
                .text()
                .map_or(true, |text| !self.validator.validate_reply(text).is_valid());
            if still_invalid {
                warn!("⚠️ Row {}: corrected answer is still not valid JSON for the schema", row + 1);
            }
            dataset.set(row, columns.correction, self.client.render(&corrected, Stage::Correction));
            result.corrected += 1;
        }

        let elapsed = (started.elapsed().as_secs_f64() * 10_000.0).round() / 10_000.0;
        dataset.set(row, columns.time, CellValue::Number(elapsed));
        debug!("Row {} finished in {:.4}s", row + 1, elapsed);
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Locations searched for the verifier template, configured path first
pub fn verifier_template_candidates(configured: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(path) = configured {
        candidates.push(path.to_path_buf());
        if let Some(name) = path.file_name() {
            let fallback = Path::new("prompts").join(name);
            if !candidates.contains(&fallback) {
                candidates.push(fallback);
            }
        }
    }
    candidates
}

async fn load_verifier_template(configured: Option<&Path>) -> Result<PromptTemplate> {
    let candidates = verifier_template_candidates(configured);
    for path in &candidates {
        if path.is_file() {
            let template = PromptTemplate::load(path).await?;
            info!("📝 Loaded verify prompt: {}", path.display());
            return Ok(template);
        }
    }

    let tried = candidates
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join("\n");
    Err(ConfigError::MissingVerifierTemplate(tried).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::llm::client::testing::{Scripted, ScriptedLLM};
    use crate::llm::LLMProvider;
    use crate::schema::FieldSchema;
    use std::sync::Mutex;

    const VALID: &str = "{\"decision\": \"yes\", \"evidence\": \"mass\"}";
    const VERIFIER_TEMPLATE: &str = "Report: {Results}\nDraft: {draft_json}";

    #[derive(Default)]
    struct MemoryStore {
        data: Mutex<Option<Dataset>>,
        saves: Mutex<Vec<Dataset>>,
    }

    impl MemoryStore {
        fn with(dataset: Dataset) -> Self {
            Self {
                data: Mutex::new(Some(dataset)),
                saves: Mutex::new(Vec::new()),
            }
        }

        fn saved(&self) -> Dataset {
            self.data.lock().unwrap().clone().unwrap()
        }

        fn save_count(&self) -> usize {
            self.saves.lock().unwrap().len()
        }
    }

    impl TabularStore for MemoryStore {
        fn exists(&self) -> bool {
            self.data.lock().unwrap().is_some()
        }

        fn load(&self) -> Result<Dataset, StorageError> {
            self.data
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| StorageError::NoSheets(PathBuf::from("memory")))
        }

        fn save(&self, dataset: &Dataset) -> Result<(), StorageError> {
            *self.data.lock().unwrap() = Some(dataset.clone());
            self.saves.lock().unwrap().push(dataset.clone());
            Ok(())
        }

        fn location(&self) -> String {
            "memory".to_string()
        }
    }

    fn reports(n: usize) -> Dataset {
        let mut data = Dataset::new(["ID", "Results"]);
        for i in 0..n {
            data.push_row(vec![CellValue::Number(i as f64 + 1.0), format!("report {}", i + 1).into()]);
        }
        data
    }

    fn processor(provider: LLMProvider, script: Vec<Scripted>) -> (BatchProcessor, ScriptedLLM) {
        let llm = ScriptedLLM::new(provider, script);
        let client = Arc::new(ModelClient::new(Box::new(llm.clone()), FieldSchema::default()));
        let mut processor = BatchProcessor::new(
            Arc::clone(&client),
            PromptTemplate::new("Classify: {Results} as {\"decision\": \"...\"}"),
            provider.default_placeholder_check(),
        )
        .with_options(BatchOptions {
            show_progress: false,
            ..BatchOptions::default()
        });
        if provider.uses_verifier() {
            processor = processor.with_verifier(Verifier::new(client, PromptTemplate::new(VERIFIER_TEMPLATE)));
        }
        (processor, llm)
    }

    fn column(data: &Dataset, name: &str) -> usize {
        data.column_index(name).unwrap()
    }

    #[tokio::test]
    async fn test_valid_answer_marks_no_correction() {
        let (processor, llm) = processor(LLMProvider::OpenAI, vec![Scripted::Reply(VALID)]);
        let input = MemoryStore::with(reports(1));
        let output = MemoryStore::default();

        let result = processor.run(&input, &output).await.unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.corrected, 0);
        assert_eq!(llm.calls(), 1);

        let saved = output.saved();
        assert_eq!(saved.columns(), &["ID", "Results", "Response", "Response2", "Time"]);
        assert_eq!(saved.get(0, column(&saved, "Response")), &CellValue::Text(VALID.into()));
        assert_eq!(saved.get(0, column(&saved, "Response2")), &CellValue::Text(String::new()));
        assert!(matches!(saved.get(0, column(&saved, "Time")), CellValue::Number(_)));
        assert!(llm.last_user_prompt().contains("Classify: report 1 as {\"decision\": \"...\"}"));
    }

    #[tokio::test]
    async fn test_invalid_answer_is_corrected_in_next_slot() {
        let (processor, llm) = processor(
            LLMProvider::OpenAI,
            vec![Scripted::Reply("decision: yes"), Scripted::Reply(VALID)],
        );
        let input = MemoryStore::with(reports(1));
        let output = MemoryStore::default();

        let result = processor.run(&input, &output).await.unwrap();
        assert_eq!(result.corrected, 1);
        assert_eq!(llm.calls(), 2);
        assert!(llm.last_user_prompt().contains("Here is your previous response:\ndecision: yes"));

        let saved = output.saved();
        assert_eq!(saved.get(0, column(&saved, "Response")), &CellValue::Text("decision: yes".into()));
        assert_eq!(saved.get(0, column(&saved, "Response2")), &CellValue::Text(VALID.into()));
    }

    #[tokio::test]
    async fn test_failed_call_is_recorded_and_batch_continues() {
        let (processor, _llm) = processor(
            LLMProvider::OpenAI,
            vec![Scripted::Fail, Scripted::Fail, Scripted::Reply(VALID)],
        );
        let input = MemoryStore::with(reports(2));
        let output = MemoryStore::default();

        let result = processor.run(&input, &output).await.unwrap();
        assert_eq!(result.processed, 2);
        assert_eq!(result.failed_calls, 1);

        let saved = output.saved();
        let response = column(&saved, "Response");
        let correction = column(&saved, "Response2");
        assert!(saved.get(0, response).to_string().starts_with("[ERROR] ApiError:"));
        assert!(saved.get(0, correction).to_string().starts_with("[CORRECTION_ERROR] ApiError:"));
        assert_eq!(saved.get(1, response), &CellValue::Text(VALID.into()));
    }

    #[tokio::test]
    async fn test_local_backend_verifies_before_validation() {
        let (processor, llm) = processor(
            LLMProvider::Ollama,
            vec![Scripted::Reply("{\"decision\": \"no\"}"), Scripted::Reply(VALID)],
        );
        let input = MemoryStore::with(reports(1));
        let output = MemoryStore::default();

        processor.run(&input, &output).await.unwrap();
        assert_eq!(llm.calls(), 2);
        assert_eq!(llm.last_user_prompt(), "Report: report 1\nDraft: {\"decision\": \"no\"}");

        let saved = output.saved();
        assert_eq!(saved.columns(), &["ID", "Results", "Response", "Response2", "Response3", "Time"]);
        assert_eq!(saved.get(0, column(&saved, "Response2")), &CellValue::Text(VALID.into()));
        assert_eq!(saved.get(0, column(&saved, "Response3")), &CellValue::Text(String::new()));
    }

    #[tokio::test]
    async fn test_checkpoints_every_interval() {
        let script = (0..25).map(|_| Scripted::Reply(VALID)).collect();
        let (processor, _llm) = processor(LLMProvider::OpenAI, script);
        let input = MemoryStore::with(reports(25));
        let output = MemoryStore::default();

        let result = processor.run(&input, &output).await.unwrap();
        assert_eq!(result.checkpoints, 2);
        assert_eq!(output.save_count(), 3);

        let saves = output.saves.lock().unwrap();
        let response = column(&saves[0], "Response");
        assert!(!saves[0].get(9, response).is_blank());
        assert!(saves[0].get(10, response).is_blank());
        assert!(!saves[1].get(19, response).is_blank());
        assert!(saves[1].get(20, response).is_blank());
    }

    #[tokio::test]
    async fn test_completed_rows_are_skipped() {
        let mut existing = reports(3);
        let response = existing.ensure_column(RESPONSE_COLUMN);
        existing.set(0, response, "[ERROR] ApiError: earlier");
        existing.set(2, response, VALID);

        let (processor, llm) = processor(LLMProvider::OpenAI, vec![Scripted::Reply(VALID)]);
        let input = MemoryStore::with(reports(3));
        let output = MemoryStore::with(existing);

        let result = processor.run(&input, &output).await.unwrap();
        assert_eq!(result.skipped, 2);
        assert_eq!(result.processed, 1);
        assert_eq!(llm.calls(), 1);
        assert!(llm.last_user_prompt().contains("report 2"));

        let saved = output.saved();
        assert_eq!(saved.get(0, response), &CellValue::Text("[ERROR] ApiError: earlier".into()));
    }

    #[tokio::test]
    async fn test_existing_output_columns_keep_their_positions() {
        let mut existing = Dataset::new(["Time", "ID", "Results"]);
        existing.push_row(vec![CellValue::Empty, CellValue::Number(1.0), "report 1".into()]);

        let (processor, _llm) = processor(LLMProvider::OpenAI, vec![Scripted::Reply(VALID)]);
        let output = MemoryStore::with(existing);
        processor.run(&MemoryStore::default(), &output).await.unwrap();

        let saved = output.saved();
        assert_eq!(saved.columns(), &["Time", "ID", "Results", "Response", "Response2"]);
        assert_eq!(saved.get(0, column(&saved, "Results")), &CellValue::Text("report 1".into()));
        assert_eq!(saved.get(0, column(&saved, "Response")), &CellValue::Text(VALID.into()));
        assert!(matches!(saved.get(0, column(&saved, "Time")), CellValue::Number(_)));
    }

    #[tokio::test]
    async fn test_nothing_to_do_still_saves() {
        let mut existing = reports(2);
        let response = existing.ensure_column(RESPONSE_COLUMN);
        existing.set(0, response, VALID);
        existing.set(1, response, VALID);

        let (processor, llm) = processor(LLMProvider::OpenAI, vec![]);
        let output = MemoryStore::with(existing.clone());

        let result = processor.run(&MemoryStore::default(), &output).await.unwrap();
        assert_eq!(result.processed, 0);
        assert_eq!(llm.calls(), 0);
        assert_eq!(output.save_count(), 1);
        assert_eq!(output.saved().rows()[0][..3], existing.rows()[0][..3]);
    }

    #[tokio::test]
    async fn test_missing_input_column_is_fatal() {
        let (processor, llm) = processor(LLMProvider::OpenAI, vec![]);
        let input = MemoryStore::with(Dataset::new(["ID", "Text"]));
        let output = MemoryStore::default();

        let err = processor.run(&input, &output).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingInputColumn { .. })
        ));
        assert_eq!(llm.calls(), 0);
        assert_eq!(output.save_count(), 0);
    }

    #[test]
    fn test_verifier_candidates() {
        let candidates = verifier_template_candidates(Some(Path::new("custom/Breast_Tstage_verifier.txt")));
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("custom/Breast_Tstage_verifier.txt"),
                PathBuf::from("prompts/Breast_Tstage_verifier.txt"),
            ]
        );
        assert!(verifier_template_candidates(None).is_empty());
    }

    #[tokio::test]
    async fn test_missing_verifier_template_is_fatal() {
        let err = load_verifier_template(Some(Path::new("/nonexistent/verify.txt")))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Verify prompt file not found. Tried:\n/nonexistent/verify.txt"));
    }
}
