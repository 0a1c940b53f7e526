use std::sync::Arc;
use tracing::{debug, warn};

use super::{FailureKind, ModelClient, ModelFailure, ModelReply};
use crate::prompt::{fill_placeholders, token, PromptTemplate, DRAFT_JSON_PLACEHOLDER, RESULTS_PLACEHOLDER};

const REQUIRED_PLACEHOLDERS: [&str; 2] = [RESULTS_PLACEHOLDER, DRAFT_JSON_PLACEHOLDER];

/// Cross-checks a draft answer against the source report (local backend).
///
/// Every failure, deterministic or from the model, comes back as a
/// [`ModelReply::Failure`] so callers handle them identically.
pub struct Verifier {
    client: Arc<ModelClient>,
    template: PromptTemplate,
}

impl Verifier {
    pub fn new(client: Arc<ModelClient>, template: PromptTemplate) -> Self {
        Self { client, template }
    }

    pub async fn verify(&self, results: Option<&str>, draft_json: Option<&str>) -> ModelReply {
        let filled = match self.fill(results, draft_json) {
            Ok(filled) => filled,
            Err(failure) => {
                warn!("⚠️ Verification skipped: {}", failure.message);
                return ModelReply::Failure(failure);
            }
        };

        debug!("Sending verification prompt ({} chars)", filled.len());
        self.client.send(&filled).await
    }

    /// Checks 1-4: placeholders present, inputs present, substitute, fully filled
    fn fill(&self, results: Option<&str>, draft_json: Option<&str>) -> Result<String, ModelFailure> {
        for name in REQUIRED_PLACEHOLDERS {
            if !self.template.contains_placeholder(name) {
                return Err(ModelFailure::new(
                    FailureKind::Template,
                    format!("missing placeholder {}", token(name)),
                ));
            }
        }

        let (results, draft_json) = match (results, draft_json) {
            (Some(r), Some(d)) => (r, d),
            _ => {
                return Err(ModelFailure::new(
                    FailureKind::Input,
                    "results_text or draft_json is None",
                ))
            }
        };

        let filled = fill_placeholders(
            self.template.text(),
            &[(RESULTS_PLACEHOLDER, results), (DRAFT_JSON_PLACEHOLDER, draft_json)],
        );

        for name in REQUIRED_PLACEHOLDERS {
            let literal = token(name);
            if filled.contains(&literal) {
                return Err(ModelFailure::new(
                    FailureKind::Template,
                    format!("placeholder {} was not filled correctly", literal),
                ));
            }
        }

        Ok(filled)
    }
}
