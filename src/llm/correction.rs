use std::sync::Arc;
use tracing::{debug, info};

use super::{ModelClient, ModelReply};
use crate::schema::FieldSchema;

/// Single bounded repair request for malformed answers.
///
/// The corrected reply is returned as-is: it is stored in its own slot
/// and not validated a second time.
pub struct JsonCorrector {
    client: Arc<ModelClient>,
}

impl JsonCorrector {
    pub fn new(client: Arc<ModelClient>) -> Self {
        Self { client }
    }

    /// Ask the model to reformat `previous` as strict JSON without changing content
    pub async fn correct(&self, previous: &str) -> ModelReply {
        let prompt = correction_prompt(self.client.schema(), self.client.provider().is_local(), previous);
        debug!("Requesting format correction ({} chars of previous response)", previous.len());

        let reply = self.client.send(&prompt).await;
        if !reply.is_failure() {
            info!("🔧 Correction response received");
        }
        reply
    }
}

/// Build the repair prompt embedding the previous response verbatim.
///
/// Remote backends get the full `"field": "<string>"` shape; local models
/// get the bare key list.
pub fn correction_prompt(schema: &FieldSchema, local: bool, previous: &str) -> String {
    if local {
        format!(
            r#"
Your previous response did not strictly match the required JSON format.
Your task is to correct the format and return a valid JSON.

DO NOT change any information from your previous response.
DO NOT provide explanations or additional text.
Do NOT modify JSON key names. Use the exact key names.

Return JSON with exactly these keys:
{}

----
Here is your previous response:
{}
----
"#,
            schema.key_list(),
            previous
        )
    } else {
        format!(
            r#"
Your previous response did not strictly match the required JSON format.
Your task is to correct the format and return a valid JSON object.

DO NOT change any of the information from your previous response.
DO NOT provide explanations or additional text.
Do NOT modify JSON key names. Use the exact key names.

Simply return a properly formatted JSON with the following structure:

Required JSON format:
```json
{{
  {}
}}
```

----
Here is your previous response:
{}
----
"#,
            schema.shape_spec(),
            previous
        )
    }
}
