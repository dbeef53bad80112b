//! Sample record sets for exercising generated code

use crate::llm::{decode, prompts, ModelClient};
use crate::target::{RecordSet, TargetDescriptor};
use async_trait::async_trait;

/// Produces a record set when the caller did not supply one.
#[async_trait]
pub trait SampleGenerator: Send + Sync {
    async fn generate(&self, target: &TargetDescriptor) -> anyhow::Result<Option<RecordSet>>;
}

/// Never produces a sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSampleGenerator;

#[async_trait]
impl SampleGenerator for NoSampleGenerator {
    async fn generate(&self, _target: &TargetDescriptor) -> anyhow::Result<Option<RecordSet>> {
        Ok(None)
    }
}

/// Asks the model for a small JSON record set matching the target.
pub struct ModelSampleGenerator<M> {
    model: M,
}

impl<M: ModelClient> ModelSampleGenerator<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M: ModelClient> SampleGenerator for ModelSampleGenerator<M> {
    async fn generate(&self, target: &TargetDescriptor) -> anyhow::Result<Option<RecordSet>> {
        let envelope = self
            .model
            .complete(prompts::SAMPLE_SYSTEM, &prompts::sample_request(target))
            .await?;
        let text = decode(&envelope)?;
        parse_record_set(&text).map(Some)
    }
}

/// Parse a record set out of model text, tolerating fences and chatter.
pub fn parse_record_set(text: &str) -> anyhow::Result<RecordSet> {
    let json = extract_json_object(text)
        .ok_or_else(|| anyhow::anyhow!("No JSON object in sample response"))?;
    let records: RecordSet = serde_json::from_str(json)
        .map_err(|e| anyhow::anyhow!("Invalid sample record set: {}", e))?;
    if records.columns.is_empty() {
        return Err(anyhow::anyhow!("Sample record set has no columns"));
    }
    if records.rows.iter().any(|row| row.len() != records.columns.len()) {
        return Err(anyhow::anyhow!("Sample rows do not match the column count"));
    }
    Ok(records)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start <= end).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedModel(Mutex<Option<serde_json::Value>>);

    #[async_trait]
    impl ModelClient for CannedModel {
        async fn complete(&self, _system: &str, _prompt: &str) -> anyhow::Result<serde_json::Value> {
            self.0
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| anyhow::anyhow!("no response"))
        }
    }

    #[test]
    fn test_parse_record_set_from_fenced_text() {
        let text = "Here you go:\n```json\n{\"columns\": [\"id\", \"score\"], \"rows\": [[1, 0.5], [2, null]]}\n```";
        let records = parse_record_set(text).unwrap();
        assert_eq!(records.columns, vec!["id", "score"]);
        assert_eq!(records.rows.len(), 2);
        assert_eq!(records.rows[1][1], json!(null));
    }

    #[test]
    fn test_parse_record_set_rejects_ragged_rows() {
        assert!(parse_record_set("{\"columns\": [\"a\"], \"rows\": [[1, 2]]}").is_err());
        assert!(parse_record_set("{\"columns\": [], \"rows\": []}").is_err());
        assert!(parse_record_set("no json here").is_err());
    }

    #[tokio::test]
    async fn test_model_sample_generator() {
        let model = CannedModel(Mutex::new(Some(json!({
            "response": "{\"columns\": [\"name\"], \"rows\": [[\"a\"]]}"
        }))));
        let generator = ModelSampleGenerator::new(model);
        let target = TargetDescriptor::new("clean", "cleaner", "src/cleaner.py");
        let records = generator.generate(&target).await.unwrap().unwrap();
        assert_eq!(records.first_column(), Some("name"));
    }

    #[tokio::test]
    async fn test_no_sample_generator() {
        let target = TargetDescriptor::new("clean", "cleaner", "src/cleaner.py");
        assert!(NoSampleGenerator.generate(&target).await.unwrap().is_none());
    }
}
