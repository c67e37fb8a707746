use serde::{Deserialize, Serialize};
use serde_json::json;

use super::PipelineError;
use crate::task::{Checkpoint, RunId};

/// Position of an import, as stored in the task checkpoint.
///
/// ```json
/// {"import_id": "3f2c...", "step": 2, "cursor": "p51", "transient_failures": 0}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportState {
    /// Run that started this import. Every storage write is tagged with it.
    pub import_id: RunId,
    /// Index of the step to execute next.
    pub step: usize,
    /// Where the current step resumes; `None` at the start of a step.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Consecutive slices that ended on a transient error.
    #[serde(default)]
    pub transient_failures: u32,
}

impl ImportState {
    pub fn fresh(import_id: RunId) -> Self {
        Self {
            import_id,
            step: 0,
            cursor: None,
            transient_failures: 0,
        }
    }

    pub fn at(import_id: RunId, step: usize, cursor: impl Into<String>) -> Self {
        Self {
            import_id,
            step,
            cursor: Some(cursor.into()),
            transient_failures: 0,
        }
    }

    /// Decode a stored checkpoint. An empty checkpoint decodes to `None`.
    pub fn decode(checkpoint: &Checkpoint) -> Result<Option<Self>, PipelineError> {
        if checkpoint.is_empty() {
            return Ok(None);
        }
        serde_json::from_value(checkpoint.as_value().clone())
            .map(Some)
            .map_err(|e| PipelineError::InvalidCheckpoint(e.to_string()))
    }

    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint::from_value(json!({
            "import_id": self.import_id.as_str(),
            "step": self.step,
            "cursor": self.cursor,
            "transient_failures": self.transient_failures,
        }))
    }

    pub(super) fn advance(&mut self) {
        self.step += 1;
        self.cursor = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_state_decodes_to_itself() {
        let state = ImportState::at(RunId::new("run-1"), 2, "p51");
        let decoded = ImportState::decode(&state.to_checkpoint()).unwrap();
        assert_eq!(decoded, Some(state));
    }

    #[test]
    fn empty_checkpoint_is_a_fresh_start() {
        assert_eq!(ImportState::decode(&Checkpoint::empty()).unwrap(), None);
    }

    #[test]
    fn optional_fields_default() {
        let cp = Checkpoint::from_value(json!({"import_id": "run-1", "step": 1}));
        let state = ImportState::decode(&cp).unwrap().unwrap();
        assert_eq!(state.cursor, None);
        assert_eq!(state.transient_failures, 0);
    }

    #[test]
    fn foreign_shapes_are_rejected() {
        let cp = Checkpoint::from_value(json!({"offset": 10}));
        assert!(matches!(
            ImportState::decode(&cp),
            Err(PipelineError::InvalidCheckpoint(_))
        ));
    }
}
