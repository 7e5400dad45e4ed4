//! Error check tool — expose the project's error aggregator to the model.

use async_trait::async_trait;
use appforge_core::diagnostics::ErrorAggregator;
use appforge_core::error::ToolError;
use appforge_core::tool::{Tool, ToolOutput};
use std::sync::Arc;

pub struct CheckErrorsTool {
    errors: Arc<ErrorAggregator>,
}

impl CheckErrorsTool {
    pub fn new(errors: Arc<ErrorAggregator>) -> Self {
        Self { errors }
    }
}

#[async_trait]
impl Tool for CheckErrorsTool {
    fn name(&self) -> &str {
        "check_errors"
    }

    fn description(&self) -> &str {
        "Check for current errors in the running application. Returns terminal errors, browser console errors, \
and Vite HMR errors. Call after making changes to verify they work."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::text(self.errors.report()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_core::diagnostics::CLEAN_REPORT;

    #[tokio::test]
    async fn reports_aggregated_errors() {
        let errors = Arc::new(ErrorAggregator::new());
        let tool = CheckErrorsTool::new(errors.clone());

        let clean = tool.execute(serde_json::json!({})).await.unwrap();
        assert_eq!(clean, ToolOutput::text(CLEAN_REPORT));

        errors.record_terminal_line("Error: Cannot find module './Todo'");
        let ToolOutput::Text { text } = tool.execute(serde_json::json!({})).await.unwrap() else {
            panic!("expected text output");
        };
        assert!(text.contains("Cannot find module"));
    }
}
