use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::dispatch::ResultSink;
use crate::report::InspectionReport;

/// POSTs each report as JSON to a fixed endpoint.
pub struct HttpSink {
    agent: ureq::Agent,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ResultSink for HttpSink {
    fn name(&self) -> &str {
        "http"
    }

    fn deliver(&self, report: &InspectionReport) -> Result<()> {
        let body = report.to_json().context("serialize report")?;
        match self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(response) => {
                log::debug!(
                    "POST {} -> {} for report {}",
                    self.endpoint,
                    response.status(),
                    report.sequence
                );
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => {
                Err(anyhow!("POST {} returned status {}", self.endpoint, code))
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(anyhow!("POST {} failed: {}", self.endpoint, transport))
            }
        }
    }
}
