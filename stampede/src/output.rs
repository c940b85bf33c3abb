use stampede_core::{ProgressFn, RunConfig, RunReport};

use crate::cli::OutputFormat;
use crate::scenarios::ScenarioName;

mod human;
mod json;

pub(crate) trait OutputFormatter: Send + Sync {
    fn print_header(&self, scenario: ScenarioName, config: &RunConfig);
    fn progress(&self) -> Option<ProgressFn>;
    fn print_summary(&self, report: &RunReport) -> anyhow::Result<()>;
}

pub(crate) fn formatter(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::HumanReadable => Box::new(human::HumanReadableOutput::new()),
        OutputFormat::Json => Box::new(json::JsonOutput),
    }
}
