//! Runs a single push for the command line tool

use crate::cli::Args;
use crate::config::Config;
use crate::error::{PushError, PushFailure};
use crate::output::OutputManager;
use crate::push::{Client, PushOutcome};
use crate::upload::ProgressSink;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Runner {
    args: Args,
    config: Config,
    output: OutputManager,
}

impl Runner {
    pub fn new(args: Args, config: Config) -> Self {
        Self::with_output(OutputManager::new(args.verbose), args, config)
    }

    pub fn with_output(output: OutputManager, args: Args, config: Config) -> Self {
        Self {
            args,
            config,
            output,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<PushOutcome, PushFailure> {
        self.output.section(&format!("Pushing {}", self.args.image));
        self.output
            .detail(&format!("Worker root: {}", self.config.root.display()));

        let client = Client::new(self.config.clone());
        let progress: Arc<dyn ProgressSink> = Arc::new(self.output.clone());

        match client.push(&self.args.image, &cancel, Some(progress)).await {
            Ok(outcome) => {
                self.output.summary(
                    "Push Summary",
                    &[
                        ("Reference", outcome.reference.clone()),
                        ("Digest", outcome.manifest_digest.clone()),
                        ("Elapsed", self.output.elapsed_time()),
                    ],
                );
                Ok(outcome)
            }
            Err(failure) => {
                self.output.error(&failure.to_string());
                if matches!(failure.kind(), PushError::Cancelled) {
                    self.output.warning("Push cancelled");
                } else if failure.kind().is_retryable() {
                    self.output
                        .warning("The failure looks transient; retrying the push may succeed");
                }
                Err(failure)
            }
        }
    }
}
