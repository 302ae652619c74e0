//! Context-budget-aware recursive map-reduce summarization.
//!
//! Texts that fit the context budget together with the active prompt are
//! summarized in one streaming call. Otherwise they are grouped into batches
//! that each fit, every batch is summarized, and the batch summaries are fed
//! back in under the reduce prompt until they fit.
//!
//! Lengths are character counts of the template plus the payload texts. This
//! approximates the model's token budget; callers size `context_budget`
//! accordingly.

use std::sync::Arc;

use futures::future::try_join_all;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::TextBackend;
use crate::error::{InferenceError, InferenceResult};
use crate::template::render;

fn text_len(text: &str) -> usize {
    text.chars().count()
}

/// Summarizer limits.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Maximum prompt length in characters
    pub context_budget: usize,
    /// Batch summaries in flight per wave
    pub concurrency: usize,
    /// Shrink attempts for a text that does not fit next to its batch
    pub max_shrink_attempts: u32,
    /// Reduction passes before giving up
    pub max_passes: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            context_budget: 90_000,
            concurrency: 4,
            max_shrink_attempts: 3,
            max_passes: 16,
        }
    }
}

impl SummarizerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parse = |key: &str| std::env::var(key).ok().and_then(|s| s.trim().parse::<usize>().ok());

        Self {
            context_budget: parse("MAX_CONTEXT_LENGTH").unwrap_or(defaults.context_budget),
            concurrency: parse("LLM_CONCURRENT")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.concurrency),
            max_shrink_attempts: defaults.max_shrink_attempts,
            max_passes: parse("SUMMARY_MAX_PASSES")
                .map(|n| n as u32)
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_passes),
        }
    }
}

/// Templates used by one summarization run.
#[derive(Debug, Clone, Copy)]
pub struct SummaryPrompts<'a> {
    /// First-pass template over the source texts
    pub map: &'a str,
    /// Template for later passes over batch summaries
    pub reduce: &'a str,
    /// Template used to shrink a single oversized text
    pub single_reduce: &'a str,
}

/// Recursive map-reduce summarizer over a text backend.
pub struct MapReduceSummarizer<B: TextBackend + ?Sized> {
    backend: Arc<B>,
    config: SummarizerConfig,
}

impl<B: TextBackend + ?Sized> MapReduceSummarizer<B> {
    pub fn new(backend: Arc<B>, config: SummarizerConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    fn model_name(&self) -> String {
        self.backend
            .model_info()
            .map(|info| info.model)
            .unwrap_or_default()
    }

    fn too_small(&self, length: usize) -> InferenceError {
        InferenceError::ContextTooSmall {
            budget: self.config.context_budget,
            length,
            model: self.model_name(),
        }
    }

    /// Summarize `texts`, forwarding the tokens of the final pass to `sink`.
    ///
    /// Returns the complete final summary. Nothing is sent to `sink` unless
    /// the reduction reaches its final pass.
    pub async fn summarize(
        &self,
        texts: Vec<String>,
        prompts: &SummaryPrompts<'_>,
        sink: &mpsc::Sender<String>,
    ) -> InferenceResult<String> {
        let budget = self.config.context_budget;
        let mut current = texts;
        let mut template = prompts.map;

        for pass in 1..=self.config.max_passes {
            let length = text_len(template) + current.iter().map(|t| text_len(t)).sum::<usize>();

            if length <= budget {
                debug!(pass, texts = current.len(), length, "Final summary pass");
                return self.stream_batch(&current, template, sink).await;
            }

            if current.is_empty() {
                return Err(self.too_small(length));
            }

            let batches = self.create_batches(current, template, prompts.single_reduce).await?;
            info!(
                pass,
                length,
                batches = batches.len(),
                "Summary exceeds context budget, reducing in batches"
            );

            let mut summaries = Vec::with_capacity(batches.len());
            for wave in batches.chunks(self.config.concurrency.max(1)) {
                let calls = wave.iter().map(|batch| {
                    let prompt = render(template, batch);
                    async move { self.backend.complete(&prompt).await }
                });
                summaries.extend(try_join_all(calls).await?);
            }

            current = summaries;
            template = prompts.reduce;
        }

        warn!(passes = self.config.max_passes, "Summary reduction did not converge");
        Err(InferenceError::ReductionStalled(self.config.max_passes))
    }

    async fn stream_batch(
        &self,
        texts: &[String],
        template: &str,
        sink: &mpsc::Sender<String>,
    ) -> InferenceResult<String> {
        let prompt = render(template, texts);
        let mut tokens = self.backend.stream(&prompt).await?;
        let mut summary = String::new();
        let mut sink_open = true;

        while let Some(token) = tokens.next().await {
            let token = token?;
            summary.push_str(&token);
            if sink_open && sink.send(token).await.is_err() {
                debug!("Summary sink closed, continuing without forwarding");
                sink_open = false;
            }
        }

        Ok(summary)
    }

    async fn shrink(&self, text: &str, single_reduce: &str) -> InferenceResult<String> {
        self.backend.complete(&render(single_reduce, &[text])).await
    }

    /// Group texts into batches that each fit the budget under `template`.
    ///
    /// A batch closes on overflow once it holds at least two texts. A text
    /// that overflows a smaller batch is shrunk (together with the batch's
    /// only text, if any) and closes the batch with it.
    async fn create_batches(
        &self,
        texts: Vec<String>,
        template: &str,
        single_reduce: &str,
    ) -> InferenceResult<Vec<Vec<String>>> {
        let budget = self.config.context_budget;
        let template_len = text_len(template);

        let mut batches = Vec::new();
        let mut batch: Vec<String> = Vec::new();
        let mut batch_len = 0usize;

        for mut text in texts {
            let len = text_len(&text);

            if batch_len + len + template_len <= budget {
                batch_len += len;
                batch.push(text);
                continue;
            }

            if batch.len() >= 2 {
                batches.push(std::mem::take(&mut batch));
                batch_len = len;
                batch.push(text);
                continue;
            }

            let mut attempts = 0;
            while batch_len + text_len(&text) + template_len > budget {
                if attempts >= self.config.max_shrink_attempts {
                    return Err(self.too_small(batch_len + text_len(&text)));
                }

                if batch.is_empty() {
                    text = self.shrink(&text, single_reduce).await?;
                } else {
                    let (shrunk_text, shrunk_first) = tokio::try_join!(
                        self.shrink(&text, single_reduce),
                        self.shrink(&batch[0], single_reduce)
                    )?;
                    text = shrunk_text;
                    batch[0] = shrunk_first;
                    batch_len = text_len(&batch[0]);
                }
                attempts += 1;
            }

            batch.push(text);
            batches.push(std::mem::take(&mut batch));
            batch_len = 0;
        }

        if !batch.is_empty() {
            batches.push(batch);
        }

        Ok(batches)
    }
}
