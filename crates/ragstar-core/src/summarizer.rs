//! Repository summarization through a local Ollama model

use std::borrow::Cow;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::SummarizerConfig;
use crate::error::{SearchError, SearchResult, SummarizeError};

const TRUNCATION_MARKER: &str = "\n[... truncated ...]";

/// Turns fetched repository content into a short summary
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        repo_name: &str,
        text: &str,
        max_prompt_chars: usize,
    ) -> Result<String, SummarizeError>;
}

/// Keep the leading `max_chars` chars, marking the cut
pub fn truncate_prompt(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(format!("{}{}", &text[..idx], TRUNCATION_MARKER)),
        None => Cow::Borrowed(text),
    }
}

/// Full prompt for one repository
pub fn build_prompt(repo_name: &str, content: &str) -> String {
    format!(
        "You are a technical writer writing a detailed summary for a developer knowledge base.

Write a 3-10 sentence summary of {repo_name}. Be as specific and concrete as possible.

Structure your response in clear sections:

**What & Why:** What is this project? (library, framework, tool, SDK, CLI, API, etc.) What problem does it solve?

**Core Features:** List 3-5 specific capabilities or features mentioned in the README/files. Be concrete, not vague.

**Use Case:** Who is the primary audience? What types of developers/teams use this?

**Tech Stack:** What are the key technologies, dependencies, or programming language(s)?

**Integration:** How is it used? (install as package, CLI tool, REST API, embed in code, etc.)

**Strengths:** What makes this unique or better than alternatives (if mentioned)?

Specificity over vagueness. Instead of \"data tool\" say \"processes 1M+ events/sec\" or \"manages time-series with 99.9% uptime\".
Only use information from the README and root-level .toml/.txt files shown below.
DO NOT mention installation steps or configuration details.
DO NOT INCLUDE ANY MARKDOWN FORMATTING IN YOUR RESPONSE OR URL OR HTTP BALISE. ONLY HUMAN READABLE TEXT.
DO NOT add artificial padding. Use all 3-10 sentences to be informative.
NO NEED TO SPECIFY No root .toml/.txt files captured

Repository: {repo_name}

{content}

Summary:"
    )
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

/// Summarizer backed by Ollama's `/api/generate`
pub struct OllamaSummarizer {
    config: SummarizerConfig,
    client: Client,
}

impl OllamaSummarizer {
    pub fn new(config: SummarizerConfig) -> SearchResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| SearchError::Config(format!("summarizer client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Ask Ollama to download a model, `None` meaning the configured one
    pub async fn pull_model(&self, model: Option<&str>) -> Result<(), SummarizeError> {
        let name = model.unwrap_or(&self.config.model);
        log::info!("[Summarize] Pulling model {}", name);

        let response = self
            .client
            .post(self.config.pull_url())
            .json(&PullRequest { name, stream: false })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SummarizeError::Model(format!(
                "pull of {name} failed ({status}): {body}"
            )))
        }
    }

    async fn generate(&self, prompt: &str) -> Result<(StatusCode, String), SummarizeError> {
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
            temperature: self.config.temperature,
        };
        let response = self
            .client
            .post(&self.config.ollama_url)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl Summarizer for OllamaSummarizer {
    async fn summarize(
        &self,
        repo_name: &str,
        text: &str,
        max_prompt_chars: usize,
    ) -> Result<String, SummarizeError> {
        let content = truncate_prompt(text, max_prompt_chars);
        if let Cow::Owned(_) = content {
            log::debug!(
                "[Summarize] {}: content exceeds {} chars, truncated",
                repo_name,
                max_prompt_chars
            );
        }
        let prompt = build_prompt(repo_name, &content);

        let (mut status, mut body) = self.generate(&prompt).await?;
        if status == StatusCode::NOT_FOUND {
            log::warn!(
                "[Summarize] Model {} not available, pulling before retry",
                self.config.model
            );
            self.pull_model(None).await?;
            (status, body) = self.generate(&prompt).await?;
        }

        if !status.is_success() {
            return Err(SummarizeError::Model(format!("generate failed ({status}): {body}")));
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| SummarizeError::Model(format!("bad generate response: {e}")))?;
        let summary = parsed.response.trim();
        if summary.is_empty() {
            return Err(SummarizeError::Model("model returned an empty summary".to_string()));
        }
        Ok(summary.to_string())
    }
}
