//! Global prose analysis of the outlier summary via a text-completion service.

use crate::analytics::run_outliers;
use crate::config::{CompletionConfig, Config};
use crate::constants::{ANALYSIS_JSON_FILE, ANALYSIS_MARKDOWN_FILE};
use crate::error::{KpiError, Result};
use crate::storage::{write_atomic, write_json_atomic};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

static STRIKETHROUGH: Lazy<Regex> = Lazy::new(|| Regex::new(r"~~(.*?)~~").expect("valid strikethrough pattern"));

const SYSTEM_PROMPT: &str =
    "You are an expert global data analyst specializing in socioeconomic and environmental trends.";

const ANALYSIS_INSTRUCTIONS: &str = "Analyze the following global KPI summaries with a clear and reasoned tone (CEFR level B2). \
Explain global trends, improvements, deteriorations, and correlations across regions and clusters. \
Pay attention to differences between democracies and autocracies, and how political systems, \
economic power groups (EU, G7, G20, BRICS, OECD, etc.), and resource dependencies influence the results. \
Include reflections on key global challenges such as climate change, inequality, conflict, and migration, \
and identify which countries or groups show positive or negative exceptions.\n\n\
Structure your response as follows:\n\
- Overview (short paragraph)\n\
- Highlights (positive developments)\n\
- Lowlights (negative developments)\n\
- Political & Regional Differences\n\
- Interrelations & Global Dynamics\n\
- Forecast & Outlook\n\
- Short Global Conclusion\n\n\
Here is the aggregated KPI data:\n";

/// Black-box prose generator: system and user prompt in, text out.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
pub struct ChatCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionClient {
    /// Build from config; the API key is read from the configured environment variable.
    pub fn from_config(completion: &CompletionConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&completion.api_key_env).map_err(|_| {
            KpiError::Config(format!(
                "{} not set; it is required for the analysis step",
                completion.api_key_env
            ))
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: completion.endpoint.clone(),
            model: completion.model.clone(),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl TextCompletion for ChatCompletionClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(KpiError::Completion {
                message: format!("HTTP {}: {}", status.as_u16(), body.chars().take(500).collect::<String>()),
            });
        }
        let parsed: ChatResponse = resp.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| KpiError::Completion {
                message: "response contained no message content".to_string(),
            })
    }
}

/// Fixed instructions followed by the summary JSON cut to `max_chars` characters.
pub fn build_prompt(summary_json: &str, max_chars: usize) -> String {
    let data: String = summary_json.chars().take(max_chars).collect();
    format!("{ANALYSIS_INSTRUCTIONS}{data}")
}

/// Unwrap `~~struck~~` passages, keeping their text.
pub fn strip_strikethrough(text: &str) -> String {
    STRIKETHROUGH.replace_all(text, "$1").into_owned()
}

#[derive(Debug, Serialize)]
pub struct GlobalAnalysis {
    pub analysis_text: String,
    pub summary: serde_json::Value,
}

/// Recompute outliers, ask for a global analysis and write `analysis.md` and
/// `analysis.json`. Returns `Ok(None)` when no KPI has enough data.
#[instrument(skip(config, completion))]
pub async fn generate_global_analysis(
    config: &Config,
    completion: &dyn TextCompletion,
) -> Result<Option<GlobalAnalysis>> {
    let report = run_outliers(config)?;
    if report.is_empty() {
        warn!("No KPI data with enough values; run fetch first");
        return Ok(None);
    }

    let summary = serde_json::to_value(&report.summary)?;
    let prompt = build_prompt(
        &serde_json::to_string_pretty(&summary)?,
        config.completion.max_prompt_chars,
    );
    info!(kpis = report.summary.len(), prompt_chars = prompt.chars().count(), "Requesting global analysis");

    let text = completion.complete(SYSTEM_PROMPT, &prompt).await?;
    let analysis = GlobalAnalysis {
        analysis_text: strip_strikethrough(text.trim()),
        summary,
    };

    write_atomic(
        &config.data_file(ANALYSIS_MARKDOWN_FILE),
        analysis.analysis_text.as_bytes(),
    )?;
    write_json_atomic(&config.data_file(ANALYSIS_JSON_FILE), &analysis)?;
    info!("Global analysis written");
    Ok(Some(analysis))
}
