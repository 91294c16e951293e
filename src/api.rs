//! Language model interaction.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait, one prompt in, one answer out
//! - [`OllamaClient`]: `POST /api/chat` against an Ollama server
//! - [`RetryAsk`]: decorator that retries any [`AskAsync`] under a [`RetryPolicy`]
//! - [`Summarizer`]: the three tasks of the pipeline (per-article summary,
//!   corpus synthesis, corpus Q&A) expressed as prompts over an [`AskAsync`]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::error::LlmError;
use crate::models::Page;
use crate::retry::RetryPolicy;
use crate::utils::truncate_for_log;

/// A system + user message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Trait for async LLM interaction.
///
/// Implementors send a prompt to a model and return its text answer. Keeping
/// this seam small lets decorators like [`RetryAsk`] and test doubles stand
/// in for the real client.
pub trait AskAsync {
    async fn ask(&self, prompt: &Prompt) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatAnswer,
}

#[derive(Debug, Deserialize)]
struct ChatAnswer {
    content: String,
}

/// Client for the Ollama chat endpoint.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

impl AskAsync for OllamaClient {
    #[instrument(level = "info", skip_all, fields(model = %self.model))]
    async fn ask(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let t0 = Instant::now();
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            stream: false,
        };

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis(),
                body = %truncate_for_log(&body, 300),
                "API call failed"
            );
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let answer = resp.json::<ChatResponse>().await?.message.content;
        if answer.trim().is_empty() {
            return Err(LlmError::EmptyAnswer);
        }
        debug!(
            elapsed_ms = t0.elapsed().as_millis(),
            bytes = answer.len(),
            "API call succeeded"
        );
        Ok(answer)
    }
}

/// Whether a failed call is worth trying again.
pub fn is_transient(e: &LlmError) -> bool {
    match e {
        LlmError::Http(_) | LlmError::EmptyAnswer => true,
        LlmError::Status { status, .. } => *status == 429 || *status >= 500,
        LlmError::Exhausted { .. } => false,
    }
}

/// Wrapper that retries any [`AskAsync`] implementation under a [`RetryPolicy`].
///
/// Transient failures (transport errors, 429/5xx, empty answers) are retried;
/// when the policy runs out they surface as [`LlmError::Exhausted`]. Other
/// errors are returned unchanged on the first occurrence.
pub struct RetryAsk<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T: AskAsync> RetryAsk<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk").field("policy", &self.policy).finish()
    }
}

impl<T: AskAsync> AskAsync for RetryAsk<T> {
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, prompt: &Prompt) -> Result<String, LlmError> {
        self.policy
            .run("llm.ask", || self.inner.ask(prompt), is_transient)
            .await
            .map_err(|e| {
                if is_transient(&e) {
                    LlmError::Exhausted {
                        attempts: self.policy.max_attempts(),
                        last: e.to_string(),
                    }
                } else {
                    e
                }
            })
    }
}

const SUMMARY_SYSTEM: &str = "Vous êtes un rédacteur expert en création de résumés d'articles clairs, \
informatifs et impartiaux. Présentez les informations principales, les points clés et les conclusions \
importantes de manière neutre et fidèle au contenu, dans un ton clair et accessible.";

const SYNTHESIS_SYSTEM: &str = "Vous êtes un expert en veille stratégique. Créez une synthèse concise des \
articles fournis : commencez par une vue d'ensemble des grandes tendances, identifiez pour chaque article \
les points clés et les innovations notables, puis concluez par une analyse des implications globales.";

const ANSWER_SYSTEM: &str = "Vous êtes un assistant expert en veille stratégique. Votre tâche est de \
répondre aux questions en vous fondant uniquement sur les articles fournis.";

/// Render pages as one context block: `### title`, `URL : link`, then content.
pub fn corpus_context(pages: &[Page]) -> String {
    pages
        .iter()
        .map(|p| format!("### {}\nURL : {}\n{}", p.title, p.link, p.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The pipeline's LLM tasks.
#[derive(Debug)]
pub struct Summarizer<A> {
    llm: A,
}

impl<A: AskAsync> Summarizer<A> {
    pub fn new(llm: A) -> Self {
        Self { llm }
    }

    /// Summarize one article in at most ~150 words.
    #[instrument(level = "info", skip_all, fields(link = %page.link))]
    pub async fn summarize(&self, page: &Page) -> Result<String, LlmError> {
        let prompt = Prompt {
            system: SUMMARY_SYSTEM.to_string(),
            user: format!(
                "Voici le contenu d'un article que je souhaite résumer :\n{}\n\n\
                 Rédigez un résumé clair, concis et informatif, au ton neutre et descriptif. \
                 Limitez-vous à un maximum de 150 mots.",
                page.content
            ),
        };
        self.timed("summarize", &prompt).await
    }

    /// One strategic synthesis covering all `pages`.
    #[instrument(level = "info", skip_all, fields(count = pages.len()))]
    pub async fn synthesize(&self, pages: &[Page]) -> Result<String, LlmError> {
        let prompt = Prompt {
            system: SYNTHESIS_SYSTEM.to_string(),
            user: format!(
                "Veuillez générer une synthèse stratégique des articles suivants :\n{}",
                corpus_context(pages)
            ),
        };
        self.timed("synthesize", &prompt).await
    }

    /// Answer `question` from the content of `pages`.
    #[instrument(level = "info", skip_all, fields(count = pages.len()))]
    pub async fn answer(&self, question: &str, pages: &[Page]) -> Result<String, LlmError> {
        let prompt = Prompt {
            system: ANSWER_SYSTEM.to_string(),
            user: format!("Question : {question}\nContexte : {}", corpus_context(pages)),
        };
        self.timed("answer", &prompt).await
    }

    async fn timed(&self, task: &'static str, prompt: &Prompt) -> Result<String, LlmError> {
        let t0 = Instant::now();
        let res = self.llm.ask(prompt).await;
        let dt = t0.elapsed();
        match &res {
            Ok(answer) => info!(task, elapsed_ms_total = dt.as_millis(), bytes = answer.len(), "LLM task succeeded"),
            Err(e) => error!(task, elapsed_ms_total = dt.as_millis(), error = %e, "LLM task failed"),
        }
        res
    }
}
