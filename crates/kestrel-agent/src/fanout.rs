//! Bounded concurrent sub-calls.
//!
//! Each sub-call gets its own private message list and no tools. All of them
//! are awaited together before anything is aggregated.

use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use kestrel_core::types::{LlmResponse, Message};
use kestrel_providers::{LlmProvider, LlmRequestConfig, ProviderError};

const REASONER_PROMPT: &str =
    "You are a focused reasoning assistant. Answer the question directly and concisely.";

const SYNTHESIS_PROMPT: &str = "You combine code reviews into one verdict. List the issues that \
     matter most first, merge duplicates, and drop anything speculative.";

/// A reviewer role used by [`FanOut::persona_review`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Persona {
    pub name: &'static str,
    pub brief: &'static str,
}

pub const DEFAULT_PERSONAS: &[Persona] = &[
    Persona {
        name: "correctness",
        brief: "Find logic errors, unhandled edge cases, and behaviour that contradicts the intent.",
    },
    Persona {
        name: "security",
        brief: "Find injection, path traversal, unsafe input handling, and leaked secrets.",
    },
    Persona {
        name: "maintainability",
        brief: "Judge naming, structure, duplication, and how easy the change is to extend.",
    },
];

/// Outcome of a persona review.
#[derive(Clone, Debug)]
pub struct PersonaReview {
    /// `(persona, review)` in persona order; failed reviews carry an error note.
    pub reviews: Vec<(String, String)>,
    pub synthesis: String,
}

/// Issues independent, tool-less calls concurrently against one model.
pub struct FanOut {
    provider: Arc<dyn LlmProvider>,
    model: String,
    request: LlmRequestConfig,
}

impl FanOut {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, request: LlmRequestConfig) -> Self {
        Self {
            provider,
            model: model.into(),
            request,
        }
    }

    async fn ask(&self, system: &str, user: &str) -> Result<LlmResponse, ProviderError> {
        let messages = [Message::system(system), Message::user(user)];
        self.provider
            .chat(&messages, None, &self.model, &self.request, None)
            .await
    }

    /// Answer every question concurrently and number the answers.
    ///
    /// A failed question shows up as an inline note; the others are kept.
    pub async fn reason_in_parallel(&self, questions: &[String]) -> String {
        info!(count = questions.len(), model = %self.model, "parallel reasoning");
        let answers = join_all(questions.iter().map(|q| self.ask(REASONER_PROMPT, q))).await;

        questions
            .iter()
            .zip(answers)
            .enumerate()
            .map(|(i, (question, answer))| {
                let body = match answer {
                    Ok(response) => response.content.trim().to_string(),
                    Err(e) => {
                        warn!(question = i + 1, error = %e, "sub-question failed");
                        format!("(error: {e})")
                    }
                };
                format!("{}. {question}\n{body}", i + 1)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Review `subject` from each persona concurrently, then synthesize.
    ///
    /// # Errors
    /// Only a failure of the synthesis call is returned.
    pub async fn persona_review(&self, subject: &str, personas: &[Persona]) -> Result<PersonaReview> {
        let prompts: Vec<String> = personas
            .iter()
            .map(|p| format!("You are the {} reviewer. {}", p.name, p.brief))
            .collect();
        let results = join_all(prompts.iter().map(|system| self.ask(system, subject))).await;

        let reviews: Vec<(String, String)> = personas
            .iter()
            .zip(results)
            .map(|(persona, result)| {
                let text = match result {
                    Ok(response) => response.content,
                    Err(e) => {
                        warn!(persona = persona.name, error = %e, "review failed");
                        format!("(error: {e})")
                    }
                };
                (persona.name.to_string(), text)
            })
            .collect();
        debug!(reviews = reviews.len(), "reviews collected");

        let combined = reviews
            .iter()
            .map(|(name, text)| format!("## {name}\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let synthesis = self
            .ask(SYNTHESIS_PROMPT, &format!("Subject:\n{subject}\n\nReviews:\n{combined}"))
            .await?
            .content;

        Ok(PersonaReview { reviews, synthesis })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use kestrel_core::types::ToolDefinition;
    use kestrel_providers::DeltaCallback;

    /// Echoes the last user turn, tracking how many calls overlap.
    struct EchoProvider {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_on: Option<&'static str>,
    }

    impl EchoProvider {
        fn new(fail_on: Option<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_on,
            })
        }
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn chat(
            &self,
            messages: &[Message],
            tools: Option<&[ToolDefinition]>,
            _model: &str,
            _config: &LlmRequestConfig,
            _on_delta: Option<&DeltaCallback<'_>>,
        ) -> Result<LlmResponse, ProviderError> {
            assert!(tools.is_none());
            assert_eq!(messages.len(), 2);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let system = messages[0].text();
            let user = messages[1].text();
            if self.fail_on.is_some_and(|f| user.contains(f) || system.contains(f)) {
                return Err(ProviderError::Transport("connection reset".into()));
            }
            Ok(LlmResponse::text(format!("re: {}", &user[..user.len().min(40)])))
        }

        fn default_model(&self) -> &str {
            "echo"
        }

        fn display_name(&self) -> &str {
            "EchoProvider"
        }
    }

    #[tokio::test]
    async fn test_reason_in_parallel_numbers_answers_and_overlaps() {
        let provider = EchoProvider::new(Some("second"));
        let fan = FanOut::new(provider.clone(), "m", LlmRequestConfig::default());
        let questions = vec!["first question".to_string(), "second question".into(), "third".into()];

        let out = fan.reason_in_parallel(&questions).await;
        assert!(out.starts_with("1. first question\nre: first question"));
        assert!(out.contains("2. second question\n(error: transport error: connection reset)"));
        assert!(out.contains("3. third\nre: third"));
        assert!(provider.peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_persona_review_collects_then_synthesizes() {
        let provider = EchoProvider::new(Some("security reviewer"));
        let fan = FanOut::new(provider, "m", LlmRequestConfig::default());

        let review = fan.persona_review("fn add(a: i32) {}", DEFAULT_PERSONAS).await.unwrap();
        let names: Vec<&str> = review.reviews.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["correctness", "security", "maintainability"]);
        assert!(review.reviews[1].1.starts_with("(error:"));
        assert!(review.synthesis.starts_with("re: Subject:"));
    }
}
