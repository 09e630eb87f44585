//! Automated adjudication of finished runs.
//!
//! The [`Judge`] reads the whole shared transcript (including each side's private reasoning,
//! which the participants never see of each other) together with the candidate's objective
//! and the run's rubric, issues exactly one deterministic backend call, and turns the reply
//! into a [`VerificationResult`].
//!
//! Parsing is deliberately forgiving: [`parse_verdict`] never fails. Malformed output
//! degrades to a negative verdict that keeps the raw text as its explanation.
//!
//! ```rust
//! use agentsim::judge::parse_verdict;
//!
//! assert_eq!(parse_verdict("SUCCESS: YES\nEXPLANATION: did it"), (true, "did it".to_string()));
//! assert_eq!(parse_verdict("success:no\nExplanation: nope"), (false, "nope".to_string()));
//! assert_eq!(parse_verdict("I cannot tell."), (false, "I cannot tell.".to_string()));
//! ```

use crate::agentsim::config::{AgentSimConfig, DEFAULT_JUDGE_MAX_TOKENS, DEFAULT_JUDGE_MODEL};
use crate::agentsim::model::{BackendError, GenerationRequest, LanguageModel, Message, Role};
use crate::agentsim::simulation::{Turn, VerificationResult};
use chrono::Utc;

const EXPLANATION_MARKER: &str = "EXPLANATION:";

/// One-shot verdict producer.
#[derive(Clone, Debug)]
pub struct Judge {
    model: String,
    max_tokens: u32,
}

impl Default for Judge {
    fn default() -> Self {
        Judge::new(DEFAULT_JUDGE_MODEL, DEFAULT_JUDGE_MAX_TOKENS)
    }
}

impl Judge {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Judge {
            model: model.into(),
            max_tokens,
        }
    }

    pub fn from_config(config: &AgentSimConfig) -> Self {
        Judge::new(config.judge_model.clone(), config.judge_max_tokens)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Judge for `objective` against `rubric`, with the two-line output contract.
    pub fn system_prompt(objective: &str, rubric: &str) -> String {
        format!(
            "You are a verification system. Your job is to determine whether the candidate \
             agent successfully achieved its objective based on the conversation history.\n\n\
             CANDIDATE'S OBJECTIVE:\n{}\n\n\
             VERIFICATION CRITERIA:\n{}\n\n\
             Analyze the conversation and determine:\n\
             1. Did the candidate achieve its objective?\n\
             2. Provide a clear explanation of why or why not.\n\n\
             Respond in the following format:\n\
             SUCCESS: [YES or NO]\n\
             EXPLANATION: [Your detailed explanation]\n",
            objective, rubric
        )
    }

    /// Issue the judging call and parse its reply. Backend failures are returned unchanged;
    /// parsing never fails.
    pub async fn verify(
        &self,
        model: &dyn LanguageModel,
        objective: &str,
        rubric: &str,
        transcript: &[Turn],
    ) -> Result<VerificationResult, BackendError> {
        let request = GenerationRequest {
            model: self.model.clone(),
            system_prompt: Self::system_prompt(objective, rubric),
            history: vec![Message::new(
                Role::Incoming,
                format!(
                    "Here is the conversation to verify:\n\n{}",
                    format_transcript(transcript)
                ),
            )],
            temperature: 0.0,
            max_output_tokens: self.max_tokens,
        };

        log::info!(
            "Judge::verify: judging {} turns with {}",
            transcript.len(),
            self.model
        );
        let generation = model.generate(&request).await?;
        let (success, explanation) = parse_verdict(&generation.content);
        log::info!("Judge::verify: verdict success={}", success);

        Ok(VerificationResult {
            success,
            explanation,
            timestamp: Utc::now(),
        })
    }
}

/// One block per turn: `[SPEAKER - Turn N]`, the content, an optional
/// `[SPEAKER Internal Reasoning: ...]` line, and a blank separator line.
pub fn format_transcript(turns: &[Turn]) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(turns.len() * 4);
    for turn in turns {
        let speaker = turn.speaker.as_str().to_ascii_uppercase();
        lines.push(format!("[{} - Turn {}]", speaker, turn.turn_number));
        lines.push(turn.content.clone());
        if let Some(reasoning) = turn.reasoning.as_deref().filter(|r| !r.is_empty()) {
            lines.push(format!("[{} Internal Reasoning: {}]", speaker, reasoning));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Extract `(success, explanation)` from free-form judge output.
///
/// An explicit `SUCCESS: YES` / `SUCCESS: NO` (either spacing, any case) wins. Otherwise the
/// verdict is positive only when the word `YES` appears and the word `NO` does not. The
/// explanation is whatever follows `EXPLANATION:`, or the whole trimmed text.
pub fn parse_verdict(text: &str) -> (bool, String) {
    // ASCII upper-casing keeps byte offsets aligned with `text`
    let upper = text.to_ascii_uppercase();

    let success = if upper.contains("SUCCESS: YES") || upper.contains("SUCCESS:YES") {
        true
    } else if upper.contains("SUCCESS: NO") || upper.contains("SUCCESS:NO") {
        false
    } else {
        let words: Vec<&str> = upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .collect();
        words.contains(&"YES") && !words.contains(&"NO")
    };

    let explanation = match upper.find(EXPLANATION_MARKER) {
        Some(index) => text[index + EXPLANATION_MARKER.len()..].trim().to_string(),
        None => text.trim().to_string(),
    };

    (success, explanation)
}
