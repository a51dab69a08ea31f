//! JSON extraction and parse-with-reprompt for model output.
//!
//! Models wrap JSON in code fences or lead with prose despite instructions.
//! [`extract_json`] strips the decoration; [`complete_json`] drives the
//! call/extract/parse cycle and re-prompts with a corrective instruction
//! until the output parses or the attempt budget runs out.

use serde::de::DeserializeOwned;

use super::{ChatMessage, ChatOptions, LlmClient, LlmError};

/// Total attempts to obtain a parseable JSON object from the model.
const JSON_ATTEMPTS: u32 = 3;

/// Extract a JSON object from an LLM response, handling markdown code
/// blocks and surrounding prose.
pub fn extract_json(response: &str) -> String {
    let trimmed = response.trim();

    // Fenced code block, with or without a language tag
    if trimmed.starts_with("```") {
        if let Some(start_idx) = trimmed.find('\n') {
            let after_fence = &trimmed[start_idx + 1..];
            if let Some(end_idx) = after_fence.rfind("```") {
                return after_fence[..end_idx].trim().to_string();
            }
        }
    }

    // First '{' to last '}' spans any leading or trailing prose
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }

    trimmed.to_string()
}

/// Call the model and parse its response as `T`.
///
/// On a parse failure the model's answer is kept in the conversation and a
/// corrective instruction naming the expected shape is appended, then the
/// call repeats - retries seek a successful parse, not a specific answer, so
/// nothing is cached across attempts.
///
/// # Errors
///
/// Transport errors propagate as-is. `LlmError::MalformedOutput` is returned
/// once all attempts produced unparseable output.
pub async fn complete_json<T: DeserializeOwned>(
    client: &dyn LlmClient,
    messages: &[ChatMessage],
    schema_hint: &str,
    options: ChatOptions,
) -> Result<T, LlmError> {
    let mut convo = messages.to_vec();

    for attempt in 0..JSON_ATTEMPTS {
        let response = client.complete(&convo, options).await?;
        let extracted = extract_json(&response);

        match serde_json::from_str::<T>(&extracted) {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(
                    attempt,
                    error = %e,
                    "model output did not parse as requested JSON"
                );
                convo.push(ChatMessage::assistant(response));
                convo.push(ChatMessage::user(format!(
                    "Return JSON only matching {schema_hint}. No prose, no code fences."
                )));
            }
        }
    }

    Err(LlmError::malformed_output(format!(
        "no parseable JSON after {JSON_ATTEMPTS} attempts (expected {schema_hint})"
    )))
}
