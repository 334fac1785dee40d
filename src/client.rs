//! Patch generation service boundary
//!
//! The service receives an error message and the source of the failing
//! function and answers with free text. The only thing we rely on is that a
//! usable patch arrives as the first fenced code block in that text.

use crate::config::ServiceConfig;
use crate::util::truncate;
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

const SYSTEM_PROMPT: &str = "You are a senior developer. Given a JavaScript error and the faulty \
function, return a fixed version of the function. Reply with the complete function in a single \
fenced code block.";

/// Maximum length for error content in error messages
const MAX_ERROR_CONTENT_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub error_message: String,
    pub function_code: String,
}

impl PatchRequest {
    pub fn user_prompt(&self) -> String {
        format!(
            "Error: {}\n\nFunction:\n{}",
            self.error_message, self.function_code
        )
    }
}

/// Replacement text for the extracted function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCandidate {
    pub code: String,
}

impl PatchCandidate {
    /// At least one `{`: a bare expression or prose is never a function body.
    pub fn has_block_marker(&self) -> bool {
        self.code.contains('{')
    }
}

/// Anything that can turn a [`PatchRequest`] into raw response text.
///
/// `Err` means the service could not be reached or answered with garbage;
/// a well-formed answer without a code block is still `Ok`.
pub trait PatchSource: Send + Sync {
    fn request_patch<'a>(
        &'a self,
        request: &'a PatchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

fn code_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // any tag on its own line, or a known language tag sharing the code's line
        Regex::new(
            r"(?s)```(?:[\w+.#-]*[ \t]*\r?\n|(?:javascript|js|jsx|mjs|cjs|typescript|ts|tsx|node)[ \t]+)?(.*?)```",
        )
        .expect("valid code block regex")
    })
}

/// First fenced block in `response`, trimmed. Empty blocks count as no block.
pub fn extract_first_code_block(response: &str) -> Option<PatchCandidate> {
    let caps = code_block_re().captures(response)?;
    let code = caps.get(1)?.as_str().trim();
    if code.is_empty() {
        return None;
    }
    Some(PatchCandidate {
        code: code.to_string(),
    })
}

/// Sanitize API response content for error messages to prevent credential leakage.
fn sanitize_api_response(content: &str) -> String {
    const SECRET_PATTERNS: &[&str] = &[
        "api_key",
        "apikey",
        "secret",
        "password",
        "credential",
        "bearer",
        "sk-",
    ];

    let truncated = truncate(content, MAX_ERROR_CONTENT_LEN);
    let lower = truncated.to_lowercase();
    if SECRET_PATTERNS.iter().any(|p| lower.contains(p)) {
        return "(response details redacted - may contain sensitive data)".to_string();
    }
    truncated
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client (OpenRouter by default).
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    service: ServiceConfig,
}

impl ChatCompletionsClient {
    pub fn new(service: ServiceConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = service.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { http, service })
    }

    fn chat_request(&self, request: &PatchRequest) -> ChatRequest {
        ChatRequest {
            model: self.service.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user_prompt(),
                },
            ],
            stream: false,
        }
    }

    async fn send(&self, request: &PatchRequest) -> Result<String> {
        let mut builder = self
            .http
            .post(&self.service.api_url)
            .header("Content-Type", "application/json")
            .json(&self.chat_request(request));
        if let Some(key) = &self.service.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| anyhow!("Request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "API error {}: {}",
                status,
                sanitize_api_response(&text)
            ));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse response: {}", e))?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No response content from patch service"))
    }
}

impl PatchSource for ChatCompletionsClient {
    fn request_patch<'a>(
        &'a self,
        request: &'a PatchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_first_block_with_language_tag() {
        let response = "Here is the fix:\n```javascript\nfunction f(x) {\n  return x ?? 0;\n}\n```\nAnd a test:\n```js\nf(1)\n```";
        let candidate = extract_first_code_block(response).unwrap();
        assert_eq!(candidate.code, "function f(x) {\n  return x ?? 0;\n}");
        assert!(candidate.has_block_marker());
    }

    #[test]
    fn test_extracts_block_without_language_tag() {
        let response = "```\nconst g = () => {\n  return 1;\n};\n```";
        let candidate = extract_first_code_block(response).unwrap();
        assert_eq!(candidate.code, "const g = () => {\n  return 1;\n};");
    }

    #[test]
    fn test_single_line_fence_drops_language_tag() {
        let candidate = extract_first_code_block("```javascript function f() { return 1; }```").unwrap();
        assert_eq!(candidate.code, "function f() { return 1; }");

        let candidate = extract_first_code_block("```js const g = () => { return 2; };```").unwrap();
        assert_eq!(candidate.code, "const g = () => { return 2; };");
    }

    #[test]
    fn test_untagged_single_line_fence_keeps_first_word() {
        let candidate = extract_first_code_block("```function f() { return 1; }```").unwrap();
        assert_eq!(candidate.code, "function f() { return 1; }");
    }

    #[test]
    fn test_no_fence_is_no_candidate() {
        assert_eq!(extract_first_code_block("function f() { return 1; }"), None);
        assert_eq!(extract_first_code_block("``` unterminated"), None);
        assert_eq!(extract_first_code_block("```js\n\n```"), None);
    }

    #[test]
    fn test_block_content_is_not_validated() {
        let candidate = extract_first_code_block("```\nrequire('child_process').exec('rm -rf /')\n```").unwrap();
        assert!(candidate.code.contains("child_process"));
        assert!(!candidate.has_block_marker());
    }

    #[test]
    fn test_user_prompt_layout() {
        let request = PatchRequest {
            error_message: "TypeError: x is undefined".to_string(),
            function_code: "function f() {}".to_string(),
        };
        assert_eq!(
            request.user_prompt(),
            "Error: TypeError: x is undefined\n\nFunction:\nfunction f() {}"
        );
    }

    #[test]
    fn test_sanitize_redacts_secrets() {
        assert_eq!(sanitize_api_response("rate limited"), "rate limited");
        assert!(sanitize_api_response("invalid api_key sk-abc").contains("redacted"));
    }

    #[test]
    fn test_chat_response_shape() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"```js\nf()\n```"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("```js\nf()\n```")
        );

        let empty: ChatResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.choices.is_empty());
    }
}
