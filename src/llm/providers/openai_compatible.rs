use async_trait::async_trait;
use futures_util::StreamExt;

use crate::errors::{VisorError, VisorResult};
use crate::llm::provider::LlmProvider;
use crate::llm::sse_parser;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse, StreamChunkKind};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> VisorResult<LlmResponse> {
        let body = serde_json::json!({
            "model": cfg.model,
            "messages": &messages,
            "stream": cfg.stream,
            "temperature": cfg.temperature,
        });

        tracing::debug!(
            provider = %self.id,
            model = %cfg.model,
            stream = cfg.stream,
            messages = messages.len(),
            "sending LLM request"
        );
        tracing::debug!(body = %sanitized_body(&body), "request body (sanitized, base64 omitted)");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VisorError::LlmInvocation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(VisorError::LlmInvocation(format!("{}: {}", status, err_body)));
        }

        if cfg.stream {
            self.handle_stream(response).await
        } else {
            self.handle_json(response).await
        }
    }
}

impl OpenAiCompatibleProvider {
    /// Folds an SSE response into one reply. Lines are split on raw bytes so a
    /// UTF-8 sequence cut across network chunks is decoded intact.
    async fn handle_stream(&self, response: reqwest::Response) -> VisorResult<LlmResponse> {
        let mut chunks = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();
        let mut resp = LlmResponse::default();

        'stream: while let Some(next) = chunks.next().await {
            let bytes = next.map_err(|e| VisorError::LlmInvocation(format!("stream interrupted: {e}")))?;
            pending.extend_from_slice(&bytes);

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if apply_sse_line(line, &mut resp) {
                    break 'stream;
                }
            }
        }
        if !pending.is_empty() {
            apply_sse_line(String::from_utf8_lossy(&pending).trim(), &mut resp);
        }

        tracing::info!(
            provider = %self.id,
            content_len = resp.content.len(),
            reasoning_len = resp.reasoning.len(),
            "streamed reply assembled"
        );
        Ok(resp)
    }

    async fn handle_json(&self, response: reqwest::Response) -> VisorResult<LlmResponse> {
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| VisorError::LlmInvocation(format!("invalid JSON body: {e}")))?;

        if let Some(err) = json.get("error") {
            let msg = err["message"].as_str().map(str::to_string).unwrap_or_else(|| err.to_string());
            return Err(VisorError::LlmInvocation(msg));
        }

        let message = &json["choices"][0]["message"];
        let content = message["content"].as_str().unwrap_or("").to_string();
        let reasoning = message["reasoning_content"].as_str().unwrap_or("").to_string();

        tracing::info!(content_len = content.len(), "LLM JSON response received");
        Ok(LlmResponse { content, reasoning })
    }
}

/// Applies one SSE line to `resp`. Returns true once the stream signals completion.
fn apply_sse_line(line: &str, resp: &mut LlmResponse) -> bool {
    match sse_parser::parse_sse_line(line) {
        Ok(Some(chunk)) => match chunk.kind {
            StreamChunkKind::Reasoning => resp.reasoning.push_str(&chunk.content),
            StreamChunkKind::Content => resp.content.push_str(&chunk.content),
            StreamChunkKind::Done => return true,
        },
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "unparsable SSE line skipped"),
    }
    false
}

/// Clone of the request body with image payloads replaced, for logging.
fn sanitized_body(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            // content can be string or array of parts; we only touch the array case.
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) != Some("image_url") {
                    continue;
                }
                if let Some(url) = part.get_mut("image_url").and_then(|i| i.get_mut("url")) {
                    *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(stream: bool) -> CallConfig {
        CallConfig {
            model: "gpt-4o-mini".into(),
            stream,
            temperature: 0.1,
        }
    }

    #[tokio::test]
    async fn json_completion_returns_message_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"{\"output\":[]}"}}]}"#)
            .create_async()
            .await;

        let provider = OpenAiCompatibleProvider::new(
            "test".into(),
            format!("{}/v1/chat/completions", server.url()),
            "sk-test".into(),
        );
        let resp = provider.chat(vec![ChatMessage::user("hi")], &cfg(false)).await.unwrap();
        assert_eq!(resp.content, "{\"output\":[]}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_is_an_invocation_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let provider = OpenAiCompatibleProvider::new("test".into(), format!("{}/chat", server.url()), String::new());
        let err = provider.chat(vec![ChatMessage::user("hi")], &cfg(false)).await.unwrap_err();
        match err {
            VisorError::LlmInvocation(msg) => assert!(msg.contains("rate limited"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn streamed_completion_is_accumulated() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"output\\\"\"}}]}\n\n",
            ": keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\":[]}\"}}]}\n\n",
            "data: [DONE]\n\n",
        );
        server
            .mock("POST", "/chat")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let provider = OpenAiCompatibleProvider::new("test".into(), format!("{}/chat", server.url()), String::new());
        let resp = provider.chat(vec![ChatMessage::user("hi")], &cfg(true)).await.unwrap();
        assert_eq!(resp.content, "{\"output\":[]}");
    }

    #[test]
    fn sse_lines_fold_into_reply() {
        let mut resp = LlmResponse::default();
        assert!(!apply_sse_line(r#"data: {"choices":[{"delta":{"content":"héllo"}}]}"#, &mut resp));
        assert!(!apply_sse_line("event: ping", &mut resp));
        assert!(apply_sse_line("data: [DONE]", &mut resp));
        assert_eq!(resp.content, "héllo");
    }

    #[test]
    fn sanitizer_hides_images() {
        let body = serde_json::json!({
            "messages": [ChatMessage::user_with_images("look", &["AAAA".to_string()])]
        });
        let logged = sanitized_body(&body);
        assert!(logged.contains("<omitted_base64_image>"));
        assert!(!logged.contains("AAAA"));
    }
}
