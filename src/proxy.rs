//! Streaming generation proxy: forwards a request to the backend's
//! `/completion` endpoint and folds its `data: {json}` line protocol into a
//! normalized event sequence.
//!
//! Contract: every stream ends with exactly one terminal event
//! (`finished: true`), carrying `error` when anything went wrong. Failures
//! never propagate past this module as errors.

use std::sync::Arc;

use async_stream::stream;
use futures::stream::BoxStream;
use futures::{pin_mut, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provision::ServiceState;

/// Sampling request as the proxy sees it, already validated at the
/// transport boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

/// One element of the client-facing event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub token: String,
    pub finished: bool,
    pub error: Option<String>,
}

impl StreamEvent {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            finished: false,
            error: None,
        }
    }

    pub fn finished() -> Self {
        Self {
            token: String::new(),
            finished: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            token: String::new(),
            finished: true,
            error: Some(message.into()),
        }
    }
}

/// Parsed form of one backend protocol line.
#[derive(Debug, PartialEq)]
enum BackendChunk {
    Token(String),
    Stop,
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Recognize one line of backend output. Lines without the `data: ` prefix
/// are protocol noise (keepalives, blank separators) and parse to nothing;
/// a malformed JSON payload is logged and skipped rather than failing the
/// stream.
fn parse_backend_line(line: &str) -> Option<BackendChunk> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let payload = line.strip_prefix("data: ")?;
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!("Failed to decode backend line: {}", line);
            return None;
        }
    };
    if let Some(content) = value.get("content").and_then(Value::as_str) {
        Some(BackendChunk::Token(content.to_string()))
    } else if value.get("stop").is_some_and(truthy) {
        Some(BackendChunk::Stop)
    } else {
        None
    }
}

/// Fold a stream of raw body chunks into the event sequence. Chunks are
/// reassembled into lines across chunk boundaries; the backend's stop marker
/// ends consumption early. Exactly one terminal event is emitted, on EOF,
/// stop, or read failure.
fn stream_events<S, B, E>(chunks: S) -> impl Stream<Item = StreamEvent>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    stream! {
        pin_mut!(chunks);
        let mut buffer: Vec<u8> = Vec::new();
        let mut stopped = false;
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("An error occurred during generation: {}", e);
                    yield StreamEvent::failed(format!("An error occurred: {}", e));
                    return;
                }
            };
            buffer.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line = String::from_utf8_lossy(&buffer[..pos]).to_string();
                buffer.drain(..=pos);
                match parse_backend_line(&line) {
                    Some(BackendChunk::Token(token)) => yield StreamEvent::token(token),
                    Some(BackendChunk::Stop) => {
                        stopped = true;
                        break;
                    }
                    None => {}
                }
            }
            if stopped {
                break;
            }
        }

        // A final line may arrive without its newline.
        if !stopped && !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).to_string();
            if let Some(BackendChunk::Token(token)) = parse_backend_line(&line) {
                yield StreamEvent::token(token);
            }
        }

        yield StreamEvent::finished();
    }
}

pub struct StreamProxy {
    client: reqwest::Client,
    base_url: String,
    state: Arc<ServiceState>,
}

impl StreamProxy {
    pub fn new(base_url: impl Into<String>, state: Arc<ServiceState>) -> Self {
        Self {
            // Default client carries no request timeout: generation length
            // is caller-controlled via max_tokens and must not be cut off
            // by a fixed deadline.
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            state,
        }
    }

    /// Open a streaming completion against the backend. Each call is an
    /// independent connection; dropping the returned stream drops the
    /// connection, so an abandoned client stops the backend read promptly.
    pub fn generate(&self, req: GenerationRequest) -> BoxStream<'static, StreamEvent> {
        let client = self.client.clone();
        let url = format!("{}/completion", self.base_url);
        let state = self.state.clone();

        stream! {
            if !state.downloaded() {
                yield StreamEvent::failed("Model not initialized. Please call initialize first.");
                return;
            }

            let body = serde_json::json!({
                "prompt": req.prompt,
                "n_predict": req.max_tokens,
                "temperature": req.temperature,
                "top_p": req.top_p,
                "top_k": req.top_k,
                "stream": true,
            });

            tracing::info!("Starting generation, prompt length {}", req.prompt.len());
            let response = match client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Failed to reach backend: {}", e);
                    yield StreamEvent::failed(format!("An error occurred: {}", e));
                    return;
                }
            };
            let response = match response.error_for_status() {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!("Backend rejected completion request: {}", e);
                    yield StreamEvent::failed(format!("An error occurred: {}", e));
                    return;
                }
            };

            let events = stream_events(response.bytes_stream());
            pin_mut!(events);
            while let Some(event) = events.next().await {
                yield event;
            }
            tracing::info!("Generation completed");
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn ok_chunks(chunks: &[&str]) -> Vec<Result<Vec<u8>, std::io::Error>> {
        chunks.iter().map(|c| Ok(c.as_bytes().to_vec())).collect()
    }

    async fn collect<B: AsRef<[u8]>>(
        chunks: Vec<Result<B, std::io::Error>>,
    ) -> Vec<StreamEvent> {
        stream_events(stream::iter(chunks)).collect().await
    }

    #[test]
    fn content_line_parses_to_token() {
        assert_eq!(
            parse_backend_line(r#"data: {"content":"hi"}"#),
            Some(BackendChunk::Token("hi".to_string()))
        );
    }

    #[test]
    fn stop_line_parses_to_stop_marker() {
        assert_eq!(parse_backend_line(r#"data: {"stop":true}"#), Some(BackendChunk::Stop));
        assert_eq!(parse_backend_line(r#"data: {"stop":false}"#), None);
    }

    #[test]
    fn content_takes_precedence_over_stop() {
        // llama.cpp's final chunk carries both fields.
        assert_eq!(
            parse_backend_line(r#"data: {"content":"", "stop":true}"#),
            Some(BackendChunk::Token(String::new()))
        );
    }

    #[test]
    fn noise_lines_are_ignored() {
        assert_eq!(parse_backend_line(""), None);
        assert_eq!(parse_backend_line(": keepalive"), None);
        assert_eq!(parse_backend_line(r#"{"content":"no prefix"}"#), None);
        assert_eq!(parse_backend_line("data: {not json"), None);
    }

    #[tokio::test]
    async fn token_token_stop_produces_the_normalized_sequence() {
        let events = collect(ok_chunks(&[
            "data: {\"content\":\"2\"}\n",
            "data: {\"content\":\"+2=4\"}\n",
            "data: {\"stop\":true}\n",
        ]))
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::token("2"),
                StreamEvent::token("+2=4"),
                StreamEvent::finished(),
            ]
        );
    }

    #[tokio::test]
    async fn malformed_line_does_not_abort_the_stream() {
        let events = collect(ok_chunks(&[
            "data: {not json\n",
            "data: {\"content\":\"x\"}\n",
        ]))
        .await;
        assert_eq!(events, vec![StreamEvent::token("x"), StreamEvent::finished()]);
    }

    #[tokio::test]
    async fn lines_split_across_chunks_are_reassembled() {
        let events = collect(ok_chunks(&[
            "data: {\"con",
            "tent\":\"ab\"}\ndata: {\"content\":\"c\"}\n",
        ]))
        .await;
        assert_eq!(
            events,
            vec![StreamEvent::token("ab"), StreamEvent::token("c"), StreamEvent::finished()]
        );
    }

    #[tokio::test]
    async fn eof_without_stop_still_terminates_exactly_once() {
        let events = collect(ok_chunks(&["data: {\"content\":\"x\"}\n"])).await;
        assert_eq!(events.iter().filter(|e| e.finished).count(), 1);
        assert_eq!(events.last(), Some(&StreamEvent::finished()));
    }

    #[tokio::test]
    async fn trailing_line_without_newline_is_not_lost() {
        let events = collect(ok_chunks(&["data: {\"content\":\"tail\"}"])).await;
        assert_eq!(events, vec![StreamEvent::token("tail"), StreamEvent::finished()]);
    }

    #[tokio::test]
    async fn read_failure_becomes_the_error_terminal() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = vec![
            Ok(b"data: {\"content\":\"x\"}\n".to_vec()),
            Err(std::io::Error::other("connection reset by peer")),
        ];
        let events = collect(chunks).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::token("x"));
        assert!(events[1].finished);
        let error = events[1].error.as_deref().unwrap();
        assert!(error.contains("connection reset"));
    }

    #[tokio::test]
    async fn nothing_after_the_stop_marker_is_consumed() {
        let events = collect(ok_chunks(&[
            "data: {\"stop\":true}\ndata: {\"content\":\"late\"}\n",
        ]))
        .await;
        assert_eq!(events, vec![StreamEvent::finished()]);
    }

    #[tokio::test]
    async fn generate_before_initialize_yields_single_error_terminal() {
        let proxy = StreamProxy::new("http://127.0.0.1:1", Arc::new(ServiceState::default()));
        let events: Vec<_> = proxy
            .generate(GenerationRequest {
                prompt: "hello".to_string(),
                max_tokens: 8,
                temperature: 0.7,
                top_p: 1.0,
                top_k: 50,
            })
            .collect()
            .await;
        assert_eq!(events.len(), 1);
        assert!(events[0].finished);
        assert!(events[0].error.as_deref().unwrap().contains("not initialized"));
    }
}
