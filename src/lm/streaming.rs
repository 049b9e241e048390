use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// One streamed delta, passed through without assembly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    pub delta: String,
    pub done: bool,
    pub is_error: bool,
    pub error: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
}

impl StreamChunk {
    pub fn done() -> Self {
        Self {
            done: true,
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// One parsed server-sent-events line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    /// Payload of a `data: …` line.
    Data(String),
    /// The `data: [DONE]` sentinel.
    Done,
}

/// Parses one SSE line. Comment lines, empty keep-alives, and non-`data`
/// fields yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseLine> {
    let rest = line.strip_prefix("data:")?;
    let payload = rest.trim();
    if payload == "[DONE]" {
        Some(SseLine::Done)
    } else if payload.is_empty() {
        None
    } else {
        Some(SseLine::Data(payload.to_string()))
    }
}

/// Converts one SSE data payload into a chunk, extracting the usual
/// `choices[0].delta.content` shape and keeping the rest as metadata.
pub fn chunk_from_payload(payload: &str) -> StreamChunk {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(err) => return StreamChunk::error(format!("undecodable stream payload: {err}")),
    };

    let delta = value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let metadata = value.as_object().cloned().unwrap_or_default();

    StreamChunk {
        delta,
        done: false,
        is_error: false,
        error: None,
        metadata,
    }
}

/// Pumps an SSE byte stream into a channel of [`StreamChunk`]s.
///
/// The reader task ends at the `[DONE]` sentinel, at EOF, or when the
/// receiver is dropped; transport errors surface as a final error chunk.
pub fn stream_chunks<R>(reader: R) -> (mpsc::Receiver<StreamChunk>, JoinHandle<()>)
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);
    let task = tokio::spawn(async move {
        let mut lines = reader.lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_sse_line(&line) {
                    Some(SseLine::Done) => {
                        let _ = tx.send(StreamChunk::done()).await;
                        break;
                    }
                    Some(SseLine::Data(payload)) => {
                        trace!(bytes = payload.len(), "stream chunk");
                        if tx.send(chunk_from_payload(&payload)).await.is_err() {
                            break;
                        }
                    }
                    None => {}
                },
                Ok(None) => {
                    let _ = tx.send(StreamChunk::done()).await;
                    break;
                }
                Err(err) => {
                    let _ = tx.send(StreamChunk::error(err.to_string())).await;
                    break;
                }
            }
        }
    });
    (rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_line_parsing() {
        assert_eq!(
            parse_sse_line("data: {\"x\":1}"),
            Some(SseLine::Data("{\"x\":1}".into()))
        );
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseLine::Done));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(parse_sse_line(""), None);
    }

    #[test]
    fn chunk_extracts_delta() {
        let chunk =
            chunk_from_payload(r#"{"choices":[{"delta":{"content":"Hel"}}],"model":"m"}"#);
        assert_eq!(chunk.delta, "Hel");
        assert!(!chunk.done);
        assert_eq!(chunk.metadata["model"], "m");
    }

    #[test]
    fn undecodable_payload_becomes_error_chunk() {
        let chunk = chunk_from_payload("not json");
        assert!(chunk.is_error);
        assert!(chunk.error.is_some());
    }

    #[tokio::test]
    async fn stream_ends_at_done_sentinel() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n\ndata: [DONE]\n";
        let (mut rx, task) = stream_chunks(std::io::Cursor::new(body.as_bytes().to_vec()));

        let mut deltas = Vec::new();
        while let Some(chunk) = rx.recv().await {
            if chunk.done {
                break;
            }
            deltas.push(chunk.delta);
        }
        assert_eq!(deltas, ["a", "b"]);
        task.await.unwrap();
    }
}
