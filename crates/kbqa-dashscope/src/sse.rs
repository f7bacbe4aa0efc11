//! Server-Sent Events decoding for streamed completions

use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::Display;

use kbqa_core::{Error, Result, TokenStream};

/// Splits a byte stream into `data:` payloads.
///
/// Network chunks may end mid-line (or mid UTF-8 sequence); incomplete
/// lines stay buffered until their newline arrives.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return the payloads of every completed `data:` line
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = data_payload(&line[..line.len() - 1]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a final line that was not newline-terminated
    pub(crate) fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        data_payload(&line).into_iter().collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let data = line.strip_prefix(b"data:")?;
    let data = data.strip_prefix(b" ").unwrap_or(data);
    Some(String::from_utf8_lossy(data).into_owned())
}

enum Payload {
    Text(String),
    Skip,
    Done,
    Failed(Error),
}

fn classify(payload: &str, extract: fn(&Value) -> Option<&str>) -> Payload {
    let payload = payload.trim();
    if payload.is_empty() {
        return Payload::Skip;
    }
    if payload == "[DONE]" {
        return Payload::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(json) => {
            if let Some(error) = json.get("error") {
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Payload::Failed(Error::Llm(message));
            }
            match extract(&json) {
                Some(text) if !text.is_empty() => Payload::Text(text.to_string()),
                _ => Payload::Skip,
            }
        }
        Err(e) => {
            tracing::warn!("Failed to parse stream event: {} - Error: {}", payload, e);
            Payload::Skip
        }
    }
}

/// Turn a raw SSE byte stream into a stream of text deltas.
///
/// The stream ends at `[DONE]`, at the end of the body, or after the first error.
pub(crate) fn token_stream<S, B, E>(bytes: S, extract: fn(&Value) -> Option<&str>) -> TokenStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let state = (bytes, SseDecoder::new(), VecDeque::<Result<String>>::new(), false);

    Box::pin(futures::stream::unfold(
        state,
        move |(mut bytes, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, done)));
                }
                if done {
                    return None;
                }

                let payloads = match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(chunk.as_ref()),
                    Some(Err(e)) => {
                        done = true;
                        pending.push_back(Err(Error::Network(e.to_string())));
                        continue;
                    }
                    None => {
                        done = true;
                        decoder.finish()
                    }
                };

                for payload in payloads {
                    match classify(&payload, extract) {
                        Payload::Text(text) => pending.push_back(Ok(text)),
                        Payload::Skip => {}
                        Payload::Done => {
                            done = true;
                            break;
                        }
                        Payload::Failed(e) => {
                            pending.push_back(Err(e));
                            done = true;
                            break;
                        }
                    }
                }
            }
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_handles_split_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\ndata: [DONE]\n"), vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn test_decoder_ignores_non_data_lines() {
        let mut decoder = SseDecoder::new();
        let payloads = decoder.push(b": keep-alive\nevent: message\nid: 7\ndata:x\n");
        assert_eq!(payloads, vec!["x"]);
    }

    #[test]
    fn test_decoder_split_inside_utf8_sequence() {
        let bytes = "data: 你好\n".as_bytes();
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..8]).is_empty());
        assert_eq!(decoder.push(&bytes[8..]), vec!["你好"]);
    }

    #[test]
    fn test_decoder_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
        assert!(decoder.finish().is_empty());
    }
}
