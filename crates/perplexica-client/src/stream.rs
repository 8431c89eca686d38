//! Incremental decoder for Perplexica's newline-delimited JSON streams.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use perplexica_core::StreamMessage;
use std::pin::Pin;
use std::task::{Context, Poll};

type ByteResult = std::result::Result<Bytes, String>;

/// A lazy, single-pass sequence of [`StreamMessage`]s read off one streaming
/// `/api/search` connection.
///
/// Bytes are consumed as they arrive and split on `\n`. Blank lines and lines
/// that do not parse as a stream message are skipped silently; a single bad
/// line never ends the stream. The sequence ends when the connection closes —
/// cleanly or not — and `done`/`error` messages are yielded like any other
/// (interpreting them is the consumer's business). Dropping the stream closes
/// the underlying connection.
pub struct MessageStream {
    inner: Pin<Box<dyn Stream<Item = ByteResult> + Send>>,
    buf: Vec<u8>,
    done: bool,
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("buf", &self.buf)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl MessageStream {
    pub(crate) fn new<S, E>(inner: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        Self {
            inner: Box::pin(inner.map(|r| r.map_err(|e| e.to_string()))),
            buf: Vec::new(),
            done: false,
        }
    }
}

fn decode_line(line: &[u8]) -> Option<StreamMessage> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}

impl Stream for MessageStream {
    type Item = StreamMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            while let Some(pos) = this.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = this.buf.drain(..=pos).collect();
                if let Some(msg) = decode_line(&line) {
                    return Poll::Ready(Some(msg));
                }
            }
            if this.done {
                // Trailing line without a terminator, flushed at close.
                let tail = std::mem::take(&mut this.buf);
                return Poll::Ready(decode_line(&tail));
            }
            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buf.extend_from_slice(&chunk),
                // A mid-stream read error is indistinguishable from a close:
                // the sequence just ends (callers that care probe separately).
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use perplexica_core::StreamMessageKind;
    use proptest::prelude::*;

    fn chunked(parts: Vec<&str>) -> MessageStream {
        let items: Vec<std::result::Result<Bytes, std::io::Error>> = parts
            .into_iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        MessageStream::new(stream::iter(items))
    }

    async fn collect(s: MessageStream) -> Vec<StreamMessage> {
        s.collect::<Vec<_>>().await
    }

    #[tokio::test]
    async fn malformed_and_blank_lines_are_skipped() {
        let body = "{\"type\":\"init\",\"data\":null}\nnot-json\n{\"type\":\"response\",\"data\":\"hi\"}\n\n";
        let msgs = collect(chunked(vec![body])).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].kind, StreamMessageKind::Init);
        assert_eq!(msgs[1].kind, StreamMessageKind::Response);
        assert_eq!(msgs[1].data, serde_json::json!("hi"));
    }

    #[tokio::test]
    async fn messages_split_across_chunks_are_reassembled() {
        let msgs = collect(chunked(vec![
            "{\"type\":\"sou",
            "rces\",\"data\":[]}\n{\"type\":\"resp",
            "onse\",\"data\":\"a\"}\n",
        ]))
        .await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].kind, StreamMessageKind::Sources);
        assert_eq!(msgs[1].kind, StreamMessageKind::Response);
    }

    #[tokio::test]
    async fn trailing_unterminated_line_is_flushed() {
        let msgs = collect(chunked(vec!["{\"type\":\"done\",\"data\":null}"])).await;
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, StreamMessageKind::Done);
    }

    #[tokio::test]
    async fn crlf_lines_are_tolerated() {
        let msgs = collect(chunked(vec![
            "{\"type\":\"init\",\"data\":null}\r\n{\"type\":\"done\",\"data\":null}\r\n",
        ]))
        .await;
        assert_eq!(msgs.len(), 2);
    }

    #[tokio::test]
    async fn done_and_error_tags_do_not_end_the_stream() {
        let body = "{\"type\":\"done\",\"data\":null}\n{\"type\":\"response\",\"data\":\"late\"}\n";
        let msgs = collect(chunked(vec![body])).await;
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].kind, StreamMessageKind::Done);
        assert_eq!(msgs[1].kind, StreamMessageKind::Response);
    }

    #[tokio::test]
    async fn read_error_ends_the_stream_after_buffered_lines() {
        let items: Vec<std::result::Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"type\":\"init\",\"data\":null}\n{\"type\":\"resp")),
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        ];
        let msgs = collect(MessageStream::new(stream::iter(items))).await;
        // The complete line before the drop is delivered; the partial one is not.
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, StreamMessageKind::Init);
    }

    proptest! {
        /// N well-formed lines among arbitrary garbage/blank lines, cut into
        /// arbitrary chunks, decode to exactly N messages in order.
        #[test]
        fn well_formed_lines_survive_interleaved_garbage(
            lanes in proptest::collection::vec(
                prop_oneof![
                    Just("GOOD"),
                    Just(""),
                    Just("   "),
                    Just("not-json"),
                    Just("{\"type\":\"mystery\",\"data\":1}"),
                    Just("[1,2,3]"),
                ],
                0..24,
            ),
            chunk in 1usize..16,
        ) {
            let mut body = String::new();
            let mut expected = 0u64;
            for lane in &lanes {
                if *lane == "GOOD" {
                    body.push_str(&format!("{{\"type\":\"response\",\"data\":{expected}}}\n"));
                    expected += 1;
                } else {
                    body.push_str(lane);
                    body.push('\n');
                }
            }
            let parts: Vec<std::result::Result<Bytes, std::io::Error>> = body
                .as_bytes()
                .chunks(chunk)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let msgs = rt.block_on(collect(MessageStream::new(stream::iter(parts))));
            prop_assert_eq!(msgs.len() as u64, expected);
            for (i, m) in msgs.iter().enumerate() {
                prop_assert_eq!(&m.data, &serde_json::json!(i));
            }
        }
    }
}
