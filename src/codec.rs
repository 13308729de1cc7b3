//! JSON body codec.
//!
//! Single values decode from the whole body; sequences decode from
//! newline-delimited JSON, one element per line, as chunks arrive.

use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Failure;
use crate::http::ResponseBody;

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, Failure> {
        serde_json::to_vec(value).map(Bytes::from).map_err(Failure::decoded)
    }

    /// Decode a whole body. An empty body decodes as JSON `null`, so
    /// `Option<T>` and `()` accept it.
    pub fn decode<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, Failure> {
        let body = if body.iter().all(u8::is_ascii_whitespace) {
            &b"null"[..]
        } else {
            body
        };
        serde_json::from_slice(body).map_err(Failure::decoded)
    }

    /// Decode a newline-delimited JSON body lazily. Blank lines are skipped.
    pub fn decode_lines<T>(&self, body: ResponseBody) -> BoxStream<'static, Result<T, Failure>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        struct Lines {
            chunks: BoxStream<'static, Result<Bytes, Failure>>,
            buffer: BytesMut,
            finished: bool,
        }

        fn next_line(buffer: &mut BytesMut) -> Option<Bytes> {
            let end = buffer.iter().position(|b| *b == b'\n')?;
            let line = buffer.split_to(end + 1).freeze();
            Some(line.slice(..end))
        }

        let initial = Lines {
            chunks: body.into_stream(),
            buffer: BytesMut::new(),
            finished: false,
        };

        stream::unfold(initial, |mut lines| async move {
            loop {
                if let Some(line) = next_line(&mut lines.buffer) {
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    let item = serde_json::from_slice::<T>(&line).map_err(Failure::decoded);
                    return Some((item, lines));
                }
                if lines.finished {
                    if !lines.buffer.has_remaining() || lines.buffer.iter().all(u8::is_ascii_whitespace) {
                        return None;
                    }
                    let rest = lines.buffer.split().freeze();
                    let item = serde_json::from_slice::<T>(&rest).map_err(Failure::decoded);
                    return Some((item, lines));
                }
                match lines.chunks.next().await {
                    Some(Ok(chunk)) => lines.buffer.extend_from_slice(&chunk),
                    Some(Err(failure)) => {
                        lines.finished = true;
                        lines.buffer.clear();
                        return Some((Err(failure), lines));
                    }
                    None => lines.finished = true,
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Event {
        id: u32,
    }

    fn chunked(parts: Vec<Result<&'static str, Failure>>) -> ResponseBody {
        let items = parts
            .into_iter()
            .map(|p| p.map(|s| Bytes::from_static(s.as_bytes())))
            .collect::<Vec<_>>();
        ResponseBody::from_stream(stream::iter(items).boxed())
    }

    #[test]
    fn empty_body_decodes_as_null() {
        let value: Option<Event> = JsonCodec.decode(b"").unwrap();
        assert_eq!(value, None);
        assert!(JsonCodec.decode::<Event>(b"").is_err());
    }

    #[tokio::test]
    async fn lines_split_across_chunks() {
        let body = chunked(vec![Ok("{\"id\":1}\n{\"i"), Ok("d\":2}\n\n"), Ok("{\"id\":3}")]);
        let events: Vec<Event> = JsonCodec
            .decode_lines(body)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(events, vec![Event { id: 1 }, Event { id: 2 }, Event { id: 3 }]);
    }

    #[tokio::test]
    async fn read_error_ends_sequence() {
        let body = chunked(vec![
            Ok("{\"id\":1}\n{\"id\""),
            Err(Failure::transport(TransportErrorKind::Io, "reset")),
            Ok("{\"id\":9}\n"),
        ]);
        let items: Vec<Result<Event, Failure>> = JsonCodec.decode_lines(body).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(Failure::Transport { .. })));
    }
}
