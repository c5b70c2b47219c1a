//! SSE（Server-Sent Events）解帧
//!
//! 三家后端的流式接口都是 SSE；这里只做最小解帧：按空行切事件、取 data: 行拼接，
//! 事件类型行（event:）由各适配器从 data JSON 里的 type 字段自行判断。
//! 传输层 chunk 边界与 UTF-8 字符边界无关：原始字节先进尾部缓冲，
//! 只解码完整序列，断在 chunk 间的多字节字符等下一块补齐。

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;

use crate::core::AgentError;

/// OpenAI 风格的流结束哨兵
const DONE_SENTINEL: &str = "[DONE]";

/// 将 reqwest 字节流解为逐条 data 负载；遇到 [DONE] 或底层流结束返回 None
pub struct SseStream {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buf: String,
    /// 未构成完整 UTF-8 序列（或悬空 \r）的尾部字节
    pending: Vec<u8>,
    finished: bool,
}

impl SseStream {
    pub fn new(response: reqwest::Response) -> Self {
        Self::from_stream(Box::pin(response.bytes_stream()))
    }

    fn from_stream(inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>) -> Self {
        Self {
            inner,
            buf: String::new(),
            pending: Vec::new(),
            finished: false,
        }
    }

    /// 下一条 data 负载（已去掉 "data:" 前缀并拼接多行）
    pub async fn next_data(&mut self) -> Result<Option<String>, AgentError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            if let Some(event) = self.pop_event() {
                let data = Self::data_of(&event);
                if data.is_empty() {
                    continue; // 纯注释或 event: 行
                }
                if data == DONE_SENTINEL {
                    self.finished = true;
                    return Ok(None);
                }
                return Ok(Some(data));
            }

            match self.inner.next().await {
                Some(Ok(chunk)) => self.push_bytes(&chunk),
                Some(Err(e)) => {
                    return Err(AgentError::transport(format!("stream read: {e}")));
                }
                None => {
                    self.finished = true;
                    if !self.pending.is_empty() {
                        let tail =
                            String::from_utf8_lossy(&self.pending).replace("\r\n", "\n");
                        self.buf.push_str(&tail);
                        self.pending.clear();
                    }
                    // 残留无空行结尾的尾事件
                    if !self.buf.trim().is_empty() {
                        let event = std::mem::take(&mut self.buf);
                        let data = Self::data_of(&event);
                        if !data.is_empty() && data != DONE_SENTINEL {
                            return Ok(Some(data));
                        }
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// 追加一个传输 chunk：只解码完整的 UTF-8 前缀，余下字节留在尾部缓冲；
    /// 行尾的 \r 同样留待下一块，保证 CRLF 不被 chunk 边界劈开
    fn push_bytes(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        let mut valid = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(e) => e.valid_up_to(),
        };
        if valid > 0 && self.pending[valid - 1] == b'\r' {
            valid -= 1;
        }
        if valid == 0 {
            return;
        }
        let text = String::from_utf8_lossy(&self.pending[..valid]).replace("\r\n", "\n");
        self.buf.push_str(&text);
        self.pending.drain(..valid);
    }

    /// 取出缓冲区中第一个完整事件（以空行分隔）
    fn pop_event(&mut self) -> Option<String> {
        let pos = self.buf.find("\n\n")?;
        let event = self.buf[..pos].to_string();
        self.buf.drain(..pos + 2);
        Some(event)
    }

    /// 拼接事件内所有 data: 行
    fn data_of(event: &str) -> String {
        event
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(|l| l.strip_prefix(' ').unwrap_or(l))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn chunked(chunks: Vec<&'static [u8]>) -> SseStream {
        let items: Vec<reqwest::Result<Bytes>> =
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
        SseStream::from_stream(Box::pin(stream::iter(items)))
    }

    #[test]
    fn test_data_of_single_line() {
        assert_eq!(SseStream::data_of("data: {\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_data_of_with_event_line() {
        let ev = "event: content_block_delta\ndata: {\"type\":\"content_block_delta\"}";
        assert_eq!(SseStream::data_of(ev), "{\"type\":\"content_block_delta\"}");
    }

    #[test]
    fn test_data_of_multiline() {
        assert_eq!(SseStream::data_of("data: a\ndata: b"), "a\nb");
    }

    #[test]
    fn test_data_of_comment_only() {
        assert_eq!(SseStream::data_of(": keep-alive"), "");
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        // "가나" = ea b0 80 / eb 82 98，"나" 被劈在两个 chunk 之间
        let mut s = chunked(vec![b"data: \xea\xb0\x80\xeb", b"\x82\x98\n\n"]);
        assert_eq!(s.next_data().await.unwrap().unwrap(), "\u{ac00}\u{b098}");
        assert!(s.next_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crlf_split_across_chunks() {
        let mut s = chunked(vec![b"data: a\r", b"\ndata: b\r\n\r\n"]);
        assert_eq!(s.next_data().await.unwrap().unwrap(), "a\nb");
        assert!(s.next_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_done_sentinel_ends_stream() {
        let mut s = chunked(vec![b"data: {\"x\":1}\n\ndata: [DONE]\n\ndata: late\n\n"]);
        assert_eq!(s.next_data().await.unwrap().unwrap(), "{\"x\":1}");
        assert!(s.next_data().await.unwrap().is_none());
        assert!(s.next_data().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let mut s = chunked(vec![b"data: tail"]);
        assert_eq!(s.next_data().await.unwrap().unwrap(), "tail");
        assert!(s.next_data().await.unwrap().is_none());
    }
}
