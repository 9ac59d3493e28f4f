use crate::models::{now_timestamp, LogLevel, LogRecord, StreamKind};
use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};

/// 单行超过该长度仍未遇到换行时直接作为一条记录输出
const MAX_PENDING_LINE: usize = 1024 * 1024;

/// 一行输出的分类结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    Structured {
        level: LogLevel,
        message: String,
        timestamp: Option<String>,
        extra: Map<String, Value>,
    },
    Plain {
        text: String,
    },
}

/// 判断一行是否为带 level + message 的 JSON 日志；其余情况全部按普通文本处理
pub fn classify_line(line: &str) -> ParsedLine {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return ParsedLine::Plain {
            text: line.to_string(),
        };
    }

    let mut object = match serde_json::from_str::<Map<String, Value>>(trimmed) {
        Ok(object) => object,
        Err(_) => {
            return ParsedLine::Plain {
                text: line.to_string(),
            }
        }
    };

    if !object.contains_key("level") || !object.contains_key("message") {
        return ParsedLine::Plain {
            text: line.to_string(),
        };
    }

    let level = match object.remove("level") {
        Some(Value::String(raw)) => LogLevel::from_external(&raw),
        _ => LogLevel::Info,
    };
    let message = match object.remove("message") {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let timestamp = match object.remove("timestamp") {
        Some(Value::String(raw)) if is_well_formed_timestamp(&raw) => Some(raw),
        // 格式不对的时间戳保留在附加字段里，不丢信息
        Some(other) => {
            object.insert("timestamp".to_string(), other);
            None
        }
        None => None,
    };

    ParsedLine::Structured {
        level,
        message,
        timestamp,
        extra: object,
    }
}

fn is_well_formed_timestamp(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

fn to_record(line: &str, stream: StreamKind) -> LogRecord {
    match classify_line(line) {
        ParsedLine::Structured {
            level,
            message,
            timestamp,
            extra,
        } => LogRecord {
            level,
            message,
            timestamp: timestamp.unwrap_or_else(now_timestamp),
            source: stream,
            extra,
        },
        ParsedLine::Plain { text } => LogRecord::plain(stream, text),
    }
}

/// 把一段输出按行拆分成日志记录，空行丢弃，顺序与输入一致。
///
/// `stream` 决定非结构化行的默认级别（stdout → info，stderr → error）；
/// 结构化行自带的 level 始终优先。
pub fn parse_chunk(raw: &str, stream: StreamKind) -> Vec<LogRecord> {
    raw.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .map(|line| to_record(line, stream))
        .collect()
}

/// 按流维护跨 chunk 的半行缓冲
#[derive(Debug)]
pub struct LineDecoder {
    stream: StreamKind,
    pending: Vec<u8>,
}

impl LineDecoder {
    pub fn new(stream: StreamKind) -> Self {
        Self {
            stream,
            pending: Vec::new(),
        }
    }

    /// 追加一段原始字节，返回其中所有完整行对应的记录
    pub fn push(&mut self, bytes: &[u8]) -> Vec<LogRecord> {
        self.pending.extend_from_slice(bytes);

        let complete = match self.pending.iter().rposition(|b| *b == b'\n') {
            Some(idx) => {
                let rest = self.pending.split_off(idx + 1);
                std::mem::replace(&mut self.pending, rest)
            }
            None if self.pending.len() >= MAX_PENDING_LINE => std::mem::take(&mut self.pending),
            None => return Vec::new(),
        };

        parse_chunk(&String::from_utf8_lossy(&complete), self.stream)
    }

    /// 流结束时输出最后一个没有换行结尾的行
    pub fn finish(mut self) -> Vec<LogRecord> {
        let rest = std::mem::take(&mut self.pending);
        parse_chunk(&String::from_utf8_lossy(&rest), self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_and_plain_lines_in_one_chunk() {
        let records = parse_chunk(
            "{\"level\":\"INFO\",\"message\":\"Loaded 10 rows\"}\nplain text line\n",
            StreamKind::Stdout,
        );

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, LogLevel::Info);
        assert_eq!(records[0].message, "Loaded 10 rows");
        assert_eq!(records[1].level, LogLevel::Info);
        assert_eq!(records[1].message, "plain text line");
        assert!(records.iter().all(|r| r.source == StreamKind::Stdout));
    }

    #[test]
    fn structured_level_wins_over_stream_default() {
        let records = parse_chunk(
            "{\"level\":\"success\",\"message\":\"Pipeline completed in 3.20s\"}\nTraceback (most recent call last):\n",
            StreamKind::Stderr,
        );

        assert_eq!(records[0].level, LogLevel::Success);
        assert_eq!(records[1].level, LogLevel::Error);
        assert_eq!(records[1].message, "Traceback (most recent call last):");
    }

    #[test]
    fn keeps_source_timestamp_and_extra_fields() {
        let line = r#"{"timestamp":"2025-10-25T10:30:00.123Z","level":"warning","category":"job","message":"[extract] orders skipped","stage":"extract","job":"orders"}"#;
        let records = parse_chunk(line, StreamKind::Stdout);

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.timestamp, "2025-10-25T10:30:00.123Z");
        assert_eq!(record.level, LogLevel::Warning);
        assert_eq!(record.extra["stage"], "extract");
        assert_eq!(record.extra["job"], "orders");
        assert_eq!(record.extra["category"], "job");
        assert!(!record.extra.contains_key("level"));
        assert!(!record.extra.contains_key("message"));
    }

    #[test]
    fn naive_iso_timestamp_is_accepted() {
        let line = r#"{"level":"info","message":"x","timestamp":"2025-10-25T10:30:00.123456"}"#;
        let record = &parse_chunk(line, StreamKind::Stdout)[0];
        assert_eq!(record.timestamp, "2025-10-25T10:30:00.123456");
    }

    #[test]
    fn malformed_timestamp_falls_back_to_parse_time() {
        let line = r#"{"level":"info","message":"x","timestamp":"yesterday"}"#;
        let record = &parse_chunk(line, StreamKind::Stdout)[0];
        assert_ne!(record.timestamp, "yesterday");
        assert!(DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
        assert_eq!(record.extra["timestamp"], "yesterday");
    }

    #[test]
    fn json_without_required_fields_is_plain() {
        let records = parse_chunk(
            "{\"message\":\"no level here\"}\n{\"level\":\"error\"}\n{broken json\n",
            StreamKind::Stdout,
        );

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.level == LogLevel::Info));
        assert_eq!(records[0].message, "{\"message\":\"no level here\"}");
        assert_eq!(records[2].message, "{broken json");
    }

    #[test]
    fn blank_lines_and_carriage_returns_are_dropped() {
        let records = parse_chunk("first\r\n\r\n   \n\tsecond\n", StreamKind::Stdout);
        let messages: Vec<_> = records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "\tsecond"]);
    }

    #[test]
    fn non_string_message_is_rendered() {
        let record = &parse_chunk(r#"{"level":"INFO","message":42}"#, StreamKind::Stdout)[0];
        assert_eq!(record.message, "42");
    }

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let mut decoder = LineDecoder::new(StreamKind::Stdout);

        let first = decoder.push(b"one\n{\"level\":\"ERR");
        let second = decoder.push(b"OR\",\"message\":\"boom\"}\nthree");
        let tail = decoder.finish();

        let messages: Vec<_> = first
            .iter()
            .chain(second.iter())
            .chain(tail.iter())
            .map(|r| (r.message.as_str(), r.level))
            .collect();
        assert_eq!(
            messages,
            vec![
                ("one", LogLevel::Info),
                ("boom", LogLevel::Error),
                ("three", LogLevel::Info),
            ]
        );
    }

    #[test]
    fn decoder_preserves_order_chunk_by_chunk() {
        let chunks = ["a\nb\n", "c\n", "d\ne\n"];
        let mut decoder = LineDecoder::new(StreamKind::Stderr);

        let mut streamed = Vec::new();
        for chunk in chunks {
            streamed.extend(decoder.push(chunk.as_bytes()));
        }
        streamed.extend(decoder.finish());

        let expected: Vec<String> = chunks
            .iter()
            .flat_map(|chunk| parse_chunk(chunk, StreamKind::Stderr))
            .map(|r| r.message)
            .collect();
        let actual: Vec<String> = streamed.into_iter().map(|r| r.message).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn decoder_survives_invalid_utf8() {
        let mut decoder = LineDecoder::new(StreamKind::Stdout);
        let records = decoder.push(b"bad \xff byte\nnext\n");
        assert_eq!(records.len(), 2);
        assert!(records[0].message.starts_with("bad "));
        assert_eq!(records[1].message, "next");
    }

    #[test]
    fn decoder_flushes_oversized_line() {
        let mut decoder = LineDecoder::new(StreamKind::Stdout);
        let big = vec![b'x'; MAX_PENDING_LINE];
        let records = decoder.push(&big);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message.len(), MAX_PENDING_LINE);
        assert!(decoder.finish().is_empty());
    }
}
