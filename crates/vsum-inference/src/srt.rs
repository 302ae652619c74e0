//! SubRip (SRT) transcript parsing.

use std::sync::OnceLock;

use regex::{Captures, Regex};

use vsum_models::TranscriptLine;

use crate::error::{InferenceError, InferenceResult};

fn timing_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d{1,2}):(\d{2}):(\d{2})[,.](\d{1,3})",
        )
        .expect("valid SRT timing pattern")
    })
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid tag pattern"))
}

/// Timestamp parsed from one side of a timing line.
struct Timestamp {
    text: String,
    seconds: f64,
}

fn timestamp(caps: &Captures<'_>, offset: usize) -> Timestamp {
    let field = |i: usize| caps.get(offset + i).map(|m| m.as_str()).unwrap_or("0");
    let hours: u64 = field(0).parse().unwrap_or(0);
    let minutes: u64 = field(1).parse().unwrap_or(0);
    let secs: u64 = field(2).parse().unwrap_or(0);
    // "5" means 500ms, not 5ms
    let millis: u64 = format!("{:0<3}", field(3)).parse().unwrap_or(0);

    Timestamp {
        text: format!("{:02}:{:02}:{:02},{:03}", hours, minutes, secs, millis),
        seconds: (hours * 3600 + minutes * 60 + secs) as f64 + millis as f64 / 1000.0,
    }
}

struct Cue {
    id: String,
    start: Timestamp,
    end: Timestamp,
    text: Vec<String>,
}

impl Cue {
    fn into_line(self) -> TranscriptLine {
        TranscriptLine {
            id: self.id,
            start_time: self.start.text,
            end_time: self.end.text,
            start_seconds: self.start.seconds,
            end_seconds: self.end.seconds,
            text: self.text.join("\n"),
        }
    }
}

/// Parse SRT content into time-coded lines.
///
/// Formatting tags are stripped. Empty content yields no lines; non-empty
/// content without a single timing line is rejected.
pub fn parse_srt(content: &str) -> InferenceResult<Vec<TranscriptLine>> {
    let mut lines = Vec::new();
    let mut current: Option<Cue> = None;
    let mut pending_id: Option<String> = None;

    for raw in content.trim_start_matches('\u{feff}').lines() {
        let line = tag_pattern().replace_all(raw.trim(), "").trim().to_string();

        if line.is_empty() {
            if let Some(cue) = current.take() {
                lines.push(cue.into_line());
            }
            pending_id = None;
            continue;
        }

        if let Some(caps) = timing_pattern().captures(&line) {
            if let Some(cue) = current.take() {
                lines.push(cue.into_line());
            }
            let id = pending_id
                .take()
                .unwrap_or_else(|| (lines.len() + 1).to_string());
            current = Some(Cue {
                id,
                start: timestamp(&caps, 1),
                end: timestamp(&caps, 5),
                text: Vec::new(),
            });
            continue;
        }

        match current.as_mut() {
            Some(cue) => cue.text.push(line),
            None => pending_id = Some(line),
        }
    }

    if let Some(cue) = current.take() {
        lines.push(cue.into_line());
    }

    if lines.is_empty() && !content.trim().is_empty() {
        return Err(InferenceError::InvalidTranscript(
            "no subtitle timing lines found".to_string(),
        ));
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "1\n00:00:01,000 --> 00:00:04,500\nA car pulls in.\n\n2\n00:00:05,250 --> 00:01:02,000\nThe driver <i>waves</i>.\nSomeone answers.\n";

    #[test]
    fn test_parse_basic_cues() {
        let lines = parse_srt(SAMPLE).unwrap();
        assert_eq!(lines.len(), 2);

        assert_eq!(lines[0].id, "1");
        assert_eq!(lines[0].start_time, "00:00:01,000");
        assert_eq!(lines[0].end_seconds, 4.5);
        assert_eq!(lines[0].text, "A car pulls in.");

        assert_eq!(lines[1].start_seconds, 5.25);
        assert_eq!(lines[1].end_seconds, 62.0);
        assert_eq!(lines[1].text, "The driver waves.\nSomeone answers.");
    }

    #[test]
    fn test_parse_crlf_and_bom() {
        let content = "\u{feff}7\r\n00:00:00,000 --> 00:00:01,000\r\nhello\r\n\r\n";
        let lines = parse_srt(content).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].id, "7");
        assert_eq!(lines[0].text, "hello");
    }

    #[test]
    fn test_missing_ids_are_numbered() {
        let content = "00:00:00.5 --> 00:00:01.000\nfirst\n00:00:02,000 --> 00:00:03,000\nsecond";
        let lines = parse_srt(content).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].id, "1");
        assert_eq!(lines[0].start_seconds, 0.5);
        assert_eq!(lines[1].id, "2");
    }

    #[test]
    fn test_empty_and_invalid_content() {
        assert!(parse_srt("").unwrap().is_empty());
        assert!(matches!(
            parse_srt("just some text"),
            Err(InferenceError::InvalidTranscript(_))
        ));
    }
}
