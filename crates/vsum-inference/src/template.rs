//! Prompt template helpers.

/// Placeholder replaced by the payload texts.
pub const DATA_PLACEHOLDER: &str = "%data%";

/// Substitute every `%data%` in `template` with the texts joined by blank lines.
pub fn render<S: AsRef<str>>(template: &str, texts: &[S]) -> String {
    let data = texts
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join("\n\n");
    template.replace(DATA_PLACEHOLDER, &data)
}

/// Append the detected object labels to a caption prompt.
pub fn add_detected_objects<S: AsRef<str>>(prompt: &str, labels: &[S]) -> String {
    let objects = labels
        .iter()
        .map(|l| l.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{prompt}\n\nDetected objects in these frames: {objects}\n\n")
}

/// Append the transcript lines covering a window to a caption prompt.
pub fn add_audio_transcript(prompt: &str, transcript: &str) -> String {
    format!("{prompt}\n\nAudio transcripts for this chunk of video:\n{transcript}\n\n")
}

/// Append the whole-video transcript to a summary map prompt.
pub fn add_video_transcript(prompt: &str, transcript: &str) -> String {
    format!("{prompt}Audio transcripts for this video:\n{transcript}\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_all_placeholders() {
        let out = render("A:%data%|B:%data%", &["x", "y"]);
        assert_eq!(out, "A:x\n\ny|B:x\n\ny");
    }

    #[test]
    fn test_render_without_placeholder_is_unchanged() {
        assert_eq!(render("static", &["x"]), "static");
    }

    #[test]
    fn test_add_detected_objects() {
        assert_eq!(
            add_detected_objects("Describe.", &["car", "person"]),
            "Describe.\n\nDetected objects in these frames: car, person\n\n"
        );
    }

    #[test]
    fn test_add_audio_transcript() {
        assert_eq!(
            add_audio_transcript("Describe.", "1\n00:00:01,000 --> 00:00:02,000\nhello"),
            "Describe.\n\nAudio transcripts for this chunk of video:\n1\n00:00:01,000 --> 00:00:02,000\nhello\n\n"
        );
    }
}
