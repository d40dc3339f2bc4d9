//! Prompt template the adapter was fine-tuned on, and the inverse step that
//! recovers the answer from a decoded completion.

pub const QUESTION_HEADER: &str = "### Soru:";
pub const ANSWER_MARKER: &str = "### Yanıt:";

pub fn build_prompt(question: &str) -> String {
    format!("{QUESTION_HEADER}\n{question}\n\n{ANSWER_MARKER}\n")
}

/// Text after the last answer marker, trimmed. Without a marker the whole
/// decoded text is returned.
pub fn extract_answer(decoded: &str) -> String {
    decoded
        .rsplit(ANSWER_MARKER)
        .next()
        .unwrap_or(decoded)
        .trim()
        .to_string()
}

/// First `max_chars` characters, for log lines.
pub fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_question_between_headers() {
        assert_eq!(
            build_prompt("Miras nasıl paylaşılır?"),
            "### Soru:\nMiras nasıl paylaşılır?\n\n### Yanıt:\n"
        );
    }

    #[test]
    fn answer_follows_the_marker() {
        let decoded = format!("{}Yasal mirasçılar arasında paylaşılır.  ", build_prompt("Q"));
        assert_eq!(extract_answer(&decoded), "Yasal mirasçılar arasında paylaşılır.");
    }

    #[test]
    fn last_marker_wins() {
        let decoded = "### Soru:\nQ\n\n### Yanıt:\nfirst\n### Yanıt:\nsecond";
        assert_eq!(extract_answer(decoded), "second");
    }

    #[test]
    fn missing_marker_keeps_whole_text() {
        assert_eq!(extract_answer("  plain output \n"), "plain output");
    }

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("çğıöşü", 3), "çğı");
        assert_eq!(preview("short", 100), "short");
    }
}
