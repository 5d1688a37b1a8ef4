use crate::db::Article;

/// Maximum characters of the snippet that go into the embedding text
pub const MAX_SNIPPET_CHARS: usize = 500;
/// Maximum characters of the full content that go into the embedding text
pub const MAX_CONTENT_CHARS: usize = 1000;

/// Truncate on a character boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Builds the single string an article is embedded from: title, truncated snippet,
/// truncated content, then the country and topic tags, joined by `" | "`.
pub fn prepare_article_text(
    title: &str,
    snippet: Option<&str>,
    content: Option<&str>,
    countries: &[String],
    topics: &[String],
) -> String {
    let mut parts: Vec<String> = vec![title.trim().to_string()];

    if let Some(snippet) = snippet.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(truncate_chars(snippet, MAX_SNIPPET_CHARS).to_string());
    }

    if let Some(content) = content.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(truncate_chars(content, MAX_CONTENT_CHARS).to_string());
    }

    if !countries.is_empty() {
        parts.push(format!("Countries: {}", countries.join(", ")));
    }

    if !topics.is_empty() {
        parts.push(format!("Topics: {}", topics.join(", ")));
    }

    parts.join(" | ")
}

/// Convenience wrapper over [`prepare_article_text`] for a stored article
pub fn article_text(article: &Article) -> String {
    prepare_article_text(
        &article.title,
        article.snippet.as_deref(),
        article.full_content.as_deref(),
        &article.countries,
        &article.topics,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_article_text_parts() {
        let text = prepare_article_text(
            "Ceasefire talks resume",
            Some("Delegations met in Doha"),
            None,
            &["Qatar".to_string(), "Israel".to_string()],
            &["diplomacy".to_string()],
        );
        assert_eq!(
            text,
            "Ceasefire talks resume | Delegations met in Doha | Countries: Qatar, Israel | Topics: diplomacy"
        );

        let bare = prepare_article_text("Title only", Some("  "), Some(""), &[], &[]);
        assert_eq!(bare, "Title only");
    }

    #[test]
    fn test_truncation_limits() {
        let snippet = "s".repeat(800);
        let content = "c".repeat(3000);
        let text = prepare_article_text("T", Some(&snippet), Some(&content), &[], &[]);
        let parts: Vec<&str> = text.split(" | ").collect();
        assert_eq!(parts[1].len(), MAX_SNIPPET_CHARS);
        assert_eq!(parts[2].len(), MAX_CONTENT_CHARS);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "ñandú ñandú";
        assert_eq!(truncate_chars(text, 3), "ñan");
        assert_eq!(truncate_chars(text, 100), text);
    }
}
