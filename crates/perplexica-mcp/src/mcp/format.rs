//! Result rendering: the simplified source view and the human-readable
//! (`output_format = "formatted"`) text layout.

use perplexica_core::{FocusMode, Source};
use serde::Serialize;

/// Max characters of source content shown in formatted output.
const PREVIEW_CHARS: usize = 150;

/// Flattened view of a [`Source`] for tool output: `title`/`url` are pulled
/// from the conventional metadata keys and are empty when absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SourceView {
    pub content: String,
    pub title: String,
    pub url: String,
}

pub(crate) fn simplify_sources(sources: &[Source]) -> Vec<SourceView> {
    sources
        .iter()
        .map(|s| SourceView {
            content: s.page_content.clone(),
            title: s.title().unwrap_or("").to_string(),
            url: s.url().unwrap_or("").to_string(),
        })
        .collect()
}

pub(crate) fn search_label(focus: FocusMode) -> &'static str {
    match focus {
        FocusMode::Web => "Web search",
        FocusMode::Academic => "Academic search",
        FocusMode::Writing => "Writing assistant",
        FocusMode::WolframAlpha => "Wolfram Alpha search",
        FocusMode::Youtube => "YouTube search",
        FocusMode::Reddit => "Reddit search",
    }
}

pub(crate) fn render_text(focus: FocusMode, message: &str, sources: &[SourceView]) -> String {
    let mut out = format!("## {} result\n\n{}", search_label(focus), message);
    if sources.is_empty() {
        return out;
    }
    out.push_str("\n\n### Sources\n");
    for (i, s) in sources.iter().enumerate() {
        let title = if s.title.is_empty() { "Untitled" } else { &s.title };
        out.push_str(&format!("\n{}. {}", i + 1, title));
        if !s.url.is_empty() {
            out.push_str(&format!("\n   {}", s.url));
        }
        if !s.content.is_empty() {
            let preview: String = s.content.chars().take(PREVIEW_CHARS).collect();
            let suffix = if s.content.chars().count() > PREVIEW_CHARS {
                "..."
            } else {
                ""
            };
            out.push_str(&format!("\n   {preview}{suffix}"));
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(content: &str, title: Option<&str>, url: Option<&str>) -> Source {
        let mut metadata = std::collections::BTreeMap::new();
        if let Some(t) = title {
            metadata.insert("title".to_string(), serde_json::json!(t));
        }
        if let Some(u) = url {
            metadata.insert("url".to_string(), serde_json::json!(u));
        }
        Source {
            page_content: content.to_string(),
            metadata,
        }
    }

    #[test]
    fn simplify_falls_back_to_empty_strings() {
        let views = simplify_sources(&[source("body", None, None)]);
        assert_eq!(
            views[0],
            SourceView {
                content: "body".into(),
                title: String::new(),
                url: String::new(),
            }
        );
    }

    #[test]
    fn render_without_sources_is_just_the_message() {
        let text = render_text(FocusMode::Web, "Paris", &[]);
        assert_eq!(text, "## Web search result\n\nParis");
    }

    #[test]
    fn render_numbers_sources_and_caps_previews() {
        let long = "x".repeat(200);
        let views = simplify_sources(&[
            source(&long, Some("France"), Some("https://example.org")),
            source("short", None, None),
        ]);
        let text = render_text(FocusMode::Academic, "answer", &views);
        assert!(text.starts_with("## Academic search result"));
        assert!(text.contains("1. France"));
        assert!(text.contains("https://example.org"));
        assert!(text.contains(&format!("{}...", "x".repeat(150))));
        assert!(!text.contains(&"x".repeat(151)));
        assert!(text.contains("2. Untitled"));
        assert!(text.contains("short"));
    }
}
