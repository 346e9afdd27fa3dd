//! Cleanup of generated README text before it reaches the browser.

use std::sync::LazyLock;

use regex::Regex;

/// A single-line `<tag ...>...</tag>` block at the very start of the text.
static LEADING_TAG_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A\s*<[^>]+>.*?</[^>]+>\s*").unwrap());

static MARKDOWN_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s+.+$").unwrap());

/// Strip model preamble from a generated README.
///
/// Removes one leading tagged block, then, if the text still does not start
/// with `#`, drops everything before the first top-level Markdown heading.
/// Text without any heading is returned as-is.
pub fn clean_readme_content(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let cleaned = LEADING_TAG_BLOCK.replace(raw, "");
    if cleaned.trim_start().starts_with('#') {
        return cleaned.into_owned();
    }

    match MARKDOWN_HEADING.find(&cleaned) {
        Some(heading) => cleaned[heading.start()..].to_string(),
        None => cleaned.into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stays_empty() {
        assert_eq!(clean_readme_content(""), "");
    }

    #[test]
    fn test_clean_readme_is_untouched() {
        let readme = "# Project\n\nSome text.\n";
        assert_eq!(clean_readme_content(readme), readme);
    }

    #[test]
    fn test_strips_leading_style_block() {
        let raw = "<userStyle>Normal</userStyle>\n# Project\n\nBody\n";
        assert_eq!(clean_readme_content(raw), "# Project\n\nBody\n");
    }

    #[test]
    fn test_only_first_tag_block_is_removed() {
        let raw = "<a>x</a>\n<b>y</b>\n# Title\n";
        // second block is preamble, so the heading search removes it
        assert_eq!(clean_readme_content(raw), "# Title\n");
    }

    #[test]
    fn test_drops_preamble_before_first_heading() {
        let raw = "Here is the README you asked for:\n\n# Project\n## Usage\n";
        assert_eq!(clean_readme_content(raw), "# Project\n## Usage\n");
    }

    #[test]
    fn test_subheading_does_not_count_as_first_heading() {
        let raw = "Intro\n## Usage\n# Project\n";
        assert_eq!(clean_readme_content(raw), "# Project\n");
    }

    #[test]
    fn test_no_heading_returns_text_unchanged() {
        let raw = "Just some prose.\nNo headings.";
        assert_eq!(clean_readme_content(raw), raw);
    }

    #[test]
    fn test_tags_later_in_document_are_kept() {
        let raw = "# Project\n<details>x</details>\n";
        assert_eq!(clean_readme_content(raw), raw);
    }
}
