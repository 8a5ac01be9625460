//! Untrusted script text and its pre-execution normalization.

use std::fmt;

/// Program substituted for styled-heatmap scripts.
pub const CANONICAL_HEATMAP: &str = "result = df.corr().plot(kind='imshow', cmap='coolwarm')";

/// Untrusted source text describing a data transformation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeUnit(String);

impl CodeUnit {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    /// Wrap text produced by a code generator, removing Markdown fences,
    /// a language tag on the opening fence, and stray backticks.
    pub fn from_generated(text: &str) -> Self {
        Self(strip_code_fences(text))
    }

    pub fn source(&self) -> &str {
        &self.0
    }

    pub fn into_source(self) -> String {
        self.0
    }

    /// Whether the script asks for a heatmap through table cell styling.
    ///
    /// A plain keyword match on the lowercased source.
    pub fn wants_styled_heatmap(&self) -> bool {
        let lowered = self.0.to_lowercase();
        lowered.contains("style")
            && (lowered.contains("background_gradient") || lowered.contains("highlight"))
    }

    /// Apply the styled-heatmap rewrite, returning a new unit.
    ///
    /// When triggered the whole body is replaced by [`CANONICAL_HEATMAP`].
    pub fn normalized(&self) -> CodeUnit {
        if self.wants_styled_heatmap() {
            tracing::debug!("rewriting styled heatmap request to canonical heatmap program");
            CodeUnit::new(CANONICAL_HEATMAP)
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CodeUnit {
    fn from(source: &str) -> Self {
        Self::new(source)
    }
}

impl From<String> for CodeUnit {
    fn from(source: String) -> Self {
        Self(source)
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let body = match trimmed.strip_prefix("```") {
        Some(rest) => {
            // Drop the language tag line, then everything from the closing fence on.
            let rest = match rest.find('\n') {
                Some(newline) if is_language_tag(&rest[..newline]) => &rest[newline + 1..],
                _ => rest,
            };
            match rest.find("```") {
                Some(end) => &rest[..end],
                None => rest,
            }
        }
        None => trimmed,
    };
    body.trim().trim_matches('`').trim().to_string()
}

fn is_language_tag(line: &str) -> bool {
    let tag = line.trim();
    tag.is_empty() || tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '+')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_background_gradient() {
        let code = CodeUnit::new("result = df.corr().style.background_gradient(cmap='coolwarm')");
        assert!(code.wants_styled_heatmap());
        assert_eq!(code.normalized().source(), CANONICAL_HEATMAP);
    }

    #[test]
    fn test_detects_highlight_case_insensitively() {
        let code = CodeUnit::new("result = df.Style.HIGHLIGHT_max()");
        assert!(code.wants_styled_heatmap());
    }

    #[test]
    fn test_plain_code_is_untouched() {
        let code = CodeUnit::new("result = df.groupby('region')['sales'].sum()");
        assert!(!code.wants_styled_heatmap());
        assert_eq!(code.normalized(), code);
    }

    #[test]
    fn test_style_alone_is_not_rewritten() {
        let code = CodeUnit::new("result = df.style");
        assert!(!code.wants_styled_heatmap());
    }

    #[test]
    fn test_strip_fenced_block_with_tag() {
        let code = CodeUnit::from_generated("```python\nresult = len(df)\n```\n");
        assert_eq!(code.source(), "result = len(df)");
    }

    #[test]
    fn test_strip_fenced_block_without_tag() {
        let code = CodeUnit::from_generated("```\nresult = df.head()\n```");
        assert_eq!(code.source(), "result = df.head()");
    }

    #[test]
    fn test_strip_keeps_identifiers_starting_with_py() {
        let code = CodeUnit::from_generated("pyramid = 3\nresult = pyramid");
        assert_eq!(code.source(), "pyramid = 3\nresult = pyramid");
    }

    #[test]
    fn test_strip_stray_backticks() {
        let code = CodeUnit::from_generated("`result = 1`");
        assert_eq!(code.source(), "result = 1");
    }
}
