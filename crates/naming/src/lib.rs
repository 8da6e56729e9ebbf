//! Naming Engine (C6)
//!
//! For each selected style, asks `generate` once with a style-parameterized
//! prompt, parses candidate filenames, sanitizes them, and caps the total.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use vrenamer_common::{AnalysisReport, NameCandidate, Result, StyleSpec};
use vrenamer_json_extract::parse as parse_json;
use vrenamer_llm_gateway::{GenerateOpts, LlmGateway};
use vrenamer_prompts::PromptStore;

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Debug, Clone)]
pub struct NamingConfig {
    pub candidates_per_style: usize,
    pub total_candidates: usize,
    pub max_length: usize,
    pub illegal_chars_replacement: char,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            candidates_per_style: 1,
            total_candidates: 5,
            max_length: 80,
            illegal_chars_replacement: '_',
        }
    }
}

pub struct NamingEngine {
    gateway: Arc<dyn LlmGateway>,
    prompts: Arc<PromptStore>,
    styles: Vec<StyleSpec>,
    config: NamingConfig,
}

impl NamingEngine {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        prompts: Arc<PromptStore>,
        styles: Vec<StyleSpec>,
        config: NamingConfig,
    ) -> Self {
        Self {
            gateway,
            prompts,
            styles,
            config,
        }
    }

    /// Generate candidates for `style_ids` (or every configured style if
    /// `None`), `per_style` names each (falling back to the configured
    /// default), sanitized and capped to `total_candidates`.
    pub async fn candidates(
        &self,
        report: &AnalysisReport,
        style_ids: Option<&[String]>,
        per_style: Option<usize>,
    ) -> Result<Vec<NameCandidate>> {
        let selected: Vec<&StyleSpec> = self
            .styles
            .iter()
            .filter(|s| style_ids.map_or(true, |ids| ids.contains(&s.id)))
            .collect();

        let n = per_style.unwrap_or(self.config.candidates_per_style);
        let mut all = Vec::new();

        for style in selected {
            let names = self.generate_for_style(report, style, n).await?;
            for name in names {
                if let Some(sanitized) = sanitize(
                    &name,
                    self.config.max_length,
                    self.config.illegal_chars_replacement,
                ) {
                    all.push(NameCandidate {
                        style_id: style.id.clone(),
                        style_label: style.label.clone(),
                        filename: sanitized,
                        language: style.language,
                    });
                }
            }
        }

        all.truncate(self.config.total_candidates);
        Ok(all)
    }

    async fn generate_for_style(
        &self,
        report: &AnalysisReport,
        style: &StyleSpec,
        n: usize,
    ) -> Result<Vec<String>> {
        let mut vars = HashMap::new();
        vars.insert("style_label", style.label.clone());
        vars.insert("examples", style.examples.join(", "));
        vars.insert("analysis", render_report(report));

        let rendered = self.prompts.render(&style.prompt_ref, &vars)?;
        let prompt = format!("{}\n\n{}", rendered.system, rendered.user);

        let text = self
            .gateway
            .generate(
                &prompt,
                GenerateOpts {
                    json: true,
                    temperature: 0.7,
                    max_tokens: 2048,
                },
            )
            .await?;
        debug!(style = %style.id, response_len = text.len(), "naming generate response");

        Ok(parse_names(&text, n))
    }
}

fn render_report(report: &AnalysisReport) -> String {
    report
        .labels
        .iter()
        .map(|(k, v)| format!("{k}: {}", v.join(", ")))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a `generate` response into candidate name strings. Falls back
/// through: `{names: [...]}` object, bare JSON array, markdown-list lines,
/// then any non-empty line — the model does not always honor the
/// requested JSON shape.
fn parse_names(text: &str, n: usize) -> Vec<String> {
    if let Some(value) = parse_json(text) {
        if let Some(names) = value.get("names").and_then(|v| v.as_array()) {
            return names
                .iter()
                .filter_map(|v| v.as_str().map(str::trim).map(str::to_string))
                .filter(|s| !s.is_empty())
                .take(n)
                .collect();
        }
        if let Some(arr) = value.as_array() {
            return arr
                .iter()
                .filter_map(|v| v.as_str().map(str::trim).map(str::to_string))
                .filter(|s| !s.is_empty())
                .take(n)
                .collect();
        }
    }

    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let list_items: Vec<String> = lines
        .iter()
        .filter_map(|line| strip_list_marker(line))
        .collect();
    if !list_items.is_empty() {
        return list_items.into_iter().take(n).collect();
    }

    lines.into_iter().map(str::to_string).take(n).collect()
}

/// Strip a leading `-`, `*`, or `N.`/`N)` list marker, if present.
fn strip_list_marker(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix('-').or_else(|| trimmed.strip_prefix('*')) {
        let rest = rest.trim_start();
        if !rest.is_empty() {
            return Some(rest.to_string());
        }
    }
    let digits_len = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits_len > 0 {
        let rest = &trimmed[digits_len..];
        if let Some(rest) = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')')) {
            let rest = rest.trim_start();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    None
}

/// Replace illegal characters with `replacement`, collapse whitespace runs,
/// truncate, and drop the result if it ends up empty.
fn sanitize(name: &str, max_length: usize, replacement: char) -> Option<String> {
    let replaced: String = name
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) { replacement } else { c })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim();

    let truncated: String = trimmed.chars().take(max_length).collect();
    let result = truncated.trim().to_string();

    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_illegal_chars_and_collapses_whitespace() {
        let raw = "办公室 <诱惑>:/\\|?*   女主角";
        let result = sanitize(raw, 80, '_').unwrap();
        for c in ILLEGAL_CHARS {
            assert!(!result.contains(*c));
        }
        assert!(!result.contains("  "));
        assert!(result.len() <= 80);
    }

    #[test]
    fn sanitize_honors_configured_replacement_char() {
        let result = sanitize("a<b>c", 80, '-').unwrap();
        assert_eq!(result, "a-b-c");
    }

    #[test]
    fn sanitize_drops_empty_after_cleanup() {
        assert!(sanitize("   ", 80, '_').is_none());
        assert!(sanitize("***", 80, '_').is_some()); // '*' isn't whitespace, becomes "___"
    }

    #[test]
    fn sanitize_truncates_to_max_length() {
        let raw = "a".repeat(200);
        let result = sanitize(&raw, 80, '_').unwrap();
        assert!(result.chars().count() <= 80);
    }

    #[test]
    fn parse_names_reads_names_object() {
        let text = r#"{"names": ["Office Seduction", "Another One"]}"#;
        let names = parse_names(text, 5);
        assert_eq!(names, vec!["Office Seduction", "Another One"]);
    }

    #[test]
    fn parse_names_falls_back_to_list_markers() {
        let text = "1. First Name\n2. Second Name\n- Third Name";
        let names = parse_names(text, 5);
        assert_eq!(names, vec!["First Name", "Second Name", "Third Name"]);
    }

    #[test]
    fn parse_names_respects_cap() {
        let text = r#"{"names": ["a", "b", "c"]}"#;
        assert_eq!(parse_names(text, 2), vec!["a", "b"]);
    }
}
