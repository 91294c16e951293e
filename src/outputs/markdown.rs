//! Markdown rendering of workflow results for the terminal or a file.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{ArticleSummary, CorpusSynthesis};
use crate::orchestrator::ItemFailure;
use crate::utils::slugify_title;

fn summary_block(md: &mut String, s: &ArticleSummary) {
    let tag = s
        .source_tag()
        .map(|tag| format!(" <small>`{tag}`</small>"))
        .unwrap_or_default();
    let _ = writeln!(md, "### {}{}\n", s.title, tag);
    if s.url != "#" {
        let _ = writeln!(md, "<{}>\n", s.url);
    }
    if let Some(image) = &s.image_url {
        let _ = writeln!(md, "![]({image})\n");
    }
    let _ = writeln!(md, "{}\n", s.summary.trim());
}

/// Render summaries under `heading`, grouped by the keyword that found them.
///
/// Summaries without a keyword come first, in their original order; keyword
/// groups follow alphabetically with a table of contents.
pub fn summaries_to_markdown(heading: &str, summaries: &[ArticleSummary]) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# {heading}\n");

    let mut ungrouped = Vec::new();
    let mut by_keyword: BTreeMap<&str, Vec<&ArticleSummary>> = BTreeMap::new();
    for s in summaries {
        match s.keyword_source.as_deref() {
            Some(k) => by_keyword.entry(k).or_default().push(s),
            None => ungrouped.push(s),
        }
    }

    if !by_keyword.is_empty() {
        for (keyword, group) in &by_keyword {
            let _ = writeln!(md, "- [{keyword}](#{}) ({})", slugify_title(keyword), group.len());
        }
        md.push('\n');
    }

    for s in ungrouped {
        summary_block(&mut md, s);
    }
    for (keyword, group) in by_keyword {
        let _ = writeln!(md, "## {keyword}\n");
        for s in group {
            summary_block(&mut md, s);
        }
    }
    md
}

pub fn synthesis_to_markdown(synthesis: &CorpusSynthesis) -> String {
    let mut md = String::from("# Synthèse du corpus\n\n");
    let _ = writeln!(md, "{}\n", synthesis.synthesis.trim());
    if !synthesis.sources.is_empty() {
        md.push_str("## Sources\n\n");
        for source in &synthesis.sources {
            let _ = writeln!(md, "- <{source}>");
        }
    }
    md
}

pub fn answer_to_markdown(question: &str, answer: &str) -> String {
    format!("# {}\n\n{}\n", question.trim(), answer.trim())
}

/// A short list of the items that were skipped, or an empty string.
pub fn failures_to_markdown(failures: &[ItemFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let mut md = format!("## Éléments ignorés ({})\n\n", failures.len());
    for f in failures {
        let _ = writeln!(md, "- `{}`: {}", f.label, f.reason);
    }
    md
}
