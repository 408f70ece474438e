//! Turns free-form model output into an [`AnalysisResult`].
//!
//! JSON answers are taken as is. Anything else is split on section headings (markdown `#`
//! headings, `**Label:**` or plain `Label:` lines) matched case-insensitively against the
//! configured aliases. When markers are missing the first prose paragraph stands in for the
//! summary and loose bullet lines for the topics.

use common::utils::config::SectionMarkers;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{AnalysisResult, CompletionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Topics,
    Objectives,
    Other,
}

enum Heading {
    Known(Section, Option<String>),
    Other(String),
}

/// Parses with the default English and German section names.
pub fn parse(raw: &str) -> (AnalysisResult, bool) {
    parse_with_markers(raw, &SectionMarkers::default())
}

/// `ok` is true when both summary and topics could be extracted.
pub fn parse_with_markers(raw: &str, markers: &SectionMarkers) -> (AnalysisResult, bool) {
    let body = strip_code_fences(raw);
    let mut result = parse_json(body).unwrap_or_else(|| parse_sections(body, markers));
    let ok = result.has_required_fields();
    result.status = if ok {
        CompletionStatus::Complete
    } else {
        CompletionStatus::Partial
    };
    (result, ok)
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.split_once('\n') {
        Some((_info, body)) => body,
        None => rest,
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

#[derive(Deserialize)]
struct JsonAnswer {
    #[serde(default, alias = "zusammenfassung")]
    summary: Option<Value>,
    #[serde(default, alias = "themes", alias = "key_topics")]
    topics: Vec<Value>,
    #[serde(
        default,
        alias = "learningObjectives",
        alias = "objectives",
        alias = "lernziele"
    )]
    learning_objectives: Vec<Value>,
}

fn parse_json(body: &str) -> Option<AnalysisResult> {
    if !body.starts_with('{') {
        return None;
    }
    let answer: JsonAnswer = serde_json::from_str(body).ok()?;

    Some(AnalysisResult {
        summary: answer
            .summary
            .as_ref()
            .map(value_text)
            .unwrap_or_default(),
        topics: json_items(&answer.topics),
        learning_objectives: json_items(&answer.learning_objectives),
        ..AnalysisResult::default()
    })
}

fn json_items(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(value_text)
        .filter(|item| !item.is_empty())
        .collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        Value::Object(map) => {
            let title = ["title", "name", "topic", "text"]
                .iter()
                .find_map(|key| map.get(*key).and_then(Value::as_str))
                .unwrap_or_default()
                .trim();
            let description = map
                .get("description")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            match (title.is_empty(), description.is_empty()) {
                (false, false) => format!("{title}: {description}"),
                (false, true) => title.to_string(),
                (true, false) => description.to_string(),
                (true, true) => String::new(),
            }
        }
        other => other.to_string(),
    }
}

#[derive(Default)]
struct Collected {
    saw_summary: bool,
    saw_topics: bool,
    summary: Vec<String>,
    topics: Vec<String>,
    objectives: Vec<String>,
    loose_prose: Vec<String>,
    loose_bullets: Vec<String>,
    paragraph_open: bool,
}

impl Collected {
    fn push_paragraph_line(target: &mut Vec<String>, open: &mut bool, line: &str) {
        match target.last_mut() {
            Some(last) if *open => {
                last.push(' ');
                last.push_str(line);
            }
            _ => target.push(line.to_string()),
        }
        *open = true;
    }

    fn push(&mut self, section: Option<Section>, line: &str) {
        match section {
            Some(Section::Summary) => {
                let text = clean_item(bullet_text(line).unwrap_or(line));
                Self::push_paragraph_line(&mut self.summary, &mut self.paragraph_open, &text);
            }
            Some(Section::Topics) => push_item(&mut self.topics, line),
            Some(Section::Objectives) => push_item(&mut self.objectives, line),
            Some(Section::Other) | None => match bullet_text(line) {
                Some(item) => push_item(&mut self.loose_bullets, item),
                None => {
                    let text = clean_item(line);
                    Self::push_paragraph_line(&mut self.loose_prose, &mut self.paragraph_open, &text);
                }
            },
        }
    }
}

fn push_item(items: &mut Vec<String>, line: &str) {
    let item = clean_item(bullet_text(line).unwrap_or(line));
    if !item.is_empty() {
        items.push(item);
    }
}

fn parse_sections(body: &str, markers: &SectionMarkers) -> AnalysisResult {
    let mut collected = Collected::default();
    let mut current: Option<Section> = None;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            collected.paragraph_open = false;
            continue;
        }

        match match_heading(trimmed, markers) {
            Some(Heading::Known(section, inline)) => {
                current = Some(section);
                collected.paragraph_open = false;
                match section {
                    Section::Summary => collected.saw_summary = true,
                    Section::Topics => collected.saw_topics = true,
                    Section::Objectives | Section::Other => {}
                }
                if let Some(inline) = inline {
                    collected.push(current, &inline);
                }
            }
            Some(Heading::Other(text)) => match current {
                Some(Section::Topics) => push_item(&mut collected.topics, &text),
                Some(Section::Objectives) => push_item(&mut collected.objectives, &text),
                _ => {
                    current = Some(Section::Other);
                    collected.paragraph_open = false;
                }
            },
            None => collected.push(current, trimmed),
        }
    }

    let summary = if collected.saw_summary {
        collected.summary.join("\n\n")
    } else {
        collected.loose_prose.into_iter().next().unwrap_or_default()
    };
    let topics = if collected.saw_topics {
        collected.topics
    } else {
        collected.loose_bullets
    };

    AnalysisResult {
        summary: summary.trim().to_string(),
        topics,
        learning_objectives: collected.objectives,
        ..AnalysisResult::default()
    }
}

fn match_heading(line: &str, markers: &SectionMarkers) -> Option<Heading> {
    let is_markdown = line.starts_with('#');
    let text = line.trim_start_matches('#').trim_end_matches('#').trim();
    if text.is_empty() {
        return None;
    }
    let numbered = starts_numbered(text);
    if bullet_text(text).is_some() && !is_markdown && !numbered {
        return None;
    }

    let unnumbered = strip_numbering(text);
    let (label, inline) = match unnumbered.split_once(':') {
        Some((label, rest)) => (label, Some(rest)),
        None => (unnumbered, None),
    };
    let label = strip_emphasis(label);

    if let Some(section) = lookup_section(&label, markers) {
        let inline = inline
            .map(strip_emphasis)
            .filter(|rest| !rest.is_empty());
        // A numbered line with text after the label is a list item, not a heading.
        if numbered && !is_markdown && inline.is_some() {
            return None;
        }
        return Some(Heading::Known(section, inline));
    }

    is_markdown.then(|| Heading::Other(strip_emphasis(text)))
}

fn lookup_section(label: &str, markers: &SectionMarkers) -> Option<Section> {
    let wanted = label.trim().to_lowercase();
    if wanted.is_empty() {
        return None;
    }
    let matches = |aliases: &[String]| aliases.iter().any(|a| a.trim().to_lowercase() == wanted);

    if matches(&markers.summary) {
        Some(Section::Summary)
    } else if matches(&markers.topics) {
        Some(Section::Topics)
    } else if matches(&markers.learning_objectives) {
        Some(Section::Objectives)
    } else {
        None
    }
}

const BULLET_PREFIXES: &[&str] = &["- ", "* ", "• ", "+ ", "– "];

fn bullet_text(line: &str) -> Option<&str> {
    if let Some(rest) = BULLET_PREFIXES
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
    {
        return Some(rest.trim());
    }
    numbered_text(line)
}

fn numbered_text(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    let rest = line.get(digits..)?;
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .map(str::trim)
}

fn starts_numbered(line: &str) -> bool {
    numbered_text(line).is_some()
}

fn strip_numbering(text: &str) -> &str {
    numbered_text(text).unwrap_or(text)
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "").replace("__", "").trim().to_string()
}

fn clean_item(text: &str) -> String {
    strip_emphasis(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_markdown_sections() {
        let raw = "## Summary\nBWS covers how firms work.\nIt introduces markets.\n\n## Topics\n- Unternehmen\n- Märkte\n\n## Learning Objectives\n1. Explain firm goals\n2. Describe market forms\n";

        let (result, ok) = parse(raw);

        assert!(ok);
        assert_eq!(result.status, CompletionStatus::Complete);
        assert_eq!(
            result.summary,
            "BWS covers how firms work. It introduces markets."
        );
        assert_eq!(result.topics, vec!["Unternehmen", "Märkte"]);
        assert_eq!(
            result.learning_objectives,
            vec!["Explain firm goals", "Describe market forms"]
        );
    }

    #[test]
    fn parses_german_bold_labels_with_inline_content() {
        let raw = "**Zusammenfassung:** Das Skript behandelt Marktformen.\n\n**Thematische Übersicht:**\n1) Monopol\n2) Oligopol\n\n**Lernziele:**\n• Marktformen unterscheiden";

        let (result, ok) = parse(raw);

        assert!(ok);
        assert_eq!(result.summary, "Das Skript behandelt Marktformen.");
        assert_eq!(result.topics, vec!["Monopol", "Oligopol"]);
        assert_eq!(result.learning_objectives, vec!["Marktformen unterscheiden"]);
    }

    #[test]
    fn accepts_fenced_json() {
        let raw = "```json\n{\"summary\": \"Kurz\", \"topics\": [\"Preis\", {\"title\": \"Nachfrage\", \"description\": \"Kurve\"}], \"learning_objectives\": [\"Preise erklären\"]}\n```";

        let (result, ok) = parse(raw);

        assert!(ok);
        assert_eq!(result.summary, "Kurz");
        assert_eq!(result.topics, vec!["Preis", "Nachfrage: Kurve"]);
        assert_eq!(result.learning_objectives, vec!["Preise erklären"]);
    }

    #[test]
    fn headings_are_case_insensitive_and_may_be_numbered() {
        let raw = "# 1. SUMMARY\nText.\n# 2. topics\n* A\n  * A.1\n* B";

        let (result, ok) = parse(raw);

        assert!(ok);
        assert_eq!(result.topics, vec!["A", "A.1", "B"]);
    }

    #[test]
    fn numbered_items_naming_a_section_stay_items() {
        let raw = "## Summary\nS.\n## Topics\n- A\n## Learning Objectives\n1. Summary: review chapter 3\n2. Topics: list the market forms\n3. Lernziele";

        let (result, ok) = parse(raw);

        assert!(ok);
        assert_eq!(result.topics, vec!["A"]);
        assert_eq!(
            result.learning_objectives,
            vec!["Summary: review chapter 3", "Topics: list the market forms"]
        );
    }

    #[test]
    fn falls_back_to_first_paragraph_and_loose_bullets() {
        let raw = "This script introduces accounting.\n\nSecond paragraph.\n\n- Bilanz\n- GuV\n\nLearning Objectives:\n- Read a balance sheet";

        let (result, ok) = parse(raw);

        assert!(ok);
        assert_eq!(result.summary, "This script introduces accounting.");
        assert_eq!(result.topics, vec!["Bilanz", "GuV"]);
        assert_eq!(result.learning_objectives, vec!["Read a balance sheet"]);
    }

    #[test]
    fn objectives_are_not_mistaken_for_topics() {
        let raw = "Overview text without a heading.\n\nLernziele:\n- Kosten berechnen";

        let (result, ok) = parse(raw);

        assert!(!ok);
        assert_eq!(result.status, CompletionStatus::Partial);
        assert!(result.topics.is_empty());
        assert_eq!(result.learning_objectives, vec!["Kosten berechnen"]);
    }

    #[test]
    fn unknown_subheadings_inside_topics_become_items() {
        let raw = "## Summary\nS.\n## Topics\n### Angebot\n### Nachfrage\n## Learning Objectives\n- L";

        let (result, ok) = parse(raw);

        assert!(ok);
        assert_eq!(result.topics, vec!["Angebot", "Nachfrage"]);
    }

    #[test]
    fn refusal_is_not_ok() {
        let (result, ok) = parse("I am unable to analyse this document.");

        assert!(!ok);
        assert_eq!(result.summary, "I am unable to analyse this document.");
        assert!(result.topics.is_empty());
    }

    #[test]
    fn empty_output_is_not_ok() {
        let (result, ok) = parse("   ");
        assert!(!ok);
        assert_eq!(result.filled_sections(), 0);
    }

    #[test]
    fn honours_custom_markers() {
        let markers = SectionMarkers {
            summary: vec!["Abstract".into()],
            topics: vec!["Inhalte".into()],
            learning_objectives: vec!["Ziele".into()],
        };
        let raw = "Abstract: Kurz.\nInhalte:\n- X\nZiele:\n- Y";

        let (result, ok) = parse_with_markers(raw, &markers);

        assert!(ok);
        assert_eq!(result.summary, "Kurz.");
        assert_eq!(result.topics, vec!["X"]);
        assert_eq!(result.learning_objectives, vec!["Y"]);
    }
}
