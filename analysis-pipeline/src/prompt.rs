use common::utils::config::SectionMarkers;
use retrieval_pipeline::{scoring::sort_by_score_desc, Passage, QueryContext};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a study assistant for university course material. \
Work only with the passages you are given and do not invent content that is not supported by them. \
Write in the language of the passages. \
Structure every answer with exactly three markdown sections: a short prose summary, \
a bullet list of the main topics, and a bullet list of concrete learning objectives.";

const TRUNCATION_MARK: &str = " […]";

/// Size limits for the passage block of the prompt, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptBudget {
    pub max_context_chars: usize,
    /// A passage that does not fit is still included, shortened, if at least this much room is left.
    pub min_passage_chars: usize,
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            max_context_chars: 24_000,
            min_passage_chars: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// Passages that made it into the prompt, highest score first.
    pub included: Vec<Passage>,
}

pub fn build_prompt(
    system_prompt: &str,
    target: &QueryContext,
    passages: &[Passage],
    budget: &PromptBudget,
    markers: &SectionMarkers,
) -> Prompt {
    let mut ordered = passages.to_vec();
    sort_by_score_desc(&mut ordered);

    let mut remaining = budget.max_context_chars;
    let mut included = Vec::new();
    let mut blocks = Vec::new();

    for passage in ordered {
        let header = passage_header(&passage);
        let header_len = header.chars().count() + 1;
        let text_len = passage.text.chars().count();

        if header_len + text_len <= remaining {
            remaining -= header_len + text_len;
            blocks.push(format!("{header}\n{}", passage.text));
            included.push(passage);
            continue;
        }

        let room = remaining.saturating_sub(header_len + TRUNCATION_MARK.chars().count());
        if room >= budget.min_passage_chars || included.is_empty() {
            let shortened: String = passage.text.chars().take(room).collect();
            blocks.push(format!("{header}\n{}{TRUNCATION_MARK}", shortened.trim_end()));
            included.push(passage);
        }
        break;
    }

    let mut user = String::new();
    user.push_str(&format!("Document: {}\n", target.display_name));
    user.push_str(&format!("Main topic: {}\n", target.main_topic));
    user.push_str(&format!("Source: {}\n", target.source_uri));
    if let Some(scope) = &target.scope {
        user.push_str(&format!("Focus: {scope}\n"));
    }
    user.push('\n');
    user.push_str("Analyse the document using the passages below. Answer with these sections, in this order:\n");
    user.push_str(&section_outline(markers));
    user.push_str("\nPassages:\n\n");
    user.push_str(&blocks.join("\n\n"));

    Prompt {
        system: system_prompt.to_string(),
        user,
        included,
    }
}

/// Extra formatting instruction for the `attempt`-th retry after unparseable output.
pub fn stricter_instruction(attempt: u32, markers: &SectionMarkers) -> String {
    let mut instruction = format!(
        "Your previous answer could not be read. Reply again using exactly these markdown headings:\n{}\
         List every topic and learning objective as its own line starting with \"- \".",
        section_outline(markers)
    );
    if attempt >= 2 {
        instruction.push_str(
            " Do not write anything before the first heading or after the last list item. \
             Do not use code fences, tables or JSON. The summary must not be empty and \
             there must be at least one topic.",
        );
    }
    instruction
}

fn section_outline(markers: &SectionMarkers) -> String {
    [
        canonical(&markers.summary, "Summary"),
        canonical(&markers.topics, "Topics"),
        canonical(&markers.learning_objectives, "Learning Objectives"),
    ]
    .iter()
    .map(|heading| format!("## {heading}\n"))
    .collect()
}

fn canonical<'a>(aliases: &'a [String], fallback: &'a str) -> &'a str {
    aliases.first().map_or(fallback, String::as_str)
}

fn passage_header(passage: &Passage) -> String {
    match passage.page {
        Some(page) => format!("[{}] (page {page})", passage.passage_id),
        None => format!("[{}]", passage.passage_id),
    }
}
