use common::storage::document_uri::DocumentUri;

use crate::SearchRequest;

/// Search input for one document: what to ask and how to restrict it to that document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    pub source_uri: String,
    /// File name without extension or upload date prefix.
    pub display_name: String,
    pub main_topic: String,
    pub scope: Option<String>,
    pub query: String,
    pub filter: Option<String>,
}

impl QueryContext {
    /// `known_locations` lists other URIs the same content was indexed under; the filter
    /// accepts any of them.
    pub fn for_document(
        uri: &DocumentUri,
        scope: Option<&str>,
        filter_field: &str,
        known_locations: &[String],
    ) -> Self {
        let display_name = strip_upload_date(uri.display_name()).to_string();
        let main_topic = main_topic(&display_name);
        let scope = scope
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let readable_name = display_name.replace('_', " ");
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(scope) = scope.as_deref() {
            parts.push(scope);
        }
        parts.push(&main_topic);
        if readable_name != main_topic {
            parts.push(&readable_name);
        }
        let query = parts.join(" ");

        let source_uri = uri.to_string();
        let mut locations = vec![source_uri.as_str()];
        for location in known_locations {
            if !locations.contains(&location.as_str()) {
                locations.push(location.as_str());
            }
        }
        let filter = (!filter_field.trim().is_empty())
            .then(|| filter_expression(filter_field.trim(), &locations));

        Self {
            source_uri,
            display_name,
            main_topic,
            scope,
            query,
            filter,
        }
    }

    pub fn search_request(&self, top_k: usize) -> SearchRequest {
        SearchRequest {
            query: self.query.clone(),
            filter: self.filter.clone(),
            top_k,
        }
    }
}

/// Drops a leading `YYYY-MM-DD_` added at upload time.
pub fn strip_upload_date(name: &str) -> &str {
    let bytes = name.as_bytes();
    let is_dated = bytes.len() > 11
        && bytes.get(10) == Some(&b'_')
        && bytes.iter().take(10).enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });

    if is_dated {
        name.get(11..).unwrap_or(name)
    } else {
        name
    }
}

/// Topic named after a `Kapitel…` segment of an underscore-separated name, or the whole name.
pub fn main_topic(display_name: &str) -> String {
    let parts: Vec<&str> = display_name.split('_').collect();
    parts
        .iter()
        .position(|part| part.starts_with("Kapitel"))
        .and_then(|idx| parts.get(idx + 1))
        .filter(|topic| !topic.is_empty())
        .map_or_else(|| display_name.to_string(), |topic| (*topic).to_string())
}

fn filter_expression(field: &str, values: &[&str]) -> String {
    let quoted: Vec<String> = values
        .iter()
        .map(|value| {
            let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        })
        .collect();
    format!("{field}: ANY({})", quoted.join(", "))
}
