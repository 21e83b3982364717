//! Display content extraction for raw trace payloads.

use serde_json::Value;
use traceflow_types::{Content, RawTrace};

/// Extract the human-readable body of a payload.
///
/// Each trace kind keeps its detail in a different place; payloads with
/// nothing displayable return `None`.
pub fn extract_content(trace: &RawTrace) -> Option<Content> {
    let body = trace.family_body()?;
    let at = move |pointer: &str| body.pointer(pointer).filter(|v| !v.is_null());

    if let Some(text) = at("/modelInvocationInput/text").and_then(Value::as_str) {
        return non_empty(text);
    }
    if let Some(content) = at("/modelInvocationOutput/rawResponse/content") {
        return match content {
            Value::String(text) => non_empty(text),
            other => Some(Content::Structured(other.clone())),
        };
    }
    if let Some(kb_input) = at("/invocationInput/knowledgeBaseLookupInput") {
        return match kb_input.get("text").and_then(Value::as_str) {
            Some(text) => non_empty(text),
            None => Some(Content::Text(pretty(kb_input))),
        };
    }
    if let Some(kb_output) = at("/observation/knowledgeBaseLookupOutput") {
        return Some(Content::Text(format_knowledge_base_output(kb_output)));
    }
    if let Some(action_input) = at("/invocationInput/actionGroupInvocationInput") {
        let request = action_input
            .pointer("/requestBody/content/application~1json/0/value")
            .filter(|v| !v.is_null());
        return Some(Content::Text(pretty(request.unwrap_or(action_input))));
    }
    if let Some(action_output) = at("/observation/actionGroupInvocationOutput") {
        return Some(Content::Text(format_action_group_output(action_output)));
    }

    [
        "/rationale/text",
        "/observation/finalResponse/text",
        "/invocationInput/agentCollaboratorInvocationInput/input/text",
        "/observation/agentCollaboratorInvocationOutput/output/text",
    ]
    .iter()
    .find_map(|p| at(p).and_then(Value::as_str))
    .and_then(non_empty)
}

fn non_empty(text: &str) -> Option<Content> {
    (!text.trim().is_empty()).then(|| Content::text(text))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn format_knowledge_base_output(output: &Value) -> String {
    let references = output
        .get("retrievedReferences")
        .and_then(Value::as_array)
        .filter(|refs| !refs.is_empty());

    let Some(references) = references else {
        return format!("### KNOWLEDGE BASE RESPONSE ###\n\n{}", pretty(output));
    };

    let body = references
        .iter()
        .enumerate()
        .map(|(i, reference)| {
            let source = reference
                .get("source")
                .filter(|s| !s.is_null())
                .map(|s| match s.as_str() {
                    Some(text) => format!("Source: {}\n", text),
                    None => format!("Source: {}\n", s),
                })
                .unwrap_or_default();
            let text = reference
                .pointer("/content/text")
                .and_then(Value::as_str)
                .unwrap_or("No content available");
            format!("Reference {}:\n{}{}", i + 1, source, text)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    format!("### KNOWLEDGE BASE RESPONSE ###\n\n{}", body)
}

fn format_action_group_output(output: &Value) -> String {
    let Some(text) = output.get("text").and_then(Value::as_str) else {
        return pretty(output);
    };
    match serde_json::from_str::<Value>(text) {
        Ok(parsed) => match parsed.get("result") {
            Some(result) if has_result_rows(result) => format_result_set(result),
            _ => pretty(&parsed),
        },
        Err(_) => text.to_string(),
    }
}

fn has_result_rows(result: &Value) -> bool {
    result
        .pointer("/ResultSet/Rows")
        .is_some_and(Value::is_array)
}

/// Render a tabular query result as a markdown table.
///
/// The first row carries the column headers.
pub fn format_result_set(result: &Value) -> String {
    let rows = match result.pointer("/ResultSet/Rows").and_then(Value::as_array) {
        Some(rows) if rows.len() >= 2 => rows,
        _ => return pretty(result),
    };

    let cells = |row: &Value| -> Vec<String> {
        row.get("Data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .map(|item| {
                        item.get("VarCharValue")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string()
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let headers = cells(&rows[0]);
    let mut table = String::from("### Query Result\n\n");
    table.push_str(&format!("| {} |\n", headers.join(" | ")));
    table.push_str(&format!(
        "| {} |\n",
        headers.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in &rows[1..] {
        table.push_str(&format!("| {} |\n", cells(row).join(" | ")));
    }

    if let Some(count) = result.get("UpdateCount").filter(|v| !v.is_null()) {
        table.push_str(&format!("\n**Update Count:** {}", count));
    }

    if let Some(columns) = result
        .pointer("/ResultSet/ResultSetMetadata/ColumnInfo")
        .and_then(Value::as_array)
    {
        table.push_str("\n\n### Column Metadata\n\n");
        for column in columns {
            let name = column.get("Name").and_then(Value::as_str).unwrap_or("");
            let kind = column.get("Type").and_then(Value::as_str).unwrap_or("");
            table.push_str(&format!("- **{}** ({})\n", name, kind));
        }
    }

    table
}
