//! Prompt generation for mapping suggestions.

use serde_json::{json, Value};

/// Suggestions requested per call.
pub const SUGGESTION_COUNT: usize = 3;

pub fn system_prompt() -> String {
    "You are an expert data engineer helping users map spreadsheet columns onto a target schema. \
     You generate clean JSON mapping suggestions. No markdown, no commentary."
        .to_string()
}

/// User prompt listing the source columns and, when known, the project.
pub fn user_prompt(columns: &[String], project: Option<&Value>) -> String {
    let columns_json = serde_json::to_string_pretty(columns).unwrap_or_else(|_| "[]".to_string());

    let project_section = match project.and_then(|p| p.get("name")).and_then(Value::as_str) {
        Some(name) => format!("\nProject: {}\n", name),
        None => String::new(),
    };

    format!(
        r#"Source columns:
{columns_json}
{project_section}
Suggest exactly {count} target field mappings.
Each item must contain:
- name: the target field name
- suggestedTransformation: how to derive it from the source columns
- justification: why this mapping makes sense

Return ONLY valid JSON in this format:
{{
  "suggestions": [
    {{
      "name": "",
      "suggestedTransformation": "",
      "justification": ""
    }}
  ]
}}"#,
        columns_json = columns_json,
        project_section = project_section,
        count = SUGGESTION_COUNT,
    )
}

/// Messages array for the Anthropic messages API.
pub fn build_messages(columns: &[String], project: Option<&Value>) -> Vec<Value> {
    vec![json!({
        "role": "user",
        "content": user_prompt(columns, project)
    })]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_lists_columns() {
        let prompt = user_prompt(&["Base".to_string(), "Desc".to_string()], None);
        assert!(prompt.contains("\"Base\""));
        assert!(prompt.contains("\"suggestions\""));
        assert!(!prompt.contains("Project:"));
    }

    #[test]
    fn test_prompt_names_project() {
        let project = json!({ "id": "p1", "name": "Plant spares" });
        let messages = build_messages(&["Base".to_string()], Some(&project));
        assert_eq!(messages.len(), 1);
        assert!(messages[0]["content"].as_str().unwrap().contains("Project: Plant spares"));
    }
}
