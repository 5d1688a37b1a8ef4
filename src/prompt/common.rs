use chrono::Local;

// Shared text blocks for prompts
pub const JSON_ONLY: &str = r#"
Important instructions for your response:

1. Respond with a single JSON object and nothing else.
2. Do not wrap the JSON in Markdown code fences.
3. Do not narrate, explain or restate these instructions.
4. Use empty arrays for lists you have nothing to put in, never null.
"#;

pub fn current_date() -> String {
    let today = Local::now();
    format!(
        "{} {}, {}",
        today.format("%B"),
        today.format("%-d"),
        today.format("%Y")
    )
}
