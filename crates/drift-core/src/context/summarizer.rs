//! Compaction summarizer
//!
//! Builds the prompt for the dedicated summarizer model. The summary must
//! preserve enough state for the agent to continue: the goal, files it
//! created, open todos, failures, and the decisions that got it here.

use crate::ai::types::{Message, Role};

/// System prompt for the summarizer model.
pub const SUMMARIZER_SYSTEM_PROMPT: &str =
    "You are a precise summarizer for an autonomous agent's conversation \
     history. Extract and preserve all actionable information; the agent will \
     continue working from your summary alone.";

const TOOL_RESULT_PREVIEW: usize = 300;

/// Render the messages being dropped into a summarization request.
///
/// The instructions enumerate what must survive compaction; everything else
/// is fair game to discard.
pub fn build_summary_prompt(messages: &[Message]) -> String {
    let mut transcript = String::new();
    for message in messages {
        match message.role {
            Role::System => {
                transcript.push_str(&format!("[SYSTEM]: {}\n\n", message.content));
            }
            Role::User => {
                transcript.push_str(&format!("[USER]: {}\n\n", message.content));
            }
            Role::Assistant => {
                if !message.content.is_empty() {
                    transcript.push_str(&format!("[ASSISTANT]: {}\n\n", message.content));
                }
                for call in &message.tool_calls {
                    transcript.push_str(&format!(
                        "[ASSISTANT]: called tool '{}' with {}\n\n",
                        call.name, call.arguments
                    ));
                }
            }
            Role::Tool => {
                let preview = truncate(&message.content, TOOL_RESULT_PREVIEW);
                transcript.push_str(&format!("[TOOL RESULT]: {preview}\n\n"));
            }
        }
    }

    format!(
        "Summarize the following conversation history, preserving:\n\
         \n\
         1. CURRENT GOAL: what the agent is trying to achieve\n\
         2. FILES CREATED: names and paths of every file created or changed\n\
         3. PENDING TASKS: what still needs to be done\n\
         4. FAILED ATTEMPTS: what did not work and why, to avoid repeating it\n\
         5. KEY DECISIONS: important choices made and their rationale\n\
         6. RECENT PROGRESS: what was just accomplished\n\
         \n\
         Be concise but keep every critical fact, name, and path.\n\
         \n\
         CONVERSATION TO SUMMARIZE:\n{transcript}\n\
         SUMMARY:"
    )
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() > max {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        format!("{}... [truncated]", &text[..cut])
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::types::ToolCall;
    use serde_json::json;

    #[test]
    fn prompt_lists_preservation_items() {
        let prompt = build_summary_prompt(&[Message::user("build a parser")]);
        assert!(prompt.contains("CURRENT GOAL"));
        assert!(prompt.contains("FILES CREATED"));
        assert!(prompt.contains("PENDING TASKS"));
        assert!(prompt.contains("FAILED ATTEMPTS"));
        assert!(prompt.contains("KEY DECISIONS"));
        assert!(prompt.contains("RECENT PROGRESS"));
        assert!(prompt.contains("build a parser"));
    }

    #[test]
    fn tool_calls_rendered_by_name() {
        let msg = Message::assistant_with_calls(
            "",
            vec![ToolCall {
                id: "c1".into(),
                name: "write_file".into(),
                arguments: json!({"path": "notes.md"}),
            }],
        );
        let prompt = build_summary_prompt(&[msg]);
        assert!(prompt.contains("called tool 'write_file'"));
        assert!(prompt.contains("notes.md"));
    }

    #[test]
    fn long_tool_results_truncated() {
        let msg = Message::tool_result("c1", "x".repeat(1000));
        let prompt = build_summary_prompt(&[msg]);
        assert!(prompt.contains("[truncated]"));
    }
}
