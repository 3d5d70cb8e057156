//! Interactive clarification: questions open in `$EDITOR`, the saved text
//! below the marker line becomes the answer.

use async_trait::async_trait;
use deepdive_core::ClarificationSource;
use deepdive_core::error::ClarificationError;

const ANSWER_MARKER: &str = "# Write your answers below this line.";

pub struct EditorClarifier;

/// Template shown in the editor: questions as comments, then the marker.
pub fn editor_template(questions: &[String]) -> String {
    let mut out = String::from("# Clarifying questions (lines starting with '#' are ignored)\n#\n");
    for (i, q) in questions.iter().enumerate() {
        out.push_str(&format!("# {}. {}\n", i + 1, q));
    }
    out.push_str("#\n");
    out.push_str(ANSWER_MARKER);
    out.push('\n');
    out
}

/// Pull the answer text out of the saved buffer.
pub fn extract_answers(edited: &str) -> String {
    let body = match edited.split_once(ANSWER_MARKER) {
        Some((_, rest)) => rest,
        None => edited,
    };
    body.lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[async_trait]
impl ClarificationSource for EditorClarifier {
    async fn answer(&self, questions: &[String]) -> Result<String, ClarificationError> {
        let template = editor_template(questions);
        let edited = tokio::task::spawn_blocking(move || {
            dialoguer::Editor::new().extension(".md").edit(&template)
        })
        .await
        .map_err(|e| ClarificationError::Editor {
            message: e.to_string(),
        })?
        .map_err(|e| ClarificationError::Editor {
            message: e.to_string(),
        })?;

        // Closing the editor without saving means "no answers".
        Ok(edited.as_deref().map(extract_answers).unwrap_or_default())
    }
}
