//! Instruction template combining retrieved ticket history with the user's question.

use std::fmt;

/// Rendered instruction sent to the generation backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt(String);

impl Prompt {
    /// Prompt text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the prompt, returning the text.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Renders the helpdesk prompt. `history` is embedded verbatim between `---` lines even when
/// empty; the template tells the model to fall back to generic troubleshooting in that case.
pub fn build_prompt(history: &str, query: &str) -> Prompt {
    let mut prompt = String::with_capacity(history.len() + query.len() + 512);
    prompt.push_str("You are an expert IT helpdesk agent.\n\n");
    prompt.push_str("The following is a historical helpdesk ticket conversation:\n");
    prompt.push_str("---\n");
    prompt.push_str(history);
    prompt.push_str("\n---\n\n");
    prompt.push_str(&format!("A user now asks: \"{query}\"\n\n"));
    prompt.push_str(
        "Based on the above, summarize the issue and resolution (if applicable), then write a \
         helpful and friendly support reply for the user. If the history is not directly \
         relevant, still provide a best-effort, step-by-step IT troubleshooting answer.\n",
    );
    Prompt(prompt)
}
