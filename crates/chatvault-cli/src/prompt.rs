//! Terminal prompts for conversation annotations.

use chatvault_core::Result;
use chatvault_core::annotate::{Annotation, Annotator};
use chatvault_core::models::Conversation;
use console::{Term, style};

/// Asks the operator for each conversation's external id and flags.
pub struct PromptAnnotator {
    term: Term,
}

impl PromptAnnotator {
    pub fn new(term: Term) -> Self {
        Self { term }
    }

    fn ask(&self, question: &str) -> Result<String> {
        self.term.write_str(question)?;
        Ok(self.term.read_line()?)
    }

    fn ask_yes_no(&self, question: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            let answer = self.ask(&format!("  {question} {hint} "))?;
            match parse_yes_no(&answer, default) {
                Some(value) => return Ok(value),
                None => self
                    .term
                    .write_line(&format!("  {}", style("Please answer y or n").red()))?,
            }
        }
    }
}

impl Annotator for PromptAnnotator {
    fn annotate(&mut self, conversation: &Conversation) -> Result<Annotation> {
        self.term.write_line(&format!(
            "\n{} {}",
            style(&conversation.name).bold(),
            style(format!("({})", conversation.slug)).dim()
        ))?;

        let external_id = loop {
            let answer = self.ask("  External id (digits, empty for none): ")?;
            match parse_external_id(&answer) {
                Ok(id) => break id,
                Err(reason) => self
                    .term
                    .write_line(&format!("  {}", style(reason).red()))?,
            }
        };

        let is_active = self.ask_yes_no("Active?", true)?;
        let (is_member, is_public) = if is_active {
            (
                self.ask_yes_no("Member?", true)?,
                self.ask_yes_no("Public?", true)?,
            )
        } else {
            (false, false)
        };

        Ok(Annotation {
            external_id,
            is_active,
            is_member,
            is_public,
        })
    }
}

fn parse_external_id(answer: &str) -> std::result::Result<Option<i64>, &'static str> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Ok(None);
    }
    if !answer.bytes().all(|b| b.is_ascii_digit()) {
        return Err("Digits only");
    }
    answer.parse().map(Some).map_err(|_| "Number too large")
}

fn parse_yes_no(answer: &str, default: bool) -> Option<bool> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "" => Some(default),
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
