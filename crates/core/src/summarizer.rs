//! Rolling conversation summary and session titles.

use crate::{
    llm_client::{ChatMessage, CompletionPurpose, CompletionRequest, LLMClient},
    prompts::{PromptRegistry, PromptRole, render, resolve_prompt},
    session::{Turn, transcript},
};
use anyhow::{Result, bail};
use std::sync::Arc;

/// Compaction starts once more than this many turns are unsummarised.
pub const SUMMARY_TRIGGER: usize = 8;
/// Turns always left verbatim in the prompt window after compaction.
pub const KEEP_RECENT: usize = 3;

const MAX_TITLE_CHARS: usize = 60;

/// Decides whether a session should be compacted.
///
/// Returns the new `summarized_turns` value when more than
/// [`SUMMARY_TRIGGER`] of `total_turns` are outside the summary.
pub fn plan_compaction(total_turns: usize, summarized_turns: usize) -> Option<usize> {
    let summarized = summarized_turns.min(total_turns);
    if total_turns - summarized > SUMMARY_TRIGGER {
        Some(total_turns - KEEP_RECENT)
    } else {
        None
    }
}

pub struct ConversationSummarizer {
    llm: Arc<dyn LLMClient>,
    prompts: Arc<dyn PromptRegistry>,
}

impl ConversationSummarizer {
    pub fn new(llm: Arc<dyn LLMClient>, prompts: Arc<dyn PromptRegistry>) -> Self {
        Self { llm, prompts }
    }

    /// Folds `turns` into `previous`, returning the combined summary.
    pub async fn summarize(&self, previous: Option<&str>, turns: &[Turn]) -> Result<String> {
        let template = resolve_prompt(self.prompts.as_ref(), PromptRole::Summarizer).await;
        let prompt = render(
            &template,
            &[
                ("previous_summary", previous.unwrap_or("None.")),
                ("messages_to_summarize", &transcript(turns)),
            ],
        );
        let request = CompletionRequest::new(CompletionPurpose::Summary, vec![ChatMessage::user(prompt)])
            .temperature(0.3)
            .max_tokens(300);
        let summary = self.llm.complete(request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            bail!("Summarizer returned an empty summary");
        }
        Ok(summary.to_string())
    }

    /// Names a session after its first exchange.
    pub async fn generate_title(&self, student: &str, persona: &str) -> Result<String> {
        let template = resolve_prompt(self.prompts.as_ref(), PromptRole::SessionTitle).await;
        let prompt = render(&template, &[("student", student), ("patient", persona)]);
        let request = CompletionRequest::new(CompletionPurpose::Title, vec![ChatMessage::user(prompt)])
            .temperature(0.5)
            .max_tokens(20);
        clean_title(&self.llm.complete(request).await?)
    }
}

/// First line of the answer, without quotes or trailing punctuation, capped
/// in length.
fn clean_title(raw: &str) -> Result<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or_default();
    let title = line
        .trim_start_matches("Title:")
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '*' | '`'))
        .trim_end_matches(['.', '!'])
        .trim();
    if title.is_empty() {
        bail!("Title generator returned nothing usable");
    }
    Ok(title.chars().take(MAX_TITLE_CHARS).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{llm_client::MockLLMClient, prompts::StaticPromptRegistry};
    use chrono::Utc;

    fn turns(n: u32) -> Vec<Turn> {
        (1..=n)
            .map(|index| Turn {
                index,
                student: format!("question {index}"),
                persona: format!("answer {index}"),
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn test_plan_compaction() {
        assert_eq!(plan_compaction(8, 0), None);
        assert_eq!(plan_compaction(9, 0), Some(6));
        assert_eq!(plan_compaction(14, 6), None);
        assert_eq!(plan_compaction(15, 6), Some(12));
        assert_eq!(plan_compaction(3, 10), None);
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("\"OCD Initial Assessment.\"").unwrap(), "OCD Initial Assessment");
        assert_eq!(clean_title("\nTitle: Hand Washing Concerns\nextra").unwrap(), "Hand Washing Concerns");
        assert!(clean_title("  \"\" ").is_err());
        assert_eq!(clean_title(&"x".repeat(100)).unwrap().len(), MAX_TITLE_CHARS);
    }

    #[tokio::test]
    async fn test_summarize_includes_previous_and_new_turns() {
        let mut llm = MockLLMClient::new();
        llm.expect_complete().times(1).returning(|request| {
            assert_eq!(request.purpose, CompletionPurpose::Summary);
            let prompt = &request.messages[0].content;
            assert!(prompt.contains("Earlier: rituals since 16."));
            assert!(prompt.contains("STUDENT: question 2\nPATIENT: answer 2"));
            Ok("  Combined summary.  ".to_string())
        });
        let summarizer = ConversationSummarizer::new(Arc::new(llm), Arc::new(StaticPromptRegistry::new()));
        let summary = summarizer
            .summarize(Some("Earlier: rituals since 16."), &turns(2))
            .await
            .unwrap();
        assert_eq!(summary, "Combined summary.");
    }

    #[tokio::test]
    async fn test_empty_summary_is_an_error() {
        let mut llm = MockLLMClient::new();
        llm.expect_complete().returning(|_| Ok(String::new()));
        let summarizer = ConversationSummarizer::new(Arc::new(llm), Arc::new(StaticPromptRegistry::new()));
        assert!(summarizer.summarize(None, &turns(1)).await.is_err());
    }
}
