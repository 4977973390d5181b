//! Answer composition: prompt assembly, model invocation, citation
//! mapping.
//!
//! The composer propagates typed errors instead of choosing user-facing
//! fallback text; the query pipeline owns that presentation decision.

use crate::error::Result;
use crate::lazy::Lazy;
use crate::llm::CompletionClient;
use docqa_index::RetrievalResult;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Attribution metadata for one passage that informed the answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceCitation {
    pub text: String,
    pub page_number: Option<String>,
    pub document_url: String,
}

/// The external-facing response shape.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
}

/// Builds a grounding prompt from retrieved passages and asks the
/// language model for an answer.
pub struct AnswerComposer {
    client: Arc<Lazy<dyn CompletionClient>>,
    max_tokens: u32,
    document_url: String,
}

impl AnswerComposer {
    pub fn new(
        client: Arc<Lazy<dyn CompletionClient>>,
        max_tokens: u32,
        document_url: impl Into<String>,
    ) -> Self {
        AnswerComposer {
            client,
            max_tokens,
            document_url: document_url.into(),
        }
    }

    /// Produce an answer grounded in `results` (already deduplicated,
    /// in retrieval-rank order).
    pub async fn compose(&self, query: &str, results: &[RetrievalResult]) -> Result<Answer> {
        let prompt = build_prompt(query, results);
        debug!("Prompting model with {} context passages", results.len());

        let client = self.client.get().await?;
        let raw = client.complete(&prompt, self.max_tokens).await?;
        let answer = format_answer(&raw);

        let sources = results
            .iter()
            .map(|result| SourceCitation {
                text: result.text.clone(),
                page_number: result.page_label.clone(),
                document_url: self.document_url.clone(),
            })
            .collect();

        Ok(Answer { answer, sources })
    }
}

/// Fixed grounding template: context passages space-joined, the query
/// verbatim at the end.
pub fn build_prompt(query: &str, results: &[RetrievalResult]) -> String {
    let context: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
    let context = context.join(" ");
    format!(
        "Use the following pieces of context to answer the question at the end.\n\
         {context}\n\
         Question: {query}"
    )
}

/// Readability pass over the raw completion: each "colon space" becomes
/// "colon newline" so enumerations render as lists.
pub fn format_answer(raw: &str) -> String {
    raw.replace(": ", ":\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QaError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedClient {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionClient for CannedClient {
        async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
            self.prompts.lock().expect("lock").push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct UnavailableClient;

    #[async_trait]
    impl CompletionClient for UnavailableClient {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
            Err(QaError::model_unavailable("connection refused"))
        }
    }

    fn result(text: &str, page: Option<&str>) -> RetrievalResult {
        RetrievalResult {
            text: text.to_string(),
            page_label: page.map(str::to_owned),
            score: 0.5,
        }
    }

    fn composer_with(client: Arc<dyn CompletionClient>) -> AnswerComposer {
        AnswerComposer::new(
            Arc::new(Lazy::ready(client)),
            150,
            "https://example.com/report.pdf",
        )
    }

    #[test]
    fn test_prompt_embeds_context_and_query() {
        let prompt = build_prompt(
            "What was revenue?",
            &[result("Revenue was $100M.", None), result("Growth was 20%.", None)],
        );
        assert!(prompt.starts_with(
            "Use the following pieces of context to answer the question at the end.\n"
        ));
        assert!(prompt.contains("Revenue was $100M. Growth was 20%."));
        assert!(prompt.ends_with("Question: What was revenue?"));
    }

    #[test]
    fn test_prompt_with_no_context_still_asks() {
        let prompt = build_prompt("Anything?", &[]);
        assert!(prompt.contains("Question: Anything?"));
    }

    #[test]
    fn test_format_answer_breaks_after_colons() {
        assert_eq!(
            format_answer("Highlights: revenue up. Risks: churn."),
            "Highlights:\nrevenue up. Risks:\nchurn."
        );
        // A colon without a following space is untouched.
        assert_eq!(format_answer("10:30 meeting"), "10:30 meeting");
    }

    #[tokio::test]
    async fn test_compose_maps_citations_in_rank_order() -> Result<()> {
        let client = Arc::new(CannedClient {
            reply: "Summary: strong quarter".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let composer = composer_with(client.clone());

        let answer = composer
            .compose(
                "How was the quarter?",
                &[result("passage one", Some("2")), result("passage two", None)],
            )
            .await?;

        assert_eq!(answer.answer, "Summary:\nstrong quarter");
        assert_eq!(answer.sources.len(), 2);
        assert_eq!(answer.sources[0].text, "passage one");
        assert_eq!(answer.sources[0].page_number.as_deref(), Some("2"));
        assert_eq!(answer.sources[0].document_url, "https://example.com/report.pdf");
        assert!(answer.sources[1].page_number.is_none());

        let prompts = client.prompts.lock().expect("lock");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("passage one passage two"));
        Ok(())
    }

    #[tokio::test]
    async fn test_compose_propagates_model_unavailable() {
        let composer = composer_with(Arc::new(UnavailableClient));
        let err = composer.compose("query", &[]).await.unwrap_err();
        assert!(err.is_model_unavailable());
    }
}
