//! Conversational Q&A workflow.
//!
//! A fixed four-stage pipeline with no branching and no loops:
//! retrieve context → reason and answer → validate sources → record the
//! conversation step. Each stage appends one human-readable line to a
//! cumulative reasoning trace returned to the caller alongside the answer,
//! confidence, sources, and total processing time.
//!
//! Failures never abort the workflow: retrieval degrades to empty context,
//! and an LLM failure becomes the answer text itself — visible to the
//! caller rather than silently substituted.

use std::sync::Arc;
use std::time::Instant;

use crate::llm::LlmClient;
use crate::models::{ConversationTurn, RetrievalResult};
use crate::retrieval::RetrievalEngine;

/// Prompt history window: the most recent turns included verbatim.
const PROMPT_HISTORY_TURNS: usize = 3;

/// Final product of one Q&A workflow run.
#[derive(Debug, Clone)]
pub struct QaOutcome {
    pub answer: String,
    pub sources: Vec<RetrievalResult>,
    /// Mean of per-source vector scores, clamped to [0, 1]; 0 without
    /// sources.
    pub confidence: f32,
    pub reasoning_steps: Vec<String>,
    pub processing_time_secs: f64,
    pub session_id: String,
}

pub struct ConversationOrchestrator {
    retrieval: Arc<RetrievalEngine>,
    llm: Arc<dyn LlmClient>,
    max_context_length: usize,
}

impl ConversationOrchestrator {
    pub fn new(
        retrieval: Arc<RetrievalEngine>,
        llm: Arc<dyn LlmClient>,
        max_context_length: usize,
    ) -> Self {
        Self {
            retrieval,
            llm,
            max_context_length,
        }
    }

    /// Run the four-stage workflow for one query.
    pub async fn process_query(
        &self,
        query: &str,
        session_id: &str,
        history: &[ConversationTurn],
    ) -> QaOutcome {
        let started = Instant::now();
        let mut reasoning_steps = Vec::new();

        // Stage 1: retrieve context.
        let context = self
            .retrieval
            .get_context(query, history, self.max_context_length)
            .await;
        reasoning_steps.push(format!(
            "Retrieved {} relevant document chunks ({} characters)",
            context.sources.len(),
            context.context_length
        ));

        // Stage 2: reason and answer.
        let prompt = build_prompt(query, &context.context, history);
        let answer = match self.llm.complete(&prompt, &[]).await {
            Ok(text) => {
                reasoning_steps.push(format!(
                    "Generated answer using LLM reasoning ({} characters)",
                    text.len()
                ));
                text
            }
            Err(e) => {
                tracing::error!(error = %e, "answer generation failed");
                reasoning_steps.push(format!("Error in reasoning: {e}"));
                format!("Error generating answer: {e}")
            }
        };

        // Stage 3: validate sources.
        let confidence = confidence_from_sources(&context.sources);
        if context.sources.is_empty() {
            reasoning_steps.push("No sources available for validation".to_string());
        } else {
            reasoning_steps.push(format!(
                "Validated answer against {} sources (confidence: {confidence:.2})",
                context.sources.len()
            ));
        }

        // Stage 4: record the conversation step. Persisting the turn is the
        // caller's responsibility.
        reasoning_steps.push(format!(
            "Updated conversation history for session {session_id}"
        ));

        QaOutcome {
            answer,
            sources: context.sources,
            confidence,
            reasoning_steps,
            processing_time_secs: started.elapsed().as_secs_f64(),
            session_id: session_id.to_string(),
        }
    }
}

/// Mean of per-source vector scores, clamped to [0, 1]. Zero without
/// sources.
fn confidence_from_sources(sources: &[RetrievalResult]) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }
    let mean = sources.iter().map(|s| s.score).sum::<f32>() / sources.len() as f32;
    mean.clamp(0.0, 1.0)
}

/// Prompt for the answering step: recent history, assembled context, and
/// the current question.
fn build_prompt(query: &str, context: &str, history: &[ConversationTurn]) -> String {
    let mut history_text = String::new();
    for turn in history.iter().rev().take(PROMPT_HISTORY_TURNS).rev() {
        history_text.push_str(turn.role.as_str());
        history_text.push_str(": ");
        history_text.push_str(&turn.content);
        history_text.push('\n');
    }

    format!(
        "You are a helpful assistant that answers questions based on provided document context.\n\
         \n\
         Previous conversation:\n\
         {history_text}\n\
         Document Context:\n\
         {context}\n\
         \n\
         Current Question: {query}\n\
         \n\
         Please provide a comprehensive answer based on the context. If the context doesn't \
         contain enough information to answer the question, say so clearly.\n\
         \n\
         Answer:"
    )
}
