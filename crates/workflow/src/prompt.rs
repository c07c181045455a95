//! Prompt assembly for the answer and clarify steps.

use ragflow_core::{Message, ScoredChunk, Turn};

const ANSWER_INSTRUCTIONS: &str = "\
You are a helpful assistant that answers questions strictly based on the provided context documents.
Do not add information that is not explicitly supported by the context.
When answering, cite the source documents when relevant (e.g., \"Source: docX.md\").
If the context does not contain enough information to fully answer the question,
state this explicitly instead of filling gaps from general knowledge.";

/// Messages for a grounded answer: instructions and context, prior turns,
/// then the question.
pub fn answer_messages(query: &str, context: &[ScoredChunk], history: &[Turn]) -> Vec<Message> {
    let mut system = String::from(ANSWER_INSTRUCTIONS);
    system.push_str("\n\nContext documents:\n");
    for (i, chunk) in context.iter().enumerate() {
        system.push_str(&format!("--- Document {} ({}) ---\n{}\n\n", i + 1, file_name(&chunk.source), chunk.text));
    }
    system.push_str("Use the conversation history to understand the context of follow-up questions.");

    let mut messages = Vec::with_capacity(2 + history.len() * 2);
    messages.push(Message::system(system));
    for turn in history {
        messages.push(Message::user(turn.query.clone()));
        messages.push(Message::assistant(turn.response.clone()));
    }
    messages.push(Message::user(query));
    messages
}

/// Messages asking the generator for a clarification question.
pub fn clarification_messages(query: &str, best_distance: Option<f32>) -> Vec<Message> {
    let system = format!(
        "You are a helpful assistant. The user asked a question, but the available context \
         documents are not highly relevant (distance: {}, lower is better).\n\n\
         Generate a friendly clarification question to help the user refine their query. \
         The question should be specific and guide them to provide more context or rephrase their question.\n\n\
         Original question: {query}",
        format_distance(best_distance)
    );
    vec![Message::system(system)]
}

/// Fill `{query}` and `{distance}` in a clarification template.
pub fn render_template(template: &str, query: &str, best_distance: Option<f32>) -> String {
    template.replace("{distance}", &format_distance(best_distance)).replace("{query}", query)
}

fn format_distance(distance: Option<f32>) -> String {
    distance.map_or_else(|| "n/a".to_string(), |d| format!("{d:.3}"))
}

fn file_name(source: &str) -> &str {
    source.rsplit('/').next().unwrap_or(source)
}
