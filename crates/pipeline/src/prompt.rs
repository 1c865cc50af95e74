//! Prompt construction for the generation service.

use sibyl_core::Passage;

/// Build the generation prompt for `question` over `passages`.
///
/// With context, the model is instructed to answer **only** from the
/// supplied passages and to cite them inline by source and chunk id. With
/// no context, a fallback template asks for a general-knowledge answer that
/// discloses the absence of source documents.
pub fn build_prompt(question: &str, passages: &[Passage]) -> String {
    if passages.is_empty() {
        return format!(
            "You are a technical assistant. No supporting context documents were \
             found for the question below. Answer from your general knowledge and \
             state clearly that no source documents were available.\n\n\
             QUESTION: {question}\n\nANSWER:"
        );
    }

    let mut context = String::new();
    for passage in passages {
        context.push_str(&format!(
            "[Source: {}, Chunk: {}]\n{}\n\n",
            passage.source_id, passage.chunk_id, passage.text
        ));
    }

    format!(
        "You are a technical assistant. Answer the question below based only on \
         the context passages provided. Do not use outside knowledge. If the \
         passages do not contain enough information, say so. When you use a \
         passage, cite it inline as [Source: <source_id>, Chunk: <chunk_id>]. \
         Be concise and factual.\n\n\
         --- CONTEXT START ---\n{context}--- CONTEXT END ---\n\n\
         QUESTION: {question}\n\nANSWER:"
    )
}
