//! Instruction rendering for the downstream model.
//!
//! The base instruction comes from the embedder; accumulated context hints
//! are appended as a clearly separated block so the instruction itself is
//! never rewritten.

use pagecrew_core_types::ContextHints;

/// Append the rendered hints to a base instruction. Empty hints leave the
/// instruction untouched.
pub fn render_instruction(base: &str, hints: &ContextHints) -> String {
    let context = hints.to_prompt_context();
    if context.is_empty() {
        return base.to_owned();
    }
    format!("{base}\n\n## Page context\n\n{context}")
}
