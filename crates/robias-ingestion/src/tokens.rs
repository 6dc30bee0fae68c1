//! Local token estimation.
//! Used for pre-call logging only; accounting uses API-reported usage.

/// Rough token estimation: words / 0.75 (BPE averages ~1.3 tokens/word).
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    ((words as f32) / 0.75).ceil() as usize
}
