//! Spin syntax: `{a|b|c}` picks one alternative uniformly at random.

use rand::seq::IndexedRandom;
use rand::Rng;

/// Expands every well-formed group in `text` using the thread RNG.
pub fn spin(text: &str) -> String {
    spin_with(text, &mut rand::rng())
}

/// Repeatedly resolves the innermost-last group: the last `{` and the first `}`
/// after it. Stops at the first `{` with no closing brace, leaving the rest of
/// the text untouched.
pub fn spin_with<R: Rng + ?Sized>(text: &str, rng: &mut R) -> String {
    let mut out = text.to_string();
    while let Some(start) = out.rfind('{') {
        let Some(offset) = out[start..].find('}') else {
            break;
        };
        let end = start + offset;
        let options: Vec<&str> = out[start + 1..end].split('|').collect();
        let choice = options.choose(rng).copied().unwrap_or_default().to_string();
        out.replace_range(start..=end, &choice);
    }
    out
}
