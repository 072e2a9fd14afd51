use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// Lower-cases `text` and strips diacritical marks (NFD decomposition with
/// combining marks removed). Every other character, whitespace included, is
/// preserved.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect()
}
