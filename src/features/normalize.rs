/// Text normalization applied to feature documents before vectorization.

use std::sync::LazyLock;

use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};

/// Bracketed annotations such as "[Written by MAL Rewrite]". Does not span lines.
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*?\]").expect("bracket pattern is valid"));

static STEMMER: LazyLock<Stemmer> = LazyLock::new(|| Stemmer::create(Algorithm::English));

/// Normalize free text into a stemmed, lower-case, single-spaced token string.
///
/// Steps: lower-case, strip `[...]` annotations, collapse whitespace runs
/// (newlines included), stem every token to a fixed point, rejoin with
/// single spaces. Empty input yields an empty string, and normalizing the
/// output again changes nothing.
pub fn normalize(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let lowered = text.to_lowercase();
    let stripped = BRACKETED.replace_all(&lowered, "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    // A pair split across lines only matches once the lines are joined
    let collapsed = BRACKETED.replace_all(&collapsed, "");
    collapsed
        .split_whitespace()
        .map(stem_fully)
        .collect::<Vec<_>>()
        .join(" ")
}

/// A single Snowball pass can leave a stemmable word ("universities" gives
/// "univers", which stems again to "univ"). Repeat until the stem is stable.
/// Stemming never lengthens a word, so this stops.
fn stem_fully(word: &str) -> String {
    let mut current = word.to_string();
    loop {
        let next = STEMMER.stem(&current);
        if next == current.as_str() {
            return current;
        }
        current = next.into_owned();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\t "), "");
    }

    #[test]
    fn test_stems_to_root() {
        assert_eq!(normalize("Romantic"), "romant");
        assert_eq!(normalize("Romantic Comedy School"), "romant comedi school");
    }

    #[test]
    fn test_strips_bracketed_annotations() {
        assert_eq!(normalize("a girl [Written by MAL Rewrite] fight"), "a girl fight");
    }

    #[test]
    fn test_collapses_whitespace_and_newlines() {
        assert_eq!(normalize("ninja\n\n   girl\tfight"), "ninja girl fight");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize("Romantic Comedy  School [source: MAL]\nDrama");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_bracket_pair_across_lines_is_stable() {
        let once = normalize("ninja [first line\nsecond line] girl");
        assert_eq!(once, "ninja girl");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_restems_until_stable() {
        let once = normalize("Universities agreed");
        assert_eq!(once, "univ agr");
        assert_eq!(normalize(&once), once);
    }

    #[test]
    fn test_normalization_is_idempotent_on_synopsis_text() {
        let synopsis = "After the demon king is defeated, the elf mage outlives her party. \
            The universities agreed that generational conflicts were inevitable; \
            sorcerers fight cursed spirits [Written by MAL Rewrite]";
        let once = normalize(synopsis);
        let twice = normalize(&once);
        let diffs: Vec<(&str, &str)> = once
            .split(' ')
            .zip(twice.split(' '))
            .filter(|(a, b)| a != b)
            .collect();
        assert!(diffs.is_empty(), "re-normalizing changed tokens: {:?}", diffs);
        assert_eq!(twice, once);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let text = "Fighting spirits return to the academy";
        assert_eq!(normalize(text), normalize(text));
    }
}
