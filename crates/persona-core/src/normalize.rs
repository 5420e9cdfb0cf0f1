//! Job-title normalization.
//!
//! Every comparison in the classifier happens on normalized strings:
//! keywords are normalized when the catalog is loaded, titles are
//! normalized on classification. The transform is pure, total, and
//! idempotent — `normalize(normalize(x)) == normalize(x)`.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Normalize a raw job title for exact-match comparison.
///
/// Applies, in one pass over the NFD decomposition:
/// 1. Diacritic stripping (combining marks are dropped, so "Dirección"
///    folds to "direccion").
/// 2. Lowercasing.
/// 3. Punctuation and whitespace runs collapse to a single space
///    ("VP, Sales / Marketing" → "vp sales marketing").
/// 4. Leading/trailing trim.
///
/// Empty or blank input yields the empty string; the function never fails.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for ch in raw.nfd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            // Punctuation and whitespace both act as separators.
            pending_space = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases() {
        assert_eq!(normalize("CEO"), "ceo");
        assert_eq!(normalize("Director General"), "director general");
    }

    #[test]
    fn test_strips_diacritics() {
        assert_eq!(normalize("Dirección Médica"), "direccion medica");
        assert_eq!(normalize("DIRECCION MEDICA"), "direccion medica");
        assert_eq!(normalize("Ingeniería"), "ingenieria");
        assert_eq!(normalize("Zürich Café"), "zurich cafe");
    }

    #[test]
    fn test_accent_and_case_insensitive_equivalence() {
        assert_eq!(normalize("Dirección Médica"), normalize("DIRECCION MEDICA"));
        assert_eq!(normalize("résumé"), normalize("RESUME"));
    }

    #[test]
    fn test_removes_punctuation() {
        assert_eq!(normalize("VP, Sales / Marketing"), "vp sales marketing");
        assert_eq!(normalize("C.E.O."), "c e o");
        assert_eq!(normalize("Director de Marketing (Interim)"), "director de marketing interim");
    }

    #[test]
    fn test_collapses_whitespace() {
        assert_eq!(normalize("  Director   de\tMarketing  "), "director de marketing");
        assert_eq!(normalize("a \u{00a0} b"), "a b");
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
        assert_eq!(normalize("-- / --"), "");
    }

    #[test]
    fn test_idempotent() {
        for raw in ["Dirección Médica", "  VP, Sales ", "ÜBER-Führung", "", "c.e.o"] {
            let once = normalize(raw);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", raw);
        }
    }

    #[test]
    fn test_preserves_digits() {
        assert_eq!(normalize("Engineer II (L4)"), "engineer ii l4");
    }
}
