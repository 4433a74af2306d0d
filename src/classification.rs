//! Security classification normalization.
//!
//! Maps free-text classification strings onto the canonical four-level scale
//! (`UNCLASSIFIED`, `CONFIDENTIAL`, `SECRET`, `TOP SECRET`), optionally
//! suffixed with an uppercased caveat (`//NOFORN`, `//FOUO`, ...). Inputs that
//! cannot be recognized fall back to `UNCLASSIFIED` with a warning — a missing
//! or garbled marking must never abort ingestion.
//!
//! `normalize` is idempotent: every output is a fixed point.

pub const UNCLASSIFIED: &str = "UNCLASSIFIED";
pub const CONFIDENTIAL: &str = "CONFIDENTIAL";
pub const SECRET: &str = "SECRET";
pub const TOP_SECRET: &str = "TOP SECRET";

/// Map a base marking (any case/whitespace variant) to its canonical form.
fn canonical_base(raw: &str) -> Option<&'static str> {
    let compact = raw.trim().to_ascii_lowercase();
    match compact.as_str() {
        "u" | "unclas" | "unclass" | "unclassified" => Some(UNCLASSIFIED),
        "c" | "conf" | "confidential" => Some(CONFIDENTIAL),
        "s" | "secret" => Some(SECRET),
        "ts" | "topsecret" | "top secret" | "top-secret" => Some(TOP_SECRET),
        _ => None,
    }
}

/// Expand a single caveat token. Unknown caveats pass through uppercased.
fn expand_caveat_token(raw: &str) -> String {
    let token = raw.trim().to_ascii_uppercase();
    match token.as_str() {
        "NF" => "NOFORN".to_string(),
        "OC" => "ORCON".to_string(),
        "PR" => "PROPIN".to_string(),
        _ => token,
    }
}

/// Expand a caveat string. Compound caveats keep their `/` separators with
/// each segment expanded individually (`NF/OC` → `NOFORN/ORCON`).
fn expand_caveat(raw: &str) -> String {
    raw.split('/')
        .filter(|s| !s.trim().is_empty())
        .map(expand_caveat_token)
        .collect::<Vec<_>>()
        .join("/")
}

/// Normalize a free-text classification string onto the canonical scale.
///
/// Accepts `BASE`, `BASE//CAVEAT`, and the single-slash variant `BASE/CAVEAT`
/// (e.g. `TS/SCI`). `FOUO` on its own is shorthand for `U//FOUO`.
/// Null, empty, and unrecognized inputs resolve to `UNCLASSIFIED`.
pub fn normalize(raw: Option<&str>) -> String {
    let s = match raw {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => {
            eprintln!("Warning: missing security classification, defaulting to UNCLASSIFIED");
            return UNCLASSIFIED.to_string();
        }
    };

    // Bare FOUO carries an implicit UNCLASSIFIED base.
    if s.trim().eq_ignore_ascii_case("fouo") {
        return format!("{}//FOUO", UNCLASSIFIED);
    }

    let (base_part, caveat_part) = match s.split_once("//") {
        Some((b, c)) => (b, Some(c)),
        None => match s.split_once('/') {
            // Single-slash form only counts when the prefix is a real base
            // (so an unrecognized string containing '/' falls through whole).
            Some((b, c)) if canonical_base(b).is_some() => (b, Some(c)),
            _ => (s, None),
        },
    };

    let base = match canonical_base(base_part) {
        Some(base) => base,
        None => {
            eprintln!(
                "Warning: unrecognized security classification '{}', defaulting to UNCLASSIFIED",
                s
            );
            return UNCLASSIFIED.to_string();
        }
    };

    match caveat_part.map(expand_caveat) {
        Some(caveat) if !caveat.is_empty() => format!("{}//{}", base, caveat),
        _ => base.to_string(),
    }
}

/// Total order over the base classification: `UNCLASSIFIED` = 0 up to
/// `TOP SECRET` = 3. Caveats do not affect the level. Unrecognized input
/// sits at the fail-safe bottom of the scale.
pub fn level(classification: &str) -> u8 {
    let base_part = classification
        .split_once("//")
        .map(|(b, _)| b)
        .unwrap_or(classification);
    match canonical_base(base_part) {
        Some(CONFIDENTIAL) => 1,
        Some(SECRET) => 2,
        Some(TOP_SECRET) => 3,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalence_table_unclassified() {
        for raw in ["u", "U", " Unclassified ", "UNCLAS", "unclass"] {
            assert_eq!(normalize(Some(raw)), "UNCLASSIFIED", "input: {:?}", raw);
        }
    }

    #[test]
    fn test_base_forms() {
        assert_eq!(normalize(Some("c")), "CONFIDENTIAL");
        assert_eq!(normalize(Some("Secret")), "SECRET");
        assert_eq!(normalize(Some("ts")), "TOP SECRET");
        assert_eq!(normalize(Some("Top Secret")), "TOP SECRET");
    }

    #[test]
    fn test_caveats_expanded() {
        assert_eq!(normalize(Some("S//NF")), "SECRET//NOFORN");
        assert_eq!(normalize(Some("u//fouo")), "UNCLASSIFIED//FOUO");
        assert_eq!(normalize(Some("TS/SCI")), "TOP SECRET//SCI");
        assert_eq!(normalize(Some("S//NF/OC")), "SECRET//NOFORN/ORCON");
        assert_eq!(normalize(Some("FOUO")), "UNCLASSIFIED//FOUO");
    }

    #[test]
    fn test_null_empty_unrecognized_default() {
        assert_eq!(normalize(None), "UNCLASSIFIED");
        assert_eq!(normalize(Some("")), "UNCLASSIFIED");
        assert_eq!(normalize(Some("   ")), "UNCLASSIFIED");
        assert_eq!(normalize(Some("banana")), "UNCLASSIFIED");
        assert_eq!(normalize(Some("n/a")), "UNCLASSIFIED");
    }

    #[test]
    fn test_idempotent() {
        for raw in [
            "u", "S//NF", "ts/sci", "FOUO", "Top Secret", "garbage", "", "c",
        ] {
            let once = normalize(Some(raw));
            let twice = normalize(Some(&once));
            assert_eq!(once, twice, "not a fixed point for {:?}", raw);
        }
    }

    #[test]
    fn test_level_total_order() {
        assert_eq!(level("UNCLASSIFIED"), 0);
        assert_eq!(level("CONFIDENTIAL"), 1);
        assert_eq!(level("SECRET"), 2);
        assert_eq!(level("TOP SECRET"), 3);
        // Caveats do not change the level.
        assert_eq!(level("SECRET//NOFORN"), 2);
        assert_eq!(level("UNCLASSIFIED//FOUO"), 0);
        // Order is consistent with the scale for all base forms.
        let mut last = 0;
        for c in ["u", "c", "s", "ts"] {
            let l = level(&normalize(Some(c)));
            assert!(l >= last);
            last = l;
        }
        assert_eq!(level("garbage"), 0);
    }
}
