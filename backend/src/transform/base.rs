//! Row base classification.
//!
//! Every comparison of a base/category label goes through [`normalize_base`],
//! which makes equality case- and whitespace-insensitive.

/// Canonical key for rows without a base label.
pub const SELF_BASE: &str = "self";

pub const EQUIPMENT: &str = "equipment";
pub const ASSEMBLY: &str = "assembly";
pub const SPARE: &str = "spare";

/// Normalize a raw base label into its canonical key.
///
/// Empty input classifies as `"self"`; anything else is trimmed and
/// lowercased (`"Assembly "` → `"assembly"`, `"Kit"` → `"kit"`).
pub fn normalize_base(raw: &str) -> String {
    if raw.is_empty() {
        return SELF_BASE.to_string();
    }
    raw.trim().to_lowercase()
}

/// Whether a row with this raw label survives the final category filter.
pub fn is_assembly_or_spare(raw: &str) -> bool {
    let base = normalize_base(raw);
    base == ASSEMBLY || base == SPARE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_known_bases() {
        assert_eq!(normalize_base("Assembly"), "assembly");
        assert_eq!(normalize_base("EQUIPMENT"), "equipment");
        assert_eq!(normalize_base("  Spare "), "spare");
        assert_eq!(normalize_base(""), "self");
    }

    #[test]
    fn test_unknown_labels_pass_through_lowercased() {
        assert_eq!(normalize_base(" Kit "), "kit");
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for label in ["assembly", "equipment", "spare", "Assembly", "SPARE"] {
            let once = normalize_base(label);
            assert_eq!(normalize_base(&once), once);
        }
    }

    #[test]
    fn test_category_filter() {
        assert!(is_assembly_or_spare("Assembly"));
        assert!(is_assembly_or_spare("spare"));
        assert!(!is_assembly_or_spare("Equipment"));
        assert!(!is_assembly_or_spare(""));
    }
}
