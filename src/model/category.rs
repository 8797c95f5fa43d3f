use serde::{Deserialize, Serialize};

/// The label under which transactions without a category are grouped.
pub const UNCATEGORIZED: &str = "?";

/// The categories offered to the user when recording an expense. A transaction's category is free
/// text, so these are suggestions rather than constraints.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum SuggestedCategory {
    Grocery,
    Dining,
    Auto,
    Entertainment,
    #[serde(rename = "Taba_Uni")]
    TabaUni,
    Other,
}

serde_plain::derive_display_from_serialize!(SuggestedCategory);
serde_plain::derive_fromstr_from_deserialize!(SuggestedCategory);

impl SuggestedCategory {
    /// All suggestions in the order they are presented.
    pub const ALL: [SuggestedCategory; 6] = [
        SuggestedCategory::Grocery,
        SuggestedCategory::Dining,
        SuggestedCategory::Auto,
        SuggestedCategory::Entertainment,
        SuggestedCategory::TabaUni,
        SuggestedCategory::Other,
    ];
}

/// Returns the label used to group a transaction: its category, or `"?"` when the category is
/// absent or empty.
pub fn category_label(category: Option<&str>) -> &str {
    match category {
        Some(c) if !c.is_empty() => c,
        _ => UNCATEGORIZED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggestion_labels() {
        let labels: Vec<String> = SuggestedCategory::ALL
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(
            labels,
            vec!["Grocery", "Dining", "Auto", "Entertainment", "Taba_Uni", "Other"]
        );
        assert_eq!(
            "Taba_Uni".parse::<SuggestedCategory>().unwrap(),
            SuggestedCategory::TabaUni
        );
    }

    #[test]
    fn test_category_label() {
        assert_eq!(category_label(Some("Dining")), "Dining");
        assert_eq!(category_label(Some("")), UNCATEGORIZED);
        assert_eq!(category_label(None), UNCATEGORIZED);
    }
}
