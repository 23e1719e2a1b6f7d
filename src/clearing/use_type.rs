//! Use-type compatibility matrix.
//!
//! Each warehouse activity tier carries a capability set; each buyer use
//! type carries a need set. The matrix is asymmetric: a cold-storage
//! facility serves plain-storage demand, but not the other way around.
//! Scores are always one of {0, 30, 60, 100}.

/// Atomic capability / need tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Cap {
    Storage,
    Office,
    LightAssembly,
    EcommerceFulfillment,
    ColdStorage,
    FoodGrade,
}

impl Cap {
    fn label(&self) -> &'static str {
        match self {
            Cap::Storage => "storage",
            Cap::Office => "office space",
            Cap::LightAssembly => "light assembly",
            Cap::EcommerceFulfillment => "ecommerce fulfillment",
            Cap::ColdStorage => "cold storage",
            Cap::FoodGrade => "food grade",
        }
    }
}

fn capability_set(activity_tier: &str) -> Option<Vec<Cap>> {
    match activity_tier {
        "storage_only" => Some(vec![Cap::Storage]),
        "storage_office" => Some(vec![Cap::Storage, Cap::Office]),
        "storage_light_assembly" => Some(vec![
            Cap::Storage,
            Cap::LightAssembly,
            Cap::EcommerceFulfillment,
        ]),
        "cold_storage" => Some(vec![Cap::Storage, Cap::ColdStorage, Cap::FoodGrade]),
        _ => None,
    }
}

fn need_set(use_type: &str) -> Option<Vec<Cap>> {
    match use_type {
        "storage" | "storage_only" | "distribution" | "general" => Some(vec![Cap::Storage]),
        "office" => Some(vec![Cap::Office]),
        "storage_office" => Some(vec![Cap::Storage, Cap::Office]),
        "ecommerce_fulfillment" => Some(vec![Cap::Storage, Cap::LightAssembly]),
        "cold_storage" => Some(vec![Cap::ColdStorage]),
        "food_grade" => Some(vec![Cap::ColdStorage, Cap::FoodGrade]),
        "manufacturing_light" => Some(vec![Cap::LightAssembly]),
        _ => None,
    }
}

/// Score a (warehouse activity tier, buyer use type) pairing.
///
/// Returns the score and a list of short human-readable callouts for UI
/// display ("Bonus: office space", "No office space", "Incompatible: ...").
/// A `has_office_space` flag on the warehouse injects office capability
/// before comparison. Unknown tiers or use types score 0 with an
/// "Unknown ..." callout.
pub fn compute_use_type_score(
    activity_tier: &str,
    use_type: &str,
    has_office_space: bool,
) -> (i64, Vec<String>) {
    let mut caps = match capability_set(activity_tier) {
        Some(c) => c,
        None => {
            return (
                0,
                vec![format!("Unknown activity tier: {activity_tier}")],
            )
        }
    };
    let needs = match need_set(use_type) {
        Some(n) => n,
        None => return (0, vec![format!("Unknown use type: {use_type}")]),
    };

    if has_office_space && !caps.contains(&Cap::Office) {
        caps.push(Cap::Office);
    }

    let overlap: Vec<Cap> = needs.iter().copied().filter(|n| caps.contains(n)).collect();
    let missing: Vec<Cap> = needs
        .iter()
        .copied()
        .filter(|n| !caps.contains(n))
        .collect();
    let bonus: Vec<Cap> = caps
        .iter()
        .copied()
        .filter(|c| !needs.contains(c))
        .collect();

    if missing.is_empty() {
        let callouts = bonus
            .iter()
            .map(|c| format!("Bonus: {}", c.label()))
            .collect();
        return (100, callouts);
    }

    if overlap.is_empty() {
        let missing_labels: Vec<&str> = missing.iter().map(|c| c.label()).collect();
        return (
            0,
            vec![format!("Incompatible: no {}", missing_labels.join(", no "))],
        );
    }

    let score = if overlap.len() >= missing.len() { 60 } else { 30 };
    let callouts = missing.iter().map(|c| format!("No {}", c.label())).collect();
    (score, callouts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TIERS: [&str; 4] = [
        "storage_only",
        "storage_office",
        "storage_light_assembly",
        "cold_storage",
    ];
    const ALL_USE_TYPES: [&str; 10] = [
        "storage",
        "storage_only",
        "office",
        "storage_office",
        "ecommerce_fulfillment",
        "distribution",
        "cold_storage",
        "food_grade",
        "manufacturing_light",
        "general",
    ];

    fn score(tier: &str, use_type: &str) -> i64 {
        compute_use_type_score(tier, use_type, false).0
    }

    #[test]
    fn test_asymmetry_cold_serves_storage_not_reverse() {
        assert_eq!(score("cold_storage", "storage"), 100);
        assert_eq!(score("storage_only", "cold_storage"), 0);
    }

    #[test]
    fn test_storage_only_matrix_row() {
        assert_eq!(score("storage_only", "storage"), 100);
        assert_eq!(score("storage_only", "storage_only"), 100);
        assert_eq!(score("storage_only", "office"), 0);
        // overlap {storage} vs missing {office}: 1 >= 1 -> 60
        assert_eq!(score("storage_only", "storage_office"), 60);
        assert_eq!(score("storage_only", "ecommerce_fulfillment"), 60);
        assert_eq!(score("storage_only", "distribution"), 100);
        assert_eq!(score("storage_only", "food_grade"), 0);
        assert_eq!(score("storage_only", "manufacturing_light"), 0);
        assert_eq!(score("storage_only", "general"), 100);
    }

    #[test]
    fn test_storage_office_matrix_row() {
        assert_eq!(score("storage_office", "storage"), 100);
        assert_eq!(score("storage_office", "office"), 100);
        assert_eq!(score("storage_office", "storage_office"), 100);
        assert_eq!(score("storage_office", "ecommerce_fulfillment"), 60);
        assert_eq!(score("storage_office", "cold_storage"), 0);
        assert_eq!(score("storage_office", "manufacturing_light"), 0);
    }

    #[test]
    fn test_light_assembly_matrix_row() {
        assert_eq!(score("storage_light_assembly", "ecommerce_fulfillment"), 100);
        assert_eq!(score("storage_light_assembly", "manufacturing_light"), 100);
        assert_eq!(score("storage_light_assembly", "storage_office"), 60);
        assert_eq!(score("storage_light_assembly", "office"), 0);
        assert_eq!(score("storage_light_assembly", "cold_storage"), 0);
        assert_eq!(score("storage_light_assembly", "food_grade"), 0);
    }

    #[test]
    fn test_cold_storage_matrix_row() {
        assert_eq!(score("cold_storage", "cold_storage"), 100);
        assert_eq!(score("cold_storage", "food_grade"), 100);
        assert_eq!(score("cold_storage", "storage_office"), 60);
        assert_eq!(score("cold_storage", "ecommerce_fulfillment"), 60);
        assert_eq!(score("cold_storage", "manufacturing_light"), 0);
        assert_eq!(score("cold_storage", "office"), 0);
    }

    #[test]
    fn test_office_flag_injects_capability() {
        let (s, _) = compute_use_type_score("storage_only", "office", true);
        assert_eq!(s, 100);
        let (s, _) = compute_use_type_score("storage_only", "office", false);
        assert_eq!(s, 0);
        let (s, _) = compute_use_type_score("storage_only", "storage_office", true);
        assert_eq!(s, 100);
        let (s, _) = compute_use_type_score("cold_storage", "office", true);
        assert_eq!(s, 100);
        // Already capable — flag changes nothing
        let (a, _) = compute_use_type_score("storage_office", "office", false);
        let (b, _) = compute_use_type_score("storage_office", "office", true);
        assert_eq!(a, 100);
        assert_eq!(b, 100);
    }

    #[test]
    fn test_unknown_values() {
        let (s, callouts) = compute_use_type_score("nonexistent_tier", "storage", false);
        assert_eq!(s, 0);
        assert!(callouts.iter().any(|c| c.contains("Unknown")));

        let (s, callouts) = compute_use_type_score("storage_only", "nonexistent_use", false);
        assert_eq!(s, 0);
        assert!(callouts.iter().any(|c| c.contains("Unknown")));

        assert_eq!(score("", "storage"), 0);
        assert_eq!(score("storage_only", ""), 0);
    }

    #[test]
    fn test_callout_content() {
        let (_, callouts) = compute_use_type_score("storage_office", "storage", false);
        assert!(callouts.iter().any(|c| c.contains("Bonus") && c.contains("office")));

        let (s, callouts) = compute_use_type_score("storage_only", "storage_office", false);
        assert_eq!(s, 60);
        assert!(callouts.iter().any(|c| c.to_lowercase().contains("office")));

        let (_, callouts) = compute_use_type_score("storage_only", "cold_storage", false);
        assert!(callouts.iter().any(|c| c.contains("Incompatible")));

        // Exact match carries no negative callouts
        let (_, callouts) = compute_use_type_score("storage_only", "storage", false);
        assert!(!callouts.iter().any(|c| c.starts_with("No ")));

        let (s, callouts) = compute_use_type_score("cold_storage", "ecommerce_fulfillment", false);
        assert_eq!(s, 60);
        let joined = callouts.join(" ").to_lowercase();
        assert!(joined.contains("assembly"));
    }

    #[test]
    fn test_all_scores_in_valid_set() {
        for tier in ALL_TIERS {
            for use_type in ALL_USE_TYPES {
                for flag in [false, true] {
                    let (s, callouts) = compute_use_type_score(tier, use_type, flag);
                    assert!(
                        matches!(s, 0 | 30 | 60 | 100),
                        "({tier}, {use_type}, {flag}) gave {s}"
                    );
                    for c in &callouts {
                        assert!(!c.is_empty());
                    }
                }
            }
        }
    }
}
