//! Per-block scoring rules.
//!
//! A block's weight is the maximum over an ordered list of pure rules. The
//! list is data, not a class hierarchy: each [`ScoringRule`] variant is one
//! kind of weight function, and hosts configure as many as they need.

use std::collections::BTreeMap;

use serde::Deserialize;

/// One weight function over content names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoringRule {
    /// Exact name match against a weight table.
    Exact {
        /// Content name to weight.
        weights: BTreeMap<String, f64>,
    },
    /// Any content whose name contains `keyword`.
    Keyword {
        /// Substring to look for.
        keyword: String,
        /// Weight of a match.
        weight: f64,
    },
}

impl ScoringRule {
    /// Weight this rule assigns to `content` (0 when it does not apply).
    pub fn weight(&self, content: &str) -> f64 {
        match self {
            Self::Exact { weights } => weights.get(content).copied().unwrap_or(0.0),
            Self::Keyword { keyword, weight } => {
                if content.contains(keyword.as_str()) {
                    *weight
                } else {
                    0.0
                }
            }
        }
    }

    /// The built-in rule set: crafted furniture and light sources weigh
    /// most, processed building materials a little.
    pub fn default_rules() -> Vec<Self> {
        let exact = [
            ("bed", 3.0),
            ("crafting_table", 2.0),
            ("furnace", 2.0),
            ("anvil", 2.5),
            ("chest", 1.5),
            ("bookshelf", 1.5),
            ("torch", 1.0),
            ("lantern", 1.0),
            ("door", 1.0),
            ("glass", 0.5),
        ];
        vec![
            Self::Exact {
                weights: exact
                    .iter()
                    .map(|(name, weight)| ((*name).to_owned(), *weight))
                    .collect(),
            },
            Self::Keyword {
                keyword: "planks".to_owned(),
                weight: 0.2,
            },
            Self::Keyword {
                keyword: "brick".to_owned(),
                weight: 0.4,
            },
        ]
    }
}

/// Compiled rule list.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    rules: Vec<ScoringRule>,
}

impl WeightTable {
    /// Wrap an ordered rule list.
    pub const fn new(rules: Vec<ScoringRule>) -> Self {
        Self { rules }
    }

    /// Weight of `content`: the maximum over all rules, never negative.
    ///
    /// `f64::max` ignores NaN, so a malformed rule cannot poison the sum.
    pub fn weight(&self, content: &str) -> f64 {
        self.rules
            .iter()
            .map(|rule| rule.weight(content))
            .fold(0.0, f64::max)
    }

    /// Whether `content` carries any weight at all.
    pub fn is_weighted(&self, content: &str) -> bool {
        self.weight(content) > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> WeightTable {
        WeightTable::new(ScoringRule::default_rules())
    }

    #[test]
    fn exact_rule_matches_whole_names_only() {
        let table = table();
        assert!((table.weight("bed") - 3.0).abs() < f64::EPSILON);
        assert!(table.weight("bedrock").abs() < f64::EPSILON);
    }

    #[test]
    fn keyword_rule_matches_substrings() {
        let table = table();
        assert!((table.weight("oak_planks") - 0.2).abs() < f64::EPSILON);
        assert!((table.weight("stone_brick_stairs") - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn overlapping_rules_take_the_maximum() {
        let rules = vec![
            ScoringRule::Keyword {
                keyword: "glass".to_owned(),
                weight: 0.3,
            },
            ScoringRule::Exact {
                weights: [("glass".to_owned(), 0.5)].into_iter().collect(),
            },
        ];
        let table = WeightTable::new(rules);
        assert!((table.weight("glass") - 0.5).abs() < f64::EPSILON);
        assert!((table.weight("glass_pane") - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn negative_and_nan_weights_floor_at_zero() {
        let rules = vec![
            ScoringRule::Keyword {
                keyword: "ruin".to_owned(),
                weight: -5.0,
            },
            ScoringRule::Keyword {
                keyword: "ruin".to_owned(),
                weight: f64::NAN,
            },
        ];
        let table = WeightTable::new(rules);
        assert!(table.weight("ruin").abs() < f64::EPSILON);
        assert!(!table.is_weighted("ruin"));
    }

    #[test]
    fn unknown_content_is_unweighted() {
        assert!(!table().is_weighted("dirt"));
    }
}
