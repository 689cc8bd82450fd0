use crate::router::{self, Rule};
use serde::Serialize;

/// Resolved eBay item condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConditionMatch {
    pub id: &'static str,
    pub label: &'static str,
    pub inventory_condition: &'static str,
}

#[derive(Clone, Copy)]
struct ConditionRule {
    matched: ConditionMatch,
    priority: i32,
    keywords: &'static [&'static str],
}

impl Rule for ConditionRule {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn matches(&self, input: &str) -> bool {
        self.keywords.iter().any(|k| input.contains(k))
    }
}

pub const DEFAULT_CONDITION: ConditionMatch = ConditionMatch {
    id: "3000",
    label: "Used",
    inventory_condition: "USED_EXCELLENT",
};

const CONDITION_RULES: [ConditionRule; 5] = [
    ConditionRule {
        matched: ConditionMatch {
            id: "1000",
            label: "New",
            inventory_condition: "NEW",
        },
        priority: 10,
        keywords: &["new", "sealed", "unopened"],
    },
    ConditionRule {
        matched: ConditionMatch {
            id: "1500",
            label: "New other (see details)",
            inventory_condition: "NEW_OTHER",
        },
        priority: 40,
        keywords: &["open box", "new other", "like new", "new without box"],
    },
    ConditionRule {
        matched: ConditionMatch {
            id: "2500",
            label: "Seller refurbished",
            inventory_condition: "SELLER_REFURBISHED",
        },
        priority: 50,
        keywords: &["refurb", "serviced", "cla'd"],
    },
    ConditionRule {
        matched: DEFAULT_CONDITION,
        priority: 20,
        keywords: &["used", "pre-owned", "preowned", "excellent", "good", "fair"],
    },
    ConditionRule {
        matched: ConditionMatch {
            id: "7000",
            label: "For parts or not working",
            inventory_condition: "FOR_PARTS_OR_NOT_WORKING",
        },
        priority: 100,
        keywords: &["for parts", "not working", "broken", "as is", "as-is"],
    },
];

/// Same selection rules as category classification: containment, highest
/// priority, first declared on ties, default on a miss.
pub fn match_condition(text: Option<&str>) -> ConditionMatch {
    let Some(normalized) = router::normalize(text) else {
        return DEFAULT_CONDITION;
    };
    router::select(&CONDITION_RULES, &normalized)
        .map(|rule| rule.matched)
        .unwrap_or(DEFAULT_CONDITION)
}
