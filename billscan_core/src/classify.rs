//! Keyword based category and direction classification
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::statements::{Category, Direction};

/// Counterparties containing this substring are fund distributors and always
/// classify as investment, independent of the configured keyword lists.
const FUND_DISTRIBUTOR: &str = "基金销售";

/// Keyword lists steering the investment classification. Field names mirror
/// the stored JSON configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordConfig {
    #[serde(default, rename = "billing_summary_keyword")]
    pub summary_keywords: Vec<String>,
    #[serde(default, rename = "counter_party_keyword")]
    pub counterparty_keywords: Vec<String>,
}

lazy_static! {
    /// Fallback used whenever no keyword configuration is stored
    static ref DEFAULT_KEYWORDS: KeywordConfig = KeywordConfig {
        summary_keywords: [
            "受托理财申购",
            "受托理财赎回",
            "基金定期定额申购",
            "基金申购",
            "申购",
            "基金赎回",
            "朝朝宝转入",
            "朝朝宝自动转入",
            "朝朝宝转出",
            "基金认购",
            "银证转账(第三方存管)",
            "受托理财分红",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
        counterparty_keywords: ["盈米基金", "蚂蚁基金", "广发基金", "景顺长城基金", "基金销售"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };
}

pub fn default_keywords() -> &'static KeywordConfig {
    &DEFAULT_KEYWORDS
}

/// Decide category and direction for one transaction row. Pure and
/// deterministic; empty keyword lists fall back to the built-in defaults.
pub fn classify(
    summary: &str,
    counterparty: &str,
    amount: Decimal,
    keywords: &KeywordConfig,
) -> (Category, Direction) {
    let summary_lower = summary.to_lowercase();
    let counterparty_lower = counterparty.to_lowercase();

    let summary_keywords = if keywords.summary_keywords.is_empty() {
        &DEFAULT_KEYWORDS.summary_keywords
    } else {
        &keywords.summary_keywords
    };
    let counterparty_keywords = if keywords.counterparty_keywords.is_empty() {
        &DEFAULT_KEYWORDS.counterparty_keywords
    } else {
        &keywords.counterparty_keywords
    };

    let is_investment = summary_keywords
        .iter()
        .any(|k| summary_lower.contains(&k.to_lowercase()))
        || counterparty_lower.contains(FUND_DISTRIBUTOR)
        || counterparty_keywords
            .iter()
            .any(|k| counterparty_lower.contains(&k.to_lowercase()));

    if is_investment {
        if amount < Decimal::ZERO {
            (Category::Investment, Direction::Buy)
        } else {
            (Category::Investment, Direction::Redeem)
        }
    } else if amount < Decimal::ZERO {
        (Category::Ordinary, Direction::Expense)
    } else {
        (Category::Ordinary, Direction::Income)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn investment_keyword_with_negative_amount_is_buy() {
        let (category, direction) = classify("基金申购", "", dec("-100.00"), &KeywordConfig::default());
        assert_eq!(category, Category::Investment);
        assert_eq!(direction, Direction::Buy);
    }

    #[test]
    fn investment_keyword_with_positive_amount_is_redeem() {
        let (category, direction) = classify("基金赎回", "", dec("250.00"), &KeywordConfig::default());
        assert_eq!(category, Category::Investment);
        assert_eq!(direction, Direction::Redeem);
    }

    #[test]
    fn plain_amounts_classify_as_ordinary() {
        let keywords = KeywordConfig::default();
        let (category, direction) = classify("餐饮消费", "某餐厅", dec("50.00"), &keywords);
        assert_eq!((category, direction), (Category::Ordinary, Direction::Income));
        let (category, direction) = classify("餐饮消费", "某餐厅", dec("-50.00"), &keywords);
        assert_eq!((category, direction), (Category::Ordinary, Direction::Expense));
    }

    #[test]
    fn empty_configuration_falls_back_to_built_in_defaults() {
        let defaults = default_keywords();
        assert!(!defaults.summary_keywords.is_empty());
        assert!(!defaults.counterparty_keywords.is_empty());
        // an empty configuration behaves exactly like the default one
        let empty = classify("基金申购", "", dec("-1.00"), &KeywordConfig::default());
        let explicit = classify("基金申购", "", dec("-1.00"), defaults);
        assert_eq!(empty, explicit);
        assert_eq!(explicit, (Category::Investment, Direction::Buy));
    }

    #[test]
    fn fund_distributor_counterparty_forces_investment() {
        let (category, _) = classify("转账", "某某基金销售有限公司", dec("-10.00"), &KeywordConfig::default());
        assert_eq!(category, Category::Investment);
    }

    #[test]
    fn configured_keywords_replace_defaults() {
        let keywords = KeywordConfig {
            summary_keywords: vec!["Sparplan".to_string()],
            counterparty_keywords: vec!["Depotbank".to_string()],
        };
        // configured list wins, default keyword no longer matches
        let (category, _) = classify("基金申购", "", dec("-10.00"), &keywords);
        assert_eq!(category, Category::Ordinary);
        // matching is case-insensitive
        let (category, direction) = classify("SPARPLAN Ausführung", "", dec("-10.00"), &keywords);
        assert_eq!((category, direction), (Category::Investment, Direction::Buy));
        let (category, _) = classify("Gutschrift", "depotbank ag", dec("20.00"), &keywords);
        assert_eq!(category, Category::Investment);
    }
}
