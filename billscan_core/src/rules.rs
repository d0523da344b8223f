//! Summary replacement rules and retroactive re-classification
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::classify::{classify, KeywordConfig};
use crate::settings::Setting;
use crate::statements::{Category, DataError, StatementStore, StatementTransaction};

/// Settings key under which the rule configuration is stored
pub const RULES_SETTING_KEY: &str = "household_bills.invest_category";

/// Current version of the stored rule configuration schema
pub const RULES_SCHEMA_VERSION: u32 = 1;

fn schema_version() -> u32 {
    RULES_SCHEMA_VERSION
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    #[default]
    Summary,
    Counterparty,
    Both,
}

/// A single summary replacement rule. Patterns match by case-insensitive
/// substring containment, never by regular expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceRule {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_pattern: Option<String>,
}

impl ReplaceRule {
    /// Check this rule against the original summary and the counterparty.
    /// A `both` rule without counterparty pattern never matches.
    pub fn matches(&self, original_summary: &str, counterparty: &str) -> bool {
        match self.match_type {
            MatchType::Summary => contains_ci(original_summary, &self.pattern),
            MatchType::Counterparty => contains_ci(counterparty, &self.pattern),
            MatchType::Both => {
                contains_ci(original_summary, &self.pattern)
                    && self
                        .counterparty_pattern
                        .as_deref()
                        .map(|p| contains_ci(counterparty, p))
                        .unwrap_or(false)
            }
        }
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// The complete, versioned rule configuration: keyword lists for the
/// classifier plus the ordered replacement rule list. Rule order is
/// significant, evaluation is first-match-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default = "schema_version")]
    pub version: u32,
    #[serde(flatten)]
    pub keywords: KeywordConfig,
    #[serde(default, rename = "replace_rules")]
    pub replace_rules: Vec<ReplaceRule>,
}

impl Default for RuleSet {
    fn default() -> RuleSet {
        RuleSet {
            version: RULES_SCHEMA_VERSION,
            keywords: KeywordConfig::default(),
            replace_rules: Vec::new(),
        }
    }
}

impl RuleSet {
    /// Apply the replacement rules to the original summary, stopping at the
    /// first matching rule. Without a match the original text is kept.
    pub fn apply(&self, original_summary: &str, counterparty: &str) -> String {
        for rule in &self.replace_rules {
            if rule.matches(original_summary, counterparty) {
                return rule.replacement.clone();
            }
        }
        original_summary.to_string()
    }

    /// Validate the configuration before it is written to the settings store.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.version != RULES_SCHEMA_VERSION {
            return Err(DataError::Invalid(format!(
                "unsupported rule schema version {}",
                self.version
            )));
        }
        for rule in &self.replace_rules {
            if rule.pattern.is_empty() {
                return Err(DataError::Invalid(
                    "replacement rule with empty pattern".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Load the stored rule configuration; a missing or unreadable setting means
/// "no rules and default keywords".
pub async fn load_rules(db: &(dyn StatementStore + Send + Sync)) -> RuleSet {
    match db.get_setting(RULES_SETTING_KEY).await {
        Ok(Some(setting)) => serde_json::from_str(&setting.value).unwrap_or_else(|e| {
            log::warn!("stored rule configuration is unreadable, using defaults: {e}");
            RuleSet::default()
        }),
        Ok(None) => RuleSet::default(),
        Err(e) => {
            log::warn!("failed to load rule configuration, using defaults: {e}");
            RuleSet::default()
        }
    }
}

/// Validate and persist the rule configuration.
pub async fn save_rules(
    db: &(dyn StatementStore + Send + Sync),
    rules: &RuleSet,
) -> Result<(), DataError> {
    rules.validate()?;
    let value = serde_json::to_string(rules)
        .map_err(|e| DataError::Invalid(format!("rule configuration not serializable: {e}")))?;
    db.upsert_setting(&Setting {
        key: RULES_SETTING_KEY.to_string(),
        value,
        description: Some("Household bill classification rules".to_string()),
    })
    .await
}

/// One proposed change of a rerun, reported by the preview
#[derive(Debug, Clone, Serialize)]
pub struct RerunChange {
    pub id: i64,
    pub txn_date: NaiveDate,
    pub amount: Decimal,
    pub counterparty: String,
    pub original_summary: String,
    pub current_summary: String,
    pub category_changed: bool,
    pub old_category: Option<Category>,
    pub new_category: Option<Category>,
    pub summary_changed: bool,
    pub old_summary: Option<String>,
    pub new_summary: Option<String>,
}

/// Recompute classification and summary for the given transactions and report
/// the rows where either differs from the stored values. Pure; reruns always
/// start from the preserved original summary.
pub fn plan_changes(rules: &RuleSet, transactions: &[StatementTransaction]) -> Vec<RerunChange> {
    let mut changes = Vec::new();
    for txn in transactions {
        let (category, direction) = classify(
            &txn.summary_original,
            &txn.counterparty,
            txn.amount,
            &rules.keywords,
        );
        let new_summary = rules.apply(&txn.summary_original, &txn.counterparty);

        let category_changed = category != txn.category || direction != txn.direction;
        let summary_changed = new_summary != txn.summary;
        if !category_changed && !summary_changed {
            continue;
        }
        changes.push(RerunChange {
            id: txn.id.unwrap_or(0),
            txn_date: txn.txn_date,
            amount: txn.amount,
            counterparty: txn.counterparty.clone(),
            original_summary: txn.summary_original.clone(),
            current_summary: txn.summary.clone(),
            category_changed,
            old_category: category_changed.then_some(txn.category),
            new_category: category_changed.then_some(category),
            summary_changed,
            old_summary: summary_changed.then(|| txn.summary.clone()),
            new_summary: summary_changed.then(|| new_summary.clone()),
        });
    }
    changes
}

/// Serializes reruns per user; concurrent reruns for the same user would race
/// on the check-then-update of each row.
struct UserLocks {
    locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    fn new() -> UserLocks {
        UserLocks {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn for_user(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id)
            .or_default()
            .clone()
    }
}

/// Preview and execution of retroactive rule reruns over stored rows
pub struct RerunEngine {
    db: Arc<dyn StatementStore + Send + Sync>,
    locks: UserLocks,
}

impl RerunEngine {
    pub fn new(db: Arc<dyn StatementStore + Send + Sync>) -> RerunEngine {
        RerunEngine {
            db,
            locks: UserLocks::new(),
        }
    }

    /// Compute the changes the current rules would make to the user's stored
    /// rows, without persisting anything.
    pub async fn preview(&self, user_id: i64) -> Result<Vec<RerunChange>, DataError> {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;
        let rules = load_rules(&*self.db).await;
        let transactions = self.db.get_transactions_for_user(user_id).await?;
        Ok(plan_changes(&rules, &transactions))
    }

    /// Re-classify exactly the given rows; ids not owned by the user are
    /// silently skipped. Returns the number of updated rows.
    pub async fn execute(&self, user_id: i64, ids: &[i64]) -> Result<usize, DataError> {
        let lock = self.locks.for_user(user_id);
        let _guard = lock.lock().await;
        let rules = load_rules(&*self.db).await;
        let transactions = self.db.get_transactions_by_ids(ids, user_id).await?;
        let mut updated = 0;
        for txn in &transactions {
            let (category, direction) = classify(
                &txn.summary_original,
                &txn.counterparty,
                txn.amount,
                &rules.keywords,
            );
            let summary = rules.apply(&txn.summary_original, &txn.counterparty);
            let id = txn
                .id
                .ok_or_else(|| DataError::UpdateFailed("transaction without id".to_string()))?;
            self.db
                .update_classification(id, category, direction, &summary)
                .await?;
            updated += 1;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn rule(pattern: &str, replacement: &str) -> ReplaceRule {
        ReplaceRule {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
            match_type: MatchType::Summary,
            counterparty_pattern: None,
        }
    }

    fn txn(summary_original: &str, summary: &str, counterparty: &str, amount: &str) -> StatementTransaction {
        let amount = Decimal::from_str(amount).unwrap();
        let (category, direction) = classify(summary_original, counterparty, amount, &KeywordConfig::default());
        StatementTransaction {
            id: Some(1),
            user_id: 1,
            file_id: 1,
            txn_date: NaiveDate::from_ymd_opt(2024, 3, 8).unwrap(),
            currency: "CNY".to_string(),
            amount,
            balance: None,
            summary: summary.to_string(),
            summary_original: summary_original.to_string(),
            counterparty: counterparty.to_string(),
            account_name: None,
            category,
            direction,
            dedup_key: "20240308_-1.00_1".to_string(),
            raw_line: String::new(),
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = RuleSet {
            replace_rules: vec![rule("超市", "Groceries"), rule("市", "Other")],
            ..RuleSet::default()
        };
        assert_eq!(rules.apply("超市购物", ""), "Groceries");
    }

    #[test]
    fn no_match_keeps_original_summary() {
        let rules = RuleSet {
            replace_rules: vec![rule("水电", "Utilities")],
            ..RuleSet::default()
        };
        assert_eq!(rules.apply("餐饮", "食堂"), "餐饮");
    }

    #[test]
    fn match_is_case_insensitive() {
        let rules = RuleSet {
            replace_rules: vec![rule("taxi", "Transport")],
            ..RuleSet::default()
        };
        assert_eq!(rules.apply("TAXI fare", ""), "Transport");
    }

    #[test]
    fn counterparty_rule_matches_counterparty_only() {
        let r = ReplaceRule {
            pattern: "航空".to_string(),
            replacement: "Flights".to_string(),
            match_type: MatchType::Counterparty,
            counterparty_pattern: None,
        };
        assert!(r.matches("消费", "东方航空"));
        assert!(!r.matches("航空杂志订阅", "书店"));
    }

    #[test]
    fn both_rule_requires_counterparty_pattern() {
        let mut r = ReplaceRule {
            pattern: "转账".to_string(),
            replacement: "Transfer".to_string(),
            match_type: MatchType::Both,
            counterparty_pattern: None,
        };
        assert!(!r.matches("转账", "张三"));
        r.counterparty_pattern = Some("张三".to_string());
        assert!(r.matches("转账", "张三"));
        assert!(!r.matches("转账", "李四"));
    }

    #[test]
    fn rules_round_trip_through_stored_json() {
        let json = r#"{
            "billing_summary_keyword": ["基金申购"],
            "counter_party_keyword": ["盈米基金"],
            "replace_rules": [
                {"pattern": "超市", "replacement": "Groceries"},
                {"pattern": "滴滴", "replacement": "Transport", "matchType": "counterparty"},
                {"pattern": "转账", "replacement": "Rent", "matchType": "both", "counterpartyPattern": "房东"}
            ]
        }"#;
        let rules: RuleSet = serde_json::from_str(json).unwrap();
        assert_eq!(rules.version, RULES_SCHEMA_VERSION);
        assert_eq!(rules.keywords.summary_keywords, vec!["基金申购"]);
        assert_eq!(rules.replace_rules.len(), 3);
        assert_eq!(rules.replace_rules[1].match_type, MatchType::Counterparty);
        assert_eq!(
            rules.replace_rules[2].counterparty_pattern.as_deref(),
            Some("房东")
        );
        // default match type is summary
        assert_eq!(rules.replace_rules[0].match_type, MatchType::Summary);

        let encoded = serde_json::to_string(&rules).unwrap();
        let decoded: RuleSet = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.replace_rules, rules.replace_rules);
        assert_eq!(decoded.keywords, rules.keywords);
    }

    #[test]
    fn validate_rejects_bad_configurations() {
        let mut rules = RuleSet {
            replace_rules: vec![rule("", "x")],
            ..RuleSet::default()
        };
        assert!(rules.validate().is_err());
        rules.replace_rules.clear();
        rules.version = 2;
        assert!(rules.validate().is_err());
        rules.version = RULES_SCHEMA_VERSION;
        assert!(rules.validate().is_ok());
    }

    #[test]
    fn plan_reports_summary_and_category_changes() {
        let rules = RuleSet {
            keywords: KeywordConfig {
                summary_keywords: vec!["理财".to_string()],
                counterparty_keywords: vec!["none".to_string()],
            },
            replace_rules: vec![rule("超市", "Groceries")],
            ..RuleSet::default()
        };
        let transactions = vec![
            // summary replaced, classification unchanged
            txn("超市购物", "超市购物", "商场", "-20.00"),
            // classified as investment under the new keywords
            txn("理财转入", "理财转入", "", "-500.00"),
            // untouched by rules and keywords
            txn("工资", "工资", "", "8000.00"),
        ];
        let changes = plan_changes(&rules, &transactions);
        assert_eq!(changes.len(), 2);
        assert!(changes[0].summary_changed);
        assert!(!changes[0].category_changed);
        assert_eq!(changes[0].new_summary.as_deref(), Some("Groceries"));
        assert!(changes[1].category_changed);
        assert_eq!(changes[1].new_category, Some(Category::Investment));
    }

    #[test]
    fn plan_is_idempotent_after_applying_changes() {
        let rules = RuleSet {
            replace_rules: vec![rule("超市", "Groceries")],
            ..RuleSet::default()
        };
        let mut transactions = vec![txn("超市购物", "超市购物", "商场", "-20.00")];
        let changes = plan_changes(&rules, &transactions);
        assert_eq!(changes.len(), 1);

        // apply the proposed change as execute() would persist it
        transactions[0].summary = changes[0].new_summary.clone().unwrap();
        assert!(plan_changes(&rules, &transactions).is_empty());
    }
}
