//! Deterministic dedup keys for parsed rows
use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Assigns each row of one file a composite dedup key
/// `yyyyMMdd_amount_seq`, where `seq` is a 1-based counter over rows sharing
/// the same date and amount. The counter is scoped to the current file only;
/// duplicates across files are caught by the storage-level uniqueness check.
pub struct DedupSequencer {
    seen: HashMap<(NaiveDate, String), u32>,
}

impl DedupSequencer {
    pub fn new() -> DedupSequencer {
        DedupSequencer {
            seen: HashMap::new(),
        }
    }

    pub fn key_for(&mut self, date: NaiveDate, amount: Decimal) -> String {
        let amount = format!("{amount:.2}");
        let seq = self
            .seen
            .entry((date, amount.clone()))
            .and_modify(|seq| *seq += 1)
            .or_insert(1);
        format!("{}_{}_{}", date.format("%Y%m%d"), amount, seq)
    }
}

impl Default for DedupSequencer {
    fn default() -> Self {
        DedupSequencer::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn identical_rows_get_consecutive_sequence_numbers() {
        let mut sequencer = DedupSequencer::new();
        assert_eq!(
            sequencer.key_for(date("2024-03-08"), dec("-100.00")),
            "20240308_-100.00_1"
        );
        assert_eq!(
            sequencer.key_for(date("2024-03-08"), dec("-100.00")),
            "20240308_-100.00_2"
        );
        // a different amount starts its own counter
        assert_eq!(
            sequencer.key_for(date("2024-03-08"), dec("50.00")),
            "20240308_50.00_1"
        );
    }

    #[test]
    fn keys_are_reproducible_across_runs() {
        let rows = [("2024-03-08", "-100.00"), ("2024-03-09", "-100.00"), ("2024-03-08", "-100.00")];
        let first: Vec<String> = {
            let mut sequencer = DedupSequencer::new();
            rows.iter().map(|(d, a)| sequencer.key_for(date(d), dec(a))).collect()
        };
        let second: Vec<String> = {
            let mut sequencer = DedupSequencer::new();
            rows.iter().map(|(d, a)| sequencer.key_for(date(d), dec(a))).collect()
        };
        assert_eq!(first, second);
        assert_eq!(first[0], "20240308_-100.00_1");
        assert_eq!(first[2], "20240308_-100.00_2");
    }

    #[test]
    fn amounts_render_with_two_decimals() {
        let mut sequencer = DedupSequencer::new();
        assert_eq!(
            sequencer.key_for(date("2024-01-01"), dec("7.5")),
            "20240101_7.50_1"
        );
    }
}
