//! Line classification and tokenization of statement data rows
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;

use super::ParsedRow;

lazy_static! {
    static ref DATE_ANCHOR: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}\s+").unwrap();
    static ref CURRENCY: Regex = Regex::new(r"^([A-Z]{3})\s+").unwrap();
    static ref AMOUNT: Regex = Regex::new(r"^(-?[\d,]+\.\d{2})\s+").unwrap();
    static ref BALANCE: Regex = Regex::new(r"^([\d,]+\.\d{2})\s+").unwrap();
    static ref PAGE_FOOTER: Regex = Regex::new(r"^\d+/\d+$").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

const HEADER_KEYWORDS: [&str; 6] = ["记账日期", "货币", "交易金额", "联机余额", "交易摘要", "对手信息"];
const ENGLISH_HEADER_KEYWORDS: [&str; 6] =
    ["Date", "Currency", "Amount", "Balance", "Transaction", "Counter Party"];

/// A single data row echoing a header keyword must not suppress the row, so
/// a line only counts as header when most keywords are present.
const HEADER_KEYWORD_MIN: usize = 4;

/// Role of one line of extracted page text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    /// Native-language table header
    Header,
    /// English table header printed below the native one
    EnglishHeader,
    /// Page footer of the form `3/12`
    PageFooter,
    /// Transaction row, anchored by a leading ISO date
    Data,
    /// Anything else; a candidate continuation of the previous row's
    /// counterparty field
    Freeform,
}

/// Classify a single line. The data check runs before the header checks so a
/// row whose summary happens to contain header terms still parses as data.
pub fn classify_line(line: &str) -> LineKind {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineKind::Blank;
    }
    if is_data_line(trimmed) {
        return LineKind::Data;
    }
    if keyword_count(trimmed, &HEADER_KEYWORDS) >= HEADER_KEYWORD_MIN {
        return LineKind::Header;
    }
    if keyword_count(trimmed, &ENGLISH_HEADER_KEYWORDS) >= HEADER_KEYWORD_MIN {
        return LineKind::EnglishHeader;
    }
    if PAGE_FOOTER.is_match(trimmed) {
        return LineKind::PageFooter;
    }
    LineKind::Freeform
}

fn is_data_line(trimmed: &str) -> bool {
    DATE_ANCHOR.is_match(trimmed)
}

fn keyword_count(line: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| line.contains(*k)).count()
}

/// Tokenize a confirmed data line by sequential prefix stripping:
/// date, currency, amount, balance, then summary and counterparty split on
/// the first whitespace run. Returns `None` if any of the four structured
/// prefixes fails to match; the caller counts that as one failed row.
pub fn parse_data_line(line: &str) -> Option<ParsedRow> {
    let trimmed = line.trim();

    let date_match = DATE_ANCHOR.find(trimmed)?;
    let txn_date = NaiveDate::parse_from_str(date_match.as_str().trim_end(), "%Y-%m-%d").ok()?;
    let rest = trimmed[date_match.end()..].trim_start();

    let currency_match = CURRENCY.captures(rest)?;
    let currency = currency_match[1].to_string();
    let rest = rest[currency_match.get(0)?.end()..].trim_start();

    let amount_match = AMOUNT.captures(rest)?;
    let amount: Decimal = amount_match[1].replace(',', "").parse().ok()?;
    let rest = rest[amount_match.get(0)?.end()..].trim_start();

    let balance_match = BALANCE.captures(rest)?;
    let balance: Decimal = balance_match[1].replace(',', "").parse().ok()?;
    let rest = rest[balance_match.get(0)?.end()..].trim_start();

    let mut parts = WHITESPACE.splitn(rest, 2);
    let summary = parts.next().unwrap_or("").to_string();
    let counterparty = parts.next().unwrap_or("").trim().to_string();

    Some(ParsedRow {
        txn_date,
        currency,
        amount,
        balance: Some(balance),
        summary,
        counterparty,
        raw_line: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn tokenizer_recovers_all_fields() {
        let row = parse_data_line("2024-03-08  CNY  -1,234.56  10,000.00  消费  某某超市").unwrap();
        assert_eq!(row.txn_date, NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
        assert_eq!(row.currency, "CNY");
        assert_eq!(row.amount, Decimal::from_str("-1234.56").unwrap());
        assert_eq!(row.balance, Some(Decimal::from_str("10000.00").unwrap()));
        assert_eq!(row.summary, "消费");
        assert_eq!(row.counterparty, "某某超市");
    }

    #[test]
    fn counterparty_may_be_empty() {
        let row = parse_data_line("2024-03-08 CNY 50.00 100.00 工资").unwrap();
        assert_eq!(row.summary, "工资");
        assert_eq!(row.counterparty, "");
    }

    #[test]
    fn counterparty_keeps_internal_whitespace() {
        let row = parse_data_line("2024-03-08 CNY 50.00 100.00 转账 招商银行 北京分行").unwrap();
        assert_eq!(row.counterparty, "招商银行 北京分行");
    }

    #[test]
    fn line_without_date_anchor_is_rejected() {
        assert!(parse_data_line("CNY -100.00 200.00 消费 超市").is_none());
        assert!(parse_data_line("2024-03-08消费").is_none());
    }

    #[test]
    fn malformed_amount_is_rejected() {
        // three decimal places
        assert!(parse_data_line("2024-03-08 CNY -100.123 200.00 消费").is_none());
        // no decimal places
        assert!(parse_data_line("2024-03-08 CNY -100 200.00 消费").is_none());
        // negative balance
        assert!(parse_data_line("2024-03-08 CNY -100.00 -200.00 消费").is_none());
        // missing currency
        assert!(parse_data_line("2024-03-08 -100.00 200.00 消费").is_none());
    }

    #[test]
    fn invalid_calendar_date_is_rejected() {
        assert!(parse_data_line("2024-13-40 CNY -100.00 200.00 消费").is_none());
    }

    #[test]
    fn header_lines_need_four_keywords() {
        assert_eq!(
            classify_line("记账日期  货币  交易金额  联机余额  交易摘要  对手信息"),
            LineKind::Header
        );
        assert_eq!(
            classify_line("Date  Currency  Amount  Balance  Transaction Type  Counter Party"),
            LineKind::EnglishHeader
        );
        // two keywords are not enough
        assert_eq!(classify_line("货币 交易金额"), LineKind::Freeform);
    }

    #[test]
    fn data_line_takes_precedence_over_english_header() {
        // a data row whose text echoes header terms must stay a data row
        assert_eq!(
            classify_line("2024-03-08 CNY 1.00 2.00 Transaction Date Currency Amount Balance"),
            LineKind::Data
        );
    }

    #[test]
    fn page_footer_detection() {
        assert_eq!(classify_line("3/12"), LineKind::PageFooter);
        assert_eq!(classify_line("  1/1  "), LineKind::PageFooter);
        assert_eq!(classify_line("3/12 of transactions"), LineKind::Freeform);
        assert_eq!(classify_line(""), LineKind::Blank);
    }
}
