//! Extract the account holder name from statement text
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // The label reads "户  名：<name>"; the gaps may be ordinary whitespace
    // or non-breaking spaces, and the colon full- or half-width.
    static ref ACCOUNT_HOLDER: Regex =
        Regex::new(r"户[\s\x{00A0}]+名[\s\x{00A0}]*[：:][\s\x{00A0}]*([^\s\x{00A0}\n]+)").unwrap();
}

/// Find the account holder name, the first non-whitespace token after the
/// label's colon. Only the first page of a statement carries the label.
pub fn parse_account_name(text: &str) -> Option<String> {
    ACCOUNT_HOLDER
        .captures(text)
        .map(|cap| cap[1].to_string())
}
