//! # billscan_core
//!
//! Core library of billscan, a household bank statement ingestion tool.
//! It parses text extracted from statement PDF files into transaction rows,
//! classifies them into ordinary and investment transactions, deduplicates
//! them against previously stored data and persists the result in a
//! PostgreSQL database.
use serde::Deserialize;

pub mod classify;
pub mod postgres;
pub mod read_pdf;
pub mod rules;
pub mod settings;
pub mod statements;

/// Configuration parameters
#[derive(Debug, Deserialize)]
pub struct Config {
    pub db: DbParams,
    pub parse: ParseParams,
    #[serde(default)]
    pub debug: bool,
}

/// Database parameters
#[derive(Debug, Deserialize)]
pub struct DbParams {
    pub url: String,
}

/// Parameters for statement file parsing
#[derive(Debug, Deserialize)]
pub struct ParseParams {
    /// Directory where uploaded statement files are stored before parsing
    pub doc_path: String,
    /// Fail with `AlreadyParsed` if a byte-identical file was ingested before,
    /// otherwise re-parse silently and rely on row level deduplication
    #[serde(default)]
    pub warn_old: bool,
    /// User id to assign uploads to when the caller does not provide one
    #[serde(default)]
    pub default_user: Option<i64>,
}
