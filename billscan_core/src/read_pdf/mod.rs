//! # Parse statement pdf files and ingest their transaction rows
//! Text extraction requires the extern tool `pdftotext`
//! which is part of [XpdfReader](https://www.xpdfreader.com/pdftotext-man.html).
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::{io, string};

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sanitize_filename::sanitize;
use thiserror::Error;

use crate::rules::{self, RuleSet};
use crate::statements::{DataError, FileStatus, StatementFile, StatementStore, StatementTransaction};
use crate::ParseParams;

pub mod dedup;
pub mod pdf_store;
mod read_account_info;
mod read_rows;

use dedup::DedupSequencer;
pub use pdf_store::{sha256_hash, store_statement_file};
use read_account_info::parse_account_name;
pub use read_rows::{classify_line, parse_data_line, LineKind};

/// Error related to statement parsing and ingestion
#[derive(Error, Debug)]
pub enum ReadPdfError {
    #[error("Reading file failed")]
    IoError(#[from] io::Error),
    #[error("UTF8 parse error")]
    ParseError(#[from] string::FromUtf8Error),
    #[error("Text extraction failed: {0}")]
    ExtractionFailed(String),
    #[error("Database error: {0}")]
    DBError(#[from] DataError),
    #[error("File has already been parsed successfully")]
    AlreadyParsed,
}

/// One transaction row as found in the statement, before classification
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub txn_date: NaiveDate,
    pub currency: String,
    pub amount: Decimal,
    pub balance: Option<Decimal>,
    /// Raw transaction type / summary text, before replacement rules
    pub summary: String,
    /// May be empty when the statement wrapped it onto following lines
    pub counterparty: String,
    pub raw_line: String,
}

/// Outcome of parsing one statement file. Rows are in extraction order,
/// which is not necessarily date order.
#[derive(Debug, Clone, Default)]
pub struct ParseResult {
    pub account_name: Option<String>,
    pub rows: Vec<ParsedRow>,
    /// Data lines the tokenizer rejected
    pub failed_rows: usize,
}

/// Row counters of one completed ingestion;
/// `total = inserted + dedup + failed` always holds.
#[derive(Debug, Clone, Copy)]
pub struct IngestCounters {
    pub total: i32,
    pub inserted: i32,
    pub dedup: i32,
    pub failed: i32,
}

pub fn text_from_pdf(file: &Path) -> Result<String, ReadPdfError> {
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg("-q")
        .arg(file)
        .arg("-")
        .output()?;
    if !output.status.success() {
        return Err(ReadPdfError::ExtractionFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8(output.stdout)?)
}

/// Reconstruct transaction rows from extracted statement text. Pages are
/// separated by form feeds and processed in document order; the account
/// holder name is only searched for on the first page.
///
/// Continuation handling uses forward look-ahead: when a data row has an
/// empty counterparty, up to two following freeform lines are consumed and
/// concatenated into the counterparty field. Header, footer and further data
/// lines are never consumed as continuation text.
pub fn parse_statement(text: &str) -> ParseResult {
    let mut result = ParseResult::default();
    for (page_no, page) in text.split('\u{c}').enumerate() {
        if page_no == 0 {
            result.account_name = parse_account_name(page);
        }
        let lines: Vec<&str> = page.lines().collect();
        let mut i = 0;
        while i < lines.len() {
            let line = lines[i].trim();
            if classify_line(line) != LineKind::Data {
                i += 1;
                continue;
            }
            match parse_data_line(line) {
                Some(mut row) => {
                    let mut consumed = 1;
                    if row.counterparty.is_empty() {
                        let mut pieces: Vec<&str> = Vec::new();
                        for candidate in lines.iter().skip(i + 1).take(2) {
                            let candidate = candidate.trim();
                            if classify_line(candidate) == LineKind::Freeform {
                                pieces.push(candidate);
                                consumed += 1;
                            } else {
                                break;
                            }
                        }
                        row.counterparty = pieces.concat();
                    }
                    result.rows.push(row);
                    i += consumed;
                }
                None => {
                    log::debug!("rejected malformed data line: {line}");
                    result.failed_rows += 1;
                    i += 1;
                }
            }
        }
    }
    result
}

/// Classify, deduplicate and store the parsed rows of one upload. All
/// accepted rows go to the database as one atomic batch, so a storage error
/// never leaves a partially ingested file behind.
async fn ingest_rows(
    db: &(dyn StatementStore + Send + Sync),
    file_id: i64,
    user_id: i64,
    parsed: &ParseResult,
    rules: &RuleSet,
) -> Result<IngestCounters, ReadPdfError> {
    let mut sequencer = DedupSequencer::new();
    let mut batch = Vec::new();
    let mut dedup = 0;
    for row in &parsed.rows {
        let dedup_key = sequencer.key_for(row.txn_date, row.amount);
        if db.exists_by_dedup_key(&dedup_key).await? {
            dedup += 1;
            continue;
        }
        let summary = rules.apply(&row.summary, &row.counterparty);
        let (category, direction) =
            crate::classify::classify(&row.summary, &row.counterparty, row.amount, &rules.keywords);
        batch.push(StatementTransaction {
            id: None,
            user_id,
            file_id,
            txn_date: row.txn_date,
            currency: row.currency.clone(),
            amount: row.amount,
            balance: row.balance,
            summary,
            summary_original: row.summary.clone(),
            counterparty: row.counterparty.clone(),
            account_name: parsed.account_name.clone(),
            category,
            direction,
            dedup_key,
            raw_line: row.raw_line.clone(),
            created_at: Utc::now().naive_utc(),
        });
    }
    let (inserted, race_dedup) = db.insert_transactions(&batch).await?;
    Ok(IngestCounters {
        total: (parsed.rows.len() + parsed.failed_rows) as i32,
        inserted,
        dedup: dedup + race_dedup,
        failed: parsed.failed_rows as i32,
    })
}

/// Ingest one uploaded statement file: store the raw file, parse it, classify
/// and deduplicate the rows and persist them together with an upload record
/// tracking status and row counters. On failure the upload record is left in
/// the `failed` state with the error message and the error is propagated.
pub async fn parse_and_store(
    path: &Path,
    file_name: &str,
    user_id: i64,
    db: Arc<dyn StatementStore + Send + Sync>,
    params: &ParseParams,
) -> Result<StatementFile, ReadPdfError> {
    let file_name = sanitize(file_name);
    let stored_path = store_statement_file(path, &file_name, params)?;
    let hash = sha256_hash(&stored_path)?;
    if params.warn_old && db.lookup_file_hash(&hash).await?.is_some() {
        return Err(ReadPdfError::AlreadyParsed);
    }

    let mut file = StatementFile::new(user_id, file_name, hash, stored_path.display().to_string());
    file.status = FileStatus::Processing;
    let id = db.insert_file(&file).await?;
    file.id = Some(id);

    let outcome = async {
        let text = text_from_pdf(&stored_path)?;
        let parsed = parse_statement(&text);
        let rules = rules::load_rules(&*db).await;
        let counters = ingest_rows(&*db, id, user_id, &parsed, &rules).await?;
        Ok::<_, ReadPdfError>((parsed.account_name, counters))
    }
    .await;

    file.finished_at = Some(Utc::now().naive_utc());
    match outcome {
        Ok((account_name, counters)) => {
            file.account_name = account_name;
            file.status = FileStatus::Success;
            file.total_rows = counters.total;
            file.inserted_rows = counters.inserted;
            file.dedup_rows = counters.dedup;
            file.failed_rows = counters.failed;
            db.update_file(&file).await?;
            log::info!(
                "upload {id}: {} rows, {} inserted, {} duplicates, {} failed",
                counters.total,
                counters.inserted,
                counters.dedup,
                counters.failed
            );
            Ok(file)
        }
        Err(err) => {
            file.status = FileStatus::Failed;
            file.error_msg = Some(err.to_string());
            if let Err(update_err) = db.update_file(&file).await {
                log::error!("could not persist failed state of upload {id}: {update_err}");
            }
            Err(err)
        }
    }
}
