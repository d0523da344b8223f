//! Statement uploads and transactions, with a PostgreSQL handler
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{QueryBuilder, Row};
use thiserror::Error;

use crate::postgres::PostgresDB;
use crate::settings::SettingHandler;

/// Error related to statement storage
#[derive(Error, Debug)]
pub enum DataError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("insert failed: {0}")]
    InsertFailed(String),
    #[error("update failed: {0}")]
    UpdateFailed(String),
    #[error("data access failure: {0}")]
    DataAccessFailure(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid data: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Ordinary,
    Investment,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ordinary => "ordinary",
            Category::Investment => "investment",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Category, DataError> {
        match s {
            "ordinary" => Ok(Category::Ordinary),
            "investment" => Ok(Category::Investment),
            _ => Err(DataError::Invalid(format!("unknown category '{s}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Expense,
    Income,
    Buy,
    Redeem,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Expense => "expense",
            Direction::Income => "income",
            Direction::Buy => "buy",
            Direction::Redeem => "redeem",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Direction {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Direction, DataError> {
        match s {
            "expense" => Ok(Direction::Expense),
            "income" => Ok(Direction::Income),
            "buy" => Ok(Direction::Buy),
            "redeem" => Ok(Direction::Redeem),
            _ => Err(DataError::Invalid(format!("unknown direction '{s}'"))),
        }
    }
}

/// Lifecycle of an uploaded statement file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Success => "success",
            FileStatus::Failed => "failed",
        }
    }
}

impl FromStr for FileStatus {
    type Err = DataError;

    fn from_str(s: &str) -> Result<FileStatus, DataError> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "success" => Ok(FileStatus::Success),
            "failed" => Ok(FileStatus::Failed),
            _ => Err(DataError::Invalid(format!("unknown file status '{s}'"))),
        }
    }
}

/// One uploaded statement file. The record is the single source of truth for
/// the outcome of an upload; whenever the status is terminal the counters
/// satisfy `total_rows = inserted_rows + dedup_rows + failed_rows`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementFile {
    pub id: Option<i64>,
    pub user_id: i64,
    pub file_name: String,
    pub file_hash: String,
    pub file_path: Option<String>,
    pub account_name: Option<String>,
    pub status: FileStatus,
    pub total_rows: i32,
    pub inserted_rows: i32,
    pub dedup_rows: i32,
    pub failed_rows: i32,
    pub error_msg: Option<String>,
    pub created_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
}

impl StatementFile {
    pub fn new(user_id: i64, file_name: String, file_hash: String, file_path: String) -> StatementFile {
        StatementFile {
            id: None,
            user_id,
            file_name,
            file_hash,
            file_path: Some(file_path),
            account_name: None,
            status: FileStatus::Pending,
            total_rows: 0,
            inserted_rows: 0,
            dedup_rows: 0,
            failed_rows: 0,
            error_msg: None,
            created_at: Utc::now().naive_utc(),
            finished_at: None,
        }
    }
}

/// One accepted transaction row. `summary` holds the text after replacement
/// rules were applied, `summary_original` the text as found in the statement;
/// the latter never changes so rule reruns stay idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementTransaction {
    pub id: Option<i64>,
    pub user_id: i64,
    pub file_id: i64,
    pub txn_date: NaiveDate,
    pub currency: String,
    pub amount: Decimal,
    pub balance: Option<Decimal>,
    pub summary: String,
    pub summary_original: String,
    pub counterparty: String,
    pub account_name: Option<String>,
    pub category: Category,
    pub direction: Direction,
    pub dedup_key: String,
    pub raw_line: String,
    pub created_at: NaiveDateTime,
}

/// Filter for transaction queries; `None` fields do not constrain the result.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<i64>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub category: Option<Category>,
    pub direction: Option<Direction>,
    /// Case-insensitive substring over summary and counterparty
    pub keyword: Option<String>,
    pub account_name: Option<String>,
    pub counterparty: Option<String>,
    pub amount_sign: Option<AmountSign>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSign {
    Negative,
    Positive,
}

impl FromStr for AmountSign {
    type Err = DataError;

    fn from_str(s: &str) -> Result<AmountSign, DataError> {
        match s {
            "negative" => Ok(AmountSign::Negative),
            "positive" => Ok(AmountSign::Positive),
            _ => Err(DataError::Invalid(format!("unknown amount sign '{s}'"))),
        }
    }
}

/// Sum of amounts per month, category and direction
#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    pub month: String,
    pub category: Category,
    pub direction: Direction,
    pub total_amount: Decimal,
}

/// Handler for statement uploads and their transactions
#[async_trait]
pub trait StatementHandler {
    /// Drop all statement tables and re-create them
    async fn clean_statements(&self) -> Result<(), sqlx::Error>;

    /// Set up tables for statement management
    async fn init_statements(&self) -> Result<(), sqlx::Error>;

    /// Insert a new upload record, returning its id
    async fn insert_file(&self, file: &StatementFile) -> Result<i64, DataError>;

    /// Persist status, counters and timestamps of an upload record
    async fn update_file(&self, file: &StatementFile) -> Result<(), DataError>;

    /// Get upload record by id
    async fn get_file(&self, id: i64) -> Result<StatementFile, DataError>;

    /// Check whether a successfully parsed upload with the given content hash
    /// exists already; returns its id if so
    async fn lookup_file_hash(&self, hash: &str) -> Result<Option<i64>, DataError>;

    /// Check whether a transaction with the given dedup key is stored already
    async fn exists_by_dedup_key(&self, key: &str) -> Result<bool, DataError>;

    /// Insert a batch of transaction rows atomically; either all new rows of
    /// the batch are stored or none. Rows whose dedup key is already present
    /// are skipped and counted as duplicates. Returns `(inserted, duplicates)`.
    async fn insert_transactions(
        &self,
        transactions: &[StatementTransaction],
    ) -> Result<(i32, i32), DataError>;

    /// Get all transactions belonging to one upload
    async fn get_transactions_by_file(
        &self,
        file_id: i64,
    ) -> Result<Vec<StatementTransaction>, DataError>;

    /// Get a single transaction by id
    async fn get_transaction(&self, id: i64) -> Result<StatementTransaction, DataError>;

    /// Get transactions by id, restricted to rows owned by the given user
    async fn get_transactions_by_ids(
        &self,
        ids: &[i64],
        user_id: i64,
    ) -> Result<Vec<StatementTransaction>, DataError>;

    /// Get all transactions of one user
    async fn get_transactions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<StatementTransaction>, DataError>;

    /// Replace the processed summary of a single transaction
    async fn set_summary(&self, id: i64, summary: &str) -> Result<(), DataError>;

    /// Persist re-classification results for one transaction
    async fn update_classification(
        &self,
        id: i64,
        category: Category,
        direction: Direction,
        summary: &str,
    ) -> Result<(), DataError>;

    /// Search transactions with optional filters, newest first
    async fn search(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<StatementTransaction>, DataError>;

    /// Sum amounts grouped by month, category and direction
    async fn summarize_by_month(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<MonthlySummary>, DataError>;

    /// Distinct account names seen in a user's transactions, sorted
    async fn account_names(&self, user_id: i64) -> Result<Vec<String>, DataError>;
}

/// Everything the ingestion and rerun paths need from the database
pub trait StatementStore: StatementHandler + SettingHandler {}

impl<T: StatementHandler + SettingHandler + ?Sized> StatementStore for T {}

/// Replace the processed summary of a transaction on behalf of a user.
/// Fails with `NotFound` for unknown ids and `Forbidden` for foreign rows.
pub async fn update_transaction_summary(
    db: &(dyn StatementHandler + Send + Sync),
    user_id: i64,
    id: i64,
    new_summary: &str,
) -> Result<StatementTransaction, DataError> {
    let mut transaction = db.get_transaction(id).await?;
    if transaction.user_id != user_id {
        return Err(DataError::Forbidden(format!(
            "transaction {id} does not belong to user {user_id}"
        )));
    }
    db.set_summary(id, new_summary).await?;
    transaction.summary = new_summary.to_string();
    Ok(transaction)
}

const TRANSACTION_COLUMNS: &str = "id, user_id, file_id, txn_date, currency, amount, balance, \
     summary, summary_original, counterparty, account_name, category, direction, \
     dedup_key, raw_line, created_at";

fn transaction_from_row(row: &PgRow) -> Result<StatementTransaction, DataError> {
    let category: String = get(row, "category")?;
    let direction: String = get(row, "direction")?;
    Ok(StatementTransaction {
        id: Some(get(row, "id")?),
        user_id: get(row, "user_id")?,
        file_id: get(row, "file_id")?,
        txn_date: get(row, "txn_date")?,
        currency: get(row, "currency")?,
        amount: get(row, "amount")?,
        balance: get(row, "balance")?,
        summary: get(row, "summary")?,
        summary_original: get(row, "summary_original")?,
        counterparty: get(row, "counterparty")?,
        account_name: get(row, "account_name")?,
        category: Category::from_str(&category)?,
        direction: Direction::from_str(&direction)?,
        dedup_key: get(row, "dedup_key")?,
        raw_line: get(row, "raw_line")?,
        created_at: get(row, "created_at")?,
    })
}

fn file_from_row(row: &PgRow) -> Result<StatementFile, DataError> {
    let status: String = get(row, "status")?;
    Ok(StatementFile {
        id: Some(get(row, "id")?),
        user_id: get(row, "user_id")?,
        file_name: get(row, "file_name")?,
        file_hash: get(row, "file_hash")?,
        file_path: get(row, "file_path")?,
        account_name: get(row, "account_name")?,
        status: FileStatus::from_str(&status)?,
        total_rows: get(row, "total_rows")?,
        inserted_rows: get(row, "inserted_rows")?,
        dedup_rows: get(row, "dedup_rows")?,
        failed_rows: get(row, "failed_rows")?,
        error_msg: get(row, "error_msg")?,
        created_at: get(row, "created_at")?,
        finished_at: get(row, "finished_at")?,
    })
}

fn get<'r, T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>>(
    row: &'r PgRow,
    column: &str,
) -> Result<T, DataError> {
    row.try_get(column)
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))
}

#[async_trait]
impl StatementHandler for PostgresDB {
    async fn clean_statements(&self) -> Result<(), sqlx::Error> {
        sqlx::query("DROP TABLE IF EXISTS statement_transactions")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS statement_files")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS settings")
            .execute(&self.pool)
            .await?;
        self.init_statements().await?;
        Ok(())
    }

    async fn init_statements(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS statement_files (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                file_name TEXT NOT NULL,
                file_hash TEXT NOT NULL,
                file_path TEXT,
                account_name TEXT,
                status TEXT NOT NULL,
                total_rows INTEGER NOT NULL DEFAULT 0,
                inserted_rows INTEGER NOT NULL DEFAULT 0,
                dedup_rows INTEGER NOT NULL DEFAULT 0,
                failed_rows INTEGER NOT NULL DEFAULT 0,
                error_msg TEXT,
                created_at TIMESTAMP NOT NULL,
                finished_at TIMESTAMP)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS statement_transactions (
                id BIGSERIAL PRIMARY KEY,
                user_id BIGINT NOT NULL,
                file_id BIGINT NOT NULL,
                txn_date DATE NOT NULL,
                currency TEXT NOT NULL,
                amount NUMERIC(15,2) NOT NULL,
                balance NUMERIC(15,2),
                summary TEXT NOT NULL,
                summary_original TEXT NOT NULL,
                counterparty TEXT NOT NULL,
                account_name TEXT,
                category TEXT NOT NULL,
                direction TEXT NOT NULL,
                dedup_key TEXT NOT NULL UNIQUE,
                raw_line TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY(file_id) REFERENCES statement_files(id))",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_statement_transactions_date
                ON statement_transactions (txn_date)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_statement_transactions_category_direction
                ON statement_transactions (category, direction)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_statement_transactions_account_name
                ON statement_transactions (account_name)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                description TEXT)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_file(&self, file: &StatementFile) -> Result<i64, DataError> {
        let row = sqlx::query(
            "INSERT INTO statement_files (user_id, file_name, file_hash, file_path,
                account_name, status, total_rows, inserted_rows, dedup_rows, failed_rows,
                error_msg, created_at, finished_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
             RETURNING id",
        )
        .bind(file.user_id)
        .bind(&file.file_name)
        .bind(&file.file_hash)
        .bind(&file.file_path)
        .bind(&file.account_name)
        .bind(file.status.as_str())
        .bind(file.total_rows)
        .bind(file.inserted_rows)
        .bind(file.dedup_rows)
        .bind(file.failed_rows)
        .bind(&file.error_msg)
        .bind(file.created_at)
        .bind(file.finished_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| DataError::InsertFailed(e.to_string()))?;
        get(&row, "id")
    }

    async fn update_file(&self, file: &StatementFile) -> Result<(), DataError> {
        let id = file
            .id
            .ok_or_else(|| DataError::UpdateFailed("upload record has no id".to_string()))?;
        sqlx::query(
            "UPDATE statement_files SET account_name=$2, status=$3, total_rows=$4,
                inserted_rows=$5, dedup_rows=$6, failed_rows=$7, error_msg=$8, finished_at=$9
             WHERE id=$1",
        )
        .bind(id)
        .bind(&file.account_name)
        .bind(file.status.as_str())
        .bind(file.total_rows)
        .bind(file.inserted_rows)
        .bind(file.dedup_rows)
        .bind(file.failed_rows)
        .bind(&file.error_msg)
        .bind(file.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DataError::UpdateFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_file(&self, id: i64) -> Result<StatementFile, DataError> {
        let row = sqlx::query(
            "SELECT id, user_id, file_name, file_hash, file_path, account_name, status,
                total_rows, inserted_rows, dedup_rows, failed_rows, error_msg,
                created_at, finished_at
             FROM statement_files WHERE id=$1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?
        .ok_or_else(|| DataError::NotFound(format!("no upload with id {id}")))?;
        file_from_row(&row)
    }

    async fn lookup_file_hash(&self, hash: &str) -> Result<Option<i64>, DataError> {
        let row = sqlx::query(
            "SELECT id FROM statement_files WHERE file_hash=$1 AND status='success' LIMIT 1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        match row {
            Some(row) => Ok(Some(get(&row, "id")?)),
            None => Ok(None),
        }
    }

    async fn exists_by_dedup_key(&self, key: &str) -> Result<bool, DataError> {
        let row = sqlx::query("SELECT 1 AS found FROM statement_transactions WHERE dedup_key=$1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn insert_transactions(
        &self,
        transactions: &[StatementTransaction],
    ) -> Result<(i32, i32), DataError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DataError::InsertFailed(e.to_string()))?;
        let mut inserted = 0;
        let mut dedup = 0;
        for transaction in transactions {
            // A concurrent upload of identical data may have stored the key
            // since the pre-insert check; that is a duplicate, not a failure.
            let row = sqlx::query(
                "INSERT INTO statement_transactions (user_id, file_id, txn_date, currency,
                    amount, balance, summary, summary_original, counterparty, account_name,
                    category, direction, dedup_key, raw_line, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                 ON CONFLICT (dedup_key) DO NOTHING
                 RETURNING id",
            )
            .bind(transaction.user_id)
            .bind(transaction.file_id)
            .bind(transaction.txn_date)
            .bind(&transaction.currency)
            .bind(transaction.amount)
            .bind(transaction.balance)
            .bind(&transaction.summary)
            .bind(&transaction.summary_original)
            .bind(&transaction.counterparty)
            .bind(&transaction.account_name)
            .bind(transaction.category.as_str())
            .bind(transaction.direction.as_str())
            .bind(&transaction.dedup_key)
            .bind(&transaction.raw_line)
            .bind(transaction.created_at)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| DataError::InsertFailed(e.to_string()))?;
            match row {
                Some(_) => inserted += 1,
                None => dedup += 1,
            }
        }
        tx.commit()
            .await
            .map_err(|e| DataError::InsertFailed(e.to_string()))?;
        Ok((inserted, dedup))
    }

    async fn get_transactions_by_file(
        &self,
        file_id: i64,
    ) -> Result<Vec<StatementTransaction>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM statement_transactions
             WHERE file_id=$1 ORDER BY id"
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn get_transaction(&self, id: i64) -> Result<StatementTransaction, DataError> {
        let row = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM statement_transactions WHERE id=$1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?
        .ok_or_else(|| DataError::NotFound(format!("no transaction with id {id}")))?;
        transaction_from_row(&row)
    }

    async fn get_transactions_by_ids(
        &self,
        ids: &[i64],
        user_id: i64,
    ) -> Result<Vec<StatementTransaction>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM statement_transactions
             WHERE id = ANY($1) AND user_id=$2 ORDER BY id"
        ))
        .bind(ids.to_vec())
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn get_transactions_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<StatementTransaction>, DataError> {
        let rows = sqlx::query(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM statement_transactions
             WHERE user_id=$1 ORDER BY id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn set_summary(&self, id: i64, summary: &str) -> Result<(), DataError> {
        sqlx::query("UPDATE statement_transactions SET summary=$2 WHERE id=$1")
            .bind(id)
            .bind(summary)
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::UpdateFailed(e.to_string()))?;
        Ok(())
    }

    async fn update_classification(
        &self,
        id: i64,
        category: Category,
        direction: Direction,
        summary: &str,
    ) -> Result<(), DataError> {
        sqlx::query(
            "UPDATE statement_transactions SET category=$2, direction=$3, summary=$4 WHERE id=$1",
        )
        .bind(id)
        .bind(category.as_str())
        .bind(direction.as_str())
        .bind(summary)
        .execute(&self.pool)
        .await
        .map_err(|e| DataError::UpdateFailed(e.to_string()))?;
        Ok(())
    }

    async fn search(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<StatementTransaction>, DataError> {
        let mut query = QueryBuilder::<sqlx::Postgres>::new(format!(
            "SELECT {TRANSACTION_COLUMNS} FROM statement_transactions WHERE 1=1"
        ));
        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(start) = filter.start_date {
            query.push(" AND txn_date >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            query.push(" AND txn_date <= ").push_bind(end);
        }
        if let Some(category) = filter.category {
            query.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(direction) = filter.direction {
            query.push(" AND direction = ").push_bind(direction.as_str());
        }
        if let Some(keyword) = &filter.keyword {
            let pattern = format!("%{}%", keyword.to_lowercase());
            query
                .push(" AND (LOWER(summary) LIKE ")
                .push_bind(pattern.clone())
                .push(" OR LOWER(counterparty) LIKE ")
                .push_bind(pattern)
                .push(")");
        }
        if let Some(account_name) = &filter.account_name {
            query
                .push(" AND LOWER(COALESCE(account_name, '')) LIKE ")
                .push_bind(format!("%{}%", account_name.to_lowercase()));
        }
        if let Some(counterparty) = &filter.counterparty {
            query
                .push(" AND LOWER(counterparty) LIKE ")
                .push_bind(format!("%{}%", counterparty.to_lowercase()));
        }
        match filter.amount_sign {
            Some(AmountSign::Negative) => {
                query.push(" AND amount < 0");
            }
            Some(AmountSign::Positive) => {
                query.push(" AND amount >= 0");
            }
            None => {}
        }
        query.push(" ORDER BY txn_date DESC, id DESC");
        let rows = query
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn summarize_by_month(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<MonthlySummary>, DataError> {
        let rows = sqlx::query(
            "SELECT to_char(txn_date, 'YYYY-MM') AS month, category, direction,
                SUM(amount) AS total_amount
             FROM statement_transactions
             WHERE ($1::date IS NULL OR txn_date >= $1)
               AND ($2::date IS NULL OR txn_date <= $2)
             GROUP BY 1, 2, 3
             ORDER BY 1, 2, 3",
        )
        .bind(start_date)
        .bind(end_date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        let mut summaries = Vec::new();
        for row in rows {
            let category: String = get(&row, "category")?;
            let direction: String = get(&row, "direction")?;
            summaries.push(MonthlySummary {
                month: get(&row, "month")?,
                category: Category::from_str(&category)?,
                direction: Direction::from_str(&direction)?,
                total_amount: get(&row, "total_amount")?,
            });
        }
        Ok(summaries)
    }

    async fn account_names(&self, user_id: i64) -> Result<Vec<String>, DataError> {
        let rows = sqlx::query(
            "SELECT DISTINCT account_name FROM statement_transactions
             WHERE user_id=$1 AND account_name IS NOT NULL AND account_name <> ''
             ORDER BY account_name",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DataError::DataAccessFailure(e.to_string()))?;
        rows.iter().map(|row| get(row, "account_name")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trip() {
        for category in [Category::Ordinary, Category::Investment] {
            assert_eq!(Category::from_str(category.as_str()).unwrap(), category);
        }
        for direction in [
            Direction::Expense,
            Direction::Income,
            Direction::Buy,
            Direction::Redeem,
        ] {
            assert_eq!(Direction::from_str(direction.as_str()).unwrap(), direction);
        }
        assert!(Category::from_str("other").is_err());
        assert!(Direction::from_str("transfer").is_err());
    }

    #[test]
    fn new_file_starts_pending_with_zero_counters() {
        let file = StatementFile::new(
            7,
            "statement.pdf".to_string(),
            "ABCD".to_string(),
            "/tmp/statement.pdf".to_string(),
        );
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(
            file.total_rows,
            file.inserted_rows + file.dedup_rows + file.failed_rows
        );
        assert!(file.finished_at.is_none());
    }
}
