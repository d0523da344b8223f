//! # billscan_cli
//!
//! Command line front end for ingesting household bank statement pdf files
//! and working with the stored transactions.

use std::fs;
use std::io::stdout;
use std::path::Path;
use std::process::exit;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use glob::glob;

use billscan_core::postgres::PostgresDB;
use billscan_core::read_pdf::{parse_and_store, sha256_hash, ReadPdfError};
use billscan_core::rules::{load_rules, save_rules, RerunEngine, RuleSet};
use billscan_core::statements::{
    update_transaction_summary, AmountSign, Category, Direction, StatementHandler,
    TransactionFilter,
};
use billscan_core::Config;

#[derive(Parser)]
#[command(
    name = "billscan",
    version,
    about = "Parse household bank statement pdf files and manage the resulting transactions"
)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "file", default_value = "billscan.toml")]
    config: String,
    /// Prints additional information for debugging purposes
    #[arg(short, long)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up the statement tables
    InitDb,
    /// Clears all data in database. Use with care!
    CleanDb,
    /// Calculate SHA256 hash sum of given file
    Hash {
        /// Input file of which to calculate hash from
        input: String,
    },
    /// Parse one or more statement pdf files and insert their transactions
    /// into the database
    Parse {
        /// Path of pdf file or directory
        path: String,
        /// Parse all pdf files in the given directory
        #[arg(short = 'D', long)]
        directory: bool,
        /// Fail if a byte-identical file has already been parsed, instead of
        /// re-parsing and relying on row deduplication
        #[arg(long = "warn-if-old")]
        warn_old: bool,
        /// User to assign the upload to, overrides the configured default
        #[arg(short, long)]
        user: Option<i64>,
    },
    /// Show the upload record of a parsed file
    Status {
        /// Id of the upload record
        id: i64,
    },
    /// List stored transactions, newest first
    List {
        #[arg(short, long)]
        user: Option<i64>,
        /// Earliest transaction date (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<NaiveDate>,
        /// Latest transaction date (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<NaiveDate>,
        /// Restrict to ordinary or investment transactions
        #[arg(long)]
        category: Option<Category>,
        /// Restrict to expense, income, buy or redeem
        #[arg(long)]
        direction: Option<Direction>,
        /// Case-insensitive substring over summary and counterparty
        #[arg(short, long)]
        keyword: Option<String>,
        /// Substring filter on the account holder name
        #[arg(short, long)]
        account: Option<String>,
        /// Substring filter on the counterparty
        #[arg(long)]
        counterparty: Option<String>,
        /// Restrict by amount sign: negative or positive
        #[arg(long)]
        sign: Option<AmountSign>,
        /// Display output in JSON format (default is csv)
        #[arg(short, long)]
        json: bool,
    },
    /// Sum amounts per month, category and direction
    Summary {
        /// Earliest transaction date (YYYY-MM-DD)
        #[arg(short, long)]
        start: Option<NaiveDate>,
        /// Latest transaction date (YYYY-MM-DD)
        #[arg(short, long)]
        end: Option<NaiveDate>,
        /// Display output in JSON format (default is csv)
        #[arg(short, long)]
        json: bool,
    },
    /// Show or replace the stored classification rule configuration
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Re-apply the current rules to already stored transactions
    Rerun {
        #[command(subcommand)]
        action: RerunAction,
    },
    /// List the distinct account names found in a user's transactions
    Accounts {
        #[arg(short, long)]
        user: Option<i64>,
    },
    /// Replace the summary text of a single transaction
    SetSummary {
        #[arg(short, long)]
        user: Option<i64>,
        /// Id of the transaction
        #[arg(short, long)]
        id: i64,
        /// New summary text
        #[arg(long)]
        summary: String,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// Print the stored rule configuration as JSON
    Show,
    /// Validate and store a rule configuration read from a JSON file
    Set {
        /// Path of the JSON file with the rule configuration
        file: String,
    },
}

#[derive(Subcommand)]
enum RerunAction {
    /// Show the changes the current rules would make, without persisting
    Preview {
        #[arg(short, long)]
        user: Option<i64>,
    },
    /// Re-classify exactly the given transaction ids
    Execute {
        #[arg(short, long)]
        user: Option<i64>,
        /// Comma separated transaction ids, e.g. 5,12,13
        #[arg(short, long, value_delimiter = ',', required = true)]
        ids: Vec<i64>,
    },
}

fn resolve_user(arg: Option<i64>, config: &Config) -> i64 {
    match arg.or(config.parse.default_user) {
        Some(id) => id,
        None => {
            eprintln!("No user id given; pass --user or set default_user in the config file.");
            exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config_file = fs::read_to_string(&cli.config).unwrap_or_else(|err| {
        eprintln!("Could not read config file '{}': {}", cli.config, err);
        exit(1);
    });
    let mut config: Config = toml::from_str(&config_file).unwrap_or_else(|err| {
        eprintln!("Could not parse config file '{}': {}", cli.config, err);
        exit(1);
    });
    if cli.debug {
        config.debug = true;
    }

    let db = PostgresDB::new(&config.db.url).await.unwrap_or_else(|err| {
        eprintln!("Could not connect to database: {err}");
        exit(1);
    });
    let db = Arc::new(db);

    match cli.command {
        Commands::InitDb => {
            db.init_statements().await.unwrap();
            println!("Statement tables are set up.");
        }
        Commands::CleanDb => {
            print!("Cleaning database...");
            db.clean_statements().await.unwrap();
            println!("done");
        }
        Commands::Hash { input } => {
            let file = Path::new(&input);
            match sha256_hash(file) {
                Ok(hash) => println!("Hash is {hash}."),
                Err(err) => {
                    println!("Failed to calculate hash of file {file:?} with error {err:?}");
                }
            }
        }
        Commands::Parse {
            path,
            directory,
            warn_old,
            user,
        } => {
            if warn_old {
                config.parse.warn_old = true;
            }
            let user_id = resolve_user(user, &config);

            if directory {
                // Parse complete directory
                let pattern = format!("{path}/*.pdf");
                let mut count_docs = 0_i32;
                let mut count_failed = 0_i32;
                let mut count_skipped = 0_i32;
                let mut count_transactions = 0_i32;
                for entry in glob(&pattern).expect("Failed to read directory") {
                    count_docs += 1;
                    let file_path = entry.unwrap();
                    let file_name = file_path.file_name().unwrap().to_str().unwrap();
                    let result = parse_and_store(
                        &file_path,
                        file_name,
                        user_id,
                        db.clone(),
                        &config.parse,
                    )
                    .await;
                    match result {
                        Ok(file) => count_transactions += file.inserted_rows,
                        Err(ReadPdfError::AlreadyParsed) => {
                            count_skipped += 1;
                            println!("Skipped {file_name}: already parsed.");
                        }
                        Err(err) => {
                            count_failed += 1;
                            println!("Failed to parse file {file_name} with error {err:?}");
                        }
                    }
                }
                println!(
                    "{} documents found, {} skipped, {} failed, {} parsed successfully, {} transaction(s) stored in database.",
                    count_docs,
                    count_skipped,
                    count_failed,
                    count_docs - count_skipped - count_failed,
                    count_transactions
                );
            } else {
                // parse single file
                let file_path = Path::new(&path);
                let file_name = file_path.file_name().unwrap().to_str().unwrap();
                match parse_and_store(file_path, file_name, user_id, db.clone(), &config.parse)
                    .await
                {
                    Ok(file) => {
                        println!(
                            "Upload {}: {} rows, {} stored, {} duplicates, {} failed.",
                            file.id.unwrap_or(0),
                            file.total_rows,
                            file.inserted_rows,
                            file.dedup_rows,
                            file.failed_rows
                        );
                    }
                    Err(err) => {
                        println!("Failed to parse file {path} with error {err:?}");
                        exit(1);
                    }
                }
            }
        }
        Commands::Status { id } => {
            let file = db.get_file(id).await.unwrap_or_else(|err| {
                eprintln!("{err}");
                exit(1);
            });
            println!("{}", serde_json::to_string_pretty(&file).unwrap());
        }
        Commands::List {
            user,
            start,
            end,
            category,
            direction,
            keyword,
            account,
            counterparty,
            sign,
            json,
        } => {
            let filter = TransactionFilter {
                user_id: user.or(config.parse.default_user),
                start_date: start,
                end_date: end,
                category,
                direction,
                keyword,
                account_name: account,
                counterparty,
                amount_sign: sign,
            };
            let transactions = db.search(&filter).await.unwrap();
            if json {
                println!("{}", serde_json::to_string_pretty(&transactions).unwrap());
            } else {
                let mut wtr = csv::Writer::from_writer(stdout());
                for transaction in &transactions {
                    wtr.serialize(transaction).unwrap();
                }
                wtr.flush().unwrap();
            }
        }
        Commands::Summary { start, end, json } => {
            let summaries = db.summarize_by_month(start, end).await.unwrap();
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries).unwrap());
            } else {
                let mut wtr = csv::Writer::from_writer(stdout());
                for summary in &summaries {
                    wtr.serialize(summary).unwrap();
                }
                wtr.flush().unwrap();
            }
        }
        Commands::Rules { action } => match action {
            RulesAction::Show => {
                let rules = load_rules(db.as_ref()).await;
                println!("{}", serde_json::to_string_pretty(&rules).unwrap());
            }
            RulesAction::Set { file } => {
                let content = fs::read_to_string(&file).unwrap_or_else(|err| {
                    eprintln!("Could not read rule file '{file}': {err}");
                    exit(1);
                });
                let rules: RuleSet = serde_json::from_str(&content).unwrap_or_else(|err| {
                    eprintln!("Could not parse rule file '{file}': {err}");
                    exit(1);
                });
                match save_rules(db.as_ref(), &rules).await {
                    Ok(()) => println!(
                        "Rule configuration with {} replacement rule(s) stored.",
                        rules.replace_rules.len()
                    ),
                    Err(err) => {
                        eprintln!("Rule configuration rejected: {err}");
                        exit(1);
                    }
                }
            }
        },
        Commands::Rerun { action } => {
            let engine = RerunEngine::new(db.clone());
            match action {
                RerunAction::Preview { user } => {
                    let user_id = resolve_user(user, &config);
                    let changes = engine.preview(user_id).await.unwrap();
                    println!("{}", serde_json::to_string_pretty(&changes).unwrap());
                    eprintln!("{} transaction(s) would change.", changes.len());
                }
                RerunAction::Execute { user, ids } => {
                    let user_id = resolve_user(user, &config);
                    let updated = engine.execute(user_id, &ids).await.unwrap();
                    println!(
                        "{} of {} transaction(s) re-classified.",
                        updated,
                        ids.len()
                    );
                }
            }
        }
        Commands::Accounts { user } => {
            let user_id = resolve_user(user, &config);
            for name in db.account_names(user_id).await.unwrap() {
                println!("{name}");
            }
        }
        Commands::SetSummary { user, id, summary } => {
            let user_id = resolve_user(user, &config);
            match update_transaction_summary(db.as_ref(), user_id, id, &summary).await {
                Ok(transaction) => {
                    println!(
                        "Transaction {} summary set to '{}' (was '{}').",
                        id, transaction.summary, transaction.summary_original
                    );
                }
                Err(err) => {
                    eprintln!("{err}");
                    exit(1);
                }
            }
        }
    }
}
