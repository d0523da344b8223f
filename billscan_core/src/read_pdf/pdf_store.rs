//! Store uploaded statement files and compute their content hash
use std::fs;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::Utc;
use data_encoding::HEXUPPER;
use ring::digest::{Context, SHA256};

use super::ReadPdfError;
use crate::ParseParams;

pub fn sha256_hash(file: &Path) -> Result<String, ReadPdfError> {
    let input = File::open(file)?;
    let mut reader = BufReader::new(input);

    let mut context = Context::new(&SHA256);
    let mut buffer = Vec::new();
    // read the whole file
    reader.read_to_end(&mut buffer)?;
    context.update(&buffer);

    let digest = context.finish();
    Ok(HEXUPPER.encode(digest.as_ref()))
}

/// Copy the uploaded file into the document store before parsing starts, so
/// the raw statement survives a failed ingestion. The stored name carries a
/// millisecond timestamp prefix; `name` is assumed to have been sanitized.
pub fn store_statement_file(
    path: &Path,
    name: &str,
    params: &ParseParams,
) -> Result<PathBuf, ReadPdfError> {
    fs::create_dir_all(&params.doc_path)?;
    let stored = Path::new(&params.doc_path)
        .join(format!("{}_{}", Utc::now().timestamp_millis(), name));
    fs::copy(path, &stored)?;
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash() {
        let file = std::env::temp_dir().join("billscan_hash_test.txt");
        fs::write(&file, b"hello world").unwrap();
        let hash = sha256_hash(&file).unwrap();
        assert_eq!(
            hash,
            "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9".to_string()
        );
        fs::remove_file(&file).unwrap();
    }
}
