use crate::error::{Result, StemError};
use sha2::{Digest, Sha256};
use std::{
    fs::File,
    io::{self, BufReader},
    path::Path,
};

/// SHA-256 digest of a file's contents.
pub fn sha256_file(path: &Path) -> Result<[u8; 32]> {
    let mut reader = BufReader::with_capacity(64 * 1024, File::open(path)?);
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize().into())
}

/// `Ok(false)` when the digest differs; `Err` when the file can't be read
/// or `expected_hex` is not a 32-byte hex digest.
pub fn verify_sha256(path: &Path, expected_hex: &str) -> Result<bool> {
    let expected = hex::decode(expected_hex.trim())?;
    if expected.len() != 32 {
        return Err(StemError::Manifest(format!(
            "`{expected_hex}` is not a sha256 digest"
        )));
    }
    Ok(sha256_file(path)?.as_slice() == expected.as_slice())
}
