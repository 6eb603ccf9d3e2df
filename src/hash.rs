//! Content hashing for monitored files
//!
//! Computes the md5/sha1/sha256 triple of a regular file in a single
//! streaming pass, capped at a configurable size, optionally piping the
//! file through a prefilter command first (used on systems where binaries
//! are rewritten at install time and must be normalized before hashing).
//!
//! Also provides the SHA-1 string digest used for entry checksums and the
//! fixed digests of empty input, which stand in for files that are never
//! hashed (symlinks, empty files, oversized files) so checksum comparisons
//! stay total.

use md5::Md5;
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::process::Command;

/// MD5 of empty input
pub const MD5_EMPTY: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// SHA-1 of empty input
pub const SHA1_EMPTY: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

/// SHA-256 of empty input
pub const SHA256_EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Read buffer size for streaming hashes
const CHUNK_SIZE: usize = 64 * 1024;

/// The md5/sha1/sha256 triple of one file's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
}

impl FileHashes {
    /// Digests of empty input
    pub fn empty() -> Self {
        Self {
            md5: MD5_EMPTY.to_string(),
            sha1: SHA1_EMPTY.to_string(),
            sha256: SHA256_EMPTY.to_string(),
        }
    }
}

/// SHA-1 of a string, hex encoded
///
/// # Example
///
/// ```
/// use fimwatch::hash::sha1_hex;
///
/// assert_eq!(sha1_hex(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
/// ```
pub fn sha1_hex(input: &str) -> String {
    hex::encode(Sha1::digest(input.as_bytes()))
}

/// Compute the hash triple for a regular file.
///
/// Reads at most `max_size` bytes; a file that grows past the cap mid-read
/// fails rather than producing a digest of a truncated prefix. When
/// `prefilter` is set, the command is run with the file path as its last
/// argument and its stdout is hashed instead of the raw content.
pub fn hash_file(path: &Path, max_size: u64, prefilter: Option<&str>) -> io::Result<FileHashes> {
    match prefilter {
        Some(cmd) => hash_prefiltered(path, cmd),
        None => hash_reader(File::open(path)?, max_size),
    }
}

fn hash_prefiltered(path: &Path, cmd: &str) -> io::Result<FileHashes> {
    let mut parts = cmd.split_whitespace();
    let program = parts.next().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "empty prefilter command")
    })?;

    let output = Command::new(program).args(parts).arg(path).output()?;
    if !output.status.success() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("prefilter command failed with {}", output.status),
        ));
    }

    Ok(digest_bytes(&output.stdout))
}

fn hash_reader<R: Read>(mut reader: R, max_size: u64) -> io::Result<FileHashes> {
    let mut md5 = Md5::new();
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > max_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("content exceeds the {max_size} byte hash cap"),
            ));
        }
        md5.update(&buf[..n]);
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
    }

    Ok(FileHashes {
        md5: hex::encode(md5.finalize()),
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
    })
}

fn digest_bytes(bytes: &[u8]) -> FileHashes {
    FileHashes {
        md5: hex::encode(Md5::digest(bytes)),
        sha1: hex::encode(Sha1::digest(bytes)),
        sha256: hex::encode(Sha256::digest(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_input_digests() {
        let hashes = digest_bytes(b"");
        assert_eq!(hashes.md5, MD5_EMPTY);
        assert_eq!(hashes.sha1, SHA1_EMPTY);
        assert_eq!(hashes.sha256, SHA256_EMPTY);
        assert_eq!(FileHashes::empty(), hashes);
    }

    #[test]
    fn test_sha1_hex() {
        assert_eq!(sha1_hex(""), SHA1_EMPTY);
        // Known vector
        assert_eq!(sha1_hex("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_hash_file_content() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world\n").unwrap();

        let hashes = hash_file(file.path(), 1024, None).unwrap();
        assert_eq!(hashes.md5, "6f5902ac237024bdd0c176cb93063dc4");
        assert_eq!(hashes.sha1, "22596363b3de40b06f981fb85d82312e8c0ed511");
        assert_eq!(
            hashes.sha256,
            "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
        );
    }

    #[test]
    fn test_hash_cap_enforced() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xAB; 4096]).unwrap();

        let err = hash_file(file.path(), 1024, None).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let data = vec![0x5Au8; CHUNK_SIZE * 3 + 17];
        let streamed = hash_reader(&data[..], u64::MAX).unwrap();
        assert_eq!(streamed, digest_bytes(&data));
    }
}
