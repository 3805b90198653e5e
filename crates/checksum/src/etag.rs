//! ETag interpretation.
//!
//! S3-compatible stores return the hex MD5 of the payload as the ETag of a
//! single-part object or part, and `hex(md5(part digests))-N` for an object
//! assembled from N parts.

use crate::{ChecksumAlgorithm, ChecksumError, ChecksumValue, RunningChecksum};

/// Interprets an ETag as the MD5 of the payload.
///
/// Returns `None` for multipart ETags (containing `-`), for values of two
/// characters or fewer, and for anything that is not a 16-byte hex digest.
pub fn md5_from_etag(etag: &str) -> Option<ChecksumValue> {
    let value = etag.trim().trim_matches('"');
    if value.len() <= 2 || value.contains('-') {
        return None;
    }
    ChecksumValue::from_hex(ChecksumAlgorithm::Md5, value).ok()
}

/// Computes the ETag a store assigns to an object completed from parts with
/// the given MD5 digests, in part order.
pub fn multipart_etag(part_md5s: &[ChecksumValue]) -> Result<String, ChecksumError> {
    let mut concat = Vec::with_capacity(part_md5s.len() * 16);
    for part in part_md5s {
        if part.algorithm() != ChecksumAlgorithm::Md5 {
            return Err(ChecksumError::AlgorithmMismatch {
                expected: ChecksumAlgorithm::Md5,
                actual: part.algorithm(),
            });
        }
        concat.extend_from_slice(part.digest());
    }
    let digest = RunningChecksum::digest(ChecksumAlgorithm::Md5, &concat);
    Ok(format!("{}-{}", digest.to_hex(), part_md5s.len()))
}

/// Splits a multipart ETag into its digest and part count.
pub fn parse_multipart_etag(etag: &str) -> Option<(String, usize)> {
    let value = etag.trim().trim_matches('"');
    let (digest, count) = value.split_once('-')?;
    let count = count.parse().ok()?;
    if digest.len() != 32 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some((digest.to_ascii_lowercase(), count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_etag_is_md5() {
        let v = md5_from_etag("\"d41d8cd98f00b204e9800998ecf8427e\"").unwrap();
        assert_eq!(v, RunningChecksum::digest(ChecksumAlgorithm::Md5, b""));
    }

    #[test]
    fn non_md5_etags_are_ignored() {
        assert!(md5_from_etag("\"\"").is_none());
        assert!(md5_from_etag("ab").is_none());
        assert!(md5_from_etag("\"3858f62230ac3c915f300c664312c11f-9\"").is_none());
        assert!(md5_from_etag("not-hex-at-all").is_none());
        assert!(md5_from_etag("zz1d8cd98f00b204e9800998ecf8427e").is_none());
    }

    #[test]
    fn multipart_etag_counts_parts() {
        let parts = vec![
            RunningChecksum::digest(ChecksumAlgorithm::Md5, b"part one"),
            RunningChecksum::digest(ChecksumAlgorithm::Md5, b"part two"),
        ];
        let etag = multipart_etag(&parts).unwrap();
        let (digest, count) = parse_multipart_etag(&format!("\"{etag}\"")).unwrap();
        assert_eq!(count, 2);

        let mut concat = parts[0].digest().to_vec();
        concat.extend_from_slice(parts[1].digest());
        assert_eq!(
            digest,
            RunningChecksum::digest(ChecksumAlgorithm::Md5, &concat).to_hex()
        );
    }

    #[test]
    fn multipart_etag_rejects_other_algorithms() {
        let parts = vec![RunningChecksum::digest(ChecksumAlgorithm::Sha1, b"x")];
        assert!(multipart_etag(&parts).is_err());
    }

    #[test]
    fn plain_etag_is_not_multipart() {
        assert!(parse_multipart_etag("d41d8cd98f00b204e9800998ecf8427e").is_none());
        assert!(parse_multipart_etag("abc-2").is_none());
    }
}
