use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE};
use digest::Digest;

/// Namespaces written for every newly stored sequence, in insertion order.
///
/// Changing this list changes what old vs. new records carry, so it is
/// versioned together with `schema::ALIAS_SCHEMA_VERSION`.
pub const DIGEST_NAMESPACES: [&str; 4] = ["VMC", "SHA1", "MD5", "SEGUID"];

pub const VMC_PREFIX: &str = "GS_";

/// Truncated SHA-512 (first 24 bytes), URL-safe base64. This is the seq_id.
pub fn sha512t24u(seq: &str) -> String {
    let digest = sha2::Sha512::digest(seq.as_bytes());
    URL_SAFE.encode(&digest[..24])
}

pub fn sha1_hex(seq: &str) -> String {
    hex::encode(sha1::Sha1::digest(seq.as_bytes()))
}

pub fn md5_hex(seq: &str) -> String {
    format!("{:x}", md5::compute(seq.as_bytes()))
}

/// SEGUID: SHA-1, standard base64 without padding.
pub fn seguid(seq: &str) -> String {
    STANDARD_NO_PAD.encode(sha1::Sha1::digest(seq.as_bytes()))
}

/// All content digests of one sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDigests {
    pub sha512t24u: String,
    pub sha1: String,
    pub md5: String,
    pub seguid: String,
}

impl SequenceDigests {
    pub fn compute(seq: &str) -> Self {
        Self {
            sha512t24u: sha512t24u(seq),
            sha1: sha1_hex(seq),
            md5: md5_hex(seq),
            seguid: seguid(seq),
        }
    }

    pub fn seq_id(&self) -> &str {
        &self.sha512t24u
    }

    /// (namespace, alias) pairs in `DIGEST_NAMESPACES` order.
    pub fn aliases(&self) -> Vec<(&'static str, String)> {
        vec![
            (DIGEST_NAMESPACES[0], format!("{VMC_PREFIX}{}", self.sha512t24u)),
            (DIGEST_NAMESPACES[1], self.sha1.clone()),
            (DIGEST_NAMESPACES[2], self.md5.clone()),
            (DIGEST_NAMESPACES[3], self.seguid.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_digests() {
        let d = SequenceDigests::compute("ASINACORNER");
        assert_eq!(d.md5, "ea81b52627e387fc6edd8b9412cd3a99");
        assert_eq!(d.sha1, "68c405fdc7479006b22e4558b3c5d5daef87cb7e");
        assert_eq!(d.seguid, "aMQF/cdHkAayLkVYs8XV2u+Hy34");
        assert_eq!(d.seq_id(), "LDz34B6fA_fLxFoc2agLrXQRYuupOGGM");

        let d = SequenceDigests::compute("SMELLASSWEET");
        assert_eq!(d.md5, "8b2698fb0b0c93558a6adbb11edb1e4b");
        assert_eq!(d.seq_id(), "bsoUMlD3TrEtlh9Dt1iT29mzfkwwFUDr");
    }

    #[test]
    fn aliases_follow_namespace_order() {
        let d = SequenceDigests::compute("ACGT");
        let ns: Vec<_> = d.aliases().into_iter().map(|(ns, _)| ns).collect();
        assert_eq!(ns, DIGEST_NAMESPACES);
        assert_eq!(d.aliases()[0].1, format!("GS_{}", d.seq_id()));
    }
}
