use crate::codec::{datetime_to_micros, micros_to_datetime, put_str, Reader};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};

/// Metadata row for one stored sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub seq_id: String,
    pub length: u64,
    /// Sorted distinct characters of the sequence.
    pub alphabet: String,
    pub added: DateTime<Utc>,
    /// Container path, relative to the sequence store root.
    pub relpath: String,
}

impl SequenceRecord {
    /// Format v1:
    /// [0]      u8  version = 1
    /// [1..9]   u64 length LE
    /// [9..17]  i64 added (micros since epoch) LE
    /// then     alphabet, relpath as u32-length-prefixed UTF-8
    ///
    /// seq_id is the table key and is not repeated in the blob.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(17 + 8 + self.alphabet.len() + self.relpath.len());
        out.push(1u8);
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&datetime_to_micros(self.added).to_le_bytes());
        put_str(&mut out, &self.alphabet);
        put_str(&mut out, &self.relpath);
        out
    }

    pub fn decode(seq_id: &str, bytes: &[u8]) -> Result<Self> {
        let bad = || Error::CorruptRecord(format!("undecodable sequence record for {seq_id}"));
        let mut r = Reader::new(bytes);
        match r.u8().ok_or_else(bad)? {
            1 => {}
            v => {
                return Err(Error::CorruptRecord(format!(
                    "unknown sequence record version {v} for {seq_id}"
                )));
            }
        }
        let length = r.u64().ok_or_else(bad)?;
        let added = micros_to_datetime(r.i64().ok_or_else(bad)?);
        let alphabet = r.str().ok_or_else(bad)?.to_string();
        let relpath = r.str().ok_or_else(bad)?.to_string();
        Ok(Self {
            seq_id: seq_id.to_string(),
            length,
            alphabet,
            added,
            relpath,
        })
    }
}

/// Sorted set of distinct characters in `seq`.
pub fn alphabet_of(seq: &str) -> String {
    let set: std::collections::BTreeSet<char> = seq.chars().collect();
    set.into_iter().collect()
}

/// One (seq_id, namespace, alias) association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRecord {
    pub alias_id: u64,
    pub seq_id: String,
    pub namespace: String,
    pub alias: String,
    pub added: DateTime<Utc>,
    pub is_current: bool,
}

impl AliasRecord {
    /// Format v1:
    /// [0]      u8  version = 1
    /// [1]      u8  flags (bit0 = is_current)
    /// [2..10]  i64 added (micros since epoch) LE
    /// then     seq_id, namespace, alias as u32-length-prefixed UTF-8
    ///
    /// alias_id is the table key and is not repeated in the blob.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            10 + 12 + self.seq_id.len() + self.namespace.len() + self.alias.len(),
        );
        out.push(1u8);
        out.push(u8::from(self.is_current));
        out.extend_from_slice(&datetime_to_micros(self.added).to_le_bytes());
        put_str(&mut out, &self.seq_id);
        put_str(&mut out, &self.namespace);
        put_str(&mut out, &self.alias);
        out
    }

    pub fn decode(alias_id: u64, bytes: &[u8]) -> Result<Self> {
        let bad = || Error::CorruptRecord(format!("undecodable alias record {alias_id}"));
        let mut r = Reader::new(bytes);
        match r.u8().ok_or_else(bad)? {
            1 => {}
            v => {
                return Err(Error::CorruptRecord(format!(
                    "unknown alias record version {v} for {alias_id}"
                )));
            }
        }
        let flags = r.u8().ok_or_else(bad)?;
        let added = micros_to_datetime(r.i64().ok_or_else(bad)?);
        let seq_id = r.str().ok_or_else(bad)?.to_string();
        let namespace = r.str().ok_or_else(bad)?.to_string();
        let alias = r.str().ok_or_else(bad)?.to_string();
        Ok(Self {
            alias_id,
            seq_id,
            namespace,
            alias,
            added,
            is_current: flags & 1 != 0,
        })
    }

    /// `namespace:alias`
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.namespace, self.alias)
    }
}
