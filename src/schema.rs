use redb::TableDefinition;

// Shared by both indexes.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
pub const KEY_SCHEMA_VERSION: &str = "schema_version";

// sequences/db.redb
pub const SEQUENCE_SCHEMA_VERSION: u64 = 1;

// seq_id -> encoded SequenceRecord
pub const SEQINFO: TableDefinition<&str, &[u8]> = TableDefinition::new("seqinfo");

// aliases.redb
//
// Version 1 also fixes the digest battery written on first store:
// VMC, SHA1, MD5, SEGUID (see digest::DIGEST_NAMESPACES).
pub const ALIAS_SCHEMA_VERSION: u64 = 1;
pub const KEY_NEXT_ALIAS_ID: &str = "next_alias_id";

// alias_id -> encoded AliasRecord
pub const ALIASES: TableDefinition<u64, &[u8]> = TableDefinition::new("aliases");

// (namespace, alias) -> alias_id, current rows only
pub const CURRENT: TableDefinition<(&str, &str), u64> = TableDefinition::new("current");

// seq_id -> packed list of alias_id (u64 LE)
pub const SEQ_TO_ALIASES: TableDefinition<&str, &[u8]> = TableDefinition::new("seq_to_aliases");

// (alias, alias_id) and (namespace, alias_id) for every row, current or not.
// Keys sort by text first, so a range scan finds one alias or namespace.
pub const BY_ALIAS: TableDefinition<(&str, u64), ()> = TableDefinition::new("by_alias");
pub const BY_NAMESPACE: TableDefinition<(&str, u64), ()> = TableDefinition::new("by_namespace");
