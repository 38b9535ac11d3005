//! Namespace translation between the externally documented vocabulary and
//! the namespaces actually stored in the alias index.
//!
//! Digest accession forms (`sha512t24u`, `ga4gh`) are computed from the one
//! stored `VMC` digest rather than stored separately.

use crate::digest::VMC_PREFIX;

const GA4GH_PREFIX: &str = "SQ.";

/// Stored namespace for an external one, if it is renamed on the way in.
pub fn internal_namespace(namespace: &str) -> Option<&'static str> {
    if namespace.eq_ignore_ascii_case("refseq") {
        return Some("NCBI");
    }
    match namespace {
        "ensembl" => Some("Ensembl"),
        "lrg" => Some("LRG"),
        "sha512t24u" | "ga4gh" => Some("VMC"),
        _ => None,
    }
}

/// External -> internal. Empty when the pair is stored as given.
pub fn to_internal(namespace: &str, alias: &str) -> Vec<(String, String)> {
    let Some(ns) = internal_namespace(namespace) else {
        return Vec::new();
    };
    let alias = match namespace {
        "sha512t24u" => format!("{VMC_PREFIX}{alias}"),
        "ga4gh" => format!(
            "{VMC_PREFIX}{}",
            alias.strip_prefix(GA4GH_PREFIX).unwrap_or(alias)
        ),
        _ => alias.to_string(),
    };
    vec![(ns.to_string(), alias)]
}

/// Internal -> external. One stored VMC digest surfaces as two identifiers.
pub fn to_external(namespace: &str, alias: &str) -> Vec<(String, String)> {
    match namespace {
        "NCBI" => vec![("refseq".to_string(), alias.to_string())],
        "Ensembl" => vec![("ensembl".to_string(), alias.to_string())],
        "LRG" => vec![("lrg".to_string(), alias.to_string())],
        "VMC" => {
            let digest = alias.strip_prefix(VMC_PREFIX).unwrap_or(alias);
            vec![
                ("sha512t24u".to_string(), digest.to_string()),
                ("ga4gh".to_string(), format!("{GA4GH_PREFIX}{digest}")),
            ]
        }
        _ => Vec::new(),
    }
}

/// Apply `to_internal` if it has an opinion, else keep the pair.
pub fn normalize(namespace: &str, alias: &str) -> (String, String) {
    to_internal(namespace, alias)
        .into_iter()
        .next()
        .unwrap_or_else(|| (namespace.to_string(), alias.to_string()))
}
