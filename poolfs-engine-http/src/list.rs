//! Minimal `ListObjectsV2` response shape, just the fields the engine's
//! `list(prefix)` operation needs.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListBucketResult {
    #[serde(default, rename = "Contents")]
    pub contents: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Entry {
    #[serde(rename = "Key")]
    pub key: String,
}
