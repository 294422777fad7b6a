use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::error::Result;
use crate::types::tag::Tag;

/// Value stored under one header tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagValue {
    Int32(Vec<u32>),
    String(String),
    StringArray(Vec<String>),
    Binary(Vec<u8>),
}

impl TagValue {
    /// Textual forms used by pattern filters: one entry per array element,
    /// integers in decimal, binary data in lowercase hex.
    pub fn match_strings(&self) -> Vec<Cow<'_, str>> {
        match self {
            TagValue::String(s) => vec![Cow::Borrowed(s.as_str())],
            TagValue::StringArray(items) => items.iter().map(|s| Cow::Borrowed(s.as_str())).collect(),
            TagValue::Int32(values) => values.iter().map(|v| Cow::Owned(v.to_string())).collect(),
            TagValue::Binary(bytes) => vec![Cow::Owned(to_hex(bytes))],
        }
    }

    /// Secondary-index keys paired with the element position (file number).
    fn index_keys(&self, dedup: bool) -> Vec<(Vec<u8>, u32)> {
        match self {
            TagValue::String(s) => vec![(s.as_bytes().to_vec(), 0)],
            TagValue::Binary(bytes) => vec![(bytes.clone(), 0)],
            TagValue::Int32(values) => values
                .iter()
                .enumerate()
                .map(|(i, v)| (v.to_be_bytes().to_vec(), i as u32))
                .collect(),
            TagValue::StringArray(items) => {
                let mut keys: Vec<(Vec<u8>, u32)> = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    if dedup && items[..i].contains(item) {
                        continue;
                    }
                    keys.push((item.as_bytes().to_vec(), i as u32));
                }
                keys
            }
        }
    }
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// A package header: an ordered set of tag values.
///
/// The primary store keeps headers as MessagePack blobs; [`Header::to_blob`]
/// and [`Header::from_blob`] are the only encoding entry points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    tags: BTreeMap<Tag, TagValue>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, tag: Tag, value: TagValue) -> Self {
        self.tags.insert(tag, value);
        self
    }

    pub fn with_string(self, tag: Tag, value: impl Into<String>) -> Self {
        self.with(tag, TagValue::String(value.into()))
    }

    pub fn with_strings<I, S>(self, tag: Tag, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(
            tag,
            TagValue::StringArray(values.into_iter().map(Into::into).collect()),
        )
    }

    pub fn set(&mut self, tag: Tag, value: TagValue) -> Option<TagValue> {
        self.tags.insert(tag, value)
    }

    pub fn remove(&mut self, tag: Tag) -> Option<TagValue> {
        self.tags.remove(&tag)
    }

    pub fn get(&self, tag: Tag) -> Option<&TagValue> {
        self.tags.get(&tag)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.tags.contains_key(&tag)
    }

    pub fn get_string(&self, tag: Tag) -> Option<&str> {
        match self.tags.get(&tag) {
            Some(TagValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tag, &TagValue)> {
        self.tags.iter().map(|(t, v)| (*t, v))
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// `name-version-release`, with `.arch` appended when present.
    pub fn nevra(&self) -> String {
        let mut label = format!(
            "{}-{}-{}",
            self.get_string(Tag::Name).unwrap_or("(none)"),
            self.get_string(Tag::Version).unwrap_or("(none)"),
            self.get_string(Tag::Release).unwrap_or("(none)"),
        );
        if let Some(arch) = self.get_string(Tag::Arch) {
            label.push('.');
            label.push_str(arch);
        }
        label
    }

    /// Index keys this header contributes to `tag`'s secondary index.
    pub fn index_keys(&self, tag: Tag) -> Vec<(Vec<u8>, u32)> {
        match self.tags.get(&tag) {
            Some(value) if tag.is_indexed() => value.index_keys(tag.dedups_index_keys()),
            _ => Vec::new(),
        }
    }

    pub fn to_blob(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(blob)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        Header::new()
            .with_string(Tag::Name, "bash")
            .with_string(Tag::Version, "5.2.26")
            .with_string(Tag::Release, "3.fc40")
            .with_string(Tag::Arch, "x86_64")
            .with_strings(Tag::Requirename, ["libc.so.6", "libtinfo.so.6", "libc.so.6"])
            .with_strings(Tag::Basenames, ["bash", "bash", "sh"])
            .with(Tag::Installtid, TagValue::Int32(vec![1_700_000_000]))
            .with(Tag::Sigmd5, TagValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]))
    }

    #[test]
    fn test_blob_round_trip() {
        let header = sample();
        let blob = header.to_blob().unwrap();
        assert_eq!(Header::from_blob(&blob).unwrap(), header);
    }

    #[test]
    fn test_garbage_blob_is_rejected() {
        assert!(Header::from_blob(b"\xc1\xc1not a header").is_err());
    }

    #[test]
    fn test_dependency_keys_are_deduplicated() {
        let keys = sample().index_keys(Tag::Requirename);
        assert_eq!(
            keys,
            vec![(b"libc.so.6".to_vec(), 0), (b"libtinfo.so.6".to_vec(), 1)]
        );
    }

    #[test]
    fn test_basenames_keep_every_position() {
        let keys = sample().index_keys(Tag::Basenames);
        let positions: Vec<u32> = keys.iter().map(|(_, n)| *n).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_unindexed_tag_has_no_keys() {
        assert!(sample().index_keys(Tag::Version).is_empty());
    }

    #[test]
    fn test_match_strings() {
        let header = sample();
        let md5 = header.get(Tag::Sigmd5).unwrap().match_strings();
        assert_eq!(md5, vec!["deadbeef"]);
        let tid = header.get(Tag::Installtid).unwrap().match_strings();
        assert_eq!(tid, vec!["1700000000"]);
    }

    #[test]
    fn test_nevra() {
        assert_eq!(sample().nevra(), "bash-5.2.26-3.fc40.x86_64");
    }
}
