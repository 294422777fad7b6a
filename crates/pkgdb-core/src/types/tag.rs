use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PkgdbError;

/// Header tag identifiers.
///
/// `Packages` and `Label` are pseudo-tags: the first names the primary store,
/// the second selects a `name-version-release` label lookup. Every other
/// variant is a header tag; [`Tag::INDEXED`] lists the ones that have a
/// secondary index.
///
/// Tags serialize as their numeric identifier so header blobs stay stable if
/// variants are renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub enum Tag {
    Packages,
    Label,
    Sigmd5,
    Sha1header,
    Name,
    Version,
    Release,
    Epoch,
    Summary,
    Size,
    Group,
    Os,
    Arch,
    Providename,
    Requirename,
    Conflictname,
    Triggername,
    Obsoletename,
    Basenames,
    Dirnames,
    Installtid,
}

impl Tag {
    /// Tags with a secondary index, in store-creation order.
    pub const INDEXED: [Tag; 12] = [
        Tag::Name,
        Tag::Basenames,
        Tag::Group,
        Tag::Requirename,
        Tag::Providename,
        Tag::Conflictname,
        Tag::Obsoletename,
        Tag::Triggername,
        Tag::Dirnames,
        Tag::Installtid,
        Tag::Sigmd5,
        Tag::Sha1header,
    ];

    pub const ALL: [Tag; 21] = [
        Tag::Packages,
        Tag::Label,
        Tag::Sigmd5,
        Tag::Sha1header,
        Tag::Name,
        Tag::Version,
        Tag::Release,
        Tag::Epoch,
        Tag::Summary,
        Tag::Size,
        Tag::Group,
        Tag::Os,
        Tag::Arch,
        Tag::Providename,
        Tag::Requirename,
        Tag::Conflictname,
        Tag::Triggername,
        Tag::Obsoletename,
        Tag::Basenames,
        Tag::Dirnames,
        Tag::Installtid,
    ];

    pub fn number(self) -> u32 {
        match self {
            Tag::Packages => 0,
            Tag::Label => 2,
            Tag::Sigmd5 => 261,
            Tag::Sha1header => 269,
            Tag::Name => 1000,
            Tag::Version => 1001,
            Tag::Release => 1002,
            Tag::Epoch => 1003,
            Tag::Summary => 1004,
            Tag::Size => 1009,
            Tag::Group => 1016,
            Tag::Os => 1021,
            Tag::Arch => 1022,
            Tag::Providename => 1047,
            Tag::Requirename => 1049,
            Tag::Conflictname => 1054,
            Tag::Triggername => 1066,
            Tag::Obsoletename => 1090,
            Tag::Basenames => 1117,
            Tag::Dirnames => 1118,
            Tag::Installtid => 1128,
        }
    }

    pub fn from_number(number: u32) -> Option<Tag> {
        Tag::ALL.iter().copied().find(|t| t.number() == number)
    }

    /// Store name used for the tag's keyed store.
    pub fn name(self) -> &'static str {
        match self {
            Tag::Packages => "Packages",
            Tag::Label => "Label",
            Tag::Sigmd5 => "Sigmd5",
            Tag::Sha1header => "Sha1header",
            Tag::Name => "Name",
            Tag::Version => "Version",
            Tag::Release => "Release",
            Tag::Epoch => "Epoch",
            Tag::Summary => "Summary",
            Tag::Size => "Size",
            Tag::Group => "Group",
            Tag::Os => "Os",
            Tag::Arch => "Arch",
            Tag::Providename => "Providename",
            Tag::Requirename => "Requirename",
            Tag::Conflictname => "Conflictname",
            Tag::Triggername => "Triggername",
            Tag::Obsoletename => "Obsoletename",
            Tag::Basenames => "Basenames",
            Tag::Dirnames => "Dirnames",
            Tag::Installtid => "Installtid",
        }
    }

    pub fn is_indexed(self) -> bool {
        Tag::INDEXED.contains(&self)
    }

    /// Dependency-style arrays index each distinct string once.
    pub fn dedups_index_keys(self) -> bool {
        self.is_indexed() && self != Tag::Basenames
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Tag {
    type Err = PkgdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(number) = s.parse::<u32>() {
            return Tag::from_number(number)
                .ok_or_else(|| PkgdbError::InvalidArgument(format!("unknown tag number {number}")));
        }
        Tag::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| PkgdbError::InvalidArgument(format!("unknown tag {s:?}")))
    }
}

impl From<Tag> for u32 {
    fn from(tag: Tag) -> u32 {
        tag.number()
    }
}

impl TryFrom<u32> for Tag {
    type Error = String;

    fn try_from(number: u32) -> Result<Self, Self::Error> {
        Tag::from_number(number).ok_or_else(|| format!("unknown tag number {number}"))
    }
}
