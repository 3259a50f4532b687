//! Operations addons can contribute to.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Operation;
use super::merge::MergeResult;

/// Paging arguments handed to library contributors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryQuery {
    pub limit: u32,
    pub offset: u32,
    pub order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Default for LibraryQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            order: SortOrder::Desc,
            kind: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: String,
    pub limit: u32,
}

impl SearchQuery {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: keywords.into(),
            limit: 50,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Arguments of a release lookup dispatched to one named addon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseQuery {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// Name of the addon serving the release instead of the platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// The signed-in user's music library.
#[derive(Debug)]
pub enum GetMyLibrary {}

impl Operation for GetMyLibrary {
    const NAME: &'static str = "getMyLibrary";
    type Args = LibraryQuery;
    type Output = MergeResult;
}

/// Keyword search.
#[derive(Debug)]
pub enum Search {}

impl Operation for Search {
    const NAME: &'static str = "search";
    type Args = SearchQuery;
    type Output = MergeResult;
}

/// Full data of one release.
#[derive(Debug)]
pub enum GetReleaseData {}

impl Operation for GetReleaseData {
    const NAME: &'static str = "getReleaseData";
    type Args = ReleaseQuery;
    type Output = Value;
}
