//! List merging for fan-out results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Index;
use tracing::debug;

/// One named list inside a result: items plus the server-side total.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemGroup {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub total_items: u64,
    /// Any other field the source attached to the group.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemGroup {
    pub fn new(items: Vec<Value>, total_items: u64) -> Self {
        Self {
            items,
            total_items,
            extra: Map::new(),
        }
    }

    /// Build a group from loosely shaped JSON.
    ///
    /// Missing or malformed `items` become empty, a missing `total_items` is 0.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let items = match fields.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let total_items = fields
            .remove("total_items")
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(0);
        Some(Self {
            items,
            total_items,
            extra: fields,
        })
    }
}

/// A blended result: named groups plus the other top-level fields of the
/// platform response, such as `total_length`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergeResult {
    #[serde(flatten)]
    pub groups: BTreeMap<String, ItemGroup>,
    /// Top-level fields that are not groups, kept as returned.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MergeResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a result object. Object fields become groups, anything else
    /// lands in [`MergeResult::extra`].
    pub fn from_value(value: Value) -> Self {
        let Value::Object(fields) = value else {
            debug!("Result is not an object, starting from an empty result");
            return Self::new();
        };

        let mut result = Self::new();
        for (name, value) in fields {
            if value.is_object() {
                if let Some(group) = ItemGroup::from_value(value) {
                    result.groups.insert(name, group);
                }
            } else {
                debug!(field = %name, "Keeping non-group field");
                result.extra.insert(name, value);
            }
        }
        result
    }

    pub fn get(&self, name: &str) -> Option<&ItemGroup> {
        self.groups.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ItemGroup> {
        self.groups.get_mut(name)
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.extra.is_empty()
    }
}

impl Index<&str> for MergeResult {
    type Output = ItemGroup;

    fn index(&self, name: &str) -> &ItemGroup {
        &self.groups[name]
    }
}

impl FromIterator<(String, ItemGroup)> for MergeResult {
    fn from_iter<I: IntoIterator<Item = (String, ItemGroup)>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().collect(),
            extra: Map::new(),
        }
    }
}

impl<const N: usize> From<[(String, ItemGroup); N]> for MergeResult {
    fn from(groups: [(String, ItemGroup); N]) -> Self {
        groups.into_iter().collect()
    }
}

/// Append every non-empty addon group onto `base`.
///
/// Groups missing from `base` are created; `total_items` are summed. Groups
/// the addon leaves empty are ignored, as are its non-group fields.
pub fn standard_list_merge(mut base: MergeResult, addon: MergeResult) -> MergeResult {
    for (name, group) in addon.groups {
        if group.items.is_empty() {
            continue;
        }
        let target = base.groups.entry(name).or_default();
        target.items.extend(group.items);
        target.total_items = target.total_items.saturating_add(group.total_items);
    }
    base
}

/// Per-source share of `limit` when `addon_count` addons contribute.
pub fn split_limit(limit: u32, addon_count: usize) -> u32 {
    let sources = u32::try_from(addon_count)
        .unwrap_or(u32::MAX)
        .saturating_add(1);
    limit / sources
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        Some(Value::String(_)) => 2,
        Some(Value::Number(_)) => 1,
        _ => 0,
    }
}

fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .unwrap_or(0.0)
            .total_cmp(&b.as_f64().unwrap_or(0.0)),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// Stable sort of `group.items` by `key`, highest first.
///
/// Items without a string or numeric `key` sort last.
pub fn sort_by_key_desc(group: &mut ItemGroup, key: &str) {
    group
        .items
        .sort_by(|a, b| compare_field(b.get(key), a.get(key)));
}
