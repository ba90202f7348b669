//! Filter selection and the two filter stacks.
//!
//! A read uses exactly one stack. The disposable stack wins when it is not
//! empty and is consumed by that read; otherwise the persistent stack is
//! used and survives.

use serde::{Deserialize, Serialize};

use spcms_core::value::{Value, type_name};

/// Prefix of filter event names.
pub const FILTER_EVENT_PREFIX: &str = "contentfilter";

/// Which filters a content read applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSelection {
    /// The stored value, unfiltered.
    Raw,
    /// These filters, once, ahead of the persistent stack.
    Once(Vec<String>),
    /// The pending disposable stack if any, else the persistent stack.
    Active,
}

impl FilterSelection {
    /// One-shot selection from filter names.
    pub fn once<I, S>(filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Once(filters.into_iter().map(Into::into).collect())
    }
}

impl From<bool> for FilterSelection {
    fn from(active: bool) -> Self {
        if active { Self::Active } else { Self::Raw }
    }
}

/// Event dispatched to run `filter` on `value`: `contentfilter.<type>.<filter>`.
pub fn filter_event(value: &Value, filter: &str) -> String {
    format!("{FILTER_EVENT_PREFIX}.{}.{filter}", type_name(value))
}

/// Persistent and disposable filter names.
#[derive(Debug, Clone, Default)]
pub(crate) struct FilterStacks {
    pub(crate) persistent: Vec<String>,
    pub(crate) disposable: Vec<String>,
}

impl FilterStacks {
    /// Filters to apply for `selection`, consuming the disposable stack if
    /// it is used. `None` means the raw value.
    pub(crate) fn resolve(&mut self, selection: &FilterSelection) -> Option<Vec<String>> {
        match selection {
            FilterSelection::Raw => None,
            FilterSelection::Once(filters) if filters.is_empty() => None,
            FilterSelection::Once(filters) => {
                self.disposable.clear();
                Some(filters.clone())
            }
            FilterSelection::Active if !self.disposable.is_empty() => {
                Some(std::mem::take(&mut self.disposable))
            }
            FilterSelection::Active => Some(self.persistent.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stacks(persistent: &[&str], disposable: &[&str]) -> FilterStacks {
        FilterStacks {
            persistent: persistent.iter().map(|s| s.to_string()).collect(),
            disposable: disposable.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_filter_event_uses_current_type() {
        assert_eq!(filter_event(&json!("x"), "upcase"), "contentfilter.string.upcase");
        assert_eq!(filter_event(&json!(3), "size"), "contentfilter.integer.size");
        assert_eq!(filter_event(&json!([1]), "sort"), "contentfilter.array.sort");
    }

    #[test]
    fn test_active_prefers_disposable_once() {
        let mut s = stacks(&["trim"], &["upcase"]);

        assert_eq!(s.resolve(&FilterSelection::Active), Some(vec!["upcase".into()]));
        assert_eq!(s.resolve(&FilterSelection::Active), Some(vec!["trim".into()]));
        assert_eq!(s.resolve(&FilterSelection::Active), Some(vec!["trim".into()]));
    }

    #[test]
    fn test_once_replaces_pending_disposable() {
        let mut s = stacks(&["trim"], &["upcase"]);

        assert_eq!(
            s.resolve(&FilterSelection::once(["size"])),
            Some(vec!["size".into()])
        );
        assert!(s.disposable.is_empty());
        assert_eq!(s.persistent, vec!["trim".to_string()]);
    }

    #[test]
    fn test_raw_and_empty_once_skip_filters() {
        let mut s = stacks(&["trim"], &["upcase"]);

        assert_eq!(s.resolve(&FilterSelection::Raw), None);
        assert_eq!(s.resolve(&FilterSelection::Once(Vec::new())), None);
        assert_eq!(s.disposable, vec!["upcase".to_string()]);
    }

    #[test]
    fn test_selection_from_bool() {
        assert_eq!(FilterSelection::from(true), FilterSelection::Active);
        assert_eq!(FilterSelection::from(false), FilterSelection::Raw);
    }
}
