//! Canonical request descriptors used as cache keys

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifies one logical data request: a resource plus its parameters.
///
/// Filters live in an ordered map, so two keys built with the same filters in
/// a different order are equal and hash identically. Empty filter values are
/// dropped on insertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey {
    resource: String,
    page: Option<usize>,
    page_size: Option<usize>,
    filters: BTreeMap<String, String>,
}

impl QueryKey {
    /// Key for an unpaged resource such as `blog/tags`
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: normalize_resource(&resource.into()),
            page: None,
            page_size: None,
            filters: BTreeMap::new(),
        }
    }

    /// Key for one page of a paged resource
    pub fn paged(resource: impl Into<String>, page: usize, page_size: usize) -> Self {
        Self::new(resource).with_page(page, page_size)
    }

    pub fn with_page(mut self, page: usize, page_size: usize) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Add a filter; blank values leave the key unchanged
    pub fn with_filter(mut self, name: impl Into<String>, value: impl AsRef<str>) -> Self {
        let value = value.as_ref().trim();
        if !value.is_empty() {
            self.filters.insert(name.into(), value.to_string());
        }
        self
    }

    /// Add a filter when a value is present
    pub fn with_optional_filter(self, name: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.with_filter(name, value),
            None => self,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn page(&self) -> Option<usize> {
        self.page
    }

    pub fn page_size(&self) -> Option<usize> {
        self.page_size
    }

    pub fn filters(&self) -> &BTreeMap<String, String> {
        &self.filters
    }

    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }

    /// Whether the resource path starts with every segment of `prefix`
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        let prefix = normalize_resource(prefix);
        if prefix.is_empty() {
            return true;
        }
        let mut own = self.resource.split('/');
        prefix.split('/').all(|segment| own.next() == Some(segment))
    }
}

fn normalize_resource(resource: &str) -> String {
    resource
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;

        let mut params = Vec::new();
        if let Some(page) = self.page {
            params.push(format!("page={}", page));
        }
        if let Some(page_size) = self.page_size {
            params.push(format!("page_size={}", page_size));
        }
        for (name, value) in &self.filters {
            params.push(format!("{}={}", name, value));
        }

        if !params.is_empty() {
            write!(f, "?{}", params.join("&"))?;
        }
        Ok(())
    }
}
