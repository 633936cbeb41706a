//! Canned response catalog
//!
//! Maps an HTTP method to a table of endpoint key -> JSON value. The endpoint
//! key is the final `/`-delimited segment of the request path, so
//! `/api/v1/settings` and `/settings` resolve to the same entry.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

type EndpointTable = BTreeMap<String, Value>;
type MethodTables = BTreeMap<String, EndpointTable>;

/// Answers for GET when the caller configured none.
static DEFAULT_GET_TABLE: Lazy<EndpointTable> = Lazy::new(|| {
    let mut table = EndpointTable::new();
    table.insert(
        "settings".to_string(),
        json!({
            "spreadsheetID": "",
            "attendanceSheet": "",
            "autocompleteSheet": "",
        }),
    );
    table.insert(
        "names".to_string(),
        json!({ "names": ["name1", "name2", "name3"] }),
    );
    table
});

/// Immutable method -> endpoint -> JSON mapping served by the stub
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "MethodTables", into = "MethodTables")]
pub struct ResponseCatalog {
    methods: MethodTables,
}

impl ResponseCatalog {
    /// An empty catalog; GET still falls back to the built-in table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one canned answer. Method names are stored upper-case.
    pub fn with_entry(
        mut self,
        method: impl AsRef<str>,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.methods
            .entry(method.as_ref().to_ascii_uppercase())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Resolve `method` + `key` to a canned value.
    ///
    /// `None` is a normal outcome for unknown endpoints and is served as JSON
    /// `null`.
    pub fn lookup(&self, method: &str, key: &str) -> Option<&Value> {
        self.table(method).and_then(|table| table.get(key))
    }

    /// Whether the caller supplied a table for `method`.
    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(&method.to_ascii_uppercase())
    }

    fn table(&self, method: &str) -> Option<&EndpointTable> {
        let method = method.to_ascii_uppercase();
        match self.methods.get(&method) {
            Some(table) => Some(table),
            None if method == "GET" => Some(&*DEFAULT_GET_TABLE),
            None => None,
        }
    }

    /// Load a catalog from a `.json` or `.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(Error::Config(format!(
                "{}: catalog files must end in .json or .toml",
                path.display()
            ))),
        }
    }
}

impl From<MethodTables> for ResponseCatalog {
    fn from(raw: MethodTables) -> Self {
        let mut methods = MethodTables::new();
        for (method, table) in raw {
            methods
                .entry(method.to_ascii_uppercase())
                .or_default()
                .extend(table);
        }
        Self { methods }
    }
}

impl From<ResponseCatalog> for MethodTables {
    fn from(catalog: ResponseCatalog) -> Self {
        catalog.methods
    }
}

/// Final `/`-delimited segment of a request path, query string excluded.
pub fn endpoint_key(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    path.rsplit('/').next().unwrap_or(path)
}
