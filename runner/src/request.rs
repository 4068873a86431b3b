//! Parsing and formatting of `path?query` request strings and structured loader
//! references.

use serde::Deserialize;
use serde::Serialize;

use crate::error::LoaderError;

/// Splits a request at the first `?`. The query keeps its leading `?` and is
/// empty when the request has none.
pub fn split_query(request: &str) -> (&str, &str) {
    match request.find('?') {
        Some(index) => request.split_at(index),
        None => (request, ""),
    }
}

/// Directory portion of a path, accepting both `/` and `\` as separators.
///
/// A path without any separator is returned unchanged. When the last separator
/// is also the first one of its kind it is kept (`/a` gives `/`, `a/b` gives
/// `a/`); otherwise it is dropped (`/a/b` gives `/a`).
pub fn dirname(path: &str) -> &str {
    if path == "/" {
        return path;
    }
    let last_slash = path.rfind('/');
    let last_backslash = path.rfind('\\');
    let (last, first) = if last_slash > last_backslash {
        (last_slash, path.find('/'))
    } else {
        (last_backslash, path.find('\\'))
    };
    let Some(last) = last else {
        return path;
    };
    if Some(last) == first {
        &path[..=last]
    } else {
        &path[..last]
    }
}

/// Directory of the resource named by `resource`, ignoring its query.
pub fn get_context(resource: &str) -> &str {
    dirname(split_query(resource).0)
}

/// One entry of a loader chain as handed to the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoaderRequest {
    Plain(String),
    Reference(LoaderReference),
}

impl From<&str> for LoaderRequest {
    fn from(value: &str) -> Self {
        Self::Plain(value.to_string())
    }
}

impl From<String> for LoaderRequest {
    fn from(value: String) -> Self {
        Self::Plain(value)
    }
}

impl From<LoaderReference> for LoaderRequest {
    fn from(value: LoaderReference) -> Self {
        Self::Reference(value)
    }
}

/// Structured loader reference: an identifier plus options that may not be
/// representable as a query string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderReference {
    pub loader: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,
}

impl LoaderReference {
    pub fn new(loader: impl Into<String>) -> Self {
        Self {
            loader: loader.into(),
            options: None,
            ident: None,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_ident(mut self, ident: impl Into<String>) -> Self {
        self.ident = Some(ident.into());
        self
    }

    pub(crate) fn validate(&self) -> Result<(), LoaderError> {
        if self.loader.is_empty() {
            let rendered = serde_json::to_string(self).unwrap_or_default();
            return Err(LoaderError::InvalidRequest(format!(
                "request should be a string or object with loader and options ({rendered})"
            )));
        }
        Ok(())
    }

    /// Query string this reference contributes to the loader's request. The
    /// result takes part in cache keys downstream, so the order of the checks
    /// matters.
    pub fn encode_query(&self) -> String {
        let options = match &self.options {
            None | Some(serde_json::Value::Null) => return String::new(),
            Some(options) => options,
        };
        if let serde_json::Value::String(options) = options {
            return format!("?{options}");
        }
        if let Some(ident) = self.ident.as_deref().filter(|ident| !ident.is_empty()) {
            return format!("??{ident}");
        }
        if let Some(ident) = nested_ident(options) {
            return format!("??{ident}");
        }
        format!("?{options}")
    }
}

fn nested_ident(options: &serde_json::Value) -> Option<String> {
    match options.as_object()?.get("ident")? {
        serde_json::Value::Null | serde_json::Value::Bool(false) => None,
        serde_json::Value::String(ident) if ident.is_empty() => None,
        serde_json::Value::Number(number) if number.as_f64() == Some(0.0) => None,
        serde_json::Value::String(ident) => Some(ident.clone()),
        other => Some(other.to_string()),
    }
}
