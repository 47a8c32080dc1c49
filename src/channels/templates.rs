//! Canonical template text used when a platform cannot send templates.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(\d+)\s*\}\}").ok());

/// Lookup of template name to canonical text with `{{n}}` placeholders.
///
/// Template text is application data supplied by the caller.
pub trait TemplateCatalog: Send + Sync {
    /// Text for `name`, if the template is known.
    fn template_text(&self, name: &str) -> Option<&str>;
}

/// Catalogue backed by a map, usually filled from the `[templates]` config table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticTemplateCatalog {
    templates: HashMap<String, String>,
}

impl StaticTemplateCatalog {
    /// Empty catalogue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template.
    #[must_use]
    pub fn with_template(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(name.into(), text.into());
        self
    }

    /// Number of known templates.
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Whether no templates are known.
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl From<HashMap<String, String>> for StaticTemplateCatalog {
    fn from(templates: HashMap<String, String>) -> Self {
        Self { templates }
    }
}

impl TemplateCatalog for StaticTemplateCatalog {
    fn template_text(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }
}

/// Substitute `{{i}}` with `params[i-1]`.
///
/// Placeholders without a matching parameter are left untouched.
pub fn render_template(text: &str, params: &[String]) -> String {
    let Some(placeholder) = PLACEHOLDER.as_ref() else {
        return text.to_owned();
    };
    placeholder
        .replace_all(text, |caps: &Captures<'_>| {
            caps.get(1)
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .and_then(|index| index.checked_sub(1))
                .and_then(|index| params.get(index))
                .cloned()
                .unwrap_or_else(|| caps[0].to_owned())
        })
        .into_owned()
}
