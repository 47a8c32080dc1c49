//! Deterministic rewriting of requests a platform cannot send natively.
//!
//! [`plan`] is a pure function of the capability declaration, the request
//! and the template catalogue. Precedence, first supported step wins:
//!
//! 1. `Template` renders to `Text` through the catalogue.
//! 2. `List` flattens to `Buttons` when buttons are supported and the rows
//!    fit, otherwise renders to numbered `Text`.
//! 3. `Buttons` that are unsupported or too many render to numbered `Text`.
//! 4. `Media` that is unsupported, or of a kind the platform does not
//!    attach, renders to caption plus link `Text`.
//! 5. `ReadReceipt` is skipped.
//!
//! A `Text` the adapter cannot send is a wiring error.

use std::borrow::Cow;

use crate::types::{
    ButtonOption, Capability, CapabilityDeclaration, ErrorKind, ListRow, ListSection, SendRequest,
};

use super::templates::{render_template, TemplateCatalog};

/// Decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchPlan<'a> {
    /// Send this representation through the adapter.
    Deliver(Cow<'a, SendRequest>),
    /// Nothing to send; report `skipped`.
    Skip,
    /// Report `failed` with this kind without calling the platform.
    Fail(ErrorKind),
    /// The adapter cannot send even plain text.
    Misconfigured,
}

impl DispatchPlan<'_> {
    /// Whether the delivered representation differs from the input.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Deliver(Cow::Borrowed(_)))
    }
}

/// Choose how to send `request` on an adapter with `capabilities`.
pub fn plan<'a>(
    capabilities: &CapabilityDeclaration,
    request: &'a SendRequest,
    templates: &dyn TemplateCatalog,
) -> DispatchPlan<'a> {
    let limits = capabilities.limits();
    let mut current = Cow::Borrowed(request);

    loop {
        if capabilities.supports(current.capability()) && fits_natively(capabilities, &current) {
            return DispatchPlan::Deliver(current);
        }

        let next = match &*current {
            SendRequest::Template { name, params, .. } => match templates.template_text(name) {
                Some(text) => SendRequest::text(render_template(text, params)),
                None => return DispatchPlan::Fail(ErrorKind::TemplateTextMissing),
            },
            SendRequest::List {
                header,
                sections,
                footer,
                ..
            } => {
                let rows: Vec<&ListRow> = sections.iter().flat_map(|s| s.rows.iter()).collect();
                if capabilities.supports(Capability::Buttons)
                    && !rows.is_empty()
                    && rows.len() <= limits.max_buttons
                {
                    SendRequest::Buttons {
                        body: header.clone(),
                        header: None,
                        footer: footer.clone(),
                        options: rows
                            .iter()
                            .map(|row| {
                                ButtonOption::new(
                                    row.id.clone(),
                                    truncate_chars(&row.label, limits.button_label_max_chars),
                                )
                            })
                            .collect(),
                    }
                } else {
                    SendRequest::text(list_as_text(header, sections))
                }
            }
            SendRequest::Buttons { body, options, .. } => SendRequest::text(numbered_text(
                body,
                options.iter().map(|o| o.label.clone()),
            )),
            SendRequest::Media { url, caption, .. } => {
                SendRequest::text(match caption.as_deref().filter(|c| !c.is_empty()) {
                    Some(caption) => format!("{caption}\n{url}"),
                    None => url.clone(),
                })
            }
            SendRequest::ReadReceipt { .. } => return DispatchPlan::Skip,
            SendRequest::Text { .. } => return DispatchPlan::Misconfigured,
        };
        current = Cow::Owned(next);
    }
}

fn fits_natively(capabilities: &CapabilityDeclaration, request: &SendRequest) -> bool {
    let limits = capabilities.limits();
    match request {
        SendRequest::Buttons { options, .. } => {
            !options.is_empty() && options.len() <= limits.max_buttons
        }
        SendRequest::List { sections, .. } => {
            let rows: usize = sections.iter().map(|s| s.rows.len()).sum();
            rows > 0 && rows <= limits.max_list_rows
        }
        SendRequest::Media { kind, .. } => limits.attaches(*kind),
        _ => true,
    }
}

/// Render rows as `"{header}\n1. Label - Description\n2. ..."` with
/// numbering continuous across sections.
pub fn list_as_text(header: &str, sections: &[ListSection]) -> String {
    numbered_text(
        header,
        sections
            .iter()
            .flat_map(|s| s.rows.iter())
            .map(|row| match row.description.as_deref().filter(|d| !d.is_empty()) {
                Some(description) => format!("{} - {description}", row.label),
                None => row.label.clone(),
            }),
    )
}

/// Prefix `lines` with `1.`, `2.`, ... under `prompt`, newline separated.
pub fn numbered_text(prompt: &str, lines: impl Iterator<Item = String>) -> String {
    let mut parts = Vec::new();
    if !prompt.is_empty() {
        parts.push(prompt.to_owned());
    }
    parts.extend((1usize..).zip(lines).map(|(n, line)| format!("{n}. {line}")));
    parts.join("\n")
}

/// Keep at most `max` characters.
pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
