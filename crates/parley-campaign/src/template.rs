// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-recipient `{{variable}}` substitution.
//!
//! Supported variables: `name`, `first_name`, `phone`, `email`, and
//! `custom.<key>`. Unknown variables render as the empty string; an
//! unterminated `{{` is kept literally.

use parley_core::types::Contact;
use serde_json::Value;

/// Render `template` against one contact.
pub fn render(template: &str, contact: &Contact) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(&lookup(after[..end].trim(), contact));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn lookup(variable: &str, contact: &Contact) -> String {
    match variable {
        "name" => contact.display_name.clone().unwrap_or_default(),
        "first_name" => contact
            .display_name
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
            .unwrap_or_default()
            .to_string(),
        "phone" => contact.phone.clone().unwrap_or_default(),
        "email" => contact.email.clone().unwrap_or_default(),
        other => match other.strip_prefix("custom.") {
            Some(key) => match contact.custom_fields.get(key) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(v) => v.to_string(),
            },
            None => String::new(),
        },
    }
}
