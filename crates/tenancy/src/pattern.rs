//! Tenant name templates.
//!
//! A database template is a string containing a single `{tenant}` placeholder,
//! for example `storage/tenants/{tenant}/main.sqlite3` or `app_{tenant}`.
//! [`TenantPattern`] tokenizes the template once into the literal prefix and
//! suffix around the placeholder and derives three things from it:
//!
//! - the concrete target for a tenant ([`TenantPattern::target_for`]),
//! - a wildcard pattern used to enumerate existing databases
//!   ([`TenantPattern::wildcard_pattern`]),
//! - an anchored matcher that recovers the tenant from an existing name
//!   ([`TenantPattern::capture_pattern`]).
//!
//! # Example
//!
//! ```
//! use helios_tenancy::pattern::{verbatim, TenantPattern};
//!
//! let pattern = TenantPattern::parse("app_{tenant}.sqlite3").unwrap();
//! assert_eq!(pattern.target_for("acme").unwrap(), "app_acme.sqlite3");
//! assert_eq!(pattern.wildcard_pattern("*", verbatim).unwrap(), "app_*.sqlite3");
//!
//! let capture = pattern.capture_pattern().unwrap();
//! assert_eq!(capture.capture("app_acme.sqlite3"), Some("acme"));
//! assert_eq!(capture.capture("other_acme.sqlite3"), None);
//! ```

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::TemplateError;

/// The placeholder substituted with the tenant identifier.
pub const TENANT_PLACEHOLDER: &str = "{tenant}";

static UNRESOLVED_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[A-Za-z_][A-Za-z0-9_]*\}").expect("static regex is valid"));

/// Escape function for pattern languages with no special characters.
pub fn verbatim(segment: &str) -> Cow<'_, str> {
    Cow::Borrowed(segment)
}

/// Returns `true` if `value` still contains a `{name}` style placeholder.
///
/// Used to detect strings that templating has not fully applied to.
pub fn has_unresolved_placeholder(value: &str) -> bool {
    UNRESOLVED_PLACEHOLDER.is_match(value)
}

/// A parsed database template with at most one `{tenant}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantPattern {
    template: String,
    placeholder_at: Option<usize>,
}

impl TenantPattern {
    /// Parses a template.
    ///
    /// Fails with [`TemplateError::MultiplePlaceholders`] if the placeholder
    /// occurs more than once. A template without a placeholder parses, but
    /// every per-tenant operation on it fails.
    pub fn parse(template: impl Into<String>) -> Result<Self, TemplateError> {
        let template = template.into();
        let count = template.matches(TENANT_PLACEHOLDER).count();
        if count > 1 {
            return Err(TemplateError::MultiplePlaceholders { template, count });
        }
        let placeholder_at = template.find(TENANT_PLACEHOLDER);
        Ok(Self {
            template,
            placeholder_at,
        })
    }

    /// Returns the raw template string.
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Returns `true` if the template contains the tenant placeholder.
    pub fn has_placeholder(&self) -> bool {
        self.placeholder_at.is_some()
    }

    /// Returns the literal text before and after the placeholder.
    pub fn segments(&self) -> Result<(&str, &str), TemplateError> {
        let at = self
            .placeholder_at
            .ok_or_else(|| TemplateError::MissingPlaceholder {
                template: self.template.clone(),
            })?;
        Ok((
            &self.template[..at],
            &self.template[at + TENANT_PLACEHOLDER.len()..],
        ))
    }

    /// Substitutes `tenant` for the placeholder.
    ///
    /// The caller is responsible for validating `tenant` first.
    pub fn target_for(&self, tenant: &str) -> Result<String, TemplateError> {
        let (prefix, suffix) = self.segments()?;
        Ok(format!("{prefix}{tenant}{suffix}"))
    }

    /// Substitutes a backend wildcard `token` for the placeholder.
    ///
    /// Literal segments pass through `escape`, so a backend whose pattern
    /// language gives meaning to characters in the template (such as `_` in
    /// SQL `LIKE`) can neutralize them.
    pub fn wildcard_pattern<F>(&self, token: &str, escape: F) -> Result<String, TemplateError>
    where
        F: for<'s> Fn(&'s str) -> Cow<'s, str>,
    {
        let (prefix, suffix) = self.segments()?;
        Ok(format!("{}{}{}", escape(prefix), token, escape(suffix)))
    }

    /// Builds the anchored matcher that extracts a tenant from a concrete name.
    pub fn capture_pattern(&self) -> Result<CapturePattern, TemplateError> {
        let (prefix, suffix) = self.segments()?;
        Ok(CapturePattern {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            forbidden: None,
        })
    }
}

/// Anchored matcher recovering the tenant substring from an existing name.
///
/// The name must start with the template prefix and end with the template
/// suffix, even when either is empty, and the part in between must be
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePattern {
    prefix: String,
    suffix: String,
    forbidden: Option<char>,
}

impl CapturePattern {
    /// Rejects captures containing `separator`.
    ///
    /// File globbing never lets `*` span a path separator, so the file
    /// adapter forbids `/` in captures to keep both sides consistent.
    pub fn forbidding(mut self, separator: char) -> Self {
        self.forbidden = Some(separator);
        self
    }

    /// Returns the tenant part of `name`, or `None` if `name` does not match.
    pub fn capture<'n>(&self, name: &'n str) -> Option<&'n str> {
        let tenant = name
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        if tenant.is_empty() {
            return None;
        }
        if let Some(separator) = self.forbidden
            && tenant.contains(separator)
        {
            return None;
        }
        Some(tenant)
    }

    /// Returns `true` if `name` matches the template.
    pub fn matches(&self, name: &str) -> bool {
        self.capture(name).is_some()
    }
}
