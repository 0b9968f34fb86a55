//! Tenant name validation.
//!
//! Tenant identifiers end up inside file paths and database names, so each
//! backend family has its own rule set:
//!
//! - File backends check the raw identifier for path separators and quotes
//!   ([`validate_file_tenant_name`]).
//! - Server backends check the database name composed from the template,
//!   because the literal prefix and suffix count toward server limits
//!   ([`validate_server_database_name`]).
//!
//! The leading-digit and reserved-word rules are applied to the composed
//! name, so `app_{tenant}` accepts a tenant named `1abc` while a bare
//! `{tenant}` template rejects it.

use crate::error::{BadTenantNameError, NameRule, TemplateError};
use crate::pattern::has_unresolved_placeholder;

/// Characters never allowed in a tenant id interpolated into a path.
pub const FILE_FORBIDDEN_CHARACTERS: [char; 4] = ['/', '\'', '"', '`'];

/// Maximum length, in bytes, of a server database name.
pub const MAX_DATABASE_NAME_LENGTH: usize = 64;

/// Words a server database name may not be, compared case-insensitively.
pub const RESERVED_WORDS: &[&str] = &[
    "add",
    "all",
    "alter",
    "and",
    "as",
    "asc",
    "between",
    "by",
    "case",
    "check",
    "column",
    "constraint",
    "create",
    "cross",
    "database",
    "databases",
    "default",
    "delete",
    "desc",
    "distinct",
    "drop",
    "else",
    "exists",
    "false",
    "for",
    "foreign",
    "from",
    "grant",
    "group",
    "having",
    "in",
    "index",
    "inner",
    "insert",
    "into",
    "is",
    "join",
    "key",
    "left",
    "like",
    "limit",
    "not",
    "null",
    "on",
    "or",
    "order",
    "outer",
    "primary",
    "references",
    "revoke",
    "right",
    "schema",
    "schemas",
    "select",
    "set",
    "show",
    "table",
    "then",
    "true",
    "union",
    "unique",
    "update",
    "use",
    "using",
    "values",
    "when",
    "where",
    "with",
];

/// Validates a tenant id destined for a file path.
pub fn validate_file_tenant_name(tenant: &str) -> Result<(), BadTenantNameError> {
    if tenant.is_empty() {
        return Err(BadTenantNameError::new(tenant, NameRule::Empty));
    }
    if let Some(c) = tenant.chars().find(|c| FILE_FORBIDDEN_CHARACTERS.contains(c)) {
        return Err(BadTenantNameError::new(
            tenant,
            NameRule::ForbiddenCharacter(c),
        ));
    }
    Ok(())
}

/// Validates a server database name after template substitution.
///
/// Names that still contain an unresolved `{...}` placeholder are not
/// checked; they are not final names yet.
pub fn validate_server_database_name(name: &str) -> Result<(), BadTenantNameError> {
    if name.is_empty() {
        return Err(BadTenantNameError::new(name, NameRule::Empty));
    }
    if has_unresolved_placeholder(name) {
        return Ok(());
    }

    if name.len() > MAX_DATABASE_NAME_LENGTH {
        return Err(BadTenantNameError::new(
            name,
            NameRule::TooLong {
                length: name.len(),
                max: MAX_DATABASE_NAME_LENGTH,
            },
        ));
    }

    if let Some(c) = name.chars().find(|c| !is_server_identifier_char(*c)) {
        return Err(BadTenantNameError::new(name, NameRule::InvalidCharacter(c)));
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(BadTenantNameError::new(name, NameRule::LeadingDigit));
    }

    if let Some(word) = RESERVED_WORDS
        .iter()
        .find(|word| word.eq_ignore_ascii_case(name))
    {
        return Err(BadTenantNameError::new(
            name,
            NameRule::ReservedWord((*word).to_string()),
        ));
    }

    Ok(())
}

fn is_server_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-')
}

/// Checks a character set or collation name before it is spliced into SQL.
///
/// These names are keywords rather than quotable values, so only ASCII
/// letters, digits and `_` are accepted.
pub fn validate_sql_keyword_setting(setting: &str, value: &str) -> Result<(), TemplateError> {
    let valid =
        !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        return Ok(());
    }
    Err(TemplateError::InvalidSetting {
        setting: setting.to_string(),
        message: format!("'{value}' is not a valid name; use letters, digits and '_'"),
    })
}
