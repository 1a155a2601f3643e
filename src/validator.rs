//! Declarative input validation
//!
//! Rules are declared per field with a pipe-delimited string, e.g.
//! `"required|email|unique:users,email"`. Rule names resolve against a fixed
//! registry at parse time; an unknown name is a configuration error, not a
//! silent pass. For each field the rules run left to right and the first
//! failure records that field's single error message; remaining fields are
//! still validated.
//!
//! `unique` and `exists` consult the database through the injected pool. Any
//! database problem fails closed: the field is reported invalid rather than
//! letting unverified input through.
//!
//! # Usage
//!
//! ```ignore
//! use triage::validator::Validator;
//!
//! let validator = Validator::new(&[
//!     ("username", "required|alphanumeric|min:3|max:50"),
//!     ("email", "required|email|unique:users,email"),
//!     ("ward", "in:icu,er,general"),
//! ])?;
//!
//! let result = validator.validate(&ctx.form, Some(&pool)).await;
//! if result.fails() {
//!     return Err(result.into_error());
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use sqlx::PgPool;
use thiserror::Error;

use crate::error::AppError;

// ============================================================================
// Rule parsing
// ============================================================================

/// Error raised when a rule string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleParseError {
    #[error("unknown validation rule: {0}")]
    UnknownRule(String),
    #[error("rule {0} is missing its parameter")]
    MissingParameter(String),
    #[error("rule {0} has a malformed parameter: {1}")]
    BadParameter(String, String),
    #[error("unsafe SQL identifier in rule: {0}")]
    UnsafeIdentifier(String),
}

impl From<RuleParseError> for AppError {
    fn from(err: RuleParseError) -> Self {
        AppError::internal_msg(format!("Validator misconfigured: {err}"))
    }
}

/// One compiled rule. The variants are the whole registry; adding a rule
/// means adding a variant and its arm in `parse_rule` and `check`.
#[derive(Debug, Clone, PartialEq)]
enum Rule {
    Required,
    Email,
    Min(usize),
    Max(usize),
    Numeric,
    Integer,
    Alpha,
    Alphanumeric,
    Date(String),
    Matches(String),
    In(Vec<String>),
    Phone,
    NationalId,
    Unique {
        table: String,
        column: String,
        except_id: Option<i64>,
    },
    Exists {
        table: String,
        column: String,
    },
}

impl Rule {
    fn is_database_rule(&self) -> bool {
        matches!(self, Rule::Unique { .. } | Rule::Exists { .. })
    }
}

fn parse_rule(spec: &str) -> Result<Rule, RuleParseError> {
    let (name, arg) = match spec.split_once(':') {
        Some((name, arg)) => (name, Some(arg)),
        None => (spec, None),
    };

    let require_arg = || {
        arg.filter(|a| !a.is_empty())
            .ok_or_else(|| RuleParseError::MissingParameter(name.to_string()))
    };

    let parse_usize = |value: &str| {
        value
            .parse::<usize>()
            .map_err(|_| RuleParseError::BadParameter(name.to_string(), value.to_string()))
    };

    match name {
        "required" => Ok(Rule::Required),
        "email" => Ok(Rule::Email),
        "min" => Ok(Rule::Min(parse_usize(require_arg()?)?)),
        "max" => Ok(Rule::Max(parse_usize(require_arg()?)?)),
        "numeric" => Ok(Rule::Numeric),
        "integer" => Ok(Rule::Integer),
        "alpha" => Ok(Rule::Alpha),
        "alphanumeric" => Ok(Rule::Alphanumeric),
        // The whole argument is the date format; formats may contain commas
        "date" => Ok(Rule::Date(
            arg.filter(|a| !a.is_empty())
                .unwrap_or("%Y-%m-%d")
                .to_string(),
        )),
        "matches" => Ok(Rule::Matches(require_arg()?.to_string())),
        "in" => {
            let values: Vec<String> = require_arg()?
                .split(',')
                .map(|s| s.to_string())
                .collect();
            Ok(Rule::In(values))
        }
        "phone" => Ok(Rule::Phone),
        "national_id" => Ok(Rule::NationalId),
        "unique" => {
            let parts: Vec<&str> = require_arg()?.split(',').collect();
            if parts.len() < 2 || parts.len() > 3 {
                return Err(RuleParseError::BadParameter(
                    name.to_string(),
                    arg.unwrap_or_default().to_string(),
                ));
            }
            let (table, column) = (parts[0].to_string(), parts[1].to_string());
            check_identifier(&table)?;
            check_identifier(&column)?;
            let except_id = match parts.get(2) {
                Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                    RuleParseError::BadParameter(name.to_string(), raw.to_string())
                })?),
                None => None,
            };
            Ok(Rule::Unique {
                table,
                column,
                except_id,
            })
        }
        "exists" => {
            let parts: Vec<&str> = require_arg()?.split(',').collect();
            if parts.len() != 2 {
                return Err(RuleParseError::BadParameter(
                    name.to_string(),
                    arg.unwrap_or_default().to_string(),
                ));
            }
            check_identifier(parts[0])?;
            check_identifier(parts[1])?;
            Ok(Rule::Exists {
                table: parts[0].to_string(),
                column: parts[1].to_string(),
            })
        }
        other => Err(RuleParseError::UnknownRule(other.to_string())),
    }
}

// Table/column names are interpolated into SQL, so they must be plain
// identifiers.
fn check_identifier(s: &str) -> Result<(), RuleParseError> {
    let mut chars = s.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(RuleParseError::UnsafeIdentifier(s.to_string()))
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Compiled field rules, evaluated against submitted form data
#[derive(Debug)]
pub struct Validator {
    fields: Vec<(String, Vec<Rule>)>,
}

/// Outcome of a validation run
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    errors: BTreeMap<String, String>,
}

impl ValidationResult {
    pub fn passes(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fails(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Field -> first failing message
    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// Convert into the 422 error carrying the field map
    pub fn into_error(self) -> AppError {
        AppError::validation(self.errors)
    }
}

impl Validator {
    /// Compile a rule table. Every rule name is resolved now; an unknown
    /// name or unsafe parameter fails here, before any request is served.
    pub fn new(spec: &[(&str, &str)]) -> Result<Self, RuleParseError> {
        let mut fields = Vec::with_capacity(spec.len());
        for (field, rules_str) in spec {
            let mut rules = Vec::new();
            for part in rules_str.split('|').filter(|p| !p.is_empty()) {
                rules.push(parse_rule(part)?);
            }
            fields.push((field.to_string(), rules));
        }
        Ok(Self { fields })
    }

    /// Whether any field uses a database-backed rule
    pub fn needs_database(&self) -> bool {
        self.fields
            .iter()
            .any(|(_, rules)| rules.iter().any(Rule::is_database_rule))
    }

    /// Validate submitted data.
    ///
    /// Database rules need `pool`; when it is absent (or a query fails) the
    /// field is reported invalid, never silently accepted.
    pub async fn validate(
        &self,
        data: &HashMap<String, String>,
        pool: Option<&PgPool>,
    ) -> ValidationResult {
        let mut result = ValidationResult::default();

        for (field, rules) in &self.fields {
            let value = data.get(field).map(String::as_str);
            for rule in rules {
                if let Some(message) = check(rule, field, value, data, pool).await {
                    result.errors.insert(field.clone(), message);
                    break; // first failure wins for this field
                }
            }
        }

        result
    }
}

// ============================================================================
// Rule evaluation
// ============================================================================

fn is_present(value: Option<&str>) -> bool {
    match value {
        // Literal "0" counts as present even though it is falsy elsewhere
        Some(v) => v == "0" || !v.trim().is_empty(),
        None => false,
    }
}

fn label(field: &str) -> String {
    field
        .split('_')
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"))
}

async fn check(
    rule: &Rule,
    field: &str,
    value: Option<&str>,
    data: &HashMap<String, String>,
    pool: Option<&PgPool>,
) -> Option<String> {
    let name = label(field);

    if let Rule::Required = rule {
        return if is_present(value) {
            None
        } else {
            Some(format!("The {name} field is required"))
        };
    }

    // Other rules only apply to present values; `required` decides absence.
    if !is_present(value) {
        return None;
    }
    let value = value.unwrap_or_default();

    match rule {
        Rule::Required => unreachable!("handled above"),
        Rule::Email => {
            if email_regex().is_match(value) {
                None
            } else {
                Some(format!("The {name} must be a valid email address"))
            }
        }
        Rule::Min(min) => {
            if value.chars().count() >= *min {
                None
            } else {
                Some(format!("The {name} must be at least {min} characters"))
            }
        }
        Rule::Max(max) => {
            if value.chars().count() <= *max {
                None
            } else {
                Some(format!("The {name} may not be greater than {max} characters"))
            }
        }
        Rule::Numeric => {
            if value.parse::<f64>().is_ok() {
                None
            } else {
                Some(format!("The {name} must be a number"))
            }
        }
        Rule::Integer => {
            if value.parse::<i64>().is_ok() {
                None
            } else {
                Some(format!("The {name} must be an integer"))
            }
        }
        Rule::Alpha => {
            if value.chars().all(|c| c.is_alphabetic() || c == ' ') {
                None
            } else {
                Some(format!("The {name} may only contain letters and spaces"))
            }
        }
        Rule::Alphanumeric => {
            if value.chars().all(|c| c.is_alphanumeric()) {
                None
            } else {
                Some(format!("The {name} may only contain letters and numbers"))
            }
        }
        Rule::Date(format) => {
            if NaiveDate::parse_from_str(value, format).is_ok() {
                None
            } else {
                Some(format!("The {name} is not a valid date"))
            }
        }
        Rule::Matches(other) => {
            if data.get(other).map(String::as_str) == Some(value) {
                None
            } else {
                Some(format!("The {name} must match {}", label(other)))
            }
        }
        Rule::In(allowed) => {
            if allowed.iter().any(|v| v == value) {
                None
            } else {
                Some(format!("The {name} must be one of: {}", allowed.join(", ")))
            }
        }
        Rule::Phone => {
            let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
            let chars_ok = value
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
            if chars_ok && (8..=15).contains(&digits) {
                None
            } else {
                Some(format!("The {name} must be a valid phone number"))
            }
        }
        Rule::NationalId => {
            if value.len() == 16 && value.chars().all(|c| c.is_ascii_digit()) {
                None
            } else {
                Some(format!("The {name} must be a 16 digit national ID number"))
            }
        }
        Rule::Unique {
            table,
            column,
            except_id,
        } => match count_rows(pool, table, column, value, *except_id).await {
            Ok(0) => None,
            Ok(_) => Some(format!("The {name} has already been taken")),
            Err(_) => Some(format!("The {name} could not be verified")),
        },
        Rule::Exists { table, column } => {
            match count_rows(pool, table, column, value, None).await {
                Ok(0) => Some(format!("The selected {name} is invalid")),
                Ok(_) => None,
                Err(_) => Some(format!("The {name} could not be verified")),
            }
        }
    }
}

#[derive(Debug, Error)]
#[error("validation query failed")]
struct QueryFailed;

async fn count_rows(
    pool: Option<&PgPool>,
    table: &str,
    column: &str,
    value: &str,
    except_id: Option<i64>,
) -> Result<i64, QueryFailed> {
    let Some(pool) = pool else {
        tracing::error!(table, column, "Database rule evaluated without a pool");
        return Err(QueryFailed);
    };

    // Identifiers were checked at parse time; values are bound.
    let mut qb = sqlx::QueryBuilder::new("SELECT COUNT(*) FROM ");
    qb.push(table);
    qb.push(" WHERE ");
    qb.push(column);
    qb.push(" = ");
    qb.push_bind(value);
    if let Some(id) = except_id {
        qb.push(" AND id <> ");
        qb.push_bind(id);
    }

    let row: (i64,) = qb
        .build_query_as()
        .fetch_one(pool)
        .await
        .map_err(|e| {
            tracing::error!(table, column, error = %e, "Validation query failed");
            QueryFailed
        })?;
    Ok(row.0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn run(spec: &[(&str, &str)], pairs: &[(&str, &str)]) -> ValidationResult {
        Validator::new(spec).unwrap().validate(&data(pairs), None).await
    }

    #[tokio::test]
    async fn test_required_passes_literal_zero() {
        let result = run(&[("qty", "required")], &[("qty", "0")]).await;
        assert!(result.passes(), "literal \"0\" must satisfy required");
    }

    #[tokio::test]
    async fn test_required_fails_on_missing_and_blank() {
        let result = run(&[("name", "required")], &[]).await;
        assert_eq!(
            result.errors().get("name").map(String::as_str),
            Some("The Name field is required")
        );

        let result = run(&[("name", "required")], &[("name", "   ")]).await;
        assert!(result.fails());
    }

    #[tokio::test]
    async fn test_min_boundary() {
        let result = run(&[("code", "min:3")], &[("code", "ab")]).await;
        assert_eq!(
            result.errors().get("code").map(String::as_str),
            Some("The Code must be at least 3 characters")
        );

        let result = run(&[("code", "min:3")], &[("code", "abc")]).await;
        assert!(result.passes());
    }

    #[tokio::test]
    async fn test_max_boundary() {
        assert!(run(&[("code", "max:3")], &[("code", "abc")]).await.passes());
        assert!(run(&[("code", "max:3")], &[("code", "abcd")]).await.fails());
    }

    #[tokio::test]
    async fn test_email() {
        assert!(run(&[("email", "email")], &[("email", "a@b.org")]).await.passes());
        assert!(run(&[("email", "email")], &[("email", "not-an-email")]).await.fails());
        assert!(run(&[("email", "email")], &[("email", "a b@c.org")]).await.fails());
    }

    #[tokio::test]
    async fn test_optional_field_skipped_when_absent() {
        // Without `required`, an absent or empty value passes other rules
        assert!(run(&[("email", "email|min:5")], &[]).await.passes());
        assert!(run(&[("email", "email")], &[("email", "")]).await.passes());
    }

    #[tokio::test]
    async fn test_numeric_and_integer() {
        assert!(run(&[("v", "numeric")], &[("v", "3.5")]).await.passes());
        assert!(run(&[("v", "numeric")], &[("v", "abc")]).await.fails());
        assert!(run(&[("v", "integer")], &[("v", "42")]).await.passes());
        assert!(run(&[("v", "integer")], &[("v", "3.5")]).await.fails());
    }

    #[tokio::test]
    async fn test_alpha_and_alphanumeric() {
        assert!(run(&[("v", "alpha")], &[("v", "Mary Jane")]).await.passes());
        assert!(run(&[("v", "alpha")], &[("v", "Mary2")]).await.fails());
        assert!(run(&[("v", "alphanumeric")], &[("v", "abc123")]).await.passes());
        assert!(run(&[("v", "alphanumeric")], &[("v", "abc 123")]).await.fails());
    }

    #[tokio::test]
    async fn test_date_formats() {
        assert!(run(&[("dob", "date")], &[("dob", "1990-04-17")]).await.passes());
        assert!(run(&[("dob", "date")], &[("dob", "17/04/1990")]).await.fails());
        assert!(run(&[("dob", "date:%d/%m/%Y")], &[("dob", "17/04/1990")]).await.passes());
        assert!(run(&[("dob", "date")], &[("dob", "1990-13-40")]).await.fails());
    }

    #[tokio::test]
    async fn test_matches() {
        let spec = &[("password_confirm", "matches:password")];
        assert!(run(spec, &[("password", "x1"), ("password_confirm", "x1")]).await.passes());
        let result = run(spec, &[("password", "x1"), ("password_confirm", "x2")]).await;
        assert_eq!(
            result.errors().get("password_confirm").map(String::as_str),
            Some("The Password Confirm must match Password")
        );
    }

    #[tokio::test]
    async fn test_in_list() {
        assert!(run(&[("ward", "in:icu,er,general")], &[("ward", "er")]).await.passes());
        assert!(run(&[("ward", "in:icu,er,general")], &[("ward", "morgue")]).await.fails());
    }

    #[tokio::test]
    async fn test_phone() {
        assert!(run(&[("p", "phone")], &[("p", "+62 812-3456-789")]).await.passes());
        assert!(run(&[("p", "phone")], &[("p", "12345")]).await.fails());
        assert!(run(&[("p", "phone")], &[("p", "call-me-maybe")]).await.fails());
    }

    #[tokio::test]
    async fn test_national_id() {
        assert!(run(&[("nid", "national_id")], &[("nid", "3201234567890001")]).await.passes());
        assert!(run(&[("nid", "national_id")], &[("nid", "12345")]).await.fails());
        assert!(run(&[("nid", "national_id")], &[("nid", "320123456789000a")]).await.fails());
    }

    #[tokio::test]
    async fn test_first_failure_per_field_short_circuits() {
        let result = run(&[("email", "required|email|min:50")], &[("email", "")]).await;
        // Only the `required` message, not email/min
        assert_eq!(
            result.errors().get("email").map(String::as_str),
            Some("The Email field is required")
        );
    }

    #[tokio::test]
    async fn test_all_fields_reported() {
        let result = run(
            &[("username", "required"), ("email", "required|email")],
            &[("email", "bad")],
        )
        .await;
        assert_eq!(result.errors().len(), 2);
        assert!(result.errors().contains_key("username"));
        assert!(result.errors().contains_key("email"));
    }

    #[test]
    fn test_unknown_rule_is_config_error() {
        let err = Validator::new(&[("x", "required|telepathy")]).unwrap_err();
        assert_eq!(err, RuleParseError::UnknownRule("telepathy".to_string()));
    }

    #[test]
    fn test_malformed_parameters_rejected() {
        assert!(matches!(
            Validator::new(&[("x", "min:abc")]).unwrap_err(),
            RuleParseError::BadParameter(_, _)
        ));
        assert!(matches!(
            Validator::new(&[("x", "min")]).unwrap_err(),
            RuleParseError::MissingParameter(_)
        ));
        assert!(matches!(
            Validator::new(&[("x", "unique:users")]).unwrap_err(),
            RuleParseError::BadParameter(_, _)
        ));
    }

    #[test]
    fn test_unsafe_identifiers_rejected() {
        assert!(matches!(
            Validator::new(&[("x", "unique:users;drop,email")]).unwrap_err(),
            RuleParseError::UnsafeIdentifier(_)
        ));
        assert!(matches!(
            Validator::new(&[("x", "exists:users,em ail")]).unwrap_err(),
            RuleParseError::UnsafeIdentifier(_)
        ));
    }

    #[tokio::test]
    async fn test_database_rule_fails_closed_without_pool() {
        let result = run(&[("email", "unique:users,email")], &[("email", "a@b.org")]).await;
        assert_eq!(
            result.errors().get("email").map(String::as_str),
            Some("The Email could not be verified")
        );
    }

    #[test]
    fn test_needs_database() {
        let v = Validator::new(&[("email", "required|email")]).unwrap();
        assert!(!v.needs_database());
        let v = Validator::new(&[("email", "exists:users,email")]).unwrap();
        assert!(v.needs_database());
    }

    #[test]
    fn test_label_humanizes_field_names() {
        assert_eq!(label("full_name"), "Full Name");
        assert_eq!(label("email"), "Email");
    }
}
