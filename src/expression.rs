//! Partial-update expressions.
//!
//! An [`UpdateExpression`] is an ordered list of `SET attribute = value`
//! assignments. The store builds them by hand for status transitions, and
//! derives them from whole records for upserts via [`UpdateExpression::builder`].
//!
//! Record types describe their persisted shape with a static [`Field`] table
//! ([`Attributes::FIELDS`]) mapping each Rust field name to the attribute name
//! it serializes under, so update targets always match the names used to
//! encode and decode the record.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// A record field and the attribute it is persisted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub attribute: &'static str,
}

impl Field {
    pub const fn new(name: &'static str, attribute: &'static str) -> Self {
        Self { name, attribute }
    }
}

/// Records that can be turned into update expressions.
///
/// `FIELDS` must list every serialized field, in the order assignments
/// should be emitted.
pub trait Attributes: Serialize {
    const FIELDS: &'static [Field];
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateExpression {
    assignments: Vec<(String, Value)>,
}

impl UpdateExpression {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) an assignment.
    pub fn set(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.assignments.iter_mut().find(|(a, _)| a == attribute) {
            Some((_, existing)) => *existing = value,
            None => self.assignments.push((attribute.to_string(), value)),
        }
        self
    }

    pub fn builder<T: Attributes>(record: &T) -> UpdateExpressionBuilder<'_, T> {
        UpdateExpressionBuilder {
            record,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn assignments(&self) -> &[(String, Value)] {
        &self.assignments
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}

impl fmt::Display for UpdateExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SET ")?;
        for (i, (attribute, _)) in self.assignments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "#{attribute} = :{attribute}")?;
        }
        Ok(())
    }
}

/// Selects which fields of a record go into an update expression.
///
/// Fields are named by their Rust field names. Either an include list or an
/// exclude list may be given, not both; with neither, every field is used.
pub struct UpdateExpressionBuilder<'a, T> {
    record: &'a T,
    include: Vec<&'a str>,
    exclude: Vec<&'a str>,
}

impl<'a, T: Attributes> UpdateExpressionBuilder<'a, T> {
    pub fn include(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.include.extend(fields);
        self
    }

    pub fn exclude(mut self, fields: impl IntoIterator<Item = &'a str>) -> Self {
        self.exclude.extend(fields);
        self
    }

    pub fn build(self) -> Result<UpdateExpression> {
        if !self.include.is_empty() && !self.exclude.is_empty() {
            return Err(expression_error(
                "request may specify include fields or exclude fields, but not both",
            ));
        }
        if let Some(unknown) = self
            .include
            .iter()
            .chain(&self.exclude)
            .find(|name| !T::FIELDS.iter().any(|field| field.name == **name))
        {
            return Err(expression_error(format!("unknown field {unknown}")));
        }

        let serialized = serde_json::to_value(self.record)
            .map_err(|e| expression_error(format!("failed to serialize record: {e}")))?;
        let Value::Object(mut attributes) = serialized else {
            return Err(expression_error("record does not serialize to an attribute map"));
        };

        let mut expression = UpdateExpression::new();
        for field in T::FIELDS {
            let selected = if self.include.is_empty() {
                !self.exclude.contains(&field.name)
            } else {
                self.include.contains(&field.name)
            };
            if !selected {
                continue;
            }
            let value = attributes.remove(field.attribute).ok_or_else(|| {
                expression_error(format!(
                    "field {} has no serialized attribute {}",
                    field.name, field.attribute
                ))
            })?;
            expression.assignments.push((field.attribute.to_string(), value));
        }
        Ok(expression)
    }
}

fn expression_error(reason: impl Into<String>) -> Error {
    Error::Expression {
        reason: reason.into(),
    }
}
