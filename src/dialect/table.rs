use super::Dialect;
use crate::core::{Result, TxError};
use std::fmt;

/// Optionally schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    schema: Option<String>,
    name: String,
}

impl TableReference {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier("table name", &name)?;
        Ok(Self { schema: None, name })
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_identifier("schema name", &schema)?;
        let mut table = Self::new(name)?;
        table.schema = Some(schema);
        Ok(table)
    }

    pub fn with_optional_schema(schema: Option<&str>, name: &str) -> Result<Self> {
        match schema {
            Some(schema) => Self::qualified(schema, name),
            None => Self::new(name),
        }
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render as escaped SQL for the given dialect.
    pub fn render(&self, dialect: &dyn Dialect) -> String {
        match &self.schema {
            Some(schema) => format!(
                "{}.{}",
                dialect.quote_identifier(schema),
                dialect.quote_identifier(&self.name)
            ),
            None => dialect.quote_identifier(&self.name),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn validate_identifier(kind: &str, ident: &str) -> Result<()> {
    if ident.is_empty() {
        return Err(TxError::InvalidConfig(format!("{} must not be empty", kind)));
    }
    if ident.contains('\0') {
        return Err(TxError::InvalidConfig(format!(
            "{} '{}' contains a NUL character",
            kind,
            ident.escape_default()
        )));
    }
    Ok(())
}
