//! Field schema definitions and the `schema.txt` segment file format.
//!
//! Every durable segment records the schema that was active when it was
//! written. At startup the recorded schema is checked against the
//! configured one: fields may be added over time, but a recorded field
//! whose type changed or disappeared is a fatal mismatch.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StratumError};

/// Supported field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Tokenized free text.
    Text,
    /// Single untokenized term.
    Keyword,
    /// Numeric attribute.
    Numeric,
}

impl FieldKind {
    fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Keyword => "keyword",
            FieldKind::Numeric => "numeric",
        }
    }

    fn parse(s: &str) -> Option<FieldKind> {
        match s {
            "text" => Some(FieldKind::Text),
            "keyword" => Some(FieldKind::Keyword),
            "numeric" => Some(FieldKind::Numeric),
            _ => None,
        }
    }
}

/// A single field definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,

    /// Field kind.
    pub kind: FieldKind,
}

/// Ordered set of field definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Schema::default()
    }

    /// Add a field definition. Duplicate names are rejected.
    pub fn add_field<S: Into<String>>(&mut self, name: S, kind: FieldKind) -> Result<()> {
        let name = name.into();
        if self.field(&name).is_some() {
            return Err(StratumError::schema(format!("duplicate field: {name}")));
        }
        self.fields.push(FieldDef { name, kind });
        Ok(())
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// All field definitions in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when no fields are defined.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check whether this (configured) schema can serve segments written
    /// under `recorded`. Adding fields is compatible; removing a field or
    /// changing its kind is not.
    pub fn is_compatible_with(&self, recorded: &Schema) -> bool {
        recorded.fields.iter().all(|old| {
            self.field(&old.name)
                .map(|new| new.kind == old.kind)
                .unwrap_or(false)
        })
    }

    /// Render the `schema.txt` text form: one `name<TAB>kind` line per
    /// field, preceded by a version header.
    pub fn to_text(&self) -> String {
        let mut text = String::from("schema v1\n");
        for field in &self.fields {
            text.push_str(&field.name);
            text.push('\t');
            text.push_str(field.kind.as_str());
            text.push('\n');
        }
        text
    }

    /// Parse the `schema.txt` text form.
    pub fn parse_text(text: &str) -> Result<Schema> {
        let mut lines = text.lines();
        match lines.next() {
            Some("schema v1") => {}
            other => {
                return Err(StratumError::corrupt(format!(
                    "unsupported schema header: {other:?}"
                )));
            }
        }

        let mut schema = Schema::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, kind) = line
                .split_once('\t')
                .ok_or_else(|| StratumError::corrupt(format!("malformed schema line: {line}")))?;
            let kind = FieldKind::parse(kind)
                .ok_or_else(|| StratumError::corrupt(format!("unknown field kind: {kind}")))?;
            schema.add_field(name, kind)?;
        }
        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_field("title", FieldKind::Text).unwrap();
        schema.add_field("tag", FieldKind::Keyword).unwrap();
        schema
    }

    #[test]
    fn test_text_roundtrip() {
        let schema = sample_schema();
        let text = schema.to_text();
        assert_eq!(text, "schema v1\ntitle\ttext\ntag\tkeyword\n");

        let parsed = Schema::parse_text(&text).unwrap();
        assert_eq!(parsed, schema);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut schema = sample_schema();
        assert!(schema.add_field("title", FieldKind::Keyword).is_err());
    }

    #[test]
    fn test_compatibility() {
        let recorded = sample_schema();

        // Adding a field is fine.
        let mut extended = recorded.clone();
        extended.add_field("price", FieldKind::Numeric).unwrap();
        assert!(extended.is_compatible_with(&recorded));

        // Changing a kind is not.
        let mut changed = Schema::new();
        changed.add_field("title", FieldKind::Keyword).unwrap();
        changed.add_field("tag", FieldKind::Keyword).unwrap();
        assert!(!changed.is_compatible_with(&recorded));

        // Dropping a field is not.
        let mut dropped = Schema::new();
        dropped.add_field("title", FieldKind::Text).unwrap();
        assert!(!dropped.is_compatible_with(&recorded));
    }

    #[test]
    fn test_parse_rejects_bad_header() {
        assert!(Schema::parse_text("schema v2\n").is_err());
        assert!(Schema::parse_text("").is_err());
    }
}
