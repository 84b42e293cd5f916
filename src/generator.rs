use std::path::Path;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::BenchmarkError;

/// Sample document every inserted document is cloned from.
#[derive(Debug, Clone)]
pub struct DocumentTemplate {
    fields: Map<String, Value>,
}

impl DocumentTemplate {
    pub fn load(path: &Path) -> Result<Self, BenchmarkError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BenchmarkError::config(format!(
                "failed to read document template {}: {e}",
                path.display()
            ))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, BenchmarkError> {
        match serde_json::from_str(text) {
            Ok(Value::Object(fields)) => Ok(DocumentTemplate { fields }),
            Ok(other) => Err(BenchmarkError::config(format!(
                "document template must be a JSON object, got {}",
                kind(&other)
            ))),
            Err(e) => Err(BenchmarkError::config(format!(
                "invalid document template: {e}"
            ))),
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Stamps fresh identities onto clones of a template.
#[derive(Debug)]
pub struct DocumentGen<'a> {
    template: &'a DocumentTemplate,
    id_field: &'a str,
    partition_key: Option<&'a str>,
}

impl<'a> DocumentGen<'a> {
    pub fn new(
        template: &'a DocumentTemplate,
        id_field: &'a str,
        partition_key: Option<&'a str>,
    ) -> Self {
        DocumentGen {
            template,
            id_field,
            partition_key,
        }
    }

    pub fn next_document(&self) -> Value {
        let mut doc = self.template.fields.clone();
        doc.insert(
            self.id_field.to_owned(),
            Value::String(Uuid::new_v4().to_string()),
        );
        if let Some(pk) = self.partition_key {
            doc.insert(pk.to_owned(), Value::String(Uuid::new_v4().to_string()));
        }
        Value::Object(doc)
    }

    pub fn next_batch(&self, len: usize) -> Vec<Value> {
        (0..len).map(|_| self.next_document()).collect()
    }
}
