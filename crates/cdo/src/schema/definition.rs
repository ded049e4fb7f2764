//! Serializable schema definitions.
//!
//! Schemas can be declared in JSON instead of through [`SchemaBuilder`]:
//!
//! ```json
//! {
//!   "types": [
//!     { "name": "Customers", "fields": [
//!         { "name": "Customer", "type": "Customer", "cardinality": "repeated" } ] },
//!     { "name": "Customer", "fields": [
//!         { "name": "Acronym", "type": "text", "cardinality": "required",
//!           "pattern": "[a-z][A-Za-z]*" },
//!         { "name": "City", "type": "text", "common_values": ["London"] } ] }
//!   ]
//! }
//! ```
//!
//! A field `type` is a primitive name (`bool`, `int`, `float`, `decimal`,
//! `text`, `bytes`, `date`, `time`, `datetime`) or the name of a complex type.

use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::model::Value;
use crate::schema::{
    Cardinality, Constraint, FieldBuilder, FieldType, PrimitiveType, SchemaBuilder, SchemaRegistry,
    TypeBuilder,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDefinition {
    pub types: Vec<TypeDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardinalityDefinition {
    #[default]
    Optional,
    Required,
    Repeated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub cardinality: CardinalityDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_occurs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_occurs: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enumeration: Vec<String>,
    /// Lexical lower bound, parsed with the field's primitive type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub common_values: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub attribute: bool,
}

impl SchemaDefinition {
    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        serde_json::from_str(json).map_err(|e| SchemaError::Definition(e.to_string()))
    }

    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, SchemaError> {
        serde_json::from_reader(reader).map_err(|e| SchemaError::Definition(e.to_string()))
    }

    /// Converts the definition into a builder, parsing lexical bounds.
    pub fn into_builder(self) -> Result<SchemaBuilder, SchemaError> {
        let mut builder = SchemaBuilder::new();
        for ty in self.types {
            let mut type_builder = TypeBuilder::new(ty.name.clone());
            for field in ty.fields {
                type_builder = type_builder.field(field.into_builder(&ty.name)?);
            }
            builder = builder.add_type(type_builder);
        }
        Ok(builder)
    }

    pub fn into_registry(self) -> Result<SchemaRegistry, SchemaError> {
        self.into_builder()?.build()
    }
}

impl FieldDefinition {
    fn into_builder(self, ty: &str) -> Result<FieldBuilder, SchemaError> {
        let field_type = match PrimitiveType::from_name(&self.ty) {
            Some(p) => FieldType::Primitive(p),
            None => FieldType::Complex(self.ty.clone()),
        };
        let cardinality = match self.cardinality {
            CardinalityDefinition::Optional => Cardinality::Optional,
            CardinalityDefinition::Required => Cardinality::Required,
            CardinalityDefinition::Repeated => Cardinality::Repeated {
                min: self.min_occurs.unwrap_or(0),
                max: self.max_occurs,
            },
        };
        let bound = |lexical: Option<&String>| -> Result<Option<Value>, SchemaError> {
            let Some(lexical) = lexical else {
                return Ok(None);
            };
            let FieldType::Primitive(p) = &field_type else {
                return Err(SchemaError::InvalidField {
                    ty: ty.to_string(),
                    field: self.name.clone(),
                    reason: "range bounds on a complex field".into(),
                });
            };
            Value::parse(*p, lexical)
                .map(Some)
                .map_err(|e| SchemaError::InvalidField {
                    ty: ty.to_string(),
                    field: self.name.clone(),
                    reason: e.to_string(),
                })
        };
        let min = bound(self.min.as_ref())?;
        let max = bound(self.max.as_ref())?;

        let mut field = FieldBuilder::new(self.name.clone(), cardinality, field_type.clone());
        if let Some(pattern) = &self.pattern {
            field = field.pattern(pattern);
        }
        if !self.enumeration.is_empty() {
            field = field.enumeration(self.enumeration);
        }
        if min.is_some() || max.is_some() {
            field = field.constraint(Constraint::range(min, max));
        }
        if self.min_length.is_some() || self.max_length.is_some() {
            field = field.length(self.min_length, self.max_length);
        }
        if !self.common_values.is_empty() {
            field = field.common_values(self.common_values);
        }
        if self.attribute {
            field = field.attribute();
        }
        Ok(field)
    }
}

impl SchemaRegistry {
    /// Loads a registry from a JSON schema definition.
    pub fn from_json_str(json: &str) -> Result<SchemaRegistry, SchemaError> {
        SchemaDefinition::from_json_str(json)?.into_registry()
    }

    pub fn from_json_reader<R: Read>(reader: R) -> Result<SchemaRegistry, SchemaError> {
        SchemaDefinition::from_json_reader(reader)?.into_registry()
    }
}
