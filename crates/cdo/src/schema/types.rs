//! Schema type descriptors.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::schema::Constraint;

/// Leaf value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum PrimitiveType {
    Bool = 1,
    Int = 2,
    Float = 3,
    Decimal = 4,
    Text = 5,
    Bytes = 6,
    Date = 7,
    Time = 8,
    DateTime = 9,
}

impl PrimitiveType {
    /// All primitive types in tag order.
    pub const ALL: [PrimitiveType; 9] = [
        PrimitiveType::Bool,
        PrimitiveType::Int,
        PrimitiveType::Float,
        PrimitiveType::Decimal,
        PrimitiveType::Text,
        PrimitiveType::Bytes,
        PrimitiveType::Date,
        PrimitiveType::Time,
        PrimitiveType::DateTime,
    ];

    /// Lower-case name used in schema definitions.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Int => "int",
            PrimitiveType::Float => "float",
            PrimitiveType::Decimal => "decimal",
            PrimitiveType::Text => "text",
            PrimitiveType::Bytes => "bytes",
            PrimitiveType::Date => "date",
            PrimitiveType::Time => "time",
            PrimitiveType::DateTime => "datetime",
        }
    }

    pub fn from_name(name: &str) -> Option<PrimitiveType> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The declared type of a field: a primitive or a named complex type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Primitive(PrimitiveType),
    Complex(String),
}

impl FieldType {
    /// Reference to a complex type by name.
    pub fn complex(name: impl Into<String>) -> Self {
        FieldType::Complex(name.into())
    }

    /// Name of the type, primitive or complex.
    pub fn name(&self) -> &str {
        match self {
            FieldType::Primitive(p) => p.name(),
            FieldType::Complex(name) => name,
        }
    }
}

impl From<PrimitiveType> for FieldType {
    fn from(p: PrimitiveType) -> Self {
        FieldType::Primitive(p)
    }
}

/// How many times a field may occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    Optional,
    Required,
    Repeated { min: usize, max: Option<usize> },
}

impl Cardinality {
    /// Unbounded repetition with no minimum.
    pub const MANY: Cardinality = Cardinality::Repeated { min: 0, max: None };

    pub fn is_repeated(self) -> bool {
        matches!(self, Cardinality::Repeated { .. })
    }

    pub(crate) fn code(self) -> &'static str {
        match self {
            Cardinality::Optional => "optional",
            Cardinality::Required => "required",
            Cardinality::Repeated { .. } => "repeated",
        }
    }
}

/// Per-field dictionary of frequent text values.
///
/// Binary encodings store an index into this table instead of the text.
/// Wire index 0 means "literal follows", index n means `values[n - 1]`.
#[derive(Debug, Clone, Default)]
pub struct CommonValues {
    values: Vec<String>,
    index: FxHashMap<String, usize>,
}

impl CommonValues {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for value in values {
            let value = value.into();
            if !table.index.contains_key(&value) {
                table.index.insert(value.clone(), table.values.len());
                table.values.push(value);
            }
        }
        table
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Zero-based position of `value`, if it is a common value.
    pub fn position(&self, value: &str) -> Option<usize> {
        self.index.get(value).copied()
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.values.get(position).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(String::as_str)
    }
}

/// Declaration of one field of a complex type.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) cardinality: Cardinality,
    pub(crate) field_type: FieldType,
    pub(crate) constraints: Vec<Constraint>,
    pub(crate) common_values: CommonValues,
    pub(crate) attribute: bool,
    /// Registry index of the complex target, filled in by `build()`.
    pub(crate) target: Option<usize>,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn field_type(&self) -> &FieldType {
        &self.field_type
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn common_values(&self) -> &CommonValues {
        &self.common_values
    }

    /// True if text formats render this field as an XML attribute.
    pub fn is_attribute(&self) -> bool {
        self.attribute
    }

    pub fn is_repeated(&self) -> bool {
        self.cardinality.is_repeated()
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.field_type, FieldType::Complex(_))
    }

    /// The primitive type, if this is a primitive field.
    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self.field_type {
            FieldType::Primitive(p) => Some(p),
            FieldType::Complex(_) => None,
        }
    }

    /// Name of the complex target type, if this is a complex field.
    pub fn target_name(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::Complex(name) => Some(name),
            FieldType::Primitive(_) => None,
        }
    }

    /// Registry index of the complex target type.
    pub fn target_index(&self) -> Option<usize> {
        self.target
    }

    /// Short description of the field's shape, used in error messages.
    pub(crate) fn kind(&self) -> &'static str {
        Self::kind_of(self.is_complex(), self.is_repeated())
    }

    pub(crate) fn kind_of(complex: bool, repeated: bool) -> &'static str {
        match (complex, repeated) {
            (false, false) => "a single value",
            (false, true) => "a repeated value",
            (true, false) => "a single object",
            (true, true) => "a repeated object",
        }
    }
}

/// A named record type with ordered fields.
#[derive(Debug, Clone)]
pub struct ComplexType {
    pub(crate) name: String,
    pub(crate) index: usize,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) by_name: FxHashMap<String, usize>,
}

impl ComplexType {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of this type in its registry.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.field_index(name).map(|i| &self.fields[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_names() {
        for p in PrimitiveType::ALL {
            assert_eq!(PrimitiveType::from_name(p.name()), Some(p));
        }
        assert_eq!(PrimitiveType::from_name("Customer"), None);
    }

    #[test]
    fn test_common_values_dedup() {
        let table = CommonValues::new(["London", "Paris", "London"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.position("Paris"), Some(1));
        assert_eq!(table.get(0), Some("London"));
        assert_eq!(table.position("Berlin"), None);
    }
}
