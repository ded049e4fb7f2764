//! Schema registry and its builders.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::SchemaError;
use crate::limits::FINGERPRINT_LEN;
use crate::model::{Node, Value};
use crate::schema::{
    Cardinality, CommonValues, ComplexType, Constraint, FieldDescriptor, FieldType, PrimitiveType,
};

/// Immutable set of complex types, shared by every graph built from it.
///
/// Types reference each other by name in the builder; `build()` resolves the
/// names to registry indices and rejects dangling references.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    types: Vec<Arc<ComplexType>>,
    by_name: FxHashMap<String, usize>,
    fingerprint: [u8; FINGERPRINT_LEN],
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ComplexType>> {
        self.by_name.get(name).map(|&i| &self.types[i])
    }

    /// Looks up a type, failing with [`SchemaError::TypeNotFound`].
    pub fn require(&self, name: &str) -> Result<&Arc<ComplexType>, SchemaError> {
        self.get(name).ok_or_else(|| SchemaError::TypeNotFound {
            name: name.to_string(),
        })
    }

    pub fn by_index(&self, index: usize) -> Option<&Arc<ComplexType>> {
        self.types.get(index)
    }

    /// Types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = &Arc<ComplexType>> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The complex type a field points at.
    pub fn target(&self, field: &FieldDescriptor) -> Option<&Arc<ComplexType>> {
        field.target.and_then(|i| self.types.get(i))
    }

    /// First bytes of a SHA-256 over the canonical schema description.
    ///
    /// Binary buffers carry this so that decoding with a different registry
    /// fails instead of misreading fields.
    pub fn fingerprint(&self) -> [u8; FINGERPRINT_LEN] {
        self.fingerprint
    }

    /// Creates an empty object of the named type.
    pub fn new_node(&self, name: &str) -> Result<Node, SchemaError> {
        self.require(name).map(|ty| Node::new(Arc::clone(ty)))
    }

    /// Returns true if `ty` is this registry's own type of that name.
    pub(crate) fn owns(&self, ty: &ComplexType) -> bool {
        self.types
            .get(ty.index)
            .is_some_and(|own| std::ptr::eq(Arc::as_ptr(own), ty) || own.name == ty.name)
    }
}

fn fingerprint(types: &[Arc<ComplexType>]) -> [u8; FINGERPRINT_LEN] {
    let mut hasher = Sha256::new();
    for ty in types {
        hasher.update(ty.name.as_bytes());
        hasher.update([0]);
        for field in &ty.fields {
            hasher.update(field.name.as_bytes());
            hasher.update([0]);
            hasher.update(field.cardinality.code().as_bytes());
            if let Cardinality::Repeated { min, max } = field.cardinality {
                hasher.update(format!("{min}..{max:?}").as_bytes());
            }
            hasher.update([0]);
            hasher.update(field.field_type.name().as_bytes());
            hasher.update([field.attribute as u8]);
            for constraint in &field.constraints {
                hasher.update(constraint.describe().as_bytes());
                hasher.update([0]);
            }
            for value in field.common_values.iter() {
                hasher.update(value.as_bytes());
                hasher.update([0x1f]);
            }
            hasher.update([0x1e]);
        }
        hasher.update([0x1d]);
    }
    let hash = hasher.finalize();
    let mut out = [0u8; FINGERPRINT_LEN];
    out.copy_from_slice(&hash[..FINGERPRINT_LEN]);
    out
}

// =============================================================================
// BUILDERS
// =============================================================================

/// Builder for a [`SchemaRegistry`].
///
/// # Example
///
/// ```rust
/// use cdo::schema::{FieldType, PrimitiveType, SchemaBuilder};
///
/// let registry = SchemaBuilder::new()
///     .complex("Customer", |t| t
///         .required_with("Acronym", PrimitiveType::Text, |f| f.pattern("[a-z][A-Za-z]*"))
///         .optional("Address", FieldType::complex("Address")))
///     .complex("Address", |t| t.repeated("Line", PrimitiveType::Text))
///     .build()
///     .unwrap();
/// assert_eq!(registry.len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeBuilder>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a complex type; `f` adds its fields.
    pub fn complex<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(TypeBuilder) -> TypeBuilder,
    {
        self.types.push(f(TypeBuilder::new(name)));
        self
    }

    /// Adds a type built elsewhere.
    pub fn add_type(mut self, ty: TypeBuilder) -> Self {
        self.types.push(ty);
        self
    }

    /// Resolves type references and freezes the registry.
    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        let mut by_name = FxHashMap::default();
        for (index, ty) in self.types.iter().enumerate() {
            if by_name.insert(ty.name.clone(), index).is_some() {
                return Err(SchemaError::DuplicateType {
                    name: ty.name.clone(),
                });
            }
        }

        let mut types = Vec::with_capacity(self.types.len());
        for (index, ty) in self.types.into_iter().enumerate() {
            if let Some(err) = ty.error {
                return Err(err);
            }
            let mut fields = Vec::with_capacity(ty.fields.len());
            let mut field_index = FxHashMap::default();
            for builder in ty.fields {
                if let Some(err) = builder.error {
                    return Err(err);
                }
                let mut field = builder.field;
                if field_index
                    .insert(field.name.clone(), fields.len())
                    .is_some()
                {
                    return Err(SchemaError::DuplicateField {
                        ty: ty.name.clone(),
                        field: field.name,
                    });
                }
                if let FieldType::Complex(target) = &field.field_type {
                    let resolved = by_name.get(target).copied().ok_or_else(|| {
                        SchemaError::UnresolvedType {
                            ty: ty.name.clone(),
                            field: field.name.clone(),
                            target: target.clone(),
                        }
                    })?;
                    field.target = Some(resolved);
                }
                check_field(&ty.name, &field)?;
                fields.push(field);
            }
            types.push(Arc::new(ComplexType {
                name: ty.name,
                index,
                fields,
                by_name: field_index,
            }));
        }

        let fingerprint = fingerprint(&types);
        debug!(
            types = types.len(),
            fingerprint = ?fingerprint,
            "Built schema registry"
        );
        Ok(SchemaRegistry {
            types,
            by_name,
            fingerprint,
        })
    }
}

fn check_field(ty: &str, field: &FieldDescriptor) -> Result<(), SchemaError> {
    let invalid = |reason: String| SchemaError::InvalidField {
        ty: ty.to_string(),
        field: field.name.clone(),
        reason,
    };
    if let Cardinality::Repeated { min, max: Some(max) } = field.cardinality {
        if max < min {
            return Err(invalid(format!("max occurs {max} is below min occurs {min}")));
        }
    }
    if field.attribute && (field.is_complex() || field.is_repeated()) {
        return Err(invalid("only single primitive fields can be attributes".into()));
    }
    if !field.common_values.is_empty() && field.primitive() != Some(PrimitiveType::Text) {
        return Err(invalid("common values require a text field".into()));
    }
    let Some(primitive) = field.primitive() else {
        if field.constraints.is_empty() {
            return Ok(());
        }
        return Err(invalid("complex fields cannot carry value constraints".into()));
    };
    for constraint in &field.constraints {
        match constraint {
            Constraint::Range { min, max } => {
                for bound in [min, max].into_iter().flatten() {
                    if bound.primitive_type() != primitive {
                        return Err(invalid(format!(
                            "range bound {bound} is {} but the field is {primitive}",
                            bound.primitive_type()
                        )));
                    }
                }
            }
            Constraint::Length { .. }
                if !matches!(primitive, PrimitiveType::Text | PrimitiveType::Bytes) =>
            {
                return Err(invalid(format!("length constraint on {primitive} field")));
            }
            Constraint::Enumeration(values) => {
                if values.is_empty() {
                    return Err(invalid("empty enumeration".into()));
                }
                for value in values {
                    Value::parse(primitive, value).map_err(|e| invalid(e.to_string()))?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Builder for one complex type.
#[derive(Debug)]
pub struct TypeBuilder {
    name: String,
    fields: Vec<FieldBuilder>,
    error: Option<SchemaError>,
}

impl TypeBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            error: None,
        }
    }

    pub fn field(mut self, field: FieldBuilder) -> Self {
        self.fields.push(field);
        self
    }

    pub fn required(self, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        self.field(FieldBuilder::new(name, Cardinality::Required, ty))
    }

    pub fn optional(self, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        self.field(FieldBuilder::new(name, Cardinality::Optional, ty))
    }

    pub fn repeated(self, name: impl Into<String>, ty: impl Into<FieldType>) -> Self {
        self.field(FieldBuilder::new(name, Cardinality::MANY, ty))
    }

    pub fn required_with<F>(self, name: impl Into<String>, ty: impl Into<FieldType>, f: F) -> Self
    where
        F: FnOnce(FieldBuilder) -> FieldBuilder,
    {
        self.field(f(FieldBuilder::new(name, Cardinality::Required, ty)))
    }

    pub fn optional_with<F>(self, name: impl Into<String>, ty: impl Into<FieldType>, f: F) -> Self
    where
        F: FnOnce(FieldBuilder) -> FieldBuilder,
    {
        self.field(f(FieldBuilder::new(name, Cardinality::Optional, ty)))
    }

    pub fn repeated_with<F>(self, name: impl Into<String>, ty: impl Into<FieldType>, f: F) -> Self
    where
        F: FnOnce(FieldBuilder) -> FieldBuilder,
    {
        self.field(f(FieldBuilder::new(name, Cardinality::MANY, ty)))
    }

    /// Records an error to be reported by [`SchemaBuilder::build`].
    pub fn fail(mut self, error: SchemaError) -> Self {
        self.error.get_or_insert(error);
        self
    }
}

/// Builder for one field.
///
/// Errors (such as an invalid pattern) are deferred to `build()` so that
/// builders can be chained.
#[derive(Debug)]
pub struct FieldBuilder {
    field: FieldDescriptor,
    error: Option<SchemaError>,
}

impl FieldBuilder {
    pub fn new(name: impl Into<String>, cardinality: Cardinality, ty: impl Into<FieldType>) -> Self {
        Self {
            field: FieldDescriptor {
                name: name.into(),
                cardinality,
                field_type: ty.into(),
                constraints: Vec::new(),
                common_values: CommonValues::default(),
                attribute: false,
                target: None,
            },
            error: None,
        }
    }

    /// Sets repetition bounds; implies a repeated field.
    pub fn occurs(mut self, min: usize, max: Option<usize>) -> Self {
        self.field.cardinality = Cardinality::Repeated { min, max };
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.field.constraints.push(constraint);
        self
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        match Constraint::pattern(pattern) {
            Ok(c) => self.field.constraints.push(c),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    pub fn enumeration<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.constraint(Constraint::enumeration(values))
    }

    pub fn range(self, min: Option<Value>, max: Option<Value>) -> Self {
        self.constraint(Constraint::range(min, max))
    }

    pub fn length(self, min: Option<usize>, max: Option<usize>) -> Self {
        self.constraint(Constraint::length(min, max))
    }

    pub fn common_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.field.common_values = CommonValues::new(values);
        self
    }

    /// Renders the field as an XML attribute.
    pub fn attribute(mut self) -> Self {
        self.field.attribute = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customers() -> SchemaBuilder {
        SchemaBuilder::new()
            .complex("Customers", |t| {
                t.repeated("Customer", FieldType::complex("Customer"))
            })
            .complex("Customer", |t| {
                t.required("Number", PrimitiveType::Text)
                    .optional_with("City", PrimitiveType::Text, |f| {
                        f.common_values(["London", "Paris"])
                    })
            })
    }

    #[test]
    fn test_build_resolves_targets() {
        let registry = customers().build().unwrap();
        let root = registry.require("Customers").unwrap();
        let field = &root.fields()[0];
        assert_eq!(registry.target(field).unwrap().name(), "Customer");
        assert_eq!(root.field_index("Customer"), Some(0));
    }

    #[test]
    fn test_unresolved_reference() {
        let err = SchemaBuilder::new()
            .complex("A", |t| t.optional("b", FieldType::complex("B")))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnresolvedType {
                ty: "A".into(),
                field: "b".into(),
                target: "B".into()
            }
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let err = customers()
            .complex("Customer", |t| t)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateType { .. }));

        let err = SchemaBuilder::new()
            .complex("A", |t| {
                t.optional("x", PrimitiveType::Int)
                    .optional("x", PrimitiveType::Text)
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn test_deferred_pattern_error() {
        let err = SchemaBuilder::new()
            .complex("A", |t| {
                t.required_with("x", PrimitiveType::Text, |f| f.pattern("[oops"))
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidPattern { .. }));
    }

    #[test]
    fn test_field_checks() {
        let cases = [
            FieldBuilder::new("x", Cardinality::Optional, PrimitiveType::Int).common_values(["1"]),
            FieldBuilder::new("x", Cardinality::MANY, PrimitiveType::Text).attribute(),
            FieldBuilder::new("x", Cardinality::Optional, PrimitiveType::Int)
                .range(Some(Value::from("a")), None),
            FieldBuilder::new("x", Cardinality::Optional, PrimitiveType::Int).length(Some(1), None),
            FieldBuilder::new("x", Cardinality::Optional, PrimitiveType::Int).enumeration(["one"]),
            FieldBuilder::new("x", Cardinality::Optional, PrimitiveType::Int).occurs(3, Some(2)),
        ];
        for case in cases {
            let err = SchemaBuilder::new()
                .complex("A", |t| t.field(case))
                .build()
                .unwrap_err();
            assert!(matches!(err, SchemaError::InvalidField { .. }), "{err}");
        }
    }

    #[test]
    fn test_fingerprint_tracks_shape() {
        let a = customers().build().unwrap();
        let b = customers().build().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let c = customers()
            .complex("Extra", |t| t.optional("x", PrimitiveType::Int))
            .build()
            .unwrap();
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_new_node_unknown_type() {
        let registry = customers().build().unwrap();
        assert!(registry.new_node("Customer").is_ok());
        assert_eq!(
            registry.new_node("Nope").unwrap_err(),
            SchemaError::TypeNotFound {
                name: "Nope".into()
            }
        );
    }
}
