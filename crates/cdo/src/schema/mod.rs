//! Schema registry: complex types, fields, constraints and common values.
//!
//! A registry is built once (from [`SchemaBuilder`] or a JSON
//! [`SchemaDefinition`]) and is immutable afterwards. Graphs and binary
//! buffers hold shared references to it.

mod constraint;
mod definition;
mod registry;
mod types;

pub use constraint::{Constraint, Pattern};
pub use definition::{CardinalityDefinition, FieldDefinition, SchemaDefinition, TypeDefinition};
pub use registry::{FieldBuilder, SchemaBuilder, SchemaRegistry, TypeBuilder};
pub use types::{Cardinality, CommonValues, ComplexType, FieldDescriptor, FieldType, PrimitiveType};
