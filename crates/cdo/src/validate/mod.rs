//! Constraint validation.
//!
//! Both modes walk the graph depth-first in pre-order, visiting fields in
//! schema declaration order. For each field the checks run as: presence,
//! occurrence bounds, then every constraint against every value in order,
//! then the field's child objects. Fail-fast validation therefore reports
//! exactly the first entry of the exhaustive report.

use std::fmt;
use std::marker::PhantomData;
use std::ops::ControlFlow;

use tracing::{debug, trace};

use crate::compact::field_path;
use crate::error::ValidationError;
use crate::limits::MAX_DEPTH;
use crate::model::{Node, Slot, Value};
use crate::schema::{Cardinality, FieldDescriptor};

/// What a violation is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViolationKind {
    /// A required field is absent.
    Missing,
    /// A repeated field has too few or too many occurrences.
    Occurs {
        found: usize,
        min: usize,
        max: Option<usize>,
    },
    Pattern { pattern: String, value: String },
    Enumeration { value: String },
    Range {
        value: String,
        min: Option<String>,
        max: Option<String>,
    },
    Length {
        length: usize,
        min: Option<usize>,
        max: Option<usize>,
    },
    /// The object is nested deeper than the configured limit.
    DepthExceeded { limit: usize },
}

fn bound<T: fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::Missing => write!(f, "required field is missing"),
            ViolationKind::Occurs { found, min, max } => {
                write!(f, "{found} occurrences, expected {min}..{}", bound(max))
            }
            ViolationKind::Pattern { pattern, value } => {
                write!(f, "{value:?} does not match pattern {pattern:?}")
            }
            ViolationKind::Enumeration { value } => {
                write!(f, "{value:?} is not an allowed value")
            }
            ViolationKind::Range { value, min, max } => {
                write!(f, "{value} is outside [{}, {}]", bound(min), bound(max))
            }
            ViolationKind::Length { length, min, max } => {
                write!(f, "length {length} is outside [{}, {}]", bound(min), bound(max))
            }
            ViolationKind::DepthExceeded { limit } => {
                write!(f, "nesting depth exceeds {limit}")
            }
        }
    }
}

/// A constraint failure, borrowing the object that owns the failing field.
#[derive(Debug, Clone, PartialEq)]
pub struct Violation<'a> {
    /// Location, e.g. `/Customers/Customer[0]/CustomerAcronym`.
    pub path: String,
    pub field: String,
    pub kind: ViolationKind,
    pub object: &'a Node,
}

impl Violation<'_> {
    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// Detaches the violation from the graph by copying the owning object.
    pub fn into_owned(self) -> ValidationError {
        ValidationError {
            path: self.path,
            field: self.field,
            kind: self.kind,
            object: Box::new(self.object.clone()),
        }
    }
}

impl fmt::Display for Violation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.kind)
    }
}

impl From<Violation<'_>> for ValidationError {
    fn from(violation: Violation<'_>) -> Self {
        violation.into_owned()
    }
}

/// Every violation in a graph, in visit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport<'a> {
    violations: Vec<Violation<'a>>,
}

impl<'a> ValidationReport<'a> {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation<'a>] {
        &self.violations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Violation<'a>> {
        self.violations.iter()
    }

    pub fn into_vec(self) -> Vec<Violation<'a>> {
        self.violations
    }

    /// Converts the report into owned errors.
    pub fn into_owned(self) -> Vec<ValidationError> {
        self.violations.into_iter().map(Violation::into_owned).collect()
    }
}

impl<'a> IntoIterator for ValidationReport<'a> {
    type Item = Violation<'a>;
    type IntoIter = std::vec::IntoIter<Violation<'a>>;

    fn into_iter(self) -> Self::IntoIter {
        self.violations.into_iter()
    }
}

impl fmt::Display for ValidationReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for violation in &self.violations {
            writeln!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Options for validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidateOptions {
    /// Objects nested deeper than this are reported and not descended into.
    pub max_depth: usize,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
        }
    }
}

/// Fail-fast validation: returns the first violation.
pub fn validate(node: &Node) -> Result<(), Violation<'_>> {
    validate_with(node, &ValidateOptions::default())
}

pub fn validate_with<'a>(node: &'a Node, options: &ValidateOptions) -> Result<(), Violation<'a>> {
    let mut first = None;
    walk(node, options, |violation| {
        first = Some(violation);
        ControlFlow::Break(())
    });
    debug!(ty = node.type_name(), valid = first.is_none(), "Validated graph");
    match first {
        Some(violation) => Err(violation),
        None => Ok(()),
    }
}

/// Exhaustive validation: returns every violation. Never aborts.
pub fn validate_fully(node: &Node) -> ValidationReport<'_> {
    validate_fully_with(node, &ValidateOptions::default())
}

pub fn validate_fully_with<'a>(node: &'a Node, options: &ValidateOptions) -> ValidationReport<'a> {
    let mut report = ValidationReport::default();
    walk(node, options, |violation| {
        report.violations.push(violation);
        ControlFlow::Continue(())
    });
    debug!(
        ty = node.type_name(),
        violations = report.len(),
        "Validated graph exhaustively"
    );
    report
}

fn walk<'a, F>(node: &'a Node, options: &ValidateOptions, sink: F)
where
    F: FnMut(Violation<'a>) -> ControlFlow<()>,
{
    let path = format!("/{}", node.type_name());
    let mut walker = Walker {
        options,
        sink,
        _graph: PhantomData,
    };
    let _ = walker.object(node, &path, 1);
}

struct Walker<'o, 'a, F> {
    options: &'o ValidateOptions,
    sink: F,
    _graph: PhantomData<&'a Node>,
}

impl<'a, F> Walker<'_, 'a, F>
where
    F: FnMut(Violation<'a>) -> ControlFlow<()>,
{
    fn report(&mut self, object: &'a Node, field: &str, path: String, kind: ViolationKind) -> ControlFlow<()> {
        trace!(path = %path, violation = %kind, "Constraint violated");
        (self.sink)(Violation {
            path,
            field: field.to_string(),
            kind,
            object,
        })
    }

    fn object(&mut self, node: &'a Node, path: &str, depth: usize) -> ControlFlow<()> {
        for (field, slot) in node.fields() {
            self.cardinality(node, field, slot, path)?;
            let repeated = field.is_repeated();
            match slot {
                Slot::Absent => {}
                Slot::Scalar(value) => self.value(node, field, value, path, None)?,
                Slot::Scalars(values) => {
                    for (i, value) in values.iter().enumerate() {
                        self.value(node, field, value, path, Some(i))?;
                    }
                }
                Slot::Child(child) => self.child(node, field, child, path, None, depth)?,
                Slot::Children(children) => {
                    for (i, child) in children.iter().enumerate() {
                        self.child(node, field, child, path, repeated.then_some(i), depth)?;
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn cardinality(&mut self, node: &'a Node, field: &FieldDescriptor, slot: &Slot, path: &str) -> ControlFlow<()> {
        let found = slot.count();
        match field.cardinality() {
            Cardinality::Required if found == 0 => {
                self.report(node, field.name(), field_path(path, field.name(), None), ViolationKind::Missing)
            }
            Cardinality::Repeated { min, max } if found < min || max.is_some_and(|m| found > m) => self.report(
                node,
                field.name(),
                field_path(path, field.name(), None),
                ViolationKind::Occurs { found, min, max },
            ),
            _ => ControlFlow::Continue(()),
        }
    }

    fn value(
        &mut self,
        node: &'a Node,
        field: &FieldDescriptor,
        value: &Value,
        path: &str,
        index: Option<usize>,
    ) -> ControlFlow<()> {
        for constraint in field.constraints() {
            if let Err(kind) = constraint.check(value) {
                self.report(node, field.name(), field_path(path, field.name(), index), kind)?;
            }
        }
        ControlFlow::Continue(())
    }

    fn child(
        &mut self,
        node: &'a Node,
        field: &FieldDescriptor,
        child: &'a Node,
        path: &str,
        index: Option<usize>,
        depth: usize,
    ) -> ControlFlow<()> {
        let child_path = field_path(path, field.name(), index);
        if depth >= self.options.max_depth {
            let limit = self.options.max_depth;
            return self.report(node, field.name(), child_path, ViolationKind::DepthExceeded { limit });
        }
        self.object(child, &child_path, depth + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, PrimitiveType, SchemaRegistry};

    fn registry() -> SchemaRegistry {
        SchemaRegistry::builder()
            .complex("Customers", |t| {
                t.repeated_with("Customer", FieldType::complex("Customer"), |f| f.occurs(1, Some(3)))
            })
            .complex("Customer", |t| {
                t.required_with("Number", PrimitiveType::Text, |f| f.pattern("C[0-9]+"))
                    .optional_with("Acronym", PrimitiveType::Text, |f| f.length(Some(2), Some(4)))
                    .optional_with("Tier", PrimitiveType::Text, |f| f.enumeration(["GOLD", "SILVER"]))
                    .repeated_with("Age", PrimitiveType::Int, |f| {
                        f.range(Some(Value::Int(0)), Some(Value::Int(150)))
                    })
            })
            .build()
            .unwrap()
    }

    fn customer(registry: &SchemaRegistry, number: &str) -> Node {
        let mut c = registry.new_node("Customer").unwrap();
        c.set("Number", number).unwrap();
        c
    }

    #[test]
    fn test_valid_graph() {
        let registry = registry();
        let mut root = registry.new_node("Customers").unwrap();
        let mut c = customer(&registry, "C1");
        c.set("Tier", "GOLD").unwrap();
        c.push("Age", 40i64).unwrap();
        root.push_child("Customer", c).unwrap();
        assert!(validate(&root).is_ok());
        assert!(validate_fully(&root).is_valid());
    }

    #[test]
    fn test_report_order_and_paths() {
        let registry = registry();
        let mut root = registry.new_node("Customers").unwrap();
        let mut first = customer(&registry, "X1");
        first.set("Acronym", "TOOLONG").unwrap();
        first.push("Age", 30i64).unwrap();
        first.push("Age", 200i64).unwrap();
        root.push_child("Customer", first).unwrap();
        let mut second = registry.new_node("Customer").unwrap();
        second.set("Tier", "BRONZE").unwrap();
        root.push_child("Customer", second).unwrap();

        let report = validate_fully(&root);
        let found: Vec<_> = report.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            found,
            vec![
                "/Customers/Customer[0]/Number",
                "/Customers/Customer[0]/Acronym",
                "/Customers/Customer[0]/Age[1]",
                "/Customers/Customer[1]/Number",
                "/Customers/Customer[1]/Tier",
            ]
        );
        assert_eq!(report.violations()[3].kind, ViolationKind::Missing);
        assert_eq!(report.violations()[3].object.type_name(), "Customer");
        assert_eq!(report.violations()[1].field, "Acronym");

        let first = validate(&root).unwrap_err();
        assert_eq!(first, report.violations()[0]);
    }

    #[test]
    fn test_occurs_bounds() {
        let registry = registry();
        let root = registry.new_node("Customers").unwrap();
        let violation = validate(&root).unwrap_err();
        assert_eq!(violation.path, "/Customers/Customer");
        assert_eq!(
            violation.kind,
            ViolationKind::Occurs {
                found: 0,
                min: 1,
                max: Some(3)
            }
        );
        assert_eq!(violation.message(), "0 occurrences, expected 1..3");
    }

    #[test]
    fn test_into_owned() {
        let registry = registry();
        let mut root = registry.new_node("Customers").unwrap();
        root.push_child("Customer", customer(&registry, "bad")).unwrap();
        let err: ValidationError = validate(&root).unwrap_err().into();
        assert_eq!(err.path, "/Customers/Customer[0]/Number");
        assert_eq!(err.object.get_text("Number"), Some("bad"));
        assert!(err.to_string().contains("does not match pattern"));
    }

    #[test]
    fn test_depth_limit() {
        let registry = SchemaRegistry::builder()
            .complex("Tree", |t| t.optional("Sub", FieldType::complex("Tree")))
            .build()
            .unwrap();
        let mut node = registry.new_node("Tree").unwrap();
        for _ in 0..4 {
            let mut parent = registry.new_node("Tree").unwrap();
            parent.set_child("Sub", node).unwrap();
            node = parent;
        }
        let options = ValidateOptions { max_depth: 3 };
        let report = validate_fully_with(&node, &options);
        assert_eq!(report.len(), 1);
        assert_eq!(report.violations()[0].path, "/Tree/Sub/Sub/Sub");
        assert_eq!(
            report.violations()[0].kind,
            ViolationKind::DepthExceeded { limit: 3 }
        );
    }
}
