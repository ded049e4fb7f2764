//! The mutable object graph.

use std::fmt;
use std::sync::Arc;

use crate::error::FieldError;
use crate::model::Value;
use crate::schema::{ComplexType, FieldDescriptor};

/// Storage for one field of a [`Node`].
///
/// Repeated slots are never empty: removing the last occurrence turns the
/// slot back into `Absent`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Slot {
    #[default]
    Absent,
    Scalar(Value),
    Scalars(Vec<Value>),
    Child(Box<Node>),
    Children(Vec<Node>),
}

impl Slot {
    pub fn is_absent(&self) -> bool {
        matches!(self, Slot::Absent)
    }

    /// Number of occurrences held.
    pub fn count(&self) -> usize {
        match self {
            Slot::Absent => 0,
            Slot::Scalar(_) | Slot::Child(_) => 1,
            Slot::Scalars(v) => v.len(),
            Slot::Children(v) => v.len(),
        }
    }
}

/// An object in the graph: an instance of exactly one complex type.
///
/// Slots follow the type's field declaration order. Children are owned, so a
/// graph is always a tree and cloning it is a deep copy.
#[derive(Clone)]
pub struct Node {
    ty: Arc<ComplexType>,
    slots: Vec<Slot>,
}

impl Node {
    /// Creates an object with every field absent.
    pub fn new(ty: Arc<ComplexType>) -> Self {
        let slots = vec![Slot::Absent; ty.fields().len()];
        Self { ty, slots }
    }

    pub fn type_name(&self) -> &str {
        self.ty.name()
    }

    pub fn complex_type(&self) -> &Arc<ComplexType> {
        &self.ty
    }

    /// Fields paired with their slots, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&FieldDescriptor, &Slot)> {
        self.ty.fields().iter().zip(self.slots.iter())
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn slot_by_name(&self, field: &str) -> Option<&Slot> {
        self.ty.field_index(field).map(|i| &self.slots[i])
    }

    pub fn is_present(&self, field: &str) -> bool {
        self.slot_by_name(field).is_some_and(|s| !s.is_absent())
    }

    /// Value of a single-valued primitive field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self.slot_by_name(field)? {
            Slot::Scalar(v) => Some(v),
            _ => None,
        }
    }

    /// Text value of a primitive field, if it holds text.
    pub fn get_text(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_text)
    }

    /// All values of a primitive field (one for single-valued fields).
    pub fn get_all(&self, field: &str) -> &[Value] {
        match self.slot_by_name(field) {
            Some(Slot::Scalar(v)) => std::slice::from_ref(v),
            Some(Slot::Scalars(v)) => v,
            _ => &[],
        }
    }

    pub fn child(&self, field: &str) -> Option<&Node> {
        match self.slot_by_name(field)? {
            Slot::Child(c) => Some(&**c),
            _ => None,
        }
    }

    pub fn child_mut(&mut self, field: &str) -> Option<&mut Node> {
        let index = self.ty.field_index(field)?;
        match &mut self.slots[index] {
            Slot::Child(c) => Some(&mut **c),
            _ => None,
        }
    }

    /// All objects of a complex field (one for single-valued fields).
    pub fn children(&self, field: &str) -> &[Node] {
        match self.slot_by_name(field) {
            Some(Slot::Child(c)) => std::slice::from_ref(&**c),
            Some(Slot::Children(v)) => v,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self, field: &str) -> &mut [Node] {
        let Some(index) = self.ty.field_index(field) else {
            return &mut [];
        };
        match &mut self.slots[index] {
            Slot::Child(c) => std::slice::from_mut(&mut **c),
            Slot::Children(v) => v,
            _ => &mut [],
        }
    }

    /// Sets a single-valued primitive field.
    pub fn set(&mut self, field: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        let value = value.into().normalized();
        let index = self.checked(field, false, false)?;
        self.check_value(index, &value)?;
        self.slots[index] = Slot::Scalar(value);
        Ok(())
    }

    /// Appends to a repeated primitive field.
    pub fn push(&mut self, field: &str, value: impl Into<Value>) -> Result<(), FieldError> {
        let value = value.into().normalized();
        let index = self.checked(field, false, true)?;
        self.check_value(index, &value)?;
        self.append_scalar(index, value);
        Ok(())
    }

    /// Sets a single-valued complex field.
    pub fn set_child(&mut self, field: &str, child: Node) -> Result<(), FieldError> {
        let index = self.checked(field, true, false)?;
        self.check_child(index, &child)?;
        self.slots[index] = Slot::Child(Box::new(child));
        Ok(())
    }

    /// Appends to a repeated complex field.
    pub fn push_child(&mut self, field: &str, child: Node) -> Result<(), FieldError> {
        let index = self.checked(field, true, true)?;
        self.check_child(index, &child)?;
        self.append_child(index, child);
        Ok(())
    }

    /// Clears a field of any kind, returning what it held.
    pub fn unset(&mut self, field: &str) -> Result<Slot, FieldError> {
        let index = self.index_of(field)?;
        Ok(std::mem::take(&mut self.slots[index]))
    }

    fn index_of(&self, field: &str) -> Result<usize, FieldError> {
        self.ty
            .field_index(field)
            .ok_or_else(|| FieldError::UnknownField {
                ty: self.ty.name().to_string(),
                field: field.to_string(),
            })
    }

    fn checked(&self, field: &str, complex: bool, repeated: bool) -> Result<usize, FieldError> {
        let index = self.index_of(field)?;
        let descriptor = &self.ty.fields()[index];
        if descriptor.is_complex() != complex || descriptor.is_repeated() != repeated {
            let expected = FieldDescriptor::kind_of(complex, repeated);
            return Err(FieldError::WrongKind {
                field: field.to_string(),
                expected,
                actual: descriptor.kind(),
            });
        }
        Ok(index)
    }

    fn check_value(&self, index: usize, value: &Value) -> Result<(), FieldError> {
        let descriptor = &self.ty.fields()[index];
        match descriptor.primitive() {
            Some(p) if p == value.primitive_type() => {
                value.check().map_err(|reason| FieldError::InvalidValue {
                    field: descriptor.name().to_string(),
                    value: format!("{value:?}"),
                    reason,
                })
            }
            Some(p) => Err(FieldError::TypeMismatch {
                field: descriptor.name().to_string(),
                expected: p,
                found: value.primitive_type(),
            }),
            None => Err(FieldError::WrongKind {
                field: descriptor.name().to_string(),
                expected: "a primitive field",
                actual: descriptor.kind(),
            }),
        }
    }

    fn check_child(&self, index: usize, child: &Node) -> Result<(), FieldError> {
        let descriptor = &self.ty.fields()[index];
        let expected = descriptor.target_name().unwrap_or_default();
        if child.type_name() != expected {
            return Err(FieldError::ChildTypeMismatch {
                field: descriptor.name().to_string(),
                expected: expected.to_string(),
                found: child.type_name().to_string(),
            });
        }
        Ok(())
    }

    // ---- unchecked by-index access for parsers and decoders ----

    pub(crate) fn put(&mut self, index: usize, slot: Slot) {
        self.slots[index] = match slot {
            Slot::Scalars(v) if v.is_empty() => Slot::Absent,
            Slot::Children(v) if v.is_empty() => Slot::Absent,
            other => other,
        };
    }

    pub(crate) fn append_scalar(&mut self, index: usize, value: Value) {
        match &mut self.slots[index] {
            Slot::Scalars(v) => v.push(value),
            slot => *slot = Slot::Scalars(vec![value]),
        }
    }

    pub(crate) fn append_child(&mut self, index: usize, child: Node) {
        match &mut self.slots[index] {
            Slot::Children(v) => v.push(child),
            slot => *slot = Slot::Children(vec![child]),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.ty, &other.ty) || self.ty.name() == other.ty.name())
            && self.slots == other.slots
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.type_name());
        for (field, slot) in self.fields() {
            if !slot.is_absent() {
                s.field(field.name(), slot);
            }
        }
        s.finish()
    }
}

impl fmt::Display for Node {
    /// One-line summary: `Customer{Number=C1, City=London, Address{..}}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.type_name())?;
        let mut first = true;
        for (field, slot) in self.fields() {
            if slot.is_absent() {
                continue;
            }
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match slot {
                Slot::Scalar(v) => write!(f, "{}={v}", field.name())?,
                Slot::Scalars(v) => write!(f, "{}=[{} values]", field.name(), v.len())?,
                Slot::Child(_) => write!(f, "{}{{..}}", field.name())?,
                Slot::Children(v) => write!(f, "{}[{}]", field.name(), v.len())?,
                Slot::Absent => {}
            }
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldType, PrimitiveType, SchemaBuilder, SchemaRegistry};

    fn registry() -> SchemaRegistry {
        SchemaBuilder::new()
            .complex("Customer", |t| {
                t.required("Number", PrimitiveType::Text)
                    .repeated("Phone", PrimitiveType::Text)
                    .optional("Address", FieldType::complex("Address"))
                    .repeated("Order", FieldType::complex("Order"))
            })
            .complex("Address", |t| t.optional("City", PrimitiveType::Text))
            .complex("Order", |t| t.required("Total", PrimitiveType::Int))
            .build()
            .unwrap()
    }

    #[test]
    fn test_setters_enforce_schema() {
        let registry = registry();
        let mut customer = registry.new_node("Customer").unwrap();

        customer.set("Number", "C1").unwrap();
        assert_eq!(customer.get_text("Number"), Some("C1"));

        assert!(matches!(
            customer.set("Nope", "x"),
            Err(FieldError::UnknownField { .. })
        ));
        assert!(matches!(
            customer.set("Number", 5),
            Err(FieldError::TypeMismatch { .. })
        ));
        assert!(matches!(
            customer.set("Phone", "123"),
            Err(FieldError::WrongKind { .. })
        ));
        let order = registry.new_node("Order").unwrap();
        assert!(matches!(
            customer.set_child("Address", order),
            Err(FieldError::ChildTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_setters_reject_unwritable_values() {
        let registry = SchemaBuilder::new()
            .complex("Reading", |t| {
                t.optional("Level", PrimitiveType::Float)
                    .repeated("Samples", PrimitiveType::Float)
                    .optional("Amount", PrimitiveType::Decimal)
            })
            .build()
            .unwrap();
        let mut reading = registry.new_node("Reading").unwrap();

        assert!(matches!(
            reading.set("Level", f64::NAN),
            Err(FieldError::InvalidValue { .. })
        ));
        assert!(matches!(
            reading.push("Samples", f64::NAN),
            Err(FieldError::InvalidValue { .. })
        ));
        assert!(!reading.is_present("Level"));
        assert!(!reading.is_present("Samples"));
        reading.set("Level", f64::NEG_INFINITY).unwrap();

        let wide = Value::Decimal {
            mantissa: 1,
            exponent: crate::limits::MAX_DECIMAL_SCALE + 1,
        };
        assert!(matches!(
            reading.set("Amount", wide),
            Err(FieldError::InvalidValue { .. })
        ));
        reading
            .set("Amount", Value::Decimal { mantissa: 1200, exponent: -2 })
            .unwrap();
        assert_eq!(reading.get("Amount"), Some(&Value::decimal(12, 0)));
    }

    #[test]
    fn test_repeated_and_children() {
        let registry = registry();
        let mut customer = registry.new_node("Customer").unwrap();
        customer.push("Phone", "1").unwrap();
        customer.push("Phone", "2").unwrap();
        assert_eq!(customer.get_all("Phone").len(), 2);

        for total in [10, 20] {
            let mut order = registry.new_node("Order").unwrap();
            order.set("Total", total).unwrap();
            customer.push_child("Order", order).unwrap();
        }
        customer.children_mut("Order")[1].set("Total", 25).unwrap();
        let totals: Vec<_> = customer
            .children("Order")
            .iter()
            .filter_map(|o| o.get("Total").and_then(Value::as_int))
            .collect();
        assert_eq!(totals, vec![10, 25]);

        let mut address = registry.new_node("Address").unwrap();
        address.set("City", "London").unwrap();
        customer.set_child("Address", address).unwrap();
        assert_eq!(customer.children("Address").len(), 1);
        customer
            .child_mut("Address")
            .unwrap()
            .set("City", "Leeds")
            .unwrap();
        assert_eq!(
            customer.child("Address").unwrap().get_text("City"),
            Some("Leeds")
        );
    }

    #[test]
    fn test_clone_is_deep() {
        let registry = registry();
        let mut customer = registry.new_node("Customer").unwrap();
        customer
            .set_child("Address", registry.new_node("Address").unwrap())
            .unwrap();
        let mut copy = customer.clone();
        copy.child_mut("Address").unwrap().set("City", "Paris").unwrap();
        assert_ne!(copy, customer);
        assert!(!customer.child("Address").unwrap().is_present("City"));
    }

    #[test]
    fn test_unset_and_display() {
        let registry = registry();
        let mut customer = registry.new_node("Customer").unwrap();
        customer.set("Number", "C1").unwrap();
        customer.push("Phone", "1").unwrap();
        assert_eq!(customer.to_string(), "Customer{Number=C1, Phone=[1 values]}");
        assert_eq!(
            customer.unset("Phone").unwrap(),
            Slot::Scalars(vec![Value::from("1")])
        );
        assert!(!customer.is_present("Phone"));
    }
}
