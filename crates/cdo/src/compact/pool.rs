//! Thread-local projection pool.
//!
//! Every (schema, type) pair has one slot per thread. A [`PooledView`] does not
//! hold a position of its own: it reads whatever its slot is bound to. Any
//! accessor that returns an object rebinds the slot of that object's type, so
//! a handle kept across such a call silently reads the newer object.
//!
//! ```text
//! let a = root.child_at("Customer", 0)?;   // slot(Customer) -> #0
//! let b = root.child_at("Customer", 1)?;   // slot(Customer) -> #1
//! a.get("Number")?                         // reads #1
//! ```
//!
//! Array accessors return [`OwnedView`]s, which are independent.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::compact::{CompactBuffer, CompactView, object_range, resolve_root};
use crate::error::DecodeError;
use crate::limits::FINGERPRINT_LEN;
use crate::model::{Node, Value};
use crate::schema::{ComplexType, SchemaRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolKey {
    fingerprint: [u8; FINGERPRINT_LEN],
    ty: usize,
}

#[derive(Clone)]
struct Binding {
    data: Arc<[u8]>,
    body: usize,
    end: usize,
}

thread_local! {
    static SLOTS: RefCell<FxHashMap<PoolKey, Binding>> = RefCell::new(FxHashMap::default());
}

fn bind(key: PoolKey, binding: Binding) {
    trace!(ty = key.ty, body = binding.body, "Rebinding pool slot");
    SLOTS.with(|slots| {
        slots.borrow_mut().insert(key, binding);
    });
}

fn lookup(key: PoolKey) -> Option<Binding> {
    SLOTS.with(|slots| slots.borrow().get(&key).cloned())
}

/// Hands out pooled views for buffers of one schema.
#[derive(Debug, Clone)]
pub struct ProjectionPool {
    registry: Arc<SchemaRegistry>,
}

impl ProjectionPool {
    pub fn new(registry: Arc<SchemaRegistry>) -> Self {
        Self { registry }
    }

    /// Binds the root type's slot to the buffer's root object.
    pub fn root(&self, buffer: &CompactBuffer) -> Result<PooledView, DecodeError> {
        let ty = resolve_root(&self.registry, buffer.fingerprint(), buffer.root)?;
        let (body, end) = object_range(&buffer.data, buffer.offset)?;
        let key = PoolKey {
            fingerprint: self.registry.fingerprint(),
            ty: ty.index(),
        };
        bind(
            key,
            Binding {
                data: Arc::clone(&buffer.data),
                body,
                end,
            },
        );
        Ok(PooledView::new(key, Arc::clone(&self.registry)))
    }

    /// Releases this thread's slots for the pool's schema.
    pub fn clear(&self) {
        let fingerprint = self.registry.fingerprint();
        SLOTS.with(|slots| {
            slots
                .borrow_mut()
                .retain(|key, _| key.fingerprint != fingerprint);
        });
    }
}

/// Handle to whatever object the current thread's slot for its type is bound to.
///
/// The handle stays "bound" until another accessor on this thread returns
/// an object of the same type; from then on it is "stale" and reads that
/// newer object. Stale reads return well-formed data, never an error. Copy
/// values out (or use [`PooledView::to_node`]) before the next accessor call.
pub struct PooledView {
    key: PoolKey,
    registry: Arc<SchemaRegistry>,
    // slots are per thread
    _thread: PhantomData<*const ()>,
}

impl std::fmt::Debug for PooledView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledView").field("ty", &self.key.ty).finish()
    }
}

impl PooledView {
    fn new(key: PoolKey, registry: Arc<SchemaRegistry>) -> Self {
        Self {
            key,
            registry,
            _thread: PhantomData,
        }
    }

    fn ty(&self) -> Result<&Arc<ComplexType>, DecodeError> {
        self.registry
            .by_index(self.key.ty)
            .ok_or(DecodeError::IndexOutOfBounds {
                dict: "types",
                index: self.key.ty,
                size: self.registry.len(),
            })
    }

    fn with_view<T>(
        &self,
        f: impl FnOnce(CompactView<'_>, &Arc<[u8]>) -> Result<T, DecodeError>,
    ) -> Result<T, DecodeError> {
        let binding = lookup(self.key).ok_or(DecodeError::MalformedEncoding {
            context: "pool slot was cleared",
        })?;
        let view = CompactView::bound(&binding.data, &self.registry, self.ty()?, binding.body, binding.end);
        f(view, &binding.data)
    }

    fn rebind(&self, view: Option<CompactView<'_>>, data: &Arc<[u8]>) -> Option<PooledView> {
        let view = view?;
        let (body, end) = view.range();
        let key = PoolKey {
            fingerprint: self.key.fingerprint,
            ty: view.complex_type().index(),
        };
        bind(
            key,
            Binding {
                data: Arc::clone(data),
                body,
                end,
            },
        );
        Some(PooledView::new(key, Arc::clone(&self.registry)))
    }

    pub fn type_name(&self) -> Result<&str, DecodeError> {
        Ok(self.ty()?.name())
    }

    pub fn is_present(&self, field: &str) -> Result<bool, DecodeError> {
        self.with_view(|view, _| view.is_present(field))
    }

    pub fn count(&self, field: &str) -> Result<usize, DecodeError> {
        self.with_view(|view, _| view.count(field))
    }

    pub fn get(&self, field: &str) -> Result<Option<Value>, DecodeError> {
        self.with_view(|view, _| view.get(field))
    }

    pub fn get_all(&self, field: &str) -> Result<Vec<Value>, DecodeError> {
        self.with_view(|view, _| view.get_all(field))
    }

    pub fn get_at(&self, field: &str, i: usize) -> Result<Option<Value>, DecodeError> {
        self.with_view(|view, _| view.get_at(field, i))
    }

    /// Rebinds the child type's slot to the single object in `field`.
    pub fn child(&self, field: &str) -> Result<Option<PooledView>, DecodeError> {
        self.with_view(|view, data| Ok(self.rebind(view.child(field)?, data)))
    }

    /// Rebinds the child type's slot to the `i`-th object in `field`.
    pub fn child_at(&self, field: &str, i: usize) -> Result<Option<PooledView>, DecodeError> {
        self.with_view(|view, data| Ok(self.rebind(view.child_at(field, i)?, data)))
    }

    /// Materialises independent views of every object in `field`.
    pub fn children(&self, field: &str) -> Result<Vec<OwnedView>, DecodeError> {
        self.with_view(|view, data| {
            Ok(view
                .children(field)?
                .into_iter()
                .map(|child| {
                    let (body, end) = child.range();
                    OwnedView {
                        data: Arc::clone(data),
                        registry: Arc::clone(&self.registry),
                        ty: Arc::clone(child.complex_type()),
                        body,
                        end,
                    }
                })
                .collect())
        })
    }

    /// Copies the currently bound object out of the buffer.
    pub fn to_node(&self) -> Result<Node, DecodeError> {
        self.with_view(|view, _| view.to_node())
    }
}

/// A view that owns a share of its buffer and never rebinds.
#[derive(Debug, Clone)]
pub struct OwnedView {
    data: Arc<[u8]>,
    registry: Arc<SchemaRegistry>,
    ty: Arc<ComplexType>,
    body: usize,
    end: usize,
}

impl OwnedView {
    pub fn view(&self) -> CompactView<'_> {
        CompactView::bound(&self.data, &self.registry, &self.ty, self.body, self.end)
    }

    pub fn get(&self, field: &str) -> Result<Option<Value>, DecodeError> {
        self.view().get(field)
    }

    pub fn to_node(&self) -> Result<Node, DecodeError> {
        self.view().to_node()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact::encode;
    use crate::schema::{FieldType, PrimitiveType};

    fn setup() -> (Arc<SchemaRegistry>, CompactBuffer) {
        let registry = SchemaRegistry::builder()
            .complex("Customers", |t| t.repeated("Customer", FieldType::complex("Customer")))
            .complex("Customer", |t| t.required("Number", PrimitiveType::Text))
            .build()
            .unwrap();
        let mut root = registry.new_node("Customers").unwrap();
        for number in ["C1", "C2", "C3"] {
            let mut c = registry.new_node("Customer").unwrap();
            c.set("Number", number).unwrap();
            root.push_child("Customer", c).unwrap();
        }
        let buffer = encode(&registry, &root).unwrap();
        (Arc::new(registry), buffer)
    }

    #[test]
    fn test_sibling_rebinds_slot() {
        let (registry, buffer) = setup();
        let pool = ProjectionPool::new(registry);
        let root = pool.root(&buffer).unwrap();

        let first = root.child_at("Customer", 0).unwrap().unwrap();
        assert_eq!(first.get("Number").unwrap(), Some(Value::from("C1")));
        let _second = root.child_at("Customer", 1).unwrap().unwrap();
        assert_eq!(first.get("Number").unwrap(), Some(Value::from("C2")));
    }

    #[test]
    fn test_children_are_independent() {
        let (registry, buffer) = setup();
        let pool = ProjectionPool::new(registry);
        let root = pool.root(&buffer).unwrap();

        let all = root.children("Customer").unwrap();
        let _bound = root.child_at("Customer", 2).unwrap();
        let numbers: Vec<_> = all.iter().map(|c| c.get("Number").unwrap()).collect();
        assert_eq!(
            numbers,
            vec![Some(Value::from("C1")), Some(Value::from("C2")), Some(Value::from("C3"))]
        );
    }

    #[test]
    fn test_clear_releases_slots() {
        let (registry, buffer) = setup();
        let pool = ProjectionPool::new(registry);
        let root = pool.root(&buffer).unwrap();
        pool.clear();
        assert!(matches!(
            root.count("Customer"),
            Err(DecodeError::MalformedEncoding { .. })
        ));
    }

    #[test]
    fn test_slots_are_per_thread() {
        let (registry, buffer) = setup();
        let pool = ProjectionPool::new(Arc::clone(&registry));
        let root = pool.root(&buffer).unwrap();
        let first = root.child_at("Customer", 0).unwrap().unwrap();

        let other = ProjectionPool::new(registry);
        let other_buffer = buffer.clone();
        std::thread::spawn(move || {
            let root = other.root(&other_buffer).unwrap();
            root.child_at("Customer", 2).unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(first.get("Number").unwrap(), Some(Value::from("C1")));
    }
}
