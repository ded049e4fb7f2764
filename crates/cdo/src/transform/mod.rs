//! Graph-to-graph transforms.
//!
//! A [`Transform`] maps graphs of a source schema to graphs of a target
//! schema. Its [`TransformSignature`] lists one input slot per source type
//! and one output slot per target type; each slot holds any number of
//! instances. A 1:1 transform has one input and one output slot.
//!
//! The mapping rules themselves are supplied by the caller. The
//! [`TransformEngine`] only checks the shape of what goes in and comes out,
//! and picks a transform by input types when asked to dispatch.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::TransformError;
use crate::model::Node;
use crate::schema::SchemaRegistry;
use crate::validate::validate;

/// Input and output type names of a transform, one per slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformSignature {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

impl TransformSignature {
    pub fn new<I, O>(inputs: I, outputs: O) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn one_to_one(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            inputs: vec![input.into()],
            outputs: vec![output.into()],
        }
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn is_one_to_one(&self) -> bool {
        self.inputs.len() == 1 && self.outputs.len() == 1
    }

    /// Whether inputs of these types fit the signature. `None` is an empty
    /// slot, which fits any type.
    fn accepts(&self, types: &[Option<&str>]) -> bool {
        self.inputs.len() == types.len()
            && self
                .inputs
                .iter()
                .zip(types)
                .all(|(expected, found)| found.is_none_or(|f| f == expected))
    }
}

impl fmt::Display for TransformSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) -> ({})", self.inputs.join(", "), self.outputs.join(", "))
    }
}

/// What a transform sees besides its inputs.
#[derive(Debug, Clone, Copy)]
pub struct TransformContext<'r> {
    source: &'r SchemaRegistry,
    target: &'r SchemaRegistry,
}

impl<'r> TransformContext<'r> {
    pub fn source(&self) -> &'r SchemaRegistry {
        self.source
    }

    pub fn target(&self) -> &'r SchemaRegistry {
        self.target
    }

    /// Creates an empty object of a target type.
    pub fn new_node(&self, ty: &str) -> Result<Node, TransformError> {
        Ok(self.target.new_node(ty)?)
    }
}

/// A mapping from source graphs to target graphs.
pub trait Transform: Send + Sync {
    fn name(&self) -> &str;

    fn signature(&self) -> &TransformSignature;

    /// Maps one slice of instances per input slot to one vector of
    /// instances per output slot.
    fn apply(&self, cx: &TransformContext<'_>, inputs: &[&[Node]]) -> Result<Vec<Vec<Node>>, TransformError>;
}

type ApplyFn =
    dyn Fn(&TransformContext<'_>, &[&[Node]]) -> Result<Vec<Vec<Node>>, TransformError> + Send + Sync;

/// A transform backed by a closure.
pub struct FnTransform {
    name: String,
    signature: TransformSignature,
    apply: Box<ApplyFn>,
}

impl FnTransform {
    pub fn new<F>(name: impl Into<String>, signature: TransformSignature, apply: F) -> Self
    where
        F: Fn(&TransformContext<'_>, &[&[Node]]) -> Result<Vec<Vec<Node>>, TransformError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.into(),
            signature,
            apply: Box::new(apply),
        }
    }

    /// A 1:1 transform applied to every instance of the input slot.
    pub fn one_to_one<F>(name: impl Into<String>, input: &str, output: &str, map: F) -> Self
    where
        F: Fn(&TransformContext<'_>, &Node) -> Result<Node, TransformError> + Send + Sync + 'static,
    {
        Self::new(
            name,
            TransformSignature::one_to_one(input, output),
            move |cx, inputs| {
                let mapped = inputs
                    .first()
                    .map(|slot| slot.iter().map(|node| map(cx, node)).collect::<Result<Vec<_>, _>>())
                    .transpose()?
                    .unwrap_or_default();
                Ok(vec![mapped])
            },
        )
    }
}

impl fmt::Debug for FnTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransform")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish()
    }
}

impl Transform for FnTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn signature(&self) -> &TransformSignature {
        &self.signature
    }

    fn apply(&self, cx: &TransformContext<'_>, inputs: &[&[Node]]) -> Result<Vec<Vec<Node>>, TransformError> {
        (self.apply)(cx, inputs)
    }
}

/// Options for running transforms.
#[derive(Debug, Clone, Copy)]
pub struct TransformOptions {
    /// Validate every output graph and fail with `InvalidOutput` on the first
    /// violation.
    pub validate_output: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            validate_output: true,
        }
    }
}

/// Registry and runner of transforms between two schemas.
pub struct TransformEngine {
    source: Arc<SchemaRegistry>,
    target: Arc<SchemaRegistry>,
    transforms: Vec<Box<dyn Transform>>,
    by_name: FxHashMap<String, usize>,
    options: TransformOptions,
}

impl fmt::Debug for TransformEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformEngine")
            .field("transforms", &self.by_name.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

impl TransformEngine {
    pub fn new(source: Arc<SchemaRegistry>, target: Arc<SchemaRegistry>) -> Self {
        Self::with_options(source, target, TransformOptions::default())
    }

    pub fn with_options(
        source: Arc<SchemaRegistry>,
        target: Arc<SchemaRegistry>,
        options: TransformOptions,
    ) -> Self {
        Self {
            source,
            target,
            transforms: Vec::new(),
            by_name: FxHashMap::default(),
            options,
        }
    }

    /// Adds a transform after checking its signature against both schemas.
    pub fn register(&mut self, transform: impl Transform + 'static) -> Result<(), TransformError> {
        let name = transform.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(TransformError::DuplicateTransform { name });
        }
        let signature = transform.signature();
        let unknown = signature
            .inputs()
            .iter()
            .find(|ty| self.source.get(ty).is_none())
            .or_else(|| signature.outputs().iter().find(|ty| self.target.get(ty).is_none()));
        if let Some(ty) = unknown {
            return Err(TransformError::UnknownType {
                transform: name,
                ty: ty.clone(),
            });
        }
        debug!(transform = %name, signature = %signature, "Registered transform");
        self.by_name.insert(name, self.transforms.len());
        self.transforms.push(Box::new(transform));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Transform> {
        self.by_name.get(name).map(|&i| self.transforms[i].as_ref())
    }

    fn require(&self, name: &str) -> Result<&dyn Transform, TransformError> {
        self.get(name).ok_or_else(|| TransformError::UnknownTransform {
            name: name.to_string(),
        })
    }

    /// Runs a 1:1 transform on one input.
    pub fn transform_one(&self, name: &str, input: &Node) -> Result<Node, TransformError> {
        let transform = self.require(name)?;
        if !transform.signature().is_one_to_one() {
            let signature = transform.signature();
            let (side, expected, found) = if signature.inputs().len() != 1 {
                ("inputs", 1, signature.inputs().len())
            } else {
                ("outputs", 1, signature.outputs().len())
            };
            return Err(TransformError::Arity {
                transform: name.to_string(),
                side,
                expected,
                found,
            });
        }
        let mut outputs = self.run(transform, &[std::slice::from_ref(input)])?;
        let mut slot = outputs.pop().unwrap_or_default();
        if slot.len() != 1 {
            return Err(TransformError::Arity {
                transform: name.to_string(),
                side: "output instances",
                expected: 1,
                found: slot.len(),
            });
        }
        Ok(slot.remove(0))
    }

    /// Runs a transform with one vector of instances per input slot.
    pub fn transform_many(&self, name: &str, inputs: Vec<Vec<Node>>) -> Result<Vec<Vec<Node>>, TransformError> {
        let transform = self.require(name)?;
        let slots: Vec<&[Node]> = inputs.iter().map(Vec::as_slice).collect();
        self.run(transform, &slots)
    }

    /// Picks the transform whose input types match `inputs` and runs it.
    ///
    /// An empty slot matches any type. Fails with `Unmapped` when no
    /// transform matches and `Ambiguous` when several do.
    pub fn dispatch(&self, inputs: Vec<Vec<Node>>) -> Result<Vec<Vec<Node>>, TransformError> {
        let transform = self.resolve(&inputs)?;
        let slots: Vec<&[Node]> = inputs.iter().map(Vec::as_slice).collect();
        self.run(transform, &slots)
    }

    /// Name of the transform [`Self::dispatch`] would pick.
    pub fn resolve_name(&self, inputs: &[Vec<Node>]) -> Result<&str, TransformError> {
        self.resolve(inputs).map(|t| t.name())
    }

    fn resolve(&self, inputs: &[Vec<Node>]) -> Result<&dyn Transform, TransformError> {
        let types: Vec<Option<&str>> = inputs
            .iter()
            .map(|slot| slot.first().map(Node::type_name))
            .collect();
        let mut candidates = self
            .transforms
            .iter()
            .filter(|t| t.signature().accepts(&types));
        let describe = || {
            types
                .iter()
                .map(|t| t.unwrap_or("_").to_string())
                .collect::<Vec<_>>()
        };
        match (candidates.next(), candidates.next()) {
            (Some(only), None) => Ok(only.as_ref()),
            (None, _) => Err(TransformError::Unmapped { inputs: describe() }),
            (Some(first), Some(second)) => {
                let mut names = vec![first.name().to_string(), second.name().to_string()];
                names.extend(candidates.map(|t| t.name().to_string()));
                Err(TransformError::Ambiguous {
                    inputs: describe(),
                    candidates: names,
                })
            }
        }
    }

    fn run(&self, transform: &dyn Transform, inputs: &[&[Node]]) -> Result<Vec<Vec<Node>>, TransformError> {
        let name = transform.name();
        let signature = transform.signature();
        check_slots(name, "input", signature.inputs(), inputs.iter().copied())?;

        let cx = TransformContext {
            source: &self.source,
            target: &self.target,
        };
        let outputs = transform.apply(&cx, inputs)?;
        check_slots(name, "output", signature.outputs(), outputs.iter().map(Vec::as_slice))?;

        if self.options.validate_output {
            for node in outputs.iter().flatten() {
                validate(node).map_err(|violation| TransformError::InvalidOutput {
                    transform: name.to_string(),
                    violation: violation.into_owned(),
                })?;
            }
        }
        debug!(
            transform = name,
            inputs = inputs.iter().map(|s| s.len()).sum::<usize>(),
            outputs = outputs.iter().map(Vec::len).sum::<usize>(),
            "Applied transform"
        );
        Ok(outputs)
    }
}

fn check_slots<'n>(
    transform: &str,
    side: &'static str,
    expected: &[String],
    slots: impl ExactSizeIterator<Item = &'n [Node]>,
) -> Result<(), TransformError> {
    if slots.len() != expected.len() {
        return Err(TransformError::Arity {
            transform: transform.to_string(),
            side: if side == "input" { "inputs" } else { "outputs" },
            expected: expected.len(),
            found: slots.len(),
        });
    }
    for (slot, (nodes, ty)) in slots.zip(expected).enumerate() {
        if let Some(node) = nodes.iter().find(|n| n.type_name() != ty) {
            return Err(TransformError::SlotType {
                transform: transform.to_string(),
                side,
                slot,
                expected: ty.clone(),
                found: node.type_name().to_string(),
            });
        }
    }
    Ok(())
}
