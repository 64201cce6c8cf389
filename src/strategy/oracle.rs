//! Native-capability oracle consumed by the convertibility pass.

use crate::config::ConvertConfig;
use crate::plan::physical::{OpKind, PhysicalNode, PhysicalOp};

/// Outcome of attempting a native rewrite of one operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NativeForm {
    /// A native implementation exists.
    Native,
    /// A native rewrite exists but must still run interpreted (for example an
    /// unsupported expression inside an otherwise native operator).
    ForcedNonNative,
    /// No native implementation exists.
    Unsupported,
}

/// Attempted rewrite of a subtree, built bottom-up from the inputs' attempts.
#[derive(Clone, Debug)]
pub struct ConvertedNode {
    /// Operator of the attempted node.
    pub op: PhysicalOp,
    /// Form the oracle reported for this operator.
    pub form: NativeForm,
    /// Attempted inputs, left to right.
    pub inputs: Vec<ConvertedNode>,
}

impl ConvertedNode {
    /// Whether this attempt produced a native operator.
    pub fn is_native(&self) -> bool {
        self.form == NativeForm::Native
    }

    /// Drops the attempt metadata and returns the plain operator tree.
    pub fn into_physical(mut self) -> PhysicalNode {
        let mut root = Rebuild::open(&mut self);
        let mut stack: Vec<Rebuild> = Vec::new();
        loop {
            let top = stack.last_mut().unwrap_or(&mut root);
            match top.pending.next() {
                Some(mut input) => stack.push(Rebuild::open(&mut input)),
                None => match stack.pop() {
                    Some(done) => {
                        let node = done.finish();
                        stack.last_mut().unwrap_or(&mut root).built.push(node);
                    }
                    None => return root.finish(),
                },
            }
        }
    }
}

impl Drop for ConvertedNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.inputs);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.inputs);
        }
    }
}

/// One level of [`ConvertedNode::into_physical`].
struct Rebuild {
    op: PhysicalOp,
    pending: std::vec::IntoIter<ConvertedNode>,
    built: Vec<PhysicalNode>,
}

impl Rebuild {
    fn open(node: &mut ConvertedNode) -> Self {
        let inputs = std::mem::take(&mut node.inputs);
        Self {
            op: node.op.clone(),
            built: Vec::with_capacity(inputs.len()),
            pending: inputs.into_iter(),
        }
    }

    fn finish(self) -> PhysicalNode {
        PhysicalNode::with_inputs(self.op, self.built)
    }
}

/// Reports whether an operator has a native equivalent.
///
/// Implementations must be pure: the same operator and inputs always give the
/// same answer.
pub trait NativeOracle {
    /// Attempts a native rewrite of `op` whose inputs were attempted as `inputs`.
    fn attempt(&self, op: &PhysicalOp, inputs: &[ConvertedNode]) -> NativeForm;
}

impl<F> NativeOracle for F
where
    F: Fn(&PhysicalOp, &[ConvertedNode]) -> NativeForm,
{
    fn attempt(&self, op: &PhysicalOp, inputs: &[ConvertedNode]) -> NativeForm {
        self(op, inputs)
    }
}

/// Oracle backed by the built-in native operator catalogue and a
/// [`ConvertConfig`].
#[derive(Clone, Debug, Default)]
pub struct CatalogOracle {
    config: ConvertConfig,
}

impl CatalogOracle {
    /// Creates an oracle honoring the operator toggles in `config`.
    pub fn new(config: ConvertConfig) -> Self {
        Self { config }
    }

    /// Whether the catalogue ships a native implementation of `kind`.
    pub fn has_native_impl(kind: OpKind) -> bool {
        !matches!(
            kind,
            OpKind::CartesianProduct | OpKind::Coalesce | OpKind::Opaque
        )
    }
}

impl NativeOracle for CatalogOracle {
    fn attempt(&self, op: &PhysicalOp, _inputs: &[ConvertedNode]) -> NativeForm {
        if op.is_native_only_exchange() {
            return NativeForm::Native;
        }
        let kind = op.kind();
        if !Self::has_native_impl(kind) || self.config.is_disabled(kind) {
            NativeForm::Unsupported
        } else if self.config.is_forced_non_native(kind) {
            NativeForm::ForcedNonNative
        } else {
            NativeForm::Native
        }
    }
}
