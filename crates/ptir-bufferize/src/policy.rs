//! Copy-materialization policy.
//!
//! Decides, per operation, whether a strided view is acceptable as the
//! bufferized result or whether a densely packed identity-layout copy must be
//! produced instead.

use std::fmt;
use std::sync::Arc;

use crate::spec::{Instruction, OperationKind};

/// Predicate returning `true` when `inst` must produce an identity-layout buffer.
pub type IdentityLayoutFn = dyn Fn(&Instruction) -> bool + Send + Sync;

/// Builds the policy at the start of a pass invocation.
pub type PolicyInitializer = Arc<dyn Fn() -> DialectPolicy + Send + Sync>;

/// Dialect-scoped bufferization policy, installed once per pass invocation.
#[derive(Clone)]
pub struct DialectPolicy {
    name: &'static str,
    enforce_identity_layout: Arc<IdentityLayoutFn>,
}

impl DialectPolicy {
    /// Strided views are always acceptable.
    pub fn never() -> Self {
        Self {
            name: "never",
            enforce_identity_layout: Arc::new(|_| false),
        }
    }

    /// Every strategy that may copy produces an identity-layout buffer.
    pub fn always() -> Self {
        Self {
            name: "always",
            enforce_identity_layout: Arc::new(|_| true),
        }
    }

    /// Copies only for the listed operation kinds.
    pub fn for_kinds(kinds: impl IntoIterator<Item = OperationKind>) -> Self {
        let kinds: Vec<OperationKind> = kinds.into_iter().collect();
        Self {
            name: "kinds",
            enforce_identity_layout: Arc::new(move |inst| kinds.contains(&inst.op.kind())),
        }
    }

    pub fn from_fn<F>(name: &'static str, predicate: F) -> Self
    where
        F: Fn(&Instruction) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            enforce_identity_layout: Arc::new(predicate),
        }
    }

    /// Policy selected by the environment: `always` when
    /// `PTIR_BUFFERIZE_IDENTITY_LAYOUT` is set, `never` otherwise.
    pub fn from_env() -> Self {
        if crate::env::identity_layout_forced() {
            Self::always()
        } else {
            Self::never()
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn requires_identity_layout(&self, inst: &Instruction) -> bool {
        (self.enforce_identity_layout)(inst)
    }
}

impl Default for DialectPolicy {
    fn default() -> Self {
        Self::never()
    }
}

impl fmt::Debug for DialectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialectPolicy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
