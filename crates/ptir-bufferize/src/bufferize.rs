//! Partial bufferization pass.
//!
//! Visits every instruction once in program order and hands each one owned by
//! an enabled dialect to its registered strategy. Everything else is treated as
//! already being in buffer form. A failed rewrite is rolled back and aborts the
//! pass; earlier rewrites stay committed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, debug_span, warn};

use crate::cleanup::fold_bridges;
use crate::env;
use crate::error::{BufferizeError, BufferizeResult};
use crate::legality::{check_bufferized, LegalitySpec};
use crate::policy::{DialectPolicy, PolicyInitializer};
use crate::registry::{default_registry, StrategyRegistry};
use crate::rewriter::ProgramRewriter;
use crate::spec::{Dialect, Function, Program};
use crate::state::BufferizationState;

#[derive(Clone)]
pub struct BufferizationOptions {
    /// Builds the dialect policy once per run. `None` leaves the state without
    /// a policy, so any rewrite that consults it fails.
    pub policy_initializer: Option<PolicyInitializer>,
    /// Dialects whose operations are rewritten.
    pub dialects: HashSet<Dialect>,
    /// Run the legality check after rewriting.
    pub verify_after: bool,
    /// Fold bridge round trips and drop dead helpers after rewriting.
    pub fold_bridges: bool,
}

impl Default for BufferizationOptions {
    fn default() -> Self {
        Self {
            policy_initializer: Some(Arc::new(DialectPolicy::default)),
            dialects: HashSet::from([Dialect::Ptir]),
            verify_after: false,
            fold_bridges: false,
        }
    }
}

impl BufferizationOptions {
    /// Defaults overridden by `PTIR_BUFFERIZE_*` environment knobs.
    pub fn from_env() -> Self {
        Self {
            policy_initializer: Some(Arc::new(DialectPolicy::from_env)),
            verify_after: env::verify_enabled(),
            fold_bridges: env::fold_bridges_enabled(),
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: DialectPolicy) -> Self {
        self.policy_initializer = Some(Arc::new(move || policy.clone()));
        self
    }

    pub fn without_policy(mut self) -> Self {
        self.policy_initializer = None;
        self
    }

    pub fn with_verify(mut self, enabled: bool) -> Self {
        self.verify_after = enabled;
        self
    }

    pub fn with_fold_bridges(mut self, enabled: bool) -> Self {
        self.fold_bridges = enabled;
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialects.insert(dialect);
        self
    }
}

impl fmt::Debug for BufferizationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferizationOptions")
            .field("policy_initializer", &self.policy_initializer.is_some())
            .field("dialects", &self.dialects)
            .field("verify_after", &self.verify_after)
            .field("fold_bridges", &self.fold_bridges)
            .finish()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BufferizeStats {
    pub functions: usize,
    pub rewritten: usize,
    /// Instructions of an enabled dialect without a registered strategy.
    pub unhandled: usize,
    pub bridges_folded: usize,
    pub dce_removed: usize,
}

pub struct BufferizePass {
    registry: Arc<StrategyRegistry>,
    options: BufferizationOptions,
}

impl BufferizePass {
    pub fn new(options: BufferizationOptions) -> Self {
        Self::with_registry(default_registry(), options)
    }

    pub fn with_registry(registry: Arc<StrategyRegistry>, options: BufferizationOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn options(&self) -> &BufferizationOptions {
        &self.options
    }

    pub fn run(&self, program: &mut Program) -> BufferizeResult<BufferizeStats> {
        let mut state = BufferizationState::new();
        if let Some(initializer) = &self.options.policy_initializer {
            let policy = initializer();
            debug!(policy = policy.name(), "installing dialect policy");
            state.install_policy(policy)?;
        }

        let mut stats = BufferizeStats::default();
        for (index, function) in program.functions.iter_mut().enumerate() {
            let span = debug_span!("bufferize_function", function = %function.name);
            let _guard = span.enter();
            state.enter_function(index);
            self.run_function(function, &mut state, &mut stats)?;
            if self.options.fold_bridges {
                let cleanup = fold_bridges(function)?;
                stats.bridges_folded += cleanup.folded;
                stats.dce_removed += cleanup.dce_removed;
            }
            stats.functions += 1;
        }

        if self.options.verify_after {
            check_bufferized(program, &LegalitySpec::for_registry(&self.registry))
                .map_err(BufferizeError::Illegal)?;
        }
        debug!(?stats, "bufferization finished");
        Ok(stats)
    }

    fn run_function(
        &self,
        function: &mut Function,
        state: &mut BufferizationState,
        stats: &mut BufferizeStats,
    ) -> BufferizeResult<()> {
        let mut rewriter = ProgramRewriter::new(function)?;
        // New instructions are never visited.
        for inst in rewriter.insts_in_order() {
            if !rewriter.contains(inst) {
                continue;
            }
            let kind = rewriter.op(inst)?.kind();
            if !self.options.dialects.contains(&kind.dialect()) {
                continue;
            }
            let Some(strategy) = self.registry.lookup(kind) else {
                stats.unhandled += 1;
                continue;
            };

            let position = rewriter.position(inst)?;
            let rewriter_checkpoint = rewriter.checkpoint();
            let state_checkpoint = state.checkpoint();
            let before = rewriter.len();
            match strategy.rewrite(inst, &mut rewriter, state) {
                Ok(()) => {
                    stats.rewritten += 1;
                    debug!(
                        op.kind = kind.mnemonic(),
                        strategy = strategy.name(),
                        position,
                        inserted = rewriter.len() + 1 - before,
                        "rewrote instruction"
                    );
                }
                Err(err) => {
                    rewriter.restore(rewriter_checkpoint)?;
                    state.restore(state_checkpoint);
                    warn!(
                        op.kind = kind.mnemonic(),
                        position,
                        error = %err,
                        "bufferization failed"
                    );
                    return Err(BufferizeError::Pass {
                        function: rewriter.func.name.clone(),
                        instruction: position,
                        kind,
                        source: Box::new(err),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Runs the pass with the default registry.
pub fn bufferize_program(
    program: &mut Program,
    options: BufferizationOptions,
) -> BufferizeResult<BufferizeStats> {
    BufferizePass::new(options).run(program)
}
