//! Chain Resolver
//!
//! Matches every deployed binding against an advisor's join points, sorts each
//! pending list by precedence and materializes the behavior factories into
//! finalized chains. Nothing is published until every join point resolved;
//! a failure leaves the previously published chains in place.
//!
//! Resolution holds the advisor's rebuild lock and an upgradable read of the
//! binding registry for its whole run, so bindings cannot change underneath
//! it and back-references are registered before any writer gets in.

use parking_lot::RwLockUpgradableReadGuard;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};
use weft_core::{AdvisorId, Result};

use crate::advisor::Advisor;
use crate::binding::{AdviceBinding, BehaviorFactory, FactorySite};
use crate::cflow::CflowInterceptor;
use crate::invocation::Interceptor;
use crate::joinpoint::{Chain, ResolvedJoinPoint};
use crate::precedence::{sort_pending, Contribution, PendingEntry};
use crate::stub::DispatchStub;

/// Outcome of a successful rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub advisor: AdvisorId,
    pub class: Arc<str>,
    pub version: u64,
    /// Join points published with a chain
    pub advised_join_points: usize,
    pub bindings_applied: usize,
    /// Matched join points left unadvised because no stub could be produced
    pub skipped_without_stub: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Every join point of the advisor; the applied set is replaced
    Full,
    /// A subset; the applied set only grows
    Incremental,
}

pub(crate) struct Outcome {
    advised: usize,
    applied: usize,
    skipped: usize,
}

struct Staged<'a> {
    joinpoint: &'a ResolvedJoinPoint,
    chain: Option<Arc<Chain>>,
    stub: Option<Arc<DispatchStub>>,
    skipped: bool,
}

/// Re-resolve every join point of `advisor` and bump its version
pub(crate) fn rebuild(advisor: &Advisor) -> Result<RebuildReport> {
    advisor.ensure_attached()?;
    let _guard = advisor.rebuild_lock.lock();
    advisor.ensure_attached()?;

    let joinpoints = advisor.join_points();
    debug!(
        advisor = %advisor.id(),
        class = %advisor.class_name(),
        join_points = joinpoints.len(),
        "Rebuilding advisor"
    );
    let outcome = match resolve(advisor, &joinpoints, Mode::Full) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!(
                advisor = %advisor.id(),
                class = %advisor.class_name(),
                error = %err,
                "Rebuild failed; previous chains stay published"
            );
            return Err(err);
        }
    };
    let version = advisor.version.fetch_add(1, Ordering::AcqRel) + 1;
    info!(
        advisor = %advisor.id(),
        class = %advisor.class_name(),
        version,
        advised = outcome.advised,
        bindings = outcome.applied,
        skipped = outcome.skipped,
        "Rebuilt advisor"
    );
    Ok(RebuildReport {
        advisor: advisor.id(),
        class: Arc::clone(advisor.class_name()),
        version,
        advised_join_points: outcome.advised,
        bindings_applied: outcome.applied,
        skipped_without_stub: outcome.skipped,
    })
}

/// Resolve a subset of join points without bumping the version
///
/// The caller holds the advisor's rebuild lock.
pub(crate) fn resolve_join_points(
    advisor: &Advisor,
    joinpoints: &[Arc<ResolvedJoinPoint>],
) -> Result<Outcome> {
    resolve(advisor, joinpoints, Mode::Incremental)
}

fn resolve(
    advisor: &Advisor,
    joinpoints: &[Arc<ResolvedJoinPoint>],
    mode: Mode,
) -> Result<Outcome> {
    let context = advisor.context();
    let registry = context.registry.upgradable_read();
    let class = advisor.class();
    let policy = context.config.inheritance_policy;

    for joinpoint in joinpoints {
        joinpoint.pending.lock().clear();
    }

    let mut applied = BTreeSet::new();
    if !advisor.is_excluded() {
        for binding in registry.bindings() {
            for joinpoint in joinpoints {
                let site = joinpoint.site();
                let target = site.match_target();
                if !context
                    .matcher
                    .matches(binding.pointcut(), &class, &target, policy)?
                {
                    continue;
                }
                applied.insert(binding.name().clone());
                joinpoint.pending.lock().extend(pending_entries(binding));
            }
        }
    }

    let mut staged = Vec::with_capacity(joinpoints.len());
    for joinpoint in joinpoints {
        let pending = std::mem::take(&mut *joinpoint.pending.lock());
        let mut entry = Staged {
            joinpoint,
            chain: None,
            stub: None,
            skipped: false,
        };
        if pending.is_empty() {
            staged.push(entry);
            continue;
        }
        if !joinpoint.has_stub() {
            match context.stubs.ensure_dispatch_stub(&class, joinpoint.identity()) {
                Some(stub) => entry.stub = Some(stub),
                None => {
                    debug!(
                        class = %class.name,
                        identity = %joinpoint.identity(),
                        "No dispatch stub; leaving join point unadvised"
                    );
                    entry.skipped = true;
                    staged.push(entry);
                    continue;
                }
            }
        }
        let sorted = sort_pending(pending, registry.precedence())?;
        let site = FactorySite {
            advisor: advisor.id(),
            class: &class.name,
            identity: joinpoint.identity(),
        };
        entry.chain = Some(Arc::new(materialize(&site, sorted)?));
        staged.push(entry);
    }

    let advised = staged.iter().filter(|entry| entry.chain.is_some()).count();
    let skipped = staged.iter().filter(|entry| entry.skipped).count();
    for entry in staged {
        if let Some(stub) = entry.stub {
            entry.joinpoint.stub.store(Some(stub));
        }
        entry.joinpoint.chain.store(entry.chain);
        entry
            .joinpoint
            .skipped
            .store(entry.skipped, Ordering::Release);
    }

    let mut registry = RwLockUpgradableReadGuard::upgrade(registry);
    let mut current = advisor.applied.lock();
    if mode == Mode::Full {
        for stale in current.difference(&applied) {
            registry.deregister_advisor(stale, advisor.id());
        }
    }
    for name in &applied {
        registry.register_advisor(name, advisor.id());
    }
    match mode {
        Mode::Full => *current = applied,
        Mode::Incremental => current.extend(applied),
    }
    Ok(Outcome {
        advised,
        applied: current.len(),
        skipped,
    })
}

fn pending_entries(binding: &AdviceBinding) -> Vec<PendingEntry> {
    let entry = |contribution| PendingEntry {
        binding: binding.name().clone(),
        group: binding.precedence_group().cloned(),
        contribution,
    };
    match binding.cflow() {
        Some(guard) => vec![entry(Contribution::Guarded {
            guard: Arc::clone(guard),
            behaviors: binding.behaviors().to_vec(),
        })],
        None => binding
            .behaviors()
            .iter()
            .map(|factory| entry(Contribution::Behavior(Arc::clone(factory))))
            .collect(),
    }
}

fn materialize(site: &FactorySite<'_>, entries: Vec<PendingEntry>) -> Result<Chain> {
    let mut interceptors: Vec<Arc<dyn Interceptor>> = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry.contribution {
            Contribution::Behavior(factory) => interceptors.push(factory.create(site)?),
            Contribution::Guarded { guard, behaviors } => {
                let sub_chain = Chain::new(materialize_behaviors(site, &behaviors)?);
                interceptors.push(Arc::new(CflowInterceptor::new(guard, sub_chain)));
            }
        }
    }
    Ok(Chain::new(interceptors))
}

/// Materialize factories in order for one join point
pub(crate) fn materialize_behaviors(
    site: &FactorySite<'_>,
    factories: &[Arc<dyn BehaviorFactory>],
) -> Result<Vec<Arc<dyn Interceptor>>> {
    factories.iter().map(|factory| factory.create(site)).collect()
}
