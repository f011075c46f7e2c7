//! Class shapes, stubs and engine setups shared across tests

use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use weft_core::{
    ClassDescriptor, Fault, JoinPointIdentity, MemberRef, MetadataProvider, MetadataTable,
    MethodDescriptor, Modifiers, SignatureHash, Value,
};
use weft_engine::{AspectManager, DispatchStub, DispatchStubBackend, EngineConfig};

use crate::matcher::PatternMatcher;

pub const ACCOUNT: &str = "com.acme.Account";
pub const SAVINGS: &str = "com.acme.SavingsAccount";
pub const INSUFFICIENT_FUNDS: &str = "com.acme.InsufficientFunds";

/// Identity of a method-execution join point
pub fn method_id(name: &str, descriptor: &str) -> JoinPointIdentity {
    JoinPointIdentity::MethodExecution {
        method: SignatureHash::method(name, descriptor),
    }
}

/// `com.acme.Account`
///
/// - `deposit(J)V`
/// - `withdraw(J)V` declaring [`INSUFFICIENT_FUNDS`]
/// - `balance()J`
/// - abstract `audit()V`
/// - field `balance`, synthetic field `cache`
/// - constructor `()V`
pub fn account_class() -> ClassDescriptor {
    ClassDescriptor::new(ACCOUNT)
        .with_method(MethodDescriptor::new("", "deposit", "(J)V"))
        .with_method(
            MethodDescriptor::new("", "withdraw", "(J)V").declaring_fault(INSUFFICIENT_FUNDS),
        )
        .with_method(MethodDescriptor::new("", "balance", "()J"))
        .with_method(
            MethodDescriptor::new("", "audit", "()V").with_modifiers(Modifiers::abstract_member()),
        )
        .with_field("balance", "J", Modifiers::default())
        .with_field("cache", "J", Modifiers::synthetic_member())
        .with_constructor("()V", Vec::new())
}

/// `com.acme.SavingsAccount extends Account`, overriding `withdraw` and adding `accrue`
pub fn savings_class() -> ClassDescriptor {
    ClassDescriptor::new(SAVINGS)
        .with_superclass(Arc::new(account_class()))
        .with_method(
            MethodDescriptor::new("", "withdraw", "(J)V").declaring_fault(INSUFFICIENT_FUNDS),
        )
        .with_method(MethodDescriptor::new("", "accrue", "()V"))
        .with_constructor("()V", Vec::new())
}

/// Stub returning its first argument, or unit
pub fn echo_stub() -> DispatchStub {
    DispatchStub::new(|call| Ok(call.arg(0).cloned().unwrap_or_default()))
}

/// Stub returning `value`
pub fn value_stub(value: impl Into<Value>) -> DispatchStub {
    let value = value.into();
    DispatchStub::new(move |_| Ok(value.clone()))
}

/// Stub raising `fault`
pub fn fault_stub(fault: Fault) -> DispatchStub {
    DispatchStub::new(move |_| Err(fault.clone()))
}

/// Stub counting its calls and returning the count
pub fn counting_stub(counter: Arc<AtomicUsize>) -> DispatchStub {
    DispatchStub::new(move |_| {
        let calls = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Value::Int(calls as i64))
    })
}

/// Stub failing the first `failures` calls with an unchecked fault, then succeeding
pub fn flaky_stub(failures: usize, counter: Arc<AtomicUsize>) -> DispatchStub {
    DispatchStub::new(move |_| {
        let attempt = counter.fetch_add(1, Ordering::SeqCst);
        if attempt < failures {
            Err(Fault::unchecked("Transient", format!("attempt {attempt}")))
        } else {
            Ok(Value::from("ok"))
        }
    })
}

/// Backend supplying an [`echo_stub`] for every join point
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoStubs;

impl DispatchStubBackend for EchoStubs {
    fn ensure_dispatch_stub(
        &self,
        _class: &ClassDescriptor,
        _identity: &JoinPointIdentity,
    ) -> Option<Arc<DispatchStub>> {
        Some(Arc::new(echo_stub()))
    }
}

/// Manager with the glob matcher, default configuration and [`EchoStubs`]
pub fn test_manager() -> AspectManager {
    test_manager_with(EngineConfig::default(), Some(Arc::new(EchoStubs)))
}

/// Manager with the glob matcher, `config` and an optional stub backend
pub fn test_manager_with(
    config: EngineConfig,
    stubs: Option<Arc<dyn DispatchStubBackend>>,
) -> AspectManager {
    let mut builder = AspectManager::builder()
        .config(config)
        .matcher(Arc::new(PatternMatcher::new()));
    if let Some(stubs) = stubs {
        builder = builder.stub_backend(stubs);
    }
    builder.build().unwrap()
}

/// Metadata provider whose table can be replaced while the engine runs
#[derive(Default)]
pub struct SharedMetadata {
    table: RwLock<MetadataTable>,
}

impl SharedMetadata {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn replace(&self, table: MetadataTable) {
        *self.table.write() = table;
    }
}

impl MetadataProvider for SharedMetadata {
    fn resolve(&self, class: &str, member: MemberRef<'_>, key: &str) -> Option<Value> {
        self.table.read().resolve(class, member, key)
    }
}

/// Manager whose matcher and invocations both read `metadata`
pub fn test_manager_with_metadata(metadata: Arc<SharedMetadata>) -> AspectManager {
    AspectManager::builder()
        .matcher(Arc::new(PatternMatcher::with_metadata(metadata.clone())))
        .metadata(metadata)
        .stub_backend(Arc::new(EchoStubs))
        .build()
        .unwrap()
}
