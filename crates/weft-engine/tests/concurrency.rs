//! Concurrency Tests
//!
//! Dispatch racing rebuilds, exactly-once aspect creation and concurrent
//! deployment changes.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use weft_core::{BindingName, JoinPointIdentity, MethodDescriptor, WeftError};
use weft_engine::{
    AdviceBinding, AdviceFactory, AspectContext, AspectDefinition, AspectInstance, CalleeSite,
    CallerSite, Scope, Value,
};
use weft_testkit::{
    account_class, init_test_tracing, method_id, test_manager, CountingInterceptor,
};

const THREADS: usize = 4;

fn deposit() -> JoinPointIdentity {
    method_id("deposit", "(J)V")
}

#[test]
fn test_dispatch_while_rebuilding() {
    init_test_tracing();
    let manager = test_manager();
    let counter = CountingInterceptor::new("count");
    manager
        .add_binding(
            AdviceBinding::new("count", "execution(*.deposit)").with_interceptor(counter.clone()),
        )
        .unwrap();
    let advisor = manager.attach(account_class()).unwrap();
    let handle = advisor.handle(&deposit()).unwrap();
    let calls = 500;

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let handle = handle.clone();
            scope.spawn(move || {
                for call in 0..calls {
                    let amount = (worker * calls + call) as i64;
                    assert_eq!(
                        handle.invoke(None, vec![Value::Int(amount)]),
                        Ok(Value::Int(amount))
                    );
                    let len = handle.chain().map_or(0, |chain| chain.len());
                    assert!((1..=2).contains(&len), "chain length {len}");
                }
            });
        }
        scope.spawn(|| {
            let mut last = advisor.version();
            for round in 0..25 {
                let extra = AdviceBinding::new(format!("extra-{round}"), "execution(*.deposit)")
                    .with_interceptor(CountingInterceptor::new("extra"));
                manager.add_binding(extra).unwrap();
                manager.remove_binding(format!("extra-{round}")).unwrap();
                let version = advisor.rebuild().unwrap().version;
                assert!(version > last);
                last = version;
            }
        });
    });

    assert_eq!(counter.calls(), THREADS * calls);
    assert_eq!(handle.chain().unwrap().names(), vec!["count"]);
}

#[test]
fn test_aspect_instance_created_once_under_contention() {
    let manager = test_manager();
    let created = Arc::new(AtomicUsize::new(0));
    let factory_count = Arc::clone(&created);
    let aspect = manager
        .add_aspect(AspectDefinition::new(
            "Slow",
            Scope::PerClass,
            move |_: &AspectContext<'_>| {
                factory_count.fetch_add(1, Ordering::SeqCst);
                thread::sleep(std::time::Duration::from_millis(5));
                Ok(Arc::new(()) as AspectInstance)
            },
        ))
        .unwrap();
    let touch = AdviceFactory::before("touch", aspect, |_, _| Ok(()));
    manager
        .add_binding(AdviceBinding::new("slow", "execution(*.deposit)").with_behavior(touch))
        .unwrap();
    let advisor = manager.attach(account_class()).unwrap();
    let handle = advisor.handle(&deposit()).unwrap();
    let barrier = Barrier::new(THREADS * 2);

    thread::scope(|scope| {
        for _ in 0..THREADS * 2 {
            scope.spawn(|| {
                barrier.wait();
                handle.invoke(None, vec![Value::Int(1)]).unwrap();
            });
        }
    });

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(manager.aspect_instances().len(), 1);
}

#[test]
fn test_concurrent_deployment_changes_settle() {
    init_test_tracing();
    let manager = test_manager();
    let advisor = manager.attach(account_class()).unwrap();

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let manager = &manager;
            scope.spawn(move || {
                for round in 0..10 {
                    let name = format!("w{worker}-r{round}");
                    let binding = AdviceBinding::new(name.as_str(), "execution(*.deposit)")
                        .with_interceptor(CountingInterceptor::new(name.as_str()));
                    manager.add_binding(binding).unwrap();
                    manager.remove_binding(name).unwrap();
                }
            });
        }
    });

    assert!(manager.bindings().is_empty());
    assert!(advisor.applied_bindings().is_empty());
    assert!(advisor.join_point(&deposit()).unwrap().chain().is_none());
    assert_eq!(advisor.join_point_count(), 7);
    assert!(advisor.version() > 1);
}

#[test]
fn test_call_site_created_once_under_contention() {
    let manager = test_manager();
    manager
        .add_binding(
            AdviceBinding::new("posting", "call(com.acme.Ledger.post)")
                .with_interceptor(CountingInterceptor::new("posting")),
        )
        .unwrap();
    let advisor = manager.attach(account_class()).unwrap();
    let caller = CallerSite::Method(account_class().methods[0].clone());
    let callee = CalleeSite::Method(MethodDescriptor::new("com.acme.Ledger", "post", "(J)V"));
    let barrier = Barrier::new(THREADS * 2);

    let sites: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS * 2)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    advisor
                        .call_site(caller.clone(), "com.acme.Ledger", callee.clone())
                        .unwrap()
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect()
    });

    assert!(sites.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(advisor.join_point_count(), 8);
    assert!(sites[0].chain().is_some());
}

#[test]
fn test_call_sites_racing_cleanup_leave_no_registration() {
    let manager = test_manager();
    manager
        .add_binding(
            AdviceBinding::new("posting", "call(com.acme.Ledger.*)")
                .with_interceptor(CountingInterceptor::new("posting")),
        )
        .unwrap();
    let advisor = manager.attach(account_class()).unwrap();
    let caller = CallerSite::Method(account_class().methods[0].clone());
    let barrier = Barrier::new(THREADS + 1);

    thread::scope(|scope| {
        for worker in 0..THREADS {
            let (advisor, caller, barrier) = (&advisor, &caller, &barrier);
            scope.spawn(move || {
                barrier.wait();
                for round in 0..50 {
                    let callee = CalleeSite::Method(MethodDescriptor::new(
                        "com.acme.Ledger",
                        format!("post{worker}x{round}"),
                        "(J)V",
                    ));
                    match advisor.call_site(caller.clone(), "com.acme.Ledger", callee) {
                        Ok(_) => {}
                        Err(WeftError::AdvisorDetached { .. }) => break,
                        Err(other) => panic!("unexpected error: {other}"),
                    }
                }
            });
        }
        barrier.wait();
        manager.cleanup(&advisor).unwrap();
    });

    assert!(advisor.is_detached());
    assert!(manager
        .advisors_for_binding(&BindingName::from("posting"))
        .is_empty());
}
