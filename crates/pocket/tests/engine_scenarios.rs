//! End-to-end scenarios for the cache engine and handle lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pocket::prelude::*;

/// A named function that counts invocations and adds its two arguments.
fn counting_add(calls: Arc<AtomicUsize>) -> NamedFn {
    NamedFn::new("demo", "expensive", move |args: &[Value]| {
        calls.fetch_add(1, Ordering::SeqCst);
        let x = args[0].as_int().unwrap_or(0);
        let y = args[1].as_int().unwrap_or(0);
        Ok(Value::Int(x + y))
    })
    .unwrap()
}

fn counting_double(calls: Arc<AtomicUsize>) -> NamedFn {
    NamedFn::new("demo", "double", move |args: &[Value]| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
    })
    .unwrap()
}

#[tokio::test]
async fn repeated_deref_computes_once() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = ctx
        .wrap(counting_add(calls.clone()), vec![Value::Int(100), Value::Int(200)])
        .unwrap();
    assert_eq!(handle.state(), HandleState::Pending);

    assert_eq!(handle.deref().await.unwrap(), Value::Int(300));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state(), HandleState::Cached);

    assert_eq!(handle.deref().await.unwrap(), Value::Int(300));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_forcers_share_one_computation() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let slow = {
        let calls = calls.clone();
        NamedFn::new("demo", "slow-add", move |args: &[Value]| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(300));
            Ok(Value::Int(args[0].as_int().unwrap() + args[1].as_int().unwrap()))
        })
        .unwrap()
    };
    let handle = ctx.wrap(slow, vec![Value::Int(100), Value::Int(200)]).unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(5));
    let mut tasks = Vec::new();
    for _ in 0..5 {
        let handle = handle.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            handle.deref().await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap(), Value::Int(300));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn independent_fingerprints_compute_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());

    // Each thunk blocks on a two-party barrier; the test only completes if
    // both computations are in flight at the same time.
    let rendezvous = Arc::new(std::sync::Barrier::new(2));
    let meet = {
        let rendezvous = rendezvous.clone();
        NamedFn::new("demo", "meet", move |args: &[Value]| {
            rendezvous.wait();
            Ok(args[0].clone())
        })
        .unwrap()
    };

    let left = ctx.wrap(meet.clone(), vec![Value::Int(1)]).unwrap();
    let right = ctx.wrap(meet, vec![Value::Int(2)]).unwrap();

    let l = tokio::spawn(async move { left.deref().await });
    let r = tokio::spawn(async move { right.deref().await });
    assert_eq!(l.await.unwrap().unwrap(), Value::Int(1));
    assert_eq!(r.await.unwrap().unwrap(), Value::Int(2));
}

#[tokio::test]
async fn lru_eviction_falls_back_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    ctx.set_mem_cache_options(Some(MemOptions {
        policy: MemPolicyKind::Lru,
        threshold: 2,
        ..MemOptions::default()
    }))
    .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    for n in [60, 61, 62] {
        let h = ctx.wrap(counting_double(calls.clone()), vec![Value::Int(n)]).unwrap();
        assert_eq!(h.deref().await.unwrap(), Value::Int(n * 2));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Entry for 60 was evicted from memory; the disk tier still has it.
    let h = ctx.wrap(counting_double(calls.clone()), vec![Value::Int(60)]).unwrap();
    assert_eq!(h.deref().await.unwrap(), Value::Int(120));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failures_are_not_cached_and_retries_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let flaky = {
        let calls = calls.clone();
        NamedFn::new("demo", "flaky", move |_args: &[Value]| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("transient upstream failure");
            }
            Ok(Value::Int(7))
        })
        .unwrap()
    };
    let handle = ctx.wrap(flaky, vec![]).unwrap();

    let err = handle.deref().await.unwrap_err();
    assert!(matches!(err, PocketError::Compute { .. }));
    assert_eq!(handle.state(), HandleState::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(handle.deref().await.unwrap(), Value::Int(7));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // The success is now cached; no further invocation.
    assert_eq!(handle.deref().await.unwrap(), Value::Int(7));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn nil_results_cache_like_any_other_value() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let effect = {
        let calls = calls.clone();
        NamedFn::new("demo", "effect", move |_args: &[Value]| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Nil)
        })
        .unwrap()
    };
    let handle = ctx.wrap(effect.clone(), vec![]).unwrap();
    assert_eq!(handle.deref().await.unwrap(), Value::Nil);
    assert_eq!(handle.deref().await.unwrap(), Value::Nil);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // A fresh context over the same directory disk-hits the cached nil.
    let fresh = Pocket::isolated(dir.path());
    let again = fresh.wrap(effect, vec![]).unwrap();
    assert_eq!(again.deref().await.unwrap(), Value::Nil);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disk_persists_across_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let ctx = Pocket::isolated(dir.path());
        let h = ctx.wrap(counting_double(calls.clone()), vec![Value::Int(21)]).unwrap();
        assert_eq!(h.deref().await.unwrap(), Value::Int(42));
    }

    let ctx = Pocket::isolated(dir.path());
    let h = ctx.wrap(counting_double(calls.clone()), vec![Value::Int(21)]).unwrap();
    assert_eq!(h.deref().await.unwrap(), Value::Int(42));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn storage_mode_none_is_pass_through() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let h = ctx
        .wrap_with(
            counting_double(calls.clone()),
            vec![Value::Int(4)],
            PolicyOverrides::default().storage(StorageMode::None),
        )
        .unwrap();
    assert_eq!(h.deref().await.unwrap(), Value::Int(8));
    assert_eq!(h.deref().await.unwrap(), Value::Int(8));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(ctx.cache_stats().await.unwrap().total_entries == 0);
}

#[tokio::test]
async fn storage_mode_mem_skips_the_disk_tier() {
    let dir = tempfile::tempdir().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let ctx = Pocket::isolated(dir.path());
    ctx.set_storage(Some(StorageMode::Mem));
    let h = ctx.wrap(counting_double(calls.clone()), vec![Value::Int(5)]).unwrap();
    assert_eq!(h.deref().await.unwrap(), Value::Int(10));
    assert_eq!(h.deref().await.unwrap(), Value::Int(10));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(ctx.cache_stats().await.unwrap().total_entries, 0);

    // Nothing was persisted, so a fresh context recomputes.
    let fresh = Pocket::isolated(dir.path());
    let h = fresh.wrap(counting_double(calls.clone()), vec![Value::Int(5)]).unwrap();
    assert_eq!(h.deref().await.unwrap(), Value::Int(10));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn handle_identity_is_stable_across_forcing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let h = ctx.wrap(counting_double(calls), vec![Value::Int(9)]).unwrap();
    let before = h.id().clone();
    let fp_before = *h.fingerprint();

    h.deref().await.unwrap();
    assert_eq!(h.id(), &before);
    assert_eq!(h.fingerprint(), &fp_before);

    // Downstream keys depend on the recipe, so the value as an argument
    // keys the same before and after forcing.
    assert_eq!(id_of(&h.to_value()).unwrap(), before);
}

#[tokio::test]
async fn handle_display_shows_fingerprint_and_state_without_forcing() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let h = ctx.wrap(counting_double(calls.clone()), vec![Value::Int(3)]).unwrap();
    let printed = format!("{h}");
    assert!(printed.contains("demo/double"));
    assert!(printed.contains(&h.fingerprint().prefix(8)));
    assert!(printed.contains(":pending"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    h.deref().await.unwrap();
    assert!(format!("{h}").contains(":cached"));
}

#[tokio::test]
async fn keyword_callables_wrap_and_force() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());

    let params = Value::map([
        (Value::keyword("lr"), Value::Float(0.01)),
        (Value::keyword("epochs"), Value::Int(100)),
    ]);
    let h = ctx.wrap(Keyword::new("lr"), vec![params]).unwrap();
    assert_eq!(h.deref().await.unwrap(), Value::Float(0.01));
}

#[tokio::test]
async fn unidentifiable_arguments_fail_at_wrap_time() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let opaque = Value::foreign("mystery/blob", Arc::new(1_u8));
    let err = ctx.wrap(counting_double(calls), vec![opaque]).unwrap_err();
    assert!(matches!(err, PocketError::UnknownIdentifiable { .. }));
}

#[tokio::test]
async fn wrap_fn_partially_applies() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let double = ctx.wrap_fn(counting_double(calls.clone()), None);
    let a = double.call(vec![Value::Int(2)]).unwrap();
    let b = double.call(vec![Value::Int(3)]).unwrap();
    assert_eq!(a.deref().await.unwrap(), Value::Int(4));
    assert_eq!(b.deref().await.unwrap(), Value::Int(6));
    assert_ne!(a.fingerprint(), b.fingerprint());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn maybe_deref_unwraps_handles_and_passes_values_through() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = Pocket::isolated(dir.path());
    let calls = Arc::new(AtomicUsize::new(0));

    let h = ctx.wrap(counting_double(calls), vec![Value::Int(6)]).unwrap();
    assert_eq!(maybe_deref(h.to_value()).await.unwrap(), Value::Int(12));
    assert_eq!(maybe_deref(Value::Int(5)).await.unwrap(), Value::Int(5));
}
