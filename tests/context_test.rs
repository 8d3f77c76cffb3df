/*!
 * Logical Execution Context Tests
 *
 * Scope isolation across tasks and threads, propagation across suspension
 */

use scoped_cancel::{context, CancelSource, ScopeOptions, SignalProvider};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_scope_survives_suspension() {
    let provider = SignalProvider::default();
    let a = CancelSource::new();

    let p = provider.clone();
    let signal = a.signal();
    context::scope(async move {
        let _guard = p.begin_linked_scope(signal.clone()).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(p.effective_signal().same_as(&signal));
    })
    .await;

    assert_eq!(provider.depth(), 0);
}

#[tokio::test]
async fn test_context_scope_does_not_leak_back() {
    let provider = SignalProvider::default();
    let a = CancelSource::new();

    let p = provider.clone();
    let signal = a.signal();
    context::scope(async move {
        let guard = p.begin_linked_scope(signal).unwrap();
        // Left open on purpose: the fork must not publish it to the caller.
        guard.detach();
        assert_eq!(p.depth(), 1);
    })
    .await;

    assert_eq!(provider.depth(), 0);
}

#[tokio::test]
async fn test_spawned_child_inherits_snapshot_only() {
    let provider = SignalProvider::default();
    let (a, b, c) = (CancelSource::new(), CancelSource::new(), CancelSource::new());

    let p = provider.clone();
    let (a_sig, b_sig, c_sig) = (a.signal(), b.signal(), c.signal());
    context::scope(async move {
        let _outer = p.begin_linked_scope(a_sig.clone()).unwrap();

        let (go_tx, go_rx) = oneshot::channel::<()>();
        let child_provider = p.clone();
        let child_a = a_sig.clone();
        let child = context::spawn(async move {
            assert!(child_provider.effective_signal().same_as(&child_a));

            let _own = child_provider.begin_linked_scope(c_sig).unwrap();
            go_rx.await.unwrap();
            // Parent has entered another scope by now; it must stay invisible.
            assert_eq!(child_provider.depth(), 2);
            child_provider.effective_signal()
        });

        let _parent_inner = p.begin_linked_scope(b_sig).unwrap();
        assert_eq!(p.depth(), 2);
        go_tx.send(()).unwrap();

        let child_signal = child.await.unwrap();
        assert_eq!(p.depth(), 2);
        assert!(!p.effective_signal().same_as(&child_signal));
    })
    .await;

    // The child composite was released when its scope exited.
    b.fire();
    c.fire();
    assert_eq!(provider.depth(), 0);
}

#[tokio::test]
async fn test_bare_spawn_is_isolated_from_parent() {
    let provider = SignalProvider::default();
    let (a, b) = (CancelSource::new(), CancelSource::new());

    let p = provider.clone();
    let (a_sig, b_sig) = (a.signal(), b.signal());
    context::scope(async move {
        let _parent = p.begin_linked_scope(a_sig.clone()).unwrap();

        let child_provider = p.clone();
        let child_guard = tokio::spawn(async move {
            assert_eq!(child_provider.depth(), 0);
            child_provider.begin_linked_scope(b_sig).unwrap()
        })
        .await
        .unwrap();

        assert_eq!(p.depth(), 1);
        assert!(p.effective_signal().same_as(&a_sig));

        // Disposing a guard from another context leaves this chain intact.
        drop(child_guard);
        assert_eq!(p.depth(), 1);
        assert!(p.effective_signal().same_as(&a_sig));
    })
    .await;
}

#[tokio::test]
async fn test_bare_spawn_does_not_share_worker_frame() {
    let provider = SignalProvider::default();
    let (a, b) = (CancelSource::new(), CancelSource::new());
    let a_sig = a.signal();

    let _parent = provider.begin_linked_scope(a_sig.clone()).unwrap();

    let (opened_tx, opened_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let child_provider = provider.clone();
    let b_sig = b.signal();
    let child = tokio::spawn(async move {
        let _guard = child_provider.begin_linked_scope(b_sig).unwrap();
        opened_tx.send(child_provider.depth()).unwrap();
        release_rx.await.unwrap();
        child_provider.depth()
    });

    let child_depth = opened_rx.await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(child_depth, 1);
    assert_eq!(provider.depth(), 1);
    assert!(provider.effective_signal().same_as(&a_sig));

    b.fire();
    assert!(!provider.effective_signal().is_fired());

    release_tx.send(()).unwrap();
    assert_eq!(child.await.unwrap(), 1);
    assert_eq!(provider.depth(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bare_spawned_tasks_keep_their_own_scopes() {
    let provider = SignalProvider::default();

    let mut handles = Vec::new();
    for _ in 0..32 {
        let p = provider.clone();
        handles.push(tokio::spawn(async move {
            let source = CancelSource::new();
            let _guard = p.begin_linked_scope(source.signal()).unwrap();

            for _ in 0..10 {
                tokio::task::yield_now().await;
                assert_eq!(p.depth(), 1);
                assert!(p.effective_signal().same_as(&source.signal()));
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(provider.depth(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_keep_their_own_scopes() {
    let provider = SignalProvider::default();

    let mut handles = Vec::new();
    for i in 0..32 {
        let p = provider.clone();
        handles.push(context::spawn(async move {
            let source = CancelSource::new();
            let _guard = p.begin_linked_scope(source.signal()).unwrap();

            for _ in 0..10 {
                tokio::task::yield_now().await;
                assert!(p.effective_signal().same_as(&source.signal()));
                assert_eq!(p.depth(), 1);
            }

            if i % 2 == 0 {
                source.fire();
                assert!(p.effective_signal().is_fired());
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }
    assert_eq!(provider.depth(), 0);
}

#[test]
fn test_threads_do_not_share_scopes() {
    let provider = Arc::new(SignalProvider::default());
    let a = CancelSource::new();
    let _guard = provider.begin_linked_scope(a.signal()).unwrap();

    let p = provider.clone();
    let depth = thread::spawn(move || {
        let b = CancelSource::new();
        let _own = p.begin_linked_scope(b.signal()).unwrap();
        p.depth()
    })
    .join()
    .unwrap();

    assert_eq!(depth, 1);
    assert_eq!(provider.depth(), 1);
    assert!(provider.effective_signal().same_as(&a.signal()));
}

#[test]
fn test_run_with_carries_snapshot_to_thread() {
    let provider = SignalProvider::default();
    let a = CancelSource::new();
    let _guard = provider.begin_linked_scope(a.signal()).unwrap();

    let frame = context::snapshot();
    let p = provider.clone();
    let signal = a.signal();
    let inherited = thread::spawn(move || context::run_with(frame, || p.effective_signal().same_as(&signal)))
        .join()
        .unwrap();
    assert!(inherited);
}

#[tokio::test]
async fn test_effective_signal_wakes_waiters() {
    let root = CancelSource::new();
    let provider = SignalProvider::new(root.signal());
    let extra = CancelSource::new();

    let p = provider.clone();
    let waiter = context::spawn(async move {
        let _guard = p
            .begin_scope(ScopeOptions::new().with_signal(extra.signal()))
            .unwrap();
        p.effective_signal().fired().await;
    });

    tokio::task::yield_now().await;
    root.fire();

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should observe the root firing")
        .unwrap();
}
