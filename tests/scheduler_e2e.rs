use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskvars::{
    copy_current_context, Context, ContextFutureExt, ContextVar, Schedule, WorkerPool,
    WorkerPoolConfig,
};

fn pool(workers: usize) -> WorkerPool {
    WorkerPool::start(WorkerPoolConfig {
        workers,
        queue_capacity: 64,
        name: "e2e".to_string(),
    })
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawned_futures_keep_creation_values_across_yields() {
    let var = ContextVar::with_default("request_id", 0u64);
    let mut handles = Vec::new();

    for request in 1..=8u64 {
        let token = var.set(request);
        let task_var = var.clone();
        let fut = async move {
            let mut seen = Vec::new();
            for _ in 0..4 {
                seen.push(task_var.get().unwrap());
                tokio::task::yield_now().await;
            }
            seen
        }
        .in_current_context();
        handles.push((request, tokio::spawn(fut)));
        var.reset(&token).unwrap();
    }

    for (request, handle) in handles {
        let seen = handle.await.unwrap();
        assert_eq!(seen, vec![request; 4]);
    }
    assert_eq!(var.get().unwrap(), 0);
}

#[tokio::test]
async fn writes_inside_future_are_private_to_it() {
    let var = ContextVar::new("scratch");
    let ctx = Arc::new(Context::new());

    let task_var = var.clone();
    let value = async move {
        let _ = task_var.set(String::from("inside"));
        tokio::task::yield_now().await;
        task_var.get().unwrap()
    }
    .in_context(Arc::clone(&ctx))
    .await;

    assert_eq!(value, "inside");
    assert!(!var.is_set());
    assert_eq!(ctx.get(&var).as_deref(), Some("inside"));
}

#[test]
fn pool_jobs_see_submission_snapshot() {
    let pool = pool(3);
    let var = ContextVar::with_default("tenant", "none");

    let handles: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|tenant| {
            let token = var.set(tenant);
            let job_var = var.clone();
            let handle = pool
                .submit(
                    move || {
                        std::thread::sleep(Duration::from_millis(5));
                        job_var.get().unwrap()
                    },
                    None,
                )
                .unwrap();
            var.reset(&token).unwrap();
            (tenant, handle)
        })
        .collect();

    for (tenant, handle) in handles {
        assert_eq!(handle.join_timeout(Duration::from_secs(5)).unwrap(), tenant);
    }
    assert_eq!(var.get().unwrap(), "none");
}

#[test]
fn call_soon_runs_in_explicit_context() {
    let pool = pool(1);
    let var = ContextVar::new("explicit");
    let ctx = Arc::new(Context::new());
    ctx.run(|| {
        let _ = var.set(9usize);
    });

    let hits = Arc::new(AtomicUsize::new(0));
    let job_hits = Arc::clone(&hits);
    let job_var = var.clone();
    pool.call_soon(
        move || {
            job_hits.fetch_add(job_var.get().unwrap(), Ordering::SeqCst);
        },
        Some(Arc::clone(&ctx)),
    )
    .unwrap();

    pool.shutdown();
    assert_eq!(hits.load(Ordering::SeqCst), 9);
}

#[test]
fn context_moves_between_pool_jobs() {
    let pool = pool(2);
    let var = ContextVar::with_default("hops", 0u32);
    let ctx = Arc::new(copy_current_context());

    for _ in 0..5 {
        let job_var = var.clone();
        pool.execute(
            move || {
                let hops = job_var.get().unwrap();
                let _ = job_var.set(hops + 1);
            },
            Some(Arc::clone(&ctx)),
        )
        .unwrap();
    }

    assert_eq!(ctx.get(&var), Some(5));
    assert_eq!(var.get().unwrap(), 0);
}

#[test]
fn panicking_job_leaves_worker_usable() {
    let pool = pool(1);
    let var = ContextVar::with_default("after_panic", 1u8);

    let err = pool
        .execute::<_, ()>(|| panic!("job failed"), None)
        .unwrap_err();
    assert!(err.is_scheduler());

    let job_var = var.clone();
    let value = pool.execute(move || job_var.get().unwrap(), None).unwrap();
    assert_eq!(value, 1);
}
