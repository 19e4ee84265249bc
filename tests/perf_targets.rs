use std::time::{Duration, Instant};

use taskvars::{copy_current_context, Context, ContextVar};

fn p99(durations: &mut [Duration]) -> Duration {
    durations.sort_unstable();
    if durations.is_empty() {
        return Duration::from_nanos(0);
    }
    let idx = ((durations.len() as f64) * 0.99).ceil() as usize;
    let idx = idx.saturating_sub(1).min(durations.len() - 1);
    durations[idx]
}

fn ops_per_sec(ops: usize, elapsed: Duration) -> f64 {
    if elapsed.is_zero() {
        return f64::INFINITY;
    }
    (ops as f64) / elapsed.as_secs_f64()
}

fn measure(iters: usize, mut op: impl FnMut()) -> (Duration, f64) {
    let mut samples = Vec::with_capacity(iters);
    let start = Instant::now();
    for _ in 0..iters {
        let t = Instant::now();
        op();
        samples.push(t.elapsed());
    }
    let total = start.elapsed();
    (p99(&mut samples), ops_per_sec(iters, total))
}

/// Snapshot, lookup and set cost at growing store sizes.
///
/// Run manually:
/// - `cargo test --release --test perf_targets -- --ignored --nocapture`
///
/// To enforce thresholds (may be machine-dependent):
/// - `TASKVARS_ENFORCE_PERF=1 cargo test --release --test perf_targets -- --ignored --nocapture`
#[test]
#[ignore]
fn store_scaling_report() {
    assert!(
        !cfg!(debug_assertions),
        "perf targets must be measured in --release"
    );

    let enforce = std::env::var("TASKVARS_ENFORCE_PERF").is_ok_and(|v| v == "1");
    let iters = 20_000;

    for size in [10usize, 1_000, 100_000] {
        let vars: Vec<_> = (0..size).map(|i| ContextVar::new(format!("v{i}"))).collect();
        let ctx = Context::new();

        ctx.run(|| {
            for (i, var) in vars.iter().enumerate() {
                let _ = var.set(i);
            }

            let (snap_p99, snap_ops) = measure(iters, || {
                drop(copy_current_context());
            });

            let probe = &vars[size / 2];
            let (get_p99, get_ops) = measure(iters, || {
                assert_eq!(probe.get().unwrap(), size / 2);
            });

            let (set_p99, set_ops) = measure(iters, || {
                let token = probe.set(0);
                probe.reset(&token).unwrap();
            });

            println!(
                "size={size:>7} snapshot p99={snap_p99:?} ({snap_ops:.0}/s) \
                 get p99={get_p99:?} ({get_ops:.0}/s) \
                 set+reset p99={set_p99:?} ({set_ops:.0}/s)"
            );

            if enforce {
                assert!(
                    snap_p99 <= Duration::from_micros(5),
                    "snapshot p99 {snap_p99:?} over target at size {size}"
                );
                assert!(
                    get_p99 <= Duration::from_micros(5),
                    "get p99 {get_p99:?} over target at size {size}"
                );
                assert!(
                    set_p99 <= Duration::from_micros(50),
                    "set+reset p99 {set_p99:?} over target at size {size}"
                );
            }
        });
    }
}
