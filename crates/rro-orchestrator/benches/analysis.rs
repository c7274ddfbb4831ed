//! Analysis hot-path benchmarks
//!
//! Run with: cargo bench -p rro-orchestrator --bench analysis

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rro_core::{InMemoryTaskStore, RecoveryConfig, TaskRecord, TaskStatus};
use rro_orchestrator::RecoveryOrchestrator;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn bench_analyze(c: &mut Criterion) {
    let rt = Runtime::new().expect("Failed to create Tokio runtime");
    let store = Arc::new(InMemoryTaskStore::with_tasks([TaskRecord::new(
        "t-1", "ws-1", "render invoice",
    )
    .with_status(TaskStatus::Failed)
    .with_retry_count(1)]));
    let orchestrator = RecoveryOrchestrator::new(RecoveryConfig::default(), store);

    let mut group = c.benchmark_group("analyze_task_recovery");
    for (label, message) in [
        ("classified", "HTTP 429 Too Many Requests"),
        ("heuristic", "KeyError: 'invoice_id'"),
    ] {
        group.bench_function(BenchmarkId::new("path", label), |b| {
            b.iter(|| {
                let result = rt.block_on(orchestrator.analyze_task_recovery(
                    &"t-1".into(),
                    &"ws-1".into(),
                    message,
                    None,
                    None,
                ));
                black_box(result);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_analyze);
criterion_main!(benches);
