use criterion::{Criterion, criterion_group, criterion_main};
use saga_store::{
    InMemorySagaStore, SagaContext, SagaId, SagaInstance, SagaInstanceStore, StepExecution,
    StepExecutionLog,
};

fn make_instance(id: &str) -> SagaInstance {
    SagaInstance::new(
        "BenchSaga",
        SagaContext::new(id).with_payload("n", serde_json::json!(42)),
    )
}

fn bench_create_instance(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga_store/create_instance", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemorySagaStore::new();
                store.create(&make_instance("saga-1")).await.unwrap();
            });
        });
    });
}

fn bench_append_and_replay_10_steps(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("saga_store/append_and_replay_10_steps", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemorySagaStore::new();
                let saga_id = SagaId::new("saga-1");
                for i in 0..10 {
                    store
                        .append(&StepExecution::completed(
                            saga_id.clone(),
                            format!("step_{i}"),
                            None,
                        ))
                        .await
                        .unwrap();
                }
                let executions = store.find_by_saga(&saga_id).await.unwrap();
                assert_eq!(executions.len(), 10);
            });
        });
    });
}

criterion_group!(benches, bench_create_instance, bench_append_and_replay_10_steps);
criterion_main!(benches);
