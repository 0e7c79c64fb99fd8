use criterion::{black_box, criterion_group, criterion_main, Criterion};
use provider_resilience::{
    Error, ProviderConfiguration, ProviderRegistry, ProviderType, SelectionCriteria,
    SelectionStrategy,
};
use tokio::runtime::Runtime;

fn registry_with_providers(rt: &Runtime, count: usize) -> ProviderRegistry {
    let registry = ProviderRegistry::new();
    rt.block_on(async {
        for i in 0..count {
            let mut config = ProviderConfiguration::new(
                format!("provider-{i}"),
                ProviderType::AiModel,
                if i % 2 == 0 { "us-east-1" } else { "eu-west-1" },
            );
            config.id = Some(format!("provider-{i}"));
            config.health_monitoring = false;
            config.cost_per_request = 0.001 * (i + 1) as f64;
            registry.register_provider(config).await.unwrap();
        }
    });
    registry
}

fn benchmark_selection(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let registry = registry_with_providers(&rt, 50);

    for strategy in [
        SelectionStrategy::RoundRobin,
        SelectionStrategy::LeastLatency,
        SelectionStrategy::HealthWeighted,
        SelectionStrategy::CostOptimized,
        SelectionStrategy::Geographic,
        SelectionStrategy::CapacityBased,
    ] {
        c.bench_function(&format!("select_50_{}", strategy.as_str()), |b| {
            let criteria = SelectionCriteria::default().with_strategy(strategy);
            b.iter(|| {
                rt.block_on(async { black_box(registry.select_provider(&criteria).await) })
            });
        });
    }
}

fn benchmark_breaker_call(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let registry = registry_with_providers(&rt, 1);

    c.bench_function("call_provider_success", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    registry
                        .call_provider("provider-0", || async { Ok::<u32, Error>(42) })
                        .await,
                )
            })
        });
    });
}

criterion_group!(benches, benchmark_selection, benchmark_breaker_call);
criterion_main!(benches);
