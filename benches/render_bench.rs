use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use wikilite_plugins::{EngineConfig, PluginManager, RENDER_HOOK, RenderContext, Role};
use wikilite_storage::MemoryStore;
use wikilite_workspace::{SAMPLE_ARTICLE, sample_plugins};

fn manager(workers: usize) -> PluginManager {
    PluginManager::new(
        sample_plugins(),
        Arc::new(MemoryStore::new()),
        EngineConfig::new().with_workers(workers),
    )
    .unwrap()
}

fn bench_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("render");
    let manager = manager(2);

    group.bench_function("uncached", |b| {
        b.iter(|| {
            black_box(
                manager
                    .execute_pipeline(RENDER_HOOK, black_box(SAMPLE_ARTICLE), None)
                    .unwrap(),
            );
        });
    });

    let ctx = RenderContext::new()
        .with_slug("rust")
        .with_caller("reader", Role::Read);
    manager
        .execute_pipeline(RENDER_HOOK, SAMPLE_ARTICLE, Some(&ctx))
        .unwrap();

    group.bench_function("cached", |b| {
        b.iter(|| {
            black_box(
                manager
                    .execute_pipeline(RENDER_HOOK, black_box(SAMPLE_ARTICLE), Some(&ctx))
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_article_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("article_size");
    let manager = manager(2);

    for repeat in [1usize, 10, 100] {
        let article = SAMPLE_ARTICLE.repeat(repeat);
        group.bench_with_input(
            BenchmarkId::new("uncached", repeat),
            &article,
            |b, article| {
                b.iter(|| {
                    black_box(
                        manager
                            .execute_pipeline(RENDER_HOOK, black_box(article), None)
                            .unwrap(),
                    );
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_render, bench_article_size);
criterion_main!(benches);
