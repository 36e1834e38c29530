/// Benchmarks for outlier detection.
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ref_backend::models::{Dimensions, ScalarValue};
use ref_backend::outliers::{self, OutlierConfig};

const METRICS: [&str; 4] = ["rmse", "bias", "cor", "std"];

fn get_test_values(models: usize, members: usize) -> Vec<ScalarValue> {
    let mut values = Vec::with_capacity(models * members * METRICS.len());
    for metric in METRICS {
        for model in 0..models {
            for member in 0..members {
                let id = values.len() as i64;
                let mut dimensions = Dimensions::new();
                dimensions.insert("source_id".to_string(), format!("model{}", model));
                dimensions.insert("member_id".to_string(), format!("r{}i1p1f1", member + 1));
                dimensions.insert("metric".to_string(), metric.to_string());
                dimensions.insert("statistic".to_string(), "mean".to_string());
                let value = if model % 50 == 7 {
                    1000.0
                } else {
                    ((id * 7919) % 1000) as f64 / 1000.0
                };
                values.push(ScalarValue {
                    id,
                    dimensions,
                    value,
                    attributes: Default::default(),
                    execution_id: 1,
                    execution_group_id: 1,
                });
            }
        }
    }
    values
}

fn criterion_benchmark(c: &mut Criterion) {
    let config = OutlierConfig::default();
    for (models, members) in [(10, 1), (100, 10), (500, 20)] {
        let values = get_test_values(models, members);
        let name = format!("detect({}x{})", models, members);
        c.bench_function(&name, |b| {
            b.iter(|| outliers::detect(black_box(values.clone()), &config))
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
