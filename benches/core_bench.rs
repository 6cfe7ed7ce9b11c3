//! Benchmarks for wwapi core operations.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::path::Path;
use wwapi::core::codegen::{self, TemplateFormat};
use wwapi::core::{parser, resolver};
use wwapi::tripwire::hasher;

const CONFIG: &str = r#"
version: "1.0"
name: bench
backend:
  functions:
    timeout_seconds: 120
  search:
    data_nodes: 2
    zone_awareness: true
    availability_zone_count: 2
frontend:
  max_azs: 3
  nat_gateways: 1
  cpu: 512
  memory_mib: 1024
"#;

fn project(root: &Path) {
    for sub in ["lambda/function", "lambda/layer/python", "json", "frontend"] {
        std::fs::create_dir_all(root.join(sub)).unwrap();
    }
    for handler in ["s3_function", "os_index_function", "chat_function"] {
        std::fs::write(
            root.join("lambda/function").join(format!("{handler}.py")),
            "def lambda_handler(event, context):\n    return {}\n".repeat(64),
        )
        .unwrap();
    }
    std::fs::write(root.join("lambda/layer/python/common.py"), "VERSION = 1\n").unwrap();
    for name in ["paths", "components", "vector"] {
        std::fs::write(
            root.join("json").join(format!("index_{name}.json")),
            r#"{"settings": {"index": {"number_of_shards": 1}}}"#,
        )
        .unwrap();
    }
    std::fs::write(root.join("frontend/Dockerfile"), "FROM python:3.11-slim\n").unwrap();
}

fn bench_hash_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_string");
    for size in [64, 1024, 16384] {
        let input = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| black_box(hasher::hash_string(black_box(input))));
        });
    }
    group.finish();
}

fn bench_hash_directory(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    let code = dir.path().join("lambda/function");
    c.bench_function("hash_directory", |b| {
        b.iter(|| black_box(hasher::hash_directory(black_box(&code)).unwrap()));
    });
}

fn bench_parse_config(c: &mut Criterion) {
    c.bench_function("parse_and_validate_config", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(CONFIG)).unwrap();
            black_box(parser::validate_config(&config));
        });
    });
}

fn bench_topo_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");
    for n in [10, 100, 500] {
        let ids: Vec<String> = (0..n).map(|i| format!("Node{i:04}")).collect();
        let edges: Vec<(String, String)> = ids
            .windows(2)
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(resolver::topological_order(&ids, &edges).unwrap()));
        });
    }
    group.finish();
}

fn bench_synth(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    project(dir.path());
    let config = parser::parse_config(CONFIG).unwrap();
    let app = wwapi::stacks::build_app(&config, dir.path()).unwrap();

    c.bench_function("synth_app", |b| {
        b.iter(|| black_box(codegen::synth_app(black_box(&app)).unwrap()));
    });
    let synths = codegen::synth_app(&app).unwrap();
    c.bench_function("render_json", |b| {
        b.iter(|| {
            for s in &synths {
                black_box(codegen::render(&s.template, TemplateFormat::Json).unwrap());
            }
        });
    });
}

criterion_group!(
    benches,
    bench_hash_string,
    bench_hash_directory,
    bench_parse_config,
    bench_topo_sort,
    bench_synth
);
criterion_main!(benches);
