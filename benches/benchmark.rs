use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use page_snapshot::{
    build_filename, build_provenance_comment, extract_host, format_bytes, format_duration,
    inject_base_tag, sanitize_html, strip_scripts, validate_url, Config, HistoryEntry,
    HistoryStore,
};
use std::time::Duration;
use tokio::runtime::Runtime;

const URL: &str = "https://mp.weixin.qq.com/s/AbCdEfGhIjKlMnOp";

// Fast settings for all benchmarks
fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn sample_article(paragraphs: usize) -> String {
    let mut html = String::from(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Sample</title>\
         <script src=\"/static/app.js\"></script></head><body>",
    );
    for i in 0..paragraphs {
        html.push_str(&format!(
            "<p>Paragraph {i} <img data-src=\"/img/{i}.jpg\"></p>\
             <script type=\"text/javascript\">\nwindow.__track({i});\n</script>"
        ));
    }
    html.push_str("</body></html>");
    html
}

fn benchmark_config_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config");
    configure_fast_group(&mut group);

    group.bench_function("creation", |b| {
        b.iter(|| {
            let config = Config::default();
            black_box(config);
        });
    });

    let config = Config::default();
    group.bench_function("js_heavy_lookup", |b| {
        b.iter(|| black_box(config.is_js_heavy_host(black_box("mp.weixin.qq.com"))));
    });

    group.finish();
}

fn benchmark_sanitizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitizer");
    configure_fast_group(&mut group);

    let small = sample_article(5);
    let large = sample_article(500);

    group.bench_function("strip_scripts_small", |b| {
        b.iter(|| black_box(strip_scripts(black_box(&small))));
    });

    group.bench_function("strip_scripts_large", |b| {
        b.iter(|| black_box(strip_scripts(black_box(&large))));
    });

    group.bench_function("inject_base_tag", |b| {
        b.iter(|| black_box(inject_base_tag(black_box(&small), URL)));
    });

    group.bench_function("sanitize_large", |b| {
        b.iter(|| black_box(sanitize_html(black_box(&large), URL)));
    });

    group.finish();
}

fn benchmark_artifact_naming(c: &mut Criterion) {
    let mut group = c.benchmark_group("artifact");
    configure_fast_group(&mut group);

    let now = Utc::now();
    group.bench_function("filename", |b| {
        b.iter(|| black_box(build_filename(black_box(URL), now)));
    });

    group.bench_function("provenance_comment", |b| {
        b.iter(|| black_box(build_provenance_comment(black_box(URL), now)));
    });

    group.finish();
}

fn benchmark_url_handling(c: &mut Criterion) {
    let mut group = c.benchmark_group("url_validation");
    configure_fast_group(&mut group);

    let test_urls = vec![
        "https://example.com",
        "http://example.com/path?q=1",
        "ftp://example.com",
        "invalid-url",
    ];

    group.bench_function("validate", |b| {
        b.iter(|| {
            for url in &test_urls {
                let _ = black_box(validate_url(black_box(url)));
            }
        });
    });

    group.bench_function("extract_host", |b| {
        b.iter(|| black_box(extract_host(black_box(URL))));
    });

    group.finish();
}

fn benchmark_format_utilities(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_utilities");
    configure_fast_group(&mut group);

    group.bench_function("duration_formatting", |b| {
        b.iter(|| black_box(format_duration(black_box(Duration::from_millis(65_432)))));
    });

    group.bench_function("bytes_formatting", |b| {
        b.iter(|| black_box(format_bytes(black_box(3_456_789))));
    });

    group.finish();
}

fn benchmark_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("history");
    configure_fast_group(&mut group);

    let Ok(rt) = Runtime::new() else {
        return;
    };
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let Ok(store) = HistoryStore::new(dir.path().join("history.jsonl")) else {
        return;
    };

    let seed: Vec<_> = (0..2_000)
        .map(|i| HistoryEntry::failure(format!("https://example.com/{i}"), "HTTP fetch failed with status 404"))
        .collect();
    if rt.block_on(store.append(&seed)).is_err() {
        return;
    }

    group.bench_function("list_recent_50", |b| {
        b.iter(|| black_box(rt.block_on(store.list_recent(50))));
    });

    group.finish();
}

criterion_group!(
    unit_benches,
    benchmark_config_creation,
    benchmark_sanitizer,
    benchmark_artifact_naming,
    benchmark_url_handling,
    benchmark_format_utilities,
    benchmark_history,
);

criterion_main!(unit_benches);
