//! Performance benchmarks for sheetwatch.
//!
//! Measures the cost of turning a decoded sheet into records, and of
//! serializing those records for broadcast. Workbook decoding is left out so
//! the numbers track only the conversion code.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use sheetwatch::core::{HeaderPolicy, TabularReader};
use sheetwatch::error::Result;
use sheetwatch::sources::{DateSystem, RawCell, Sheet, SheetSource};
use std::path::Path;
use std::sync::Arc;

/// Serves the same pre-built sheet on every read.
struct InMemorySource {
    sheet: Sheet,
}

impl InMemorySource {
    fn with_rows(rows: u32) -> Self {
        let mut sheet = Sheet::new(DateSystem::Excel1900).with_row(
            0,
            vec![
                RawCell::text("id"),
                RawCell::text("name"),
                RawCell::text("score"),
                RawCell::text("joined"),
                RawCell::text("active"),
            ],
        );
        for i in 1..=rows {
            sheet.insert_row(
                i,
                vec![
                    RawCell::number(f64::from(i)),
                    RawCell::text(format!("user-{}", i)),
                    RawCell::number(f64::from(i) * 1.5),
                    RawCell::date(45000.0 + f64::from(i % 365)),
                    RawCell::Boolean(i % 2 == 0),
                ],
            );
        }
        Self { sheet }
    }
}

impl SheetSource for InMemorySource {
    fn read_sheet(&self, _path: &Path) -> Result<Sheet> {
        Ok(self.sheet.clone())
    }

    fn name(&self) -> String {
        "in-memory".to_string()
    }
}

/// Benchmark sheet-to-record conversion at several sizes
fn benchmark_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for rows in [10u32, 1_000, 10_000] {
        group.throughput(Throughput::Elements(u64::from(rows)));

        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, &rows| {
            let reader = TabularReader::new(
                Arc::new(InMemorySource::with_rows(rows)),
                HeaderPolicy::default(),
            );
            b.iter(|| {
                let records = reader.parse(Path::new("bench.xlsx")).unwrap();
                black_box(records);
            });
        });
    }

    group.finish();
}

/// Benchmark JSON serialization of a parsed record set
fn benchmark_to_json(c: &mut Criterion) {
    let reader = TabularReader::new(
        Arc::new(InMemorySource::with_rows(1_000)),
        HeaderPolicy::default(),
    );
    let records = reader.parse(Path::new("bench.xlsx")).unwrap();

    let mut group = c.benchmark_group("to_json");
    group.throughput(Throughput::Elements(records.len() as u64));
    group.bench_function("1000_rows", |b| {
        b.iter(|| {
            let json = records.to_json().unwrap();
            black_box(json);
        });
    });
    group.finish();
}

/// Benchmark snapshot clones, which every broadcast performs
fn benchmark_record_set_clone(c: &mut Criterion) {
    let reader = TabularReader::new(
        Arc::new(InMemorySource::with_rows(1_000)),
        HeaderPolicy::default(),
    );
    let records = reader.parse(Path::new("bench.xlsx")).unwrap();

    let mut group = c.benchmark_group("record_set_clone");
    group.bench_function("1000_rows", |b| {
        b.iter(|| {
            let cloned = records.clone();
            black_box(cloned);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_parse,
    benchmark_to_json,
    benchmark_record_set_clone,
);

criterion_main!(benches);
