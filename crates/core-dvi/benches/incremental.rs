//! Throughput of the instruction-length scan and the incremental index.

use criterion::{criterion_group, criterion_main, Criterion};

use core_dvi::backend::NoBackend;
use core_dvi::interp::instr_size;
use core_dvi::resmanager::ResourceManager;
use core_dvi::{DviVersion, IncDvi};

fn synthetic_document(pages: usize) -> Vec<u8> {
    let mut out = vec![247u8, 2];
    out.extend_from_slice(&25400000u32.to_be_bytes());
    out.extend_from_slice(&473628672u32.to_be_bytes());
    out.extend_from_slice(&1000u32.to_be_bytes());
    out.push(0);
    for _ in 0..pages {
        out.push(139); // BOP
        out.extend_from_slice(&[0u8; 40]);
        out.extend_from_slice(&(-1i32).to_be_bytes());
        for c in 0..100u8 {
            out.push(c % 128); // SET_CHAR
            out.push(143); // RIGHT1
            out.push(4);
        }
        out.push(140); // EOP
    }
    out
}

fn new_incdvi() -> IncDvi {
    IncDvi::new(ResourceManager::new(
        Box::new(NoBackend),
        Box::new(NoBackend),
        Box::new(NoBackend),
    ))
}

fn bench_instr_scan(c: &mut Criterion) {
    let doc = synthetic_document(50);
    c.bench_function("instr_size_scan", |b| {
        b.iter(|| {
            let mut pos = 15; // past the preamble
            while pos < doc.len() {
                let n = instr_size(&doc[pos..], DviVersion::Standard);
                if n <= 0 {
                    break;
                }
                pos += n as usize;
            }
            pos
        })
    });
}

fn bench_incremental_update(c: &mut Criterion) {
    let doc = synthetic_document(50);
    c.bench_function("update_single_shot", |b| {
        b.iter(|| {
            let mut inc = new_incdvi();
            inc.update(&doc);
            inc.page_count()
        })
    });
    c.bench_function("update_chunked_4k", |b| {
        b.iter(|| {
            let mut inc = new_incdvi();
            let mut fed = 0;
            while fed < doc.len() {
                let end = (fed + 4096).min(doc.len());
                inc.update(&doc[..end]);
                fed = end;
            }
            inc.page_count()
        })
    });
}

criterion_group!(benches, bench_instr_scan, bench_incremental_update);
criterion_main!(benches);
