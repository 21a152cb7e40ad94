//! Benchmarks for core PharmaChain operations.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};

use pharmachain_core::{
    chain::Chain,
    controller::{LifecyclePolicy, Registration},
    ledger::verify_caller_signature,
    product::Status,
    signing::{P256PemSigner, Signer as _},
    util,
};

fn registration(i: usize) -> Registration {
    Registration {
        name: "Aspirin".into(),
        batch_number: format!("BATCH-{i:05}"),
        expiry_date: util::now_unix() + 365 * 86_400,
        certificate_ref: "QmHash".into(),
    }
}

fn bench_sha256(c: &mut Criterion) {
    let data = vec![0u8; 1024];
    c.bench_function("sha256_1kb", |b| b.iter(|| util::sha256(black_box(&data))));
}

fn bench_register_product(c: &mut Criterion) {
    let admin = P256PemSigner::random();
    let maker = P256PemSigner::random();
    let mut chain = Chain::create_in_memory(&admin, LifecyclePolicy::default()).unwrap();
    let mut i = 0usize;

    c.bench_function("submit_register_product", |b| {
        b.iter(|| {
            i += 1;
            chain.register_product(&maker, registration(i)).unwrap()
        })
    });
}

fn bench_scan_product(c: &mut Criterion) {
    let admin = P256PemSigner::random();
    let maker = P256PemSigner::random();
    let mut chain = Chain::create_in_memory(&admin, LifecyclePolicy::default()).unwrap();
    let id = chain.register_product(&maker, registration(0)).unwrap();

    c.bench_function("submit_scan_product", |b| {
        b.iter(|| chain.scan_product(&maker, id, black_box(Status::Shipped)).unwrap())
    });
}

/// A file-backed ledger with 50 products, each shipped and transferred.
fn populated_ledger(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let db_path = dir.path().join("bench.db");
    let admin = P256PemSigner::random();
    let maker = P256PemSigner::random();
    let distributor = P256PemSigner::random();
    let mut chain = Chain::create(&db_path, &admin, LifecyclePolicy::default()).unwrap();
    for i in 0..50 {
        let id = chain.register_product(&maker, registration(i)).unwrap();
        chain.scan_product(&maker, id, Status::Shipped).unwrap();
        chain.transfer_ownership(&maker, id, distributor.identity()).unwrap();
    }
    db_path
}

fn bench_ledger_verify(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = populated_ledger(&dir);
    let ledger = pharmachain_core::ledger::Ledger::open_existing(&db_path).unwrap();

    c.bench_function("ledger_verify_150", |b| {
        b.iter(|| ledger.verify_integrity(verify_caller_signature).unwrap())
    });
}

fn bench_open_and_replay(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let db_path = populated_ledger(&dir);

    c.bench_function("chain_open_replay_150", |b| {
        b.iter_batched(
            || db_path.clone(),
            |p| Chain::open(&p).unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_sha256,
    bench_register_product,
    bench_scan_product,
    bench_ledger_verify,
    bench_open_and_replay,
);
criterion_main!(benches);
