use bmm_core::Shape;
use bmm_ops::{OperandFlags, infer_batch_matmul};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

fn bench_infer(c: &mut Criterion) {
    let cases: &[(&[i64], &[i64], OperandFlags, &str)] = &[
        (&[64, 128], &[128, 32], OperandFlags::new(false, false, false), "2d"),
        (
            &[8, 16, 64, 128],
            &[8, 16, 32, 128],
            OperandFlags::new(false, true, false),
            "4d_trans_b",
        ),
        (&[128], &[4, 4, 128, 32], OperandFlags::new(false, false, true), "broadcast_vec"),
    ];

    let mut group = c.benchmark_group("batch_matmul_infer");
    for &(a, b, flags, name) in cases {
        let a = Shape::from(a);
        let b = Shape::from(b);
        group.bench_function(BenchmarkId::new("infer", name), |bench| {
            bench.iter(|| infer_batch_matmul(black_box(&a), black_box(&b), flags))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_infer);
criterion_main!(benches);
