use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mill_sockets::frame::{
    FixedLengthFramePicker, FramePicker, MarkerFramePicker, NullFramePicker,
};

const FRAME_SIZE: usize = 64 * 1024;

fn body() -> Vec<u8> {
    let mut data = b"<body>".to_vec();
    data.extend((0..FRAME_SIZE).map(|i| b'a' + (i % 26) as u8));
    data.extend_from_slice(b"</body>");
    data
}

/// Feeds `data` in `chunk` sized pieces until the picker reports EOF.
fn drain(picker: &mut dyn FramePicker, data: &[u8], chunk: usize) -> usize {
    let mut leftover = 0;
    for piece in data.chunks(chunk) {
        leftover += picker.pick_up_data(piece, None).len();
        if picker.is_eof() {
            break;
        }
    }
    leftover
}

fn bench_marker_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("marker_picker");
    let data = body();
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk in [64, 1024, 8192] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.iter(|| {
                let mut picker = MarkerFramePicker::new(Some("<body>"), "</body>", true);
                black_box(drain(&mut picker, &data, chunk));
                black_box(picker.create_frame())
            });
        });
    }
    group.finish();
}

fn bench_case_insensitive_marker(c: &mut Criterion) {
    let data = body().to_ascii_uppercase();
    c.bench_function("marker_picker_case_insensitive", |b| {
        b.iter(|| {
            let mut picker = MarkerFramePicker::new(Some("<body>"), "</body>", false);
            black_box(drain(&mut picker, &data, 8192));
        });
    });
}

fn bench_counting_pickers(c: &mut Criterion) {
    let mut group = c.benchmark_group("counting_pickers");
    let data = body();
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("fixed_length", |b| {
        b.iter(|| {
            let mut picker = FixedLengthFramePicker::new(FRAME_SIZE);
            black_box(drain(&mut picker, &data, 8192));
        });
    });
    group.bench_function("null", |b| {
        b.iter(|| {
            let mut picker = NullFramePicker::new();
            black_box(drain(&mut picker, &data, 8192));
            black_box(picker.on_remote_close());
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_marker_chunking,
    bench_case_insensitive_marker,
    bench_counting_pickers
);
criterion_main!(benches);
