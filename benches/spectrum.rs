//! Benchmarks for the spectral analysis and RMS hot paths
//!
//! Run with: cargo bench --bench spectrum

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lcrmeter::audio::generator::SineOscillator;
use lcrmeter::audio::rms::chunk_rms;
use lcrmeter::audio::spectrum::SpectralAnalyzer;

fn tone(len: usize, sample_rate: u32) -> Vec<i16> {
    let mut oscillator = SineOscillator::new(sample_rate);
    let mut buffer = vec![0i16; len];
    oscillator.fill_chunk(&mut buffer, 1000.0, 0.8);
    buffer
}

fn bench_dominant_frequency(c: &mut Criterion) {
    let mut group = c.benchmark_group("dominant_frequency");
    let mut analyzer = SpectralAnalyzer::new(44100);

    for len in [256usize, 1024, 4096] {
        let chunk = tone(len, 44100);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &chunk, |b, chunk| {
            b.iter(|| analyzer.dominant_frequency(black_box(chunk)))
        });
    }

    group.finish();
}

fn bench_phase_capture(c: &mut Criterion) {
    // 0.5 s phase capture at 44.1 kHz
    let buffer = tone(22050, 44100);
    let mut analyzer = SpectralAnalyzer::new(44100);

    c.bench_function("phase_at_22050", |b| {
        b.iter(|| analyzer.phase_at(black_box(&buffer), 1000.0))
    });
}

fn bench_chunk_rms(c: &mut Criterion) {
    let chunk = tone(1024, 44100);
    c.bench_function("chunk_rms_1024", |b| b.iter(|| chunk_rms(black_box(&chunk))));
}

criterion_group!(
    benches,
    bench_dominant_frequency,
    bench_phase_capture,
    bench_chunk_rms
);
criterion_main!(benches);
