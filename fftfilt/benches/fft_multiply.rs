use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fftfilt::accel::{CapabilityState, EmulatedDevice};
use fftfilt::config::AccelConfig;
use fftfilt::signal::{fft_multiply_repeated, prepare, FrequencyFilter, NJobs};
use rand::rngs::ThreadRng;
use rand::Rng;

/// Sum of a few random sinusoids plus uniform noise.
fn randomized_signal(mut rng: ThreadRng, n: usize) -> Vec<f64> {
    let tones: Vec<(f64, f64, f64)> = (0..8)
        .map(|_| {
            (
                rng.random_range(0.5..1.5),
                rng.random_range(1.0..(n as f64 / 4.0)),
                rng.random_range(0.0..std::f64::consts::PI),
            )
        })
        .collect();
    (0..n)
        .map(|i| {
            let t = i as f64 / n as f64;
            let tonal: f64 = tones
                .iter()
                .map(|(a, f, p)| a * (2.0 * std::f64::consts::PI * f * t + p).sin())
                .sum();
            tonal + rng.random_range(-0.1..0.1)
        })
        .collect()
}

/// Hann-windowed moving average, zero-padded to `n`.
fn lowpass(n: usize, taps: usize) -> FrequencyFilter {
    let window: Vec<f64> = (0..taps)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / (taps - 1) as f64).cos())
        .collect();
    let total: f64 = window.iter().sum();
    let h: Vec<f64> = window.iter().map(|w| w / total).collect();
    FrequencyFilter::from_impulse_response(&h, n).expect("lowpass should fit in n")
}

/// One prepared context reused across calls, as a batch would.
fn fft_multiply_repeated_paths(c: &mut Criterion) {
    const TAPS: usize = 101;
    let accelerated = CapabilityState::initialize(&AccelConfig { use_cuda: true }, || {
        Ok(EmulatedDevice::new())
    });
    let host_only = CapabilityState::<EmulatedDevice>::disabled();

    let mut group = c.benchmark_group("fft_multiply_repeated");
    for n in [1usize << 10, 1 << 14, 1 << 16] {
        let filter = lowpass(n, TAPS);
        let signal = randomized_signal(rand::rng(), n);

        let mut host = prepare(NJobs::default(), &filter, &host_only);
        group.bench_with_input(BenchmarkId::new("host", n), &signal, |bench, sig| {
            bench.iter(|| fft_multiply_repeated(&mut host.context, black_box(sig)))
        });

        let mut device = prepare(NJobs::Cuda, &filter, &accelerated);
        assert!(device.context.use_acceleration());
        group.bench_with_input(BenchmarkId::new("emulated_device", n), &signal, |bench, sig| {
            bench.iter(|| fft_multiply_repeated(&mut device.context, black_box(sig)))
        });
    }
    group.finish();
}

/// Setup cost per filter, paid once per batch.
fn prepare_cost(c: &mut Criterion) {
    let accelerated = CapabilityState::initialize(&AccelConfig { use_cuda: true }, || {
        Ok(EmulatedDevice::new())
    });
    let filter = lowpass(1 << 14, 101);
    c.bench_function("prepare_emulated_device_16384", |bench| {
        bench.iter(|| prepare(NJobs::Cuda, black_box(&filter), &accelerated))
    });
}

criterion_group!(benches, fft_multiply_repeated_paths, prepare_cost);
criterion_main!(benches);
