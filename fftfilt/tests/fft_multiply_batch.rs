use approx::assert_relative_eq;
use fftfilt::accel::{global, CapabilityState, EmulatedDevice};
use fftfilt::config::AccelConfig;
use fftfilt::kernel::KernelLifecycle;
use fftfilt::signal::traits::FftMultiply1D;
use fftfilt::signal::{
    fft_multiply_repeated, setup_fft_multiply_repeated, FftMultiplyConfig, FftMultiplyKernel,
    FrequencyFilter, NJobs,
};
use ndarray::Array2;

fn batch(rows: usize, n: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, n), |(r, c)| {
        let t = c as f64 / n as f64;
        (2.0 * std::f64::consts::PI * (r + 1) as f64 * t).sin() + 0.3 * (17.0 * t).cos()
    })
}

fn moving_average(n: usize, taps: usize) -> FrequencyFilter {
    FrequencyFilter::from_impulse_response(&vec![1.0 / taps as f64; taps], n)
        .expect("moving average fits")
}

#[cfg(not(feature = "cuda"))]
#[test]
fn global_probe_is_conservative_and_runs_once() {
    assert!(global::capability().is_err());
    assert!(!global::is_capable());

    let first = global::init_accel();
    let second = global::init_accel();
    assert!(std::ptr::eq(first, second));
    assert!(global::capability().is_ok());
    // Built without the `cuda` feature, bring-up always fails.
    assert!(!global::is_capable());

    let filter = moving_average(32, 4);
    let prepared = fftfilt::signal::prepare(NJobs::Cuda, &filter, first);
    assert_eq!(prepared.n_jobs, 1);
    assert!(!prepared.context.use_acceleration());
}

#[test]
fn batch_results_do_not_depend_on_the_execution_path() {
    let n = 257;
    let filter = moving_average(n, 11);
    let signals = batch(16, n);

    let accelerated = CapabilityState::initialize(&AccelConfig { use_cuda: true }, || {
        Ok(EmulatedDevice::new())
    });
    let mut device_kernel = FftMultiplyKernel::try_new(FftMultiplyConfig {
        h_fft: filter.as_slice().to_vec(),
        n_jobs: NJobs::Cuda,
        capability: accelerated,
    })
    .expect("device kernel");
    let mut host_kernel = FftMultiplyKernel::try_new(FftMultiplyConfig {
        h_fft: filter.as_slice().to_vec(),
        n_jobs: "4".parse().expect("4 jobs"),
        capability: CapabilityState::<EmulatedDevice>::disabled(),
    })
    .expect("host kernel");
    assert!(device_kernel.use_acceleration());
    assert!(!host_kernel.use_acceleration());
    assert_eq!(host_kernel.n_jobs(), 4);

    let mut via_device = signals.clone();
    let mut via_host = signals.clone();
    device_kernel.run_rows(&mut via_device).expect("device batch");
    host_kernel.run_rows(&mut via_host).expect("host batch");

    for (d, h) in via_device.iter().zip(via_host.iter()) {
        assert_relative_eq!(*d, *h, epsilon = 1e-10, max_relative = 1e-10);
    }

    // A moving average preserves the mean of each signal.
    for (filtered, original) in via_host.rows().into_iter().zip(signals.rows()) {
        assert_relative_eq!(filtered.sum(), original.sum(), epsilon = 1e-9);
    }
}

#[test]
fn setup_failure_still_filters_correctly() {
    let n = 4096;
    let filter = moving_average(n, 32);
    let x = batch(1, n).row(0).to_vec();

    // Far too little memory for a 4096-sample context.
    let starved = EmulatedDevice::with_memory_limit(1024);
    let capability = CapabilityState::initialize(&AccelConfig { use_cuda: true }, {
        let starved = starved.clone();
        move || Ok(starved)
    });
    assert!(capability.is_capable());

    let mut fallback = setup_fft_multiply_repeated(NJobs::Cuda, filter.as_slice(), &capability)
        .expect("setup never fails for a valid filter");
    assert_eq!(fallback.n_jobs, 1);
    assert!(!fallback.context.use_acceleration());
    assert_eq!(starved.allocated_bytes(), 0);

    let mut reference = setup_fft_multiply_repeated(
        NJobs::default(),
        filter.as_slice(),
        &CapabilityState::<EmulatedDevice>::disabled(),
    )
    .expect("host setup");
    assert_eq!(
        fft_multiply_repeated(&mut fallback.context, &x).expect("fallback"),
        fft_multiply_repeated(&mut reference.context, &x).expect("reference")
    );
}

#[test]
fn single_sample_signals_work_on_both_paths() {
    let filter = FrequencyFilter::new(vec![rustfft::num_complex::Complex::new(2.5, 0.0)])
        .expect("one coefficient");
    let capability = CapabilityState::initialize(&AccelConfig { use_cuda: true }, || {
        Ok(EmulatedDevice::new())
    });
    for n_jobs in [NJobs::default(), NJobs::Cuda] {
        let mut kernel = FftMultiplyKernel::try_new(FftMultiplyConfig {
            h_fft: filter.as_slice().to_vec(),
            n_jobs,
            capability: capability.clone(),
        })
        .expect("kernel");
        let y = kernel.run_alloc(&[-3.0f64]).expect("n = 1");
        assert_relative_eq!(y[0], -7.5, epsilon = 1e-12);
    }
}
