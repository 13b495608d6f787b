use anyhow::{anyhow, bail, Context, Result};
use fftfilt::accel::{global, CapabilityState, ComputeDevice, EmulatedDevice};
use fftfilt::config::AccelConfig;
use fftfilt::signal::{fft_multiply_repeated, prepare, FrequencyFilter, NJobs};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PYTHON_BIN: &str = "python";

const PY_FFT_MULTIPLY_SCRIPT: &str = r#"
import json
import sys
import time
import numpy as np

env = json.loads(sys.stdin.read())
iters = int(env["iters"])
p = env["payload"]

h_fft = np.asarray(p["h_re"], dtype=float) + 1j * np.asarray(p["h_im"], dtype=float)
x = np.asarray(p["x"], dtype=float)

def _compute():
    return np.real(np.fft.ifft(h_fft * np.fft.fft(x)))

y = _compute()

t0 = time.perf_counter_ns()
for _ in range(iters):
    _compute()
t1 = time.perf_counter_ns()

print(json.dumps({
    "output": y.tolist(),
    "avg_ns": (t1 - t0) / max(iters, 1),
    "python_version": sys.version.split()[0],
    "numpy_version": np.__version__
}))
"#;

#[derive(Debug, Serialize, Deserialize, Clone)]
struct PythonEval {
    output: Vec<f64>,
    avg_ns: f64,
    python_version: String,
    numpy_version: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ContractRow {
    case_id: String,
    n: usize,
    accelerated: bool,
    pearson_r: f64,
    mae: f64,
    rmse: f64,
    max_abs: f64,
    max_abs_vs_host: f64,
    rust_candidate_ns: f64,
    rust_host_ns: f64,
    python_ns: f64,
    speedup_vs_host: f64,
    speedup_vs_python: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ContractBundle {
    generated_epoch_seconds: u64,
    python_executable: String,
    python_version: String,
    numpy_version: String,
    default_device_capable: bool,
    rows: Vec<ContractRow>,
}

/// One filter/signal pair checked against numpy.
struct Case {
    id: String,
    filter: FrequencyFilter,
    signal: Vec<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("contracts") => run_contracts(),
        _ => {
            eprintln!("Usage:");
            eprintln!("  cargo run -p xtask -- contracts");
            Ok(())
        }
    }
}

fn run_contracts() -> Result<()> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let out_dir = PathBuf::from(format!("target/contracts/{ts}"));
    fs::create_dir_all(&out_dir).context("creating contract output directory")?;

    let python_bin = detect_python_bin();

    // The emulated device always runs the device path, whatever the machine.
    let emulated = CapabilityState::initialize(&AccelConfig { use_cuda: true }, || {
        Ok(EmulatedDevice::new())
    });
    let host_only = CapabilityState::<EmulatedDevice>::disabled();
    let default_device = global::init_accel();
    info!(capable = default_device.is_capable(), "default device probed");

    let mut rows = Vec::new();
    let mut python_meta = None;
    for case in contract_cases()? {
        let py = python_fft_multiply_eval(&python_bin, &case, 200)?;
        let host = run_path(&case, NJobs::default(), &host_only)?;

        let emulated_run = run_path(&case, NJobs::Cuda, &emulated)?;
        let id = format!("{}_emulated", case.id);
        rows.push(build_row(&id, &case, &emulated_run, &host, &py)?);

        if default_device.is_capable() {
            let device_run = run_path(&case, NJobs::Cuda, default_device)?;
            let id = format!("{}_device", case.id);
            rows.push(build_row(&id, &case, &device_run, &host, &py)?);
        }
        python_meta.get_or_insert((py.python_version, py.numpy_version));
    }

    let (python_version, numpy_version) =
        python_meta.ok_or_else(|| anyhow!("no contract cases were run"))?;
    let bundle = ContractBundle {
        generated_epoch_seconds: ts,
        python_executable: python_bin.to_string_lossy().into_owned(),
        python_version,
        numpy_version,
        default_device_capable: default_device.is_capable(),
        rows,
    };

    write_summary_csv(&out_dir.join("summary.csv"), &bundle.rows)?;
    fs::write(
        out_dir.join("summary.json"),
        serde_json::to_vec_pretty(&bundle).context("serializing summary bundle")?,
    )
    .context("writing summary.json")?;

    println!("Contract artifacts generated in: {}", out_dir.display());
    println!("  - {}", out_dir.join("summary.csv").display());
    println!("  - {}", out_dir.join("summary.json").display());
    println!("  - cases: {}", bundle.rows.len());

    Ok(())
}

fn contract_cases() -> Result<Vec<Case>> {
    let signal = |n: usize| -> Vec<f64> {
        (0..n)
            .map(|i| {
                let x = i as f64 / 27.0;
                x.sin() + 0.35 * (2.3 * x).cos() + 0.1 * (7.0 * x).sin()
            })
            .collect()
    };
    let gaussian = |taps: usize| -> Vec<f64> {
        let mid = (taps as f64 - 1.0) / 2.0;
        let raw: Vec<f64> = (0..taps)
            .map(|i| {
                let x = (i as f64 - mid) / 8.0;
                (-(x * x) / 2.0).exp()
            })
            .collect();
        let total: f64 = raw.iter().sum();
        raw.iter().map(|v| v / total).collect()
    };

    let mut cases = Vec::new();
    for (n, taps) in [
        (1usize, 1usize),
        (2, 2),
        (7, 3),
        (64, 9),
        (255, 31),
        (512, 63),
        (1000, 101),
    ] {
        cases.push(Case {
            id: format!("gaussian_n{n}_taps{taps}"),
            filter: FrequencyFilter::from_impulse_response(&gaussian(taps), n)
                .map_err(|e| anyhow!("building filter for n={n}: {e}"))?,
            signal: signal(n),
        });
    }
    cases.push(Case {
        id: "identity_n333".to_string(),
        filter: FrequencyFilter::identity(333).map_err(|e| anyhow!("identity filter: {e}"))?,
        signal: signal(333),
    });
    cases.push(Case {
        id: "delay5_n128".to_string(),
        filter: FrequencyFilter::from_impulse_response(&[0.0, 0.0, 0.0, 0.0, 0.0, 1.0], 128)
            .map_err(|e| anyhow!("delay filter: {e}"))?,
        signal: signal(128),
    });
    Ok(cases)
}

struct PathRun {
    output: Vec<f64>,
    accelerated: bool,
    avg_ns: f64,
}

fn run_path<D: ComputeDevice>(
    case: &Case,
    n_jobs: NJobs,
    capability: &CapabilityState<D>,
) -> Result<PathRun> {
    let mut prepared = prepare(n_jobs, &case.filter, capability);
    let output = fft_multiply_repeated(&mut prepared.context, &case.signal)
        .map_err(|e| anyhow!("case {} execution failed: {e}", case.id))?;
    let avg_ns = benchmark_avg_ns(120, || {
        fft_multiply_repeated(&mut prepared.context, &case.signal)
            .map(|_| ())
            .map_err(|e| anyhow!("case {} benchmark failed: {e}", case.id))
    })?;
    Ok(PathRun {
        output,
        accelerated: prepared.context.use_acceleration(),
        avg_ns,
    })
}

fn detect_python_bin() -> PathBuf {
    std::env::var_os("PYTHON")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PYTHON_BIN))
}

fn python_fft_multiply_eval(python_bin: &Path, case: &Case, iters: usize) -> Result<PythonEval> {
    let coeffs = case.filter.as_slice();
    run_python_eval(
        python_bin,
        PY_FFT_MULTIPLY_SCRIPT,
        json!({
            "iters": iters,
            "payload": {
                "h_re": coeffs.iter().map(|c| c.re).collect::<Vec<_>>(),
                "h_im": coeffs.iter().map(|c| c.im).collect::<Vec<_>>(),
                "x": case.signal,
            }
        }),
    )
}

fn run_python_eval(
    python_bin: &Path,
    script: &str,
    payload: serde_json::Value,
) -> Result<PythonEval> {
    let mut child = Command::new(python_bin)
        .arg("-c")
        .arg(script)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning python interpreter at {}", python_bin.display()))?;

    {
        let stdin = child.stdin.as_mut().context("opening python stdin")?;
        let payload_bytes = serde_json::to_vec(&payload).context("serializing python payload")?;
        stdin
            .write_all(&payload_bytes)
            .context("writing payload to python stdin")?;
    }

    let output = child
        .wait_with_output()
        .context("waiting for python process")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("python execution failed: {stderr}");
    }
    let stdout = String::from_utf8(output.stdout).context("parsing python stdout utf8")?;
    let parsed: PythonEval = serde_json::from_str(stdout.trim()).context("parsing python json")?;
    Ok(parsed)
}

fn ensure_same_length(case_id: &str, a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        bail!(
            "case {case_id} has mismatched output lengths: left={}, right={}",
            a.len(),
            b.len()
        );
    }
    Ok(())
}

fn benchmark_avg_ns<F>(iters: usize, mut f: F) -> Result<f64>
where
    F: FnMut() -> Result<()>,
{
    let start = Instant::now();
    for _ in 0..iters {
        f()?;
    }
    Ok(start.elapsed().as_nanos() as f64 / iters as f64)
}

fn build_row(
    case_id: &str,
    case: &Case,
    candidate: &PathRun,
    host: &PathRun,
    py: &PythonEval,
) -> Result<ContractRow> {
    ensure_same_length(case_id, &candidate.output, &py.output)?;
    ensure_same_length(case_id, &candidate.output, &host.output)?;
    Ok(ContractRow {
        case_id: case_id.to_string(),
        n: case.signal.len(),
        accelerated: candidate.accelerated,
        pearson_r: pearson(&candidate.output, &py.output),
        mae: mean_abs_error(&candidate.output, &py.output),
        rmse: root_mean_squared_error(&candidate.output, &py.output),
        max_abs: max_abs_error(&candidate.output, &py.output),
        max_abs_vs_host: max_abs_error(&candidate.output, &host.output),
        rust_candidate_ns: candidate.avg_ns,
        rust_host_ns: host.avg_ns,
        python_ns: py.avg_ns,
        speedup_vs_host: host.avg_ns / candidate.avg_ns,
        speedup_vs_python: py.avg_ns / candidate.avg_ns,
    })
}

fn mean_abs_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .sum::<f64>()
        / a.len() as f64
}

fn root_mean_squared_error(a: &[f64], b: &[f64]) -> f64 {
    (a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f64>()
        / a.len() as f64)
        .sqrt()
}

fn max_abs_error(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let da = *x - mean_a;
        let db = *y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a == 0.0 || var_b == 0.0 {
        // Constant outputs (n = 1) correlate only if they agree.
        if max_abs_error(a, b) <= 1e-12 {
            1.0
        } else {
            0.0
        }
    } else {
        cov / (var_a.sqrt() * var_b.sqrt())
    }
}

fn write_summary_csv(path: &Path, rows: &[ContractRow]) -> Result<()> {
    let mut out = String::new();
    out.push_str("case_id,n,accelerated,pearson_r,mae,rmse,max_abs,max_abs_vs_host,rust_candidate_ns,rust_host_ns,python_ns,speedup_vs_host,speedup_vs_python\n");
    for row in rows {
        out.push_str(&format!(
            "{},{},{},{:.12},{:.12},{:.12},{:.12},{:.12},{:.3},{:.3},{:.3},{:.6},{:.6}\n",
            row.case_id,
            row.n,
            row.accelerated,
            row.pearson_r,
            row.mae,
            row.rmse,
            row.max_abs,
            row.max_abs_vs_host,
            row.rust_candidate_ns,
            row.rust_host_ns,
            row.python_ns,
            row.speedup_vs_host,
            row.speedup_vs_python
        ));
    }
    fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn error_metrics_on_known_vectors() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [1.0, 2.5, 2.0, 4.0];
        assert_abs_diff_eq!(mean_abs_error(&a, &b), 0.375, epsilon = 1e-12);
        assert_abs_diff_eq!(max_abs_error(&a, &b), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(
            root_mean_squared_error(&a, &b),
            (1.25f64 / 4.0).sqrt(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(pearson(&a, &a), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pearson(&[2.0], &[2.0]), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn contract_cases_match_their_lengths() {
        for case in contract_cases().expect("cases build") {
            assert_eq!(case.filter.len(), case.signal.len(), "{}", case.id);
            assert!(case.filter.is_conjugate_symmetric(1e-9), "{}", case.id);
        }
    }

    #[test]
    fn emulated_path_agrees_with_host_on_every_case() {
        let emulated = CapabilityState::initialize(&AccelConfig { use_cuda: true }, || {
            Ok(EmulatedDevice::new())
        });
        let host_only = CapabilityState::<EmulatedDevice>::disabled();
        for case in contract_cases().expect("cases build") {
            let device = run_path(&case, NJobs::Cuda, &emulated).expect("device");
            let host = run_path(&case, NJobs::default(), &host_only).expect("host");
            assert!(device.accelerated);
            assert!(max_abs_error(&device.output, &host.output) < 1e-10, "{}", case.id);
        }
    }
}
