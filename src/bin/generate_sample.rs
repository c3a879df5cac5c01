use anyhow::{Context, Result};
use ndarray::Array2;

use astraeus::data::{make_dataset, make_lc, make_time_like, make_wave_like};
use astraeus::io::{try_write_xr, WriteOptions};

/// Box-shaped transit with linear ingress and egress.
fn transit(t: f64, t0: f64, half_width: f64, ramp: f64) -> f64 {
    let dt = (t - t0).abs();
    if dt <= half_width - ramp {
        1.0
    } else if dt >= half_width {
        0.0
    } else {
        (half_width - dt) / ramp
    }
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    // 20 channels over 1 to 5 microns, 300 exposures over 0.3 days.
    let wavelength: Vec<f64> = (0..20).map(|i| 1.0 + i as f64 * 4.0 / 19.0).collect();
    let time: Vec<f64> = (0..300).map(|i| 59_800.0 + i as f64 * 0.001).collect();
    let t0 = time[150];

    // Depth rises towards a water feature near 2.8 microns.
    let depth: Vec<f64> = wavelength
        .iter()
        .map(|&w| 0.0210 + 0.0015 * (-(w - 2.8).powi(2) / 0.18).exp())
        .collect();

    let noise = 0.0004;
    let mut flux = Array2::<f64>::zeros((wavelength.len(), time.len()));
    let unc = Array2::<f64>::from_elem((wavelength.len(), time.len()), noise);
    for ((i, j), value) in flux.indexed_iter_mut() {
        let dip = depth[i] * transit(time[j], t0, 0.06, 0.01);
        *value = 1.0 - dip + rng.gauss(0.0, noise);
    }

    let temperature: Vec<f64> = (0..time.len()).map(|_| 40.0 + rng.gauss(0.0, 0.05)).collect();

    let lc = |values: Array2<f64>, name: &str| {
        make_lc(
            values,
            wavelength.clone(),
            time.clone(),
            "normalized",
            "microns",
            "BJD_TDB",
            Some(name),
        )
    };
    let lcdata = lc(flux, "lcdata")?;
    let lcerr = lc(unc, "lcerr")?;
    let temp = make_time_like(temperature, time, "K", "BJD_TDB", Some("temperature"))?;
    let spectrum = make_wave_like(
        depth.iter().map(|d| d * 100.0).collect::<Vec<_>>(),
        wavelength,
        "%",
        "microns",
        Some("transit_depth"),
    )?;

    let mut ds = make_dataset([
        ("lcdata", lcdata),
        ("lcerr", lcerr),
        ("temperature", temp),
        ("transit_depth", spectrum),
    ])?;
    ds.attrs.insert("target".into(), "synthetic hot Jupiter".into());
    ds.attrs.insert("seed".into(), 42i64.into());

    let output_path = "sample_lc.h5";
    try_write_xr(output_path, &ds, &WriteOptions::default())
        .with_context(|| format!("writing {output_path}"))?;

    println!(
        "Wrote {} light curves ({} exposures each) to {output_path}",
        ds.dim_len("wavelength").unwrap_or(0),
        ds.dim_len("time").unwrap_or(0)
    );
    Ok(())
}
