use crate::monitor::{NoOpMonitor, TrainingMonitor};
use crate::session::Session;
use anyhow::{bail, format_err, Context, Error};
use log::{debug, info, warn};
use ndarray::{Array, Array1, Array2, ArrayView2, Axis, Dimension, Zip};
use ndarray_rand::RandomExt;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::Normal;
use rand_pcg::Pcg64Mcg;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "latent_arith.json";

/// Settings for [`LatentArith`]
#[derive(Clone, Debug)]
pub struct LatentParams {
    /// Width of the latent space
    pub z_dimension: usize,
    /// Adam step size
    pub learning_rate: f64,
    /// Cells per gradient step
    pub batch_size: usize,
    pub seed: u64,
}

impl LatentParams {
    pub fn new() -> LatentParams {
        LatentParams {
            z_dimension: 100,
            learning_rate: 0.001,
            batch_size: 32,
            seed: 0,
        }
    }
}

impl Default for LatentParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoder and decoder of the linear autoencoder
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub w_enc: Array2<f64>,
    pub b_enc: Array1<f64>,
    pub w_dec: Array2<f64>,
    pub b_dec: Array1<f64>,
}

impl Weights {
    fn random(x_dimension: usize, z_dimension: usize, rng: &mut Pcg64Mcg) -> Result<Weights, Error> {
        let enc = Normal::new(0.0, 1.0 / (x_dimension as f64).sqrt()).map_err(|e| format_err!("{e}"))?;
        let dec = Normal::new(0.0, 1.0 / (z_dimension as f64).sqrt()).map_err(|e| format_err!("{e}"))?;
        Ok(Weights {
            w_enc: Array2::random_using((x_dimension, z_dimension), enc, rng),
            b_enc: Array1::zeros(z_dimension),
            w_dec: Array2::random_using((z_dimension, x_dimension), dec, rng),
            b_dec: Array1::zeros(x_dimension),
        })
    }

    fn zeros_like(&self) -> Weights {
        Weights {
            w_enc: Array2::zeros(self.w_enc.raw_dim()),
            b_enc: Array1::zeros(self.b_enc.raw_dim()),
            w_dec: Array2::zeros(self.w_dec.raw_dim()),
            b_dec: Array1::zeros(self.b_dec.raw_dim()),
        }
    }

    fn encode(&self, x: &ArrayView2<f64>) -> Array2<f64> {
        x.dot(&self.w_enc) + &self.b_enc
    }

    fn decode(&self, z: &ArrayView2<f64>) -> Array2<f64> {
        z.dot(&self.w_dec) + &self.b_dec
    }

    /// Mean per-cell squared reconstruction error of `x` and its gradient.
    fn gradients(&self, x: &ArrayView2<f64>) -> (f64, Weights) {
        let m = x.nrows() as f64;
        let h = self.encode(x);
        let r = self.decode(&h.view());
        let e = &r - x;
        let loss = e.iter().map(|v| v * v).sum::<f64>() / m;

        let d_r = e * (2.0 / m);
        let d_h = d_r.dot(&self.w_dec.t());
        let grads = Weights {
            w_enc: x.t().dot(&d_h),
            b_enc: d_h.sum_axis(Axis(0)),
            w_dec: h.t().dot(&d_r),
            b_dec: d_r.sum_axis(Axis(0)),
        };
        (loss, grads)
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

struct Adam {
    m: Weights,
    v: Weights,
    t: i32,
}

impl Adam {
    fn new(w: &Weights) -> Adam {
        Adam {
            m: w.zeros_like(),
            v: w.zeros_like(),
            t: 0,
        }
    }

    fn step(&mut self, w: &mut Weights, g: &Weights, lr: f64) {
        self.t += 1;
        let b1t = 1.0 - BETA1.powi(self.t);
        let b2t = 1.0 - BETA2.powi(self.t);
        adam_update(&mut w.w_enc, &g.w_enc, &mut self.m.w_enc, &mut self.v.w_enc, lr, b1t, b2t);
        adam_update(&mut w.b_enc, &g.b_enc, &mut self.m.b_enc, &mut self.v.b_enc, lr, b1t, b2t);
        adam_update(&mut w.w_dec, &g.w_dec, &mut self.m.w_dec, &mut self.v.w_dec, lr, b1t, b2t);
        adam_update(&mut w.b_dec, &g.b_dec, &mut self.m.b_dec, &mut self.v.b_dec, lr, b1t, b2t);
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f64, D>,
    grad: &Array<f64, D>,
    m: &mut Array<f64, D>,
    v: &mut Array<f64, D>,
    lr: f64,
    b1t: f64,
    b2t: f64,
) {
    Zip::from(param).and(grad).and(m).and(v).for_each(|p, &g, m, v| {
        *m = BETA1 * *m + (1.0 - BETA1) * g;
        *v = BETA2 * *v + (1.0 - BETA2) * g * g;
        *p -= lr * (*m / b1t) / ((*v / b2t).sqrt() + ADAM_EPS);
    });
}

#[derive(Serialize, Deserialize)]
struct SavedModel {
    x_dimension: usize,
    z_dimension: usize,
    learning_rate: f64,
    batch_size: usize,
    seed: u64,
    epochs_trained: usize,
    weights: Weights,
}

/// Linear autoencoder used for latent-space arithmetic. Holds a [`Session`] on its model
/// directory for as long as it lives.
#[derive(Debug)]
pub struct LatentArith {
    x_dimension: usize,
    params: LatentParams,
    weights: Weights,
    epochs_trained: usize,
    session: Session,
}

impl LatentArith {
    /// Untrained model for `x_dimension` features, with default settings.
    pub fn new(x_dimension: usize, model_path: impl AsRef<Path>) -> Result<LatentArith, Error> {
        Self::with_params(x_dimension, model_path, LatentParams::new())
    }

    pub fn with_params(
        x_dimension: usize,
        model_path: impl AsRef<Path>,
        mut params: LatentParams,
    ) -> Result<LatentArith, Error> {
        if x_dimension == 0 {
            bail!("model needs at least one feature");
        }
        if params.z_dimension == 0 {
            bail!("latent dimension must be positive");
        }
        if params.z_dimension > x_dimension {
            warn!(
                "latent dimension {} exceeds the {} features, using {}",
                params.z_dimension, x_dimension, x_dimension
            );
            params.z_dimension = x_dimension;
        }
        let session = Session::open(model_path)?;
        let mut rng = Pcg64Mcg::seed_from_u64(params.seed);
        let weights = Weights::random(x_dimension, params.z_dimension, &mut rng)?;
        Ok(LatentArith {
            x_dimension,
            params,
            weights,
            epochs_trained: 0,
            session,
        })
    }

    /// Reload a model saved by [`LatentArith::save`].
    pub fn restore(model_path: impl AsRef<Path>) -> Result<LatentArith, Error> {
        let session = Session::open(model_path)?;
        let path = session.dir().join(MODEL_FILE);
        let reader = BufReader::new(File::open(&path).with_context(|| path.display().to_string())?);
        let saved: SavedModel =
            serde_json::from_reader(reader).with_context(|| format!("reading model {}", path.display()))?;
        if saved.weights.w_enc.dim() != (saved.x_dimension, saved.z_dimension) {
            bail!("model file {} is inconsistent", path.display());
        }
        Ok(LatentArith {
            x_dimension: saved.x_dimension,
            params: LatentParams {
                z_dimension: saved.z_dimension,
                learning_rate: saved.learning_rate,
                batch_size: saved.batch_size,
                seed: saved.seed,
            },
            weights: saved.weights,
            epochs_trained: saved.epochs_trained,
            session,
        })
    }

    pub fn x_dimension(&self) -> usize {
        self.x_dimension
    }

    pub fn z_dimension(&self) -> usize {
        self.params.z_dimension
    }

    pub fn epochs_trained(&self) -> usize {
        self.epochs_trained
    }

    pub fn model_path(&self) -> &Path {
        self.session.dir()
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    fn check_width(&self, x: &ArrayView2<f64>, expected: usize, what: &str) -> Result<(), Error> {
        if x.ncols() != expected {
            bail!("{} has {} columns, model expects {}", what, x.ncols(), expected);
        }
        Ok(())
    }

    pub fn encode(&self, x: &ArrayView2<f64>) -> Result<Array2<f64>, Error> {
        self.check_width(x, self.x_dimension, "input")?;
        Ok(self.weights.encode(x))
    }

    pub fn decode(&self, z: &ArrayView2<f64>) -> Result<Array2<f64>, Error> {
        self.check_width(z, self.params.z_dimension, "latent input")?;
        Ok(self.weights.decode(z))
    }

    /// Mean per-cell squared reconstruction error
    pub fn reconstruction_loss(&self, x: &ArrayView2<f64>) -> Result<f64, Error> {
        self.check_width(x, self.x_dimension, "input")?;
        if x.nrows() == 0 {
            bail!("cannot score an empty matrix");
        }
        Ok(self.weights.gradients(x).0)
    }

    /// Train for `n_epochs` and save the result. Returns the loss of every epoch.
    pub fn train(&mut self, x: &ArrayView2<f64>, n_epochs: usize) -> Result<Vec<f64>, Error> {
        self.train_monitored(x, n_epochs, NoOpMonitor)
    }

    pub fn train_monitored(
        &mut self,
        x: &ArrayView2<f64>,
        n_epochs: usize,
        mut monitor: impl TrainingMonitor,
    ) -> Result<Vec<f64>, Error> {
        self.check_width(x, self.x_dimension, "training data")?;
        let n = x.nrows();
        if n == 0 {
            bail!("cannot train on an empty matrix");
        }
        if x.iter().any(|v| !v.is_finite()) {
            bail!("training data contains non-finite values");
        }
        info!(
            "training latent model on {} cells x {} features for {} epochs",
            n, self.x_dimension, n_epochs
        );

        let mut rng = Pcg64Mcg::seed_from_u64(self.params.seed.wrapping_add(self.epochs_trained as u64 + 1));
        let mut order: Vec<usize> = (0..n).collect();
        let mut adam = Adam::new(&self.weights);
        let mut history = Vec::with_capacity(n_epochs);

        for epoch in 0..n_epochs {
            order.shuffle(&mut rng);
            let mut total = 0.0;
            for chunk in order.chunks(self.params.batch_size.max(1)) {
                let batch = x.select(Axis(0), chunk);
                let (loss, grads) = self.weights.gradients(&batch.view());
                adam.step(&mut self.weights, &grads, self.params.learning_rate);
                total += loss * chunk.len() as f64;
            }
            let loss = total / n as f64;
            if !loss.is_finite() {
                bail!("training diverged at epoch {}", epoch + 1);
            }
            debug!("epoch {}/{}: loss {:.6}", epoch + 1, n_epochs, loss);
            history.push(loss);
            self.epochs_trained += 1;
            monitor.on_epoch(epoch, n_epochs, loss)?;
        }

        self.save()?;
        Ok(history)
    }

    /// Write the model to `<model_path>/latent_arith.json`
    pub fn save(&self) -> Result<PathBuf, Error> {
        let path = self.session.dir().join(MODEL_FILE);
        let saved = SavedModel {
            x_dimension: self.x_dimension,
            z_dimension: self.params.z_dimension,
            learning_rate: self.params.learning_rate,
            batch_size: self.params.batch_size,
            seed: self.params.seed,
            epochs_trained: self.epochs_trained,
            weights: self.weights.clone(),
        };
        let writer = BufWriter::new(File::create(&path).with_context(|| path.display().to_string())?);
        serde_json::to_writer(writer, &saved)?;
        info!("saved latent model to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::monitor::atomic;
    use crate::session::Session;
    use approx::assert_abs_diff_eq;
    use rand_distr::Distribution;

    // 2-dimensional signal embedded in 6 features
    fn low_rank_data(n: usize, seed: u64) -> Array2<f64> {
        let mut rng = Pcg64Mcg::seed_from_u64(seed);
        let dist = Normal::new(0.0, 1.0).unwrap();
        let factors = Array2::from_shape_simple_fn((n, 2), || dist.sample(&mut rng));
        let loadings = ndarray::array![
            [1.0, 0.5, 0.0, -0.5, 1.0, 0.2],
            [0.0, 1.0, 1.0, 0.5, -0.3, 0.8]
        ];
        factors.dot(&loadings) + 2.0
    }

    fn params() -> LatentParams {
        LatentParams {
            z_dimension: 2,
            learning_rate: 0.01,
            batch_size: 16,
            seed: 3,
        }
    }

    #[test]
    fn test_training_reduces_loss() {
        let tmp = tempfile::tempdir().unwrap();
        let x = low_rank_data(200, 1);
        let mut model = LatentArith::with_params(6, tmp.path(), params()).unwrap();

        let before = model.reconstruction_loss(&x.view()).unwrap();
        let history = model.train(&x.view(), 60).unwrap();
        let after = model.reconstruction_loss(&x.view()).unwrap();

        assert_eq!(history.len(), 60);
        assert_eq!(model.epochs_trained(), 60);
        assert!(after < 0.2 * before, "loss before {before}, after {after}");
        assert!(tmp.path().join(MODEL_FILE).exists());
    }

    #[test]
    fn test_save_restore() {
        let tmp = tempfile::tempdir().unwrap();
        let x = low_rank_data(50, 2);
        let z = {
            let mut model = LatentArith::with_params(6, tmp.path(), params()).unwrap();
            model.train(&x.view(), 3).unwrap();
            model.encode(&x.view()).unwrap()
        };
        assert!(!Session::is_held(tmp.path()));

        let restored = LatentArith::restore(tmp.path()).unwrap();
        assert_eq!(restored.epochs_trained(), 3);
        assert_eq!(restored.z_dimension(), 2);
        assert_abs_diff_eq!(restored.encode(&x.view()).unwrap(), z, epsilon = 1e-12);
    }

    #[test]
    fn test_dimension_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let mut model = LatentArith::new(4, tmp.path()).unwrap();
        assert_eq!(model.z_dimension(), 4);
        assert!(model.encode(&Array2::zeros((2, 3)).view()).is_err());
        assert!(model.decode(&Array2::zeros((2, 3)).view()).is_err());
        assert!(model.train(&Array2::zeros((0, 4)).view(), 1).is_err());
        let mut nan = Array2::zeros((3, 4));
        nan[(1, 2)] = f64::NAN;
        assert!(model.train(&nan.view(), 1).is_err());
        assert_eq!(model.epochs_trained(), 0);
        assert!(LatentArith::new(0, tmp.path().join("other")).is_err());
    }

    #[test]
    fn test_cancellation_releases_session() {
        let tmp = tempfile::tempdir().unwrap();
        let x = low_rank_data(40, 4);
        let (state, monitor) = atomic();
        state.cancel();
        {
            let mut model = LatentArith::with_params(6, tmp.path(), params()).unwrap();
            let err = model.train_monitored(&x.view(), 10, monitor).unwrap_err();
            assert!(err.downcast_ref::<crate::monitor::CancellationError>().is_some());
            assert_eq!(state.epochs_done(), 1);
            assert!(Session::is_held(tmp.path()));
        }
        assert!(!Session::is_held(tmp.path()));
    }
}
