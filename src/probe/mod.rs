//! Linear classifier trained on frozen features
pub mod early_stopping;

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use candle::{D, DType, Device, Tensor};
use candle_nn::{AdamW, Init, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use early_stopping::{EarlyStopping, StopDecision};

/// Rows per forward pass when scoring a whole split
const EVAL_BATCH: usize = 1024;

/// Training hyper-parameters for a probe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Epochs without validation improvement before stopping
    pub patience: usize,
    pub min_delta: f64,
    pub restore_best_weights: bool,
}

impl Default for ProbeParams {
    fn default() -> Self {
        Self {
            epochs: 35,
            batch_size: 64,
            learning_rate: 1e-3,
            patience: 2,
            min_delta: 0.0,
            restore_best_weights: true,
        }
    }
}

/// Metrics of one training epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Per-epoch metrics plus what early stopping decided
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochRecord>,
    pub best_epoch: Option<usize>,
    /// Epoch after which early stopping ended training, if it did
    pub stopped_epoch: Option<usize>,
    pub restored_best: bool,
}

impl History {
    pub fn best(&self) -> Option<&EpochRecord> {
        let best = self.best_epoch?;
        self.epochs.iter().find(|r| r.epoch == best)
    }
}

/// Single dense layer mapping features to class logits; softmax on prediction
pub struct LinearProbe {
    varmap: VarMap,
    linear: Linear,
    in_dim: usize,
    num_classes: usize,
    device: Device,
}

impl LinearProbe {
    /// Glorot-uniform weights drawn from `rng`, zero bias
    pub fn new<R: Rng>(
        in_dim: usize,
        num_classes: usize,
        device: &Device,
        rng: &mut R,
    ) -> candle::Result<Self> {
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let ws = vb.get_with_hints((num_classes, in_dim), "weight", Init::Const(0.))?;
        let bs = vb.get_with_hints(num_classes, "bias", Init::Const(0.))?;

        let limit = (6.0 / (in_dim + num_classes) as f64).sqrt() as f32;
        let init: Vec<f32> = (0..num_classes * in_dim)
            .map(|_| rng.random_range(-limit..=limit))
            .collect();
        varmap.set_one("weight", Tensor::from_vec(init, (num_classes, in_dim), device)?)?;

        Ok(Self {
            varmap,
            linear: Linear::new(ws, Some(bs)),
            in_dim,
            num_classes,
            device: device.clone(),
        })
    }

    /// Restore a probe saved with [`LinearProbe::save`]
    pub fn load(path: &Path, in_dim: usize, num_classes: usize, device: &Device) -> anyhow::Result<Self> {
        let mut rng = rand::rng();
        let mut probe = Self::new(in_dim, num_classes, device, &mut rng)?;
        probe
            .varmap
            .load(path)
            .with_context(|| format!("Failed to load probe weights {:?}", path))?;
        Ok(probe)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        self.varmap
            .save(path)
            .with_context(|| format!("Failed to save probe weights {:?}", path))
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Raw logits `(N, C)`
    pub fn logits(&self, features: &Tensor) -> candle::Result<Tensor> {
        self.linear.forward(features)
    }

    /// Class probabilities `(N, C)`
    pub fn predict_proba(&self, features: &Tensor) -> candle::Result<Tensor> {
        let mut parts = Vec::new();
        for (start, len) in row_batches(features.dim(0)?, EVAL_BATCH) {
            let logits = self.logits(&features.narrow(0, start, len)?)?;
            parts.push(candle_nn::ops::softmax(&logits, D::Minus1)?);
        }
        if parts.is_empty() {
            return Tensor::zeros((0, self.num_classes), DType::F32, &self.device);
        }
        Tensor::cat(&parts, 0)
    }

    /// Most probable class per row
    pub fn predict(&self, features: &Tensor) -> candle::Result<Vec<u32>> {
        self.predict_proba(features)?.argmax(D::Minus1)?.to_vec1::<u32>()
    }

    /// Mean cross-entropy and accuracy over a whole split
    pub fn evaluate(&self, features: &Tensor, labels: &[u32]) -> candle::Result<(f64, f64)> {
        let n = features.dim(0)?;
        if n != labels.len() {
            candle::bail!("{} feature rows but {} labels", n, labels.len());
        }
        if n == 0 {
            return Ok((0.0, 0.0));
        }
        let targets = Tensor::from_slice(labels, n, &self.device)?;

        let mut loss_sum = 0f64;
        let mut correct = 0f64;
        for (start, len) in row_batches(n, EVAL_BATCH) {
            let logits = self.logits(&features.narrow(0, start, len)?)?;
            let ys = targets.narrow(0, start, len)?;
            let loss = candle_nn::loss::cross_entropy(&logits, &ys)?.to_scalar::<f32>()?;
            loss_sum += loss as f64 * len as f64;
            correct += count_correct(&logits, &ys)?;
        }
        Ok((loss_sum / n as f64, correct / n as f64))
    }

    /// Train with Adam on mini-batches, early-stopping on validation loss
    pub fn fit<R: Rng>(
        &mut self,
        train_x: &Tensor,
        train_y: &[u32],
        val_x: &Tensor,
        val_y: &[u32],
        params: &ProbeParams,
        rng: &mut R,
    ) -> anyhow::Result<History> {
        let n = train_x.dim(0)?;
        if n != train_y.len() {
            anyhow::bail!("{} training rows but {} labels", n, train_y.len());
        }
        if n == 0 {
            anyhow::bail!("Cannot fit a probe on an empty training set");
        }
        let targets = Tensor::from_slice(train_y, n, &self.device)?;

        let mut opt = AdamW::new(
            self.varmap.all_vars(),
            ParamsAdamW {
                lr: params.learning_rate,
                beta1: 0.9,
                beta2: 0.999,
                eps: 1e-7,
                weight_decay: 0.0,
            },
        )?;
        let mut stopper = EarlyStopping::new(params.patience, params.min_delta);
        let mut best_weights: Option<HashMap<String, Tensor>> = None;
        let mut history = History::default();

        let epoch_pb = ProgressBar::new(params.epochs as u64);
        if let Ok(style) = ProgressStyle::with_template("  [epoch {pos}/{len}] {wide_msg}") {
            epoch_pb.set_style(style);
        }

        let mut order: Vec<u32> = (0..n as u32).collect();
        for epoch in 1..=params.epochs {
            order.shuffle(rng);

            let mut loss_sum = 0f64;
            let mut correct = 0f64;
            for chunk in order.chunks(params.batch_size.max(1)) {
                let idx = Tensor::from_slice(chunk, chunk.len(), &self.device)?;
                let xs = train_x.index_select(&idx, 0)?;
                let ys = targets.index_select(&idx, 0)?;

                let logits = self.logits(&xs)?;
                let loss = candle_nn::loss::cross_entropy(&logits, &ys)?;
                loss_sum += loss.to_scalar::<f32>()? as f64 * chunk.len() as f64;
                correct += count_correct(&logits, &ys)?;
                opt.backward_step(&loss)?;
            }

            let (val_loss, val_accuracy) = self.evaluate(val_x, val_y)?;
            let record = EpochRecord {
                epoch,
                loss: loss_sum / n as f64,
                accuracy: correct / n as f64,
                val_loss,
                val_accuracy,
            };
            debug!(
                epoch,
                loss = record.loss,
                accuracy = record.accuracy,
                val_loss,
                val_accuracy,
                "probe epoch"
            );
            epoch_pb.set_message(format!(
                "loss {:.4} • acc {:.2}% • val_loss {:.4} • val_acc {:.2}%",
                record.loss,
                record.accuracy * 100.0,
                val_loss,
                val_accuracy * 100.0
            ));
            epoch_pb.inc(1);
            history.epochs.push(record);

            match stopper.update(epoch, val_loss) {
                StopDecision::Improved => {
                    if params.restore_best_weights {
                        best_weights = Some(self.snapshot()?);
                    }
                }
                StopDecision::Wait => {}
                StopDecision::Stop => {
                    history.stopped_epoch = Some(epoch);
                    info!(epoch, best_epoch = ?stopper.best_epoch(), "early stopping");
                    break;
                }
            }
        }
        epoch_pb.finish_and_clear();

        history.best_epoch = stopper.best_epoch();
        // A run that uses every epoch keeps its final weights.
        if let (Some(_), Some(weights)) = (history.stopped_epoch, best_weights) {
            self.varmap.set(weights.iter())?;
            history.restored_best = true;
        }
        Ok(history)
    }

    /// Deep copy of every parameter
    fn snapshot(&self) -> anyhow::Result<HashMap<String, Tensor>> {
        let vars = self
            .varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("Probe parameter lock poisoned"))?;
        vars.iter()
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?)))
            .collect()
    }
}

fn count_correct(logits: &Tensor, targets: &Tensor) -> candle::Result<f64> {
    let hits = logits
        .argmax(D::Minus1)?
        .eq(targets)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(hits as f64)
}

fn row_batches(n: usize, batch: usize) -> impl Iterator<Item = (usize, usize)> {
    (0..n)
        .step_by(batch)
        .map(move |start| (start, batch.min(n - start)))
}
