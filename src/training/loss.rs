//! Training objective and prediction counting

use burn::nn::loss::CrossEntropyLoss;
use burn::tensor::{backend::Backend, ElementConversion, Int, Tensor};

use crate::model::ClassifierOutput;
use crate::utils::error::{Result, SceneError};
use crate::AUX_LOSS_WEIGHT;

/// Cross entropy of the primary logits, plus `AUX_LOSS_WEIGHT` times the
/// auxiliary cross entropy when the model has an auxiliary head
pub fn classification_loss<B: Backend>(
    loss_fn: &CrossEntropyLoss<B>,
    output: &ClassifierOutput<B>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let primary = loss_fn.forward(output.logits.clone(), targets.clone());
    match &output.aux_logits {
        Some(aux) => {
            let aux = loss_fn.forward(aux.clone(), targets);
            primary + aux.mul_scalar(AUX_LOSS_WEIGHT)
        }
        None => primary,
    }
}

/// Number of rows whose argmax equals the target
pub fn count_correct<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    let [batch_size] = targets.dims();
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as usize
}

/// Reject NaN or infinite losses
pub fn ensure_finite(loss: f64, phase: &str) -> Result<()> {
    if loss.is_finite() {
        Ok(())
    } else {
        Err(SceneError::Compute(format!("non-finite {} loss: {}", phase, loss)))
    }
}
