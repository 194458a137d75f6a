//! Shared model types for LSTM-based consumption forecasting
//!
//! Both the hourly and the daily forecaster are instances of the same
//! architecture; they differ only in hidden size, dropout rate and the
//! resolution of the windows they are fed.

use burn::config::Config;
use burn::module::Module;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Lstm, LstmConfig};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// LSTM regression model producing one forecast per input timestep
#[derive(Module, Debug)]
pub struct ConsumptionLstm<B: Backend> {
    lstm: Lstm<B>,
    dropout: Dropout,
    fc: Linear<B>,
}

/// Configuration for ConsumptionLstm
#[derive(Config, Debug)]
pub struct ConsumptionLstmConfig {
    pub input_size: usize,
    pub hidden_size: usize,
    #[config(default = 0.2)]
    pub dropout_rate: f64,
}

impl ConsumptionLstmConfig {
    /// Initialize the model with this config
    pub fn init<B: Backend>(&self, device: &B::Device) -> ConsumptionLstm<B> {
        ConsumptionLstm {
            lstm: LstmConfig::new(self.input_size, self.hidden_size, false).init(device),
            dropout: DropoutConfig::new(self.dropout_rate).init(),
            fc: LinearConfig::new(self.hidden_size, 1).init(device),
        }
    }
}

impl<B: Backend> ConsumptionLstm<B> {
    /// Forward pass: `[batch, channels, time]` in, `[batch, time, 1]` out.
    ///
    /// Windows arrive channel-major; the LSTM wants time-major, hence the
    /// swap. Every timestep's hidden state goes through the same linear
    /// head, so the output is a per-step forecast sequence.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let (hidden, _) = self.lstm.forward(input.swap_dims(1, 2), None);
        self.fc.forward(self.dropout.forward(hidden))
    }

    /// The last `steps` forecasts, squeezed to `[batch, steps]`.
    pub fn forecast(&self, input: Tensor<B, 3>, steps: usize) -> Tensor<B, 2> {
        let out = self.forward(input);
        let [batch, seq, _] = out.dims();
        out.slice([0..batch, seq - steps..seq, 0..1]).squeeze(2)
    }
}

/// Mean-squared error over all elements
pub fn mean_squared_error<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    (pred - target).powf_scalar(2.0).mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    #[test]
    fn forward_shape_is_per_step() {
        let device = NdArrayDevice::Cpu;
        let model = ConsumptionLstmConfig::new(5, 8).init::<B>(&device);
        let input = Tensor::<B, 3>::zeros([2, 5, 48], &device);
        let out = model.forward(input);
        assert_eq!(out.dims(), [2, 48, 1]);
    }

    #[test]
    fn forecast_takes_trailing_steps() {
        let device = NdArrayDevice::Cpu;
        let model = ConsumptionLstmConfig::new(5, 8).init::<B>(&device);
        let input = Tensor::<B, 3>::zeros([2, 5, 48], &device);
        let out = model.forecast(input, 24);
        assert_eq!(out.dims(), [2, 24]);
    }

    #[test]
    fn mse_of_known_values() {
        let device = NdArrayDevice::Cpu;
        let pred = Tensor::<B, 2>::from_data(TensorData::new(vec![1.0f32, 3.0], [1, 2]), &device);
        let target = Tensor::<B, 2>::from_data(TensorData::new(vec![0.0f32, 1.0], [1, 2]), &device);
        let loss: f32 = mean_squared_error(pred, target).into_scalar();
        // (1 + 4) / 2
        assert!((loss - 2.5).abs() < 1e-6);
    }
}
