//! Bidirectional LSTM over encoder outputs

use candle_core::{IndexOp, Result, Tensor};
use candle_nn::rnn::{lstm, Direction, LSTMConfig, LSTM, RNN};
use candle_nn::VarBuilder;

/// Single-layer bidirectional LSTM that keeps only the final hidden states.
///
/// Weight names follow PyTorch's `nn.LSTM`: `weight_ih_l0`, `weight_hh_l0`,
/// `bias_ih_l0`, `bias_hh_l0` and the same with a `_reverse` suffix.
pub struct BiLstm {
    forward: LSTM,
    backward: LSTM,
    hidden_dim: usize,
}

impl BiLstm {
    pub fn load(vb: VarBuilder, input_dim: usize, hidden_dim: usize) -> Result<Self> {
        let forward = lstm(
            input_dim,
            hidden_dim,
            LSTMConfig {
                direction: Direction::Forward,
                ..Default::default()
            },
            vb.clone(),
        )?;
        let backward = lstm(
            input_dim,
            hidden_dim,
            LSTMConfig {
                direction: Direction::Backward,
                ..Default::default()
            },
            vb,
        )?;

        Ok(Self {
            forward,
            backward,
            hidden_dim,
        })
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    /// Run over every position of `xs` (batch, seq, features) and return
    /// `[h_forward_last, h_backward_last]` with shape (batch, 2 * hidden).
    ///
    /// The backward direction consumes the sequence from the last position to
    /// the first, so its final state is the one produced at position 0.
    pub fn final_states(&self, xs: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = xs.dims3()?;

        let mut fwd = self.forward.zero_state(batch)?;
        for t in 0..seq_len {
            let x = xs.i((.., t, ..))?.contiguous()?;
            fwd = self.forward.step(&x, &fwd)?;
        }

        let mut bwd = self.backward.zero_state(batch)?;
        for t in (0..seq_len).rev() {
            let x = xs.i((.., t, ..))?.contiguous()?;
            bwd = self.backward.step(&x, &bwd)?;
        }

        Tensor::cat(&[fwd.h(), bwd.h()], 1)
    }
}
