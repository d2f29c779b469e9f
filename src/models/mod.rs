//! Готовые архитектуры, собранные из слоёв [`crate::nn`].

pub mod stochastic_resnet;

pub use stochastic_resnet::{topology, StochasticResNet};
