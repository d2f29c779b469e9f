//! # stochastic-depth: deep residual classifier with random block dropping
//!
//! A residual image classifier in which, during training, every residual
//! block is bypassed with its own probability, while evaluation always runs
//! the full network. The network is expressed as an **Abstract Semantic
//! Graph (ASG)**: symbolic tensors record operations, shape inference checks
//! the graph at build time, and a CPU backend executes it.
//!
//! ## Usage Example
//!
//! ```no_run
//! use rand::{rngs::StdRng, SeedableRng};
//! use stochastic_depth::config::StochasticDepthConfig;
//! use stochastic_depth::data::SyntheticDataset;
//! use stochastic_depth::models::StochasticResNet;
//! use stochastic_depth::training::Session;
//!
//! let config = StochasticDepthConfig { blocks_per_stage: 3, ..Default::default() };
//! let model = StochasticResNet::build(&config).unwrap();
//! let mut rng = StdRng::seed_from_u64(config.seed);
//! let params = model.init_parameters(&mut rng);
//! let mut session = Session::new(model, params);
//!
//! let data = SyntheticDataset::generate(64, 3, 32, 10, &mut rng);
//! for (images, labels) in data.batches(config.batch_size, &mut rng) {
//!     let report = session.train_step(&images, &labels).unwrap();
//!     println!("loss {:.4}, {} blocks bypassed", report.loss, report.closed);
//! }
//! session.end_epoch();
//! ```

pub mod analysis;
pub mod asg;
pub mod config;
pub mod data;
pub mod error;
pub mod gating;
pub mod losses;
pub mod metrics;
pub mod models;
pub mod nn;
pub mod runtime;
pub mod tensor;
pub mod training;

pub use config::StochasticDepthConfig;
pub use error::{Error, Result};
pub use gating::{DeathMode, GateSampler, GateTable};
pub use models::StochasticResNet;
pub use training::{Phase, Session, TrainingHook};
