//! # Data Module
//!
//! In-memory image data for training runs and tests. There is no dataset
//! I/O: images are generated, standardised and augmented in memory.
//!
//! - [`SyntheticDataset`]: seeded images with one-hot labels and shuffled
//!   full batches
//! - [`Standardize`]: per-pixel standardisation fitted on a dataset
//! - [`RandomHorizontalFlip`]: batch augmentation
//!
//! ```ignore
//! let ds = SyntheticDataset::generate(256, 3, 32, 10, &mut rng);
//! let norm = Standardize::fit(ds.images()).unwrap();
//! let ds = ds.map_images(|x| norm.apply(&x));
//! for (images, labels) in ds.batches(16, &mut rng) {
//!     // train on batch
//! }
//! ```

pub mod dataset;
pub mod transforms;

pub use dataset::SyntheticDataset;
pub use transforms::{RandomHorizontalFlip, Standardize};
