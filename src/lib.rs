pub type Flt = f32;

mod activation;
mod autoencoder;
mod config;
mod cross_validation;
mod datasets;
mod error;
mod evaluation;
mod latent;
mod optimizer;
mod random;
mod session;
mod trainer;

pub use activation::*;
pub use autoencoder::*;
pub use config::*;
pub use cross_validation::*;
pub use datasets::*;
pub use error::*;
pub use evaluation::*;
pub use latent::*;
pub use optimizer::*;
pub use random::*;
pub use session::*;
pub use trainer::*;
