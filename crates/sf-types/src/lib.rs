pub mod data;
pub mod errors;
pub mod model;
pub mod params;
pub mod scoring;

pub use data::*;
pub use errors::*;
pub use model::*;
pub use params::*;
pub use scoring::*;
