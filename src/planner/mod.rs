mod distribution;
mod error;

pub use distribution::{assign, DistributionPlanner};
pub use error::{PlacementError, PlacementResult};
