//! Spatial indexing, projection and query utilities.

pub mod index;
pub mod projector;
pub mod queries;

pub use projector::{distance_along_km, distance_km, line_length_km, point_at_distance, position_at_tick};
pub use queries::haversine_distance;
