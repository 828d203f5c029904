/// Components that are placed within the field station.
pub mod field_station {
    /// Append only record of every completed detection.
    pub mod detection_log;
    /// The plant session controller that ties the devices together.
    pub mod session;
}

/// Helpful prelude when working with components.
pub mod prelude {
    pub use crate::components::field_station::detection_log::*;
    pub use crate::components::field_station::session::*;
}
