/**
The pitaya field station follows the same split as the rest of our control systems:
devices are atomic units that wrap one piece of hardware or one external process,
and components compose devices into a unit that does something useful in the field.
Here a single component, the plant session controller, drives a scanning rig through
capture, classification, farmer notification and logging, one plant at a time.
*/

/// Components in the system are created by grouping together
/// devices into a logical unit that performs some function
/// for the overall field station.
pub mod components;
/// Devices that are an atomic unit, and can be composed
/// with other devices into components to perform some function.
pub mod devices;
/// Errors shared by every device and component.
pub mod error;
/// Message structure for communication into and out of the
/// field station, such as the plant identifiers sent by the
/// scanning rig and the records written for each detection.
pub mod messages;
/// Development utilities for working with images, serial
/// peers and test fixtures.
pub mod utils;

pub use error::{PitayaError, Result};
