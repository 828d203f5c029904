/// Standardise how messages are sent into and out of
/// the field station. Provide test suite to
/// ensure interfaces are respected.
pub mod control {
    /// Plant messages come from the embedded controller on the
    /// scanning rig. They identify the plant in front of the camera
    /// and are answered with an acknowledgement once it is logged.
    pub mod plant;
}

/// Records produced by the field station for every plant.
pub mod records {
    /// Classification results and the detection records written to the log.
    pub mod detection;
}
