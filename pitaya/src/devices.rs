/// Devices are the atomic units that can be combined together
/// into components. Their core responsibilities do not change
/// based on location, name etc.
pub mod hardware {
    /// Timed read/write access to a serial port.
    pub mod serial;
    /// Device interface for the GSM modem used to send SMS.
    pub mod modem;
    /// Device interface for the embedded controller driving the scanning rig.
    pub mod embedded;
    /// Device interface for the still camera.
    pub mod camera;
}

/// Devices that live purely in software.
pub mod software {
    /// Plant disease classifier backed by a pre-trained model.
    pub mod classifier;
}
