/// Macro that checks at compile time that a file shipped with the crate
/// exists, and expands to its absolute path.
/// [link](https://stackoverflow.com/questions/30003921/how-can-i-locate-resources-for-testing-with-cargo)
/// [link](https://stackoverflow.com/questions/73187970/compile-time-check-if-file-at-path-exists-like-include-str)
#[macro_export]
macro_rules! test_file_path {
    ($arg1:expr) => {{
        let _ = include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), $arg1));
        concat!(env!("CARGO_MANIFEST_DIR"), $arg1)
    }};
}
