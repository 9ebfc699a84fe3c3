//! Miscellaneous helpers.

pub mod file_system;

/// Converts a list of borrowed strings into owned ones, e.g. command arguments.
pub fn to_owned(args: Vec<&str>) -> Vec<String> {
    args.into_iter().map(String::from).collect()
}
