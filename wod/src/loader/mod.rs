pub mod clock;
mod definition;
pub mod error;

pub use error::LoadError;

use crate::WodScript;

/// Loader entry point: turns a TOML workout definition into a [`WodScript`].
///
/// ```toml
/// [[statement]]
/// rounds = 3
/// reps = [21, 15, 9]
///
/// [[statement.child]]
/// effort = "Thrusters"
/// resistance = "95lb"
///
/// [[statement.child]]
/// effort = "Pullups"
/// ```
pub struct Loader {
    source: String,
    file_id: usize,
}

impl Loader {
    pub fn new(source: String, file_id: usize) -> Self {
        Loader { source, file_id }
    }

    /// Load the source into a complete script.
    pub fn load(&self) -> Result<WodScript, Vec<LoadError>> {
        let statements = definition::load_statements(&self.source, self.file_id)?;
        Ok(WodScript {
            statements,
            source_id: self.file_id,
        })
    }
}
