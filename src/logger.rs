use anyhow::Result;
use log::Level;

/// Initialize the process-wide logger. Verbosity is fixed rather than
/// surfaced as a flag; there is only one binary and one audience for its
/// logs.
pub fn init() -> Result<()> {
    simple_logger::init_with_level(Level::Info)?;
    Ok(())
}
