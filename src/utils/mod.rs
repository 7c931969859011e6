//! The `utils` module provides the pieces shared by every other module of
//! the bridge: the error taxonomy and logging initialisation.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
        logging::init("bogus");
    }
}
