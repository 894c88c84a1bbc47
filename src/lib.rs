pub mod diagnostics;
pub mod error;
pub mod interpreter;
pub mod repl;
pub mod scanner;
pub mod stdlib;

use std::sync::Once;

pub use error::{ErrorKind, SusaError};
pub use interpreter::Interpreter;
pub use stdlib::{BuiltinModules, ModuleRegistry};

/// Run `source` in a fresh interpreter and return everything it printed,
/// one line per `print`, joined with `\n`. An uncaught failure is appended as
/// a single editor-style error report.
pub fn execute(source: &str) -> String {
    Interpreter::new().execute(source)
}

static TRACING_INIT: Once = Once::new();

/// Install a stderr subscriber filtered by `RUST_LOG`, e.g.
/// `RUST_LOG=susa=debug`. Does nothing when `RUST_LOG` is unset.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}
