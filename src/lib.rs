pub mod ai; // completion client, response cache, retry controller
pub mod cancel;
pub mod clock;
pub mod config;
pub mod core_state; // facade shared by front ends
pub mod db;
pub mod models;
pub mod recommendation; // treatment suggestions
pub mod scheduler; // conflict-aware booking

pub use core_state::{CoreError, CoreState, PatientSummary};

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init();

    tracing::debug!("{} v{} tracing initialized", config::APP_NAME, config::APP_VERSION);
}
