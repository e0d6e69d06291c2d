pub mod config;
pub mod controller;
pub mod events;
pub mod send;
pub mod state;
pub mod typing;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ChatConfig;
pub use controller::ChatController;
pub use events::{ChatEvent, ErrorPayload, MessageDto, TypingDto};
pub use send::{validate, PendingSend, SendStage};
pub use typing::{LocalTyping, TypingCoordinator};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Call once, early, from the host application.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("coachchat_client=debug,coachchat_net=debug,coachchat_store=info,warn")
    });

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    if installed.is_ok() {
        tracing::info!(app = coachchat_shared::constants::APP_NAME, "Tracing initialised");
    }
}
