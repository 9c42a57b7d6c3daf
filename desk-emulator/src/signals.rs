//! SIGINT/SIGTERM handling.

use anyhow::{Context as _, Result};
use desk_core::events::ControlEvent;
use tracing::info;

use crate::runtime::{EventSender, deliver};

/// Turns termination signals into shutdown events. The handler runs on the
/// `ctrlc` thread, never on the executor.
pub fn install(events: EventSender<'static>) -> Result<()> {
    ctrlc::set_handler(move || request_shutdown(&events))
        .context("failed to install SIGINT/SIGTERM handler")
}

fn request_shutdown(events: &EventSender<'_>) {
    info!("termination signal received");
    deliver(events, ControlEvent::Shutdown);
}
