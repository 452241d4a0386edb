//! Controller for keylights on the local network: discovery, a cached
//! state handle per light, change fan-out between lights and the text
//! screens the `keylight` binary prints.

pub mod cli;
pub mod client;
pub mod discovery;
pub mod error;
pub mod identify;
pub mod light;
pub mod panel;
pub mod settings;
pub mod store;
pub mod sync;
pub mod views;

pub use error::{Error, Result};
pub use panel::Panel;
pub use settings::Settings;

use std::io::Write;

/// Opens the panel described by `settings` and runs `command` against it.
pub async fn run<W: Write>(settings: Settings, command: cli::Command, out: &mut W) -> Result<()> {
    let panel = Panel::open(settings).await?;
    cli::execute(&panel, command, out).await
}
