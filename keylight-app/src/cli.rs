use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use keylight_api::{DEFAULT_PORT, LightState, Power, kelvin_to_temperature};

use crate::error::Result;
use crate::light::{LightHandle, SetOptions};
use crate::panel::Panel;
use crate::views::{render_detail, render_list, render_settings};

/// Control panel for keylights on the local network
#[derive(Parser, Debug)]
#[command(name = "keylight", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory holding the known lights and preferences
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Search the network and replace the known lights with what answers
    Scan,
    /// Show every known light with its current state
    List,
    /// Show the details of one light
    Show {
        /// Address, hostname, MAC address or name
        light: String,
    },
    /// Switch a light on or off
    Power {
        light: String,
        #[arg(value_enum)]
        action: PowerAction,
    },
    /// Switch every light on or off, whatever the sync setting
    PowerAll {
        #[arg(value_enum)]
        action: PowerAction,
    },
    /// Set the brightness in percent (3-100)
    Brightness {
        light: String,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Set the color temperature in device units (143-344) or Kelvin
    Temperature {
        light: String,
        #[arg(required_unless_present = "kelvin", allow_negative_numbers = true)]
        value: Option<i64>,
        #[arg(long, conflicts_with = "value")]
        kelvin: Option<u32>,
    },
    /// Change the name a light reports
    Rename { light: String, name: String },
    /// Blink a light to find it
    Identify { light: String },
    /// Register a light by address
    Add {
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(long)]
        name: Option<String>,
    },
    /// Forget a light
    Remove { light: String },
    /// Show or change the preferences
    Settings {
        /// Mirror changes of one light onto all others
        #[arg(long, value_enum)]
        sync: Option<Toggle>,
        #[arg(long, value_enum)]
        hide_on_blur: Option<Toggle>,
    },
    /// Keep printing the light list until interrupted
    Watch {
        /// Poll interval in milliseconds
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    On,
    Off,
    Toggle,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}

fn describe(name: &str, state: &LightState) -> String {
    format!(
        "{}: {}, {}%, {} K",
        name,
        state.on,
        state.brightness,
        state.kelvin()
    )
}

/// Loads the light to control. With sync enabled every other light is
/// fetched too, since only fetched lights follow synced changes.
async fn prepare(panel: &Panel, query: &str) -> Result<(String, LightHandle)> {
    let light = panel.find(query).await?;
    let handle = panel.handle(&light).await;

    if panel.preferences().global_sync {
        for (endpoint, result) in panel.refresh_all().await? {
            if let Err(e) = result {
                tracing::warn!("{} will not follow: {}", endpoint, e);
            }
        }
    }

    if !handle.is_fetched() {
        handle.refresh().await?;
    }

    Ok((light.display_name, handle))
}

pub async fn execute<W: Write>(panel: &Panel, command: Command, out: &mut W) -> Result<()> {
    match command {
        Command::Scan => {
            let lights = panel.scan().await?;
            panel.refresh_all().await?;

            tracing::info!("Scan found {} lights", lights.len());
            write!(out, "{}", render_list(&panel.views().await?, &panel.preferences()))?;
        }
        Command::List => {
            panel.refresh_all().await?;
            write!(out, "{}", render_list(&panel.views().await?, &panel.preferences()))?;
        }
        Command::Show { light } => {
            let light = panel.find(&light).await?;
            let handle = panel.handle(&light).await;

            // Failures show up in the view as the light's health
            let _ = handle.refresh().await;
            let info = handle.accessory_info().await.ok();

            let view = panel.view(&light).await;
            write!(out, "{}", render_detail(&view, info.as_ref()))?;
        }
        Command::Power { light, action } => {
            let (name, handle) = prepare(panel, &light).await?;
            let state = match action {
                PowerAction::On => handle.set_power(Power::On, SetOptions::default()).await,
                PowerAction::Off => handle.set_power(Power::Off, SetOptions::default()).await,
                PowerAction::Toggle => handle.toggle_power(SetOptions::default()).await,
            };
            panel.flush_all().await;
            writeln!(out, "{}", describe(&name, &state))?;
        }
        Command::PowerAll { action } => {
            for (endpoint, result) in panel.refresh_all().await? {
                if let Err(e) = result {
                    tracing::warn!("{} will not be switched: {}", endpoint, e);
                }
            }

            let switched = match action {
                PowerAction::On => panel.set_power_all(Power::On).await?,
                PowerAction::Off => panel.set_power_all(Power::Off).await?,
                PowerAction::Toggle => panel.toggle_all().await?,
            };
            panel.flush_all().await;

            for (light, state) in &switched {
                writeln!(out, "{}", describe(&light.display_name, state))?;
            }
        }
        Command::Brightness { light, value } => {
            let (name, handle) = prepare(panel, &light).await?;
            let state = handle.set_brightness(value, SetOptions::default()).await;
            panel.flush_all().await;
            writeln!(out, "{}", describe(&name, &state))?;
        }
        Command::Temperature {
            light,
            value,
            kelvin,
        } => {
            let value = match (value, kelvin) {
                (_, Some(kelvin)) => i64::from(kelvin_to_temperature(kelvin)),
                (Some(value), None) => value,
                // clap requires one of the two
                (None, None) => i64::from(LightState::default().temperature),
            };

            let (name, handle) = prepare(panel, &light).await?;
            let state = handle.set_temperature(value, SetOptions::default()).await;
            panel.flush_all().await;
            writeln!(out, "{}", describe(&name, &state))?;
        }
        Command::Rename { light, name } => {
            let renamed = panel.rename(&light, &name).await?;
            panel.flush_all().await;
            writeln!(out, "Renamed {} to {}", renamed.endpoint(), renamed.display_name)?;
        }
        Command::Identify { light } => {
            let light = panel.find(&light).await?;
            let handle = panel.handle(&light).await;

            handle.identify(&panel.identify_pattern()).await?;
            writeln!(out, "Identified {}", light.display_name)?;
        }
        Command::Add { host, port, name } => {
            let light = panel.add_manual(&host, port, name.as_deref()).await?;
            writeln!(out, "Added {} ({})", light.display_name, light.endpoint())?;
        }
        Command::Remove { light } => {
            let light = panel.remove(&light).await?;
            writeln!(out, "Removed {} ({})", light.display_name, light.endpoint())?;
        }
        Command::Settings { sync, hide_on_blur } => {
            if let Some(sync) = sync {
                panel.set_global_sync(sync.enabled()).await?;
            }
            if let Some(hide_on_blur) = hide_on_blur {
                panel.set_hide_on_blur(hide_on_blur.enabled()).await?;
            }
            write!(out, "{}", render_settings(&panel.preferences()))?;
        }
        Command::Watch { interval } => {
            let interval = interval
                .map(Duration::from_millis)
                .unwrap_or_else(|| panel.settings().control.poll_interval());
            watch(panel, interval, out).await?;
        }
    }

    Ok(())
}

async fn watch<W: Write>(panel: &Panel, interval: Duration, out: &mut W) -> Result<()> {
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                panel.refresh_all().await?;
                write!(out, "{}", render_list(&panel.views().await?, &panel.preferences()))?;
                writeln!(out)?;
                out.flush()?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_commands() {
        let cli = Cli::parse_from(["keylight", "brightness", "desk", "-5"]);
        assert!(matches!(
            cli.command,
            Command::Brightness { ref light, value: -5 } if light == "desk"
        ));

        let cli = Cli::parse_from(["keylight", "temperature", "desk", "--kelvin", "4500"]);
        assert!(matches!(
            cli.command,
            Command::Temperature {
                value: None,
                kelvin: Some(4500),
                ..
            }
        ));

        let cli = Cli::parse_from(["keylight", "power", "desk", "toggle", "--data-dir", "/tmp/k"]);
        assert!(matches!(
            cli.command,
            Command::Power {
                action: PowerAction::Toggle,
                ..
            }
        ));
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/k")));

        let cli = Cli::parse_from(["keylight", "power-all", "off"]);
        assert!(matches!(
            cli.command,
            Command::PowerAll {
                action: PowerAction::Off
            }
        ));
    }

    #[test]
    fn test_parse_rejects_missing_temperature() {
        assert!(Cli::try_parse_from(["keylight", "temperature", "desk"]).is_err());
        assert!(
            Cli::try_parse_from(["keylight", "temperature", "desk", "200", "--kelvin", "4500"])
                .is_err()
        );
    }

    #[test]
    fn test_parse_add_and_settings() {
        let cli = Cli::parse_from(["keylight", "add", "10.0.0.5"]);
        assert!(matches!(
            cli.command,
            Command::Add { port: DEFAULT_PORT, name: None, .. }
        ));

        let cli = Cli::parse_from(["keylight", "settings", "--sync", "off"]);
        assert!(matches!(
            cli.command,
            Command::Settings {
                sync: Some(Toggle::Off),
                hide_on_blur: None
            }
        ));
    }
}
