//! List devices currently present.
//!
//! Uses the same configuration as the daemon and prints one JSON snapshot
//! per matching device.

use anyhow::{Context, Result};

use devwatch::config::MonitorConfig;
use devwatch::monitor::DeviceContext;
use devwatch::tracing;

fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = MonitorConfig::load().context("loading configuration")?;
    let context = DeviceContext::open().context("opening device context")?;

    for device in context.enumerate(&config.filters)? {
        let snapshot = device.snapshot(&config.attributes, &config.properties);
        println!("{}", serde_json::to_string(&snapshot)?);
    }

    context.close();
    Ok(())
}
