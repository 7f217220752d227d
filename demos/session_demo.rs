//! Minimal CLI demo for the Argus licensing runtime.
//!
//! ```bash
//! ARGUS_API_BASE=https://ex.example/api ARGUS_API_KEY=... ARGUS_PRODUCT_SLUG=demo \
//!     cargo run --bin argus_demo -- activate LIC-XXXX-XXXX
//! ```

use std::env;
use std::process::ExitCode;

use argus::errors::Error;
use argus::session::{ActivateOptions, SessionCore};
use argus::RuntimeConfig;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (command, license_key) = match (args.first(), args.get(1)) {
        (Some(command), license_key) => (command.as_str(), license_key),
        None => {
            eprintln!("usage: argus_demo <activate|validate|deactivate|status> [license_key]");
            return ExitCode::FAILURE;
        }
    };

    let config = RuntimeConfig {
        api_base: env::var("ARGUS_API_BASE").unwrap_or_default(),
        api_key: env::var("ARGUS_API_KEY").unwrap_or_default(),
        product_slug: env::var("ARGUS_PRODUCT_SLUG").unwrap_or_default(),
        ..RuntimeConfig::default()
    };

    let core = match SessionCore::configure(config).await {
        Ok(core) => core,
        Err(e) => {
            eprintln!("failed to start session core: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = run(&core, command, license_key.map(String::as_str)).await;
    let _ = core.dispose().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{command} failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(core: &SessionCore, command: &str, license_key: Option<&str>) -> Result<(), Error> {
    match command {
        "activate" => {
            let key = require_license_key(license_key)?;
            let license = core.activate(key, ActivateOptions::default(), None).await?;
            println!("activated: {} ({:?})", license.key, license.status);
            Ok(())
        }
        "validate" => {
            let key = require_license_key(license_key)?;
            let result = core.validate(key, None).await?;
            println!("valid={} offline={} reason={:?}", result.valid, result.offline, result.reason_code);
            Ok(())
        }
        "deactivate" => {
            core.deactivate(None).await?;
            println!("deactivated");
            Ok(())
        }
        "status" => {
            println!("status: {:?}", core.get_status());
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            Ok(())
        }
    }
}

fn require_license_key(license_key: Option<&str>) -> Result<&str, Error> {
    license_key.ok_or_else(|| {
        Error::Configuration(argus::errors::ConfigurationError::InvalidConfiguration(
            "license_key argument is required".to_string(),
        ))
    })
}
