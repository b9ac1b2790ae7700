use anyhow::bail;
use log::{error, info, warn};
use talaria::Branding;
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;
mod infrastructure;
mod manifest;
mod module;
mod resolver;
mod store;

use config::Config;
use resolver::registry::{self, LoaderFamily};
use resolver::ResolverContext;

fn main() -> Result<(), anyhow::Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async {
            let printer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_ansi(true)
                .pretty()
                .with_thread_names(true);

            let filter = EnvFilter::builder();

            let filter = if std::env::var("RUST_LOG").is_ok() {
                println!("loaded logger directives from `RUST_LOG` env");

                filter.from_env().expect("logger directives are invalid")
            } else {
                filter
                    .parse("info")
                    .expect("default logger directives are invalid")
            };

            tracing_subscriber::registry()
                .with(printer)
                .with(filter)
                .init();

            if check_env_vars() {
                bail!("Some environment variables are missing!");
            }

            Branding::set_branding(Branding::new(
                dotenvy::var("BRAND_NAME").unwrap(),
                dotenvy::var("SUPPORT_EMAIL").unwrap(),
            ))?;

            let config = Config::from_env()?;

            let family_enabled = match config.loader_family {
                LoaderFamily::Forge => cfg!(feature = "forge"),
                LoaderFamily::NeoForge => cfg!(feature = "neoforge"),
            };
            if !family_enabled {
                bail!(
                    "Support for {} was not compiled in",
                    config.loader_family.as_str()
                );
            }

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, aborting at next safe point");
                    let _ = cancel_tx.send(true);
                }
            });

            let ctx = ResolverContext::new(&config, cancel_rx);
            let mut strategy = registry::select(config.loader_family, ctx)?;

            info!(
                "Resolving {} {} for game version {} via {}",
                config.loader_family.as_str(),
                config.loader_version,
                config.game_version,
                strategy.name()
            );

            let tree = match strategy.resolve().await {
                Ok(tree) => tree,
                Err(err) => {
                    error!("Resolution failed: {:?}", err);
                    return Err(err.into());
                }
            };

            let rendered = serde_json::to_string_pretty(&tree)?;
            match dotenvy::var("OUTPUT_FILE").ok() {
                Some(path) => {
                    std::fs::write(&path, rendered)?;
                    info!("Module tree written to {}", path);
                }
                None => println!("{}", rendered),
            }

            Ok(())
        })
}

fn check_env_vars() -> bool {
    let mut failed = false;

    fn check_var<T: std::str::FromStr>(var: &str) -> bool {
        if dotenvy::var(var)
            .ok()
            .and_then(|s| s.parse::<T>().ok())
            .is_none()
        {
            warn!(
                "Variable `{}` missing in dotenvy or not of type `{}`",
                var,
                std::any::type_name::<T>()
            );
            true
        } else {
            false
        }
    }

    failed |= check_var::<String>("BASE_URL");
    failed |= check_var::<String>("COMMON_DIR");
    failed |= check_var::<String>("WORK_DIR");

    failed |= check_var::<talaria::version::GameVersion>("GAME_VERSION");
    failed |= check_var::<String>("LOADER_FAMILY");
    failed |= check_var::<String>("LOADER_VERSION");

    failed |= check_var::<String>("BRAND_NAME");
    failed |= check_var::<String>("SUPPORT_EMAIL");

    failed
}
