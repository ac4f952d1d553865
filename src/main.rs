mod backend;
mod codec;
mod config;
mod error;
mod install;
mod routes;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use backend::rpc::{RpcBackend, TcpDeviceConnector};
use backend::script::ScriptBackend;
use config::{Command, Config};
use install::InstallationCoordinator;
use routes::store;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(config.log_level).into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();
    tracing::info!("P4 route controller starting...");

    match config.command.clone() {
        Command::Install => install_routes(&config).await?,
        Command::Show => {
            let table = load_table(&config)?;
            if table.is_empty() {
                println!("Routing table is empty");
            } else {
                print!("{}", table);
            }
        }
        Command::Add { prefix, port, mac } => {
            let mut table = load_table(&config)?;
            if table.get(&prefix)?.is_some() {
                println!("Replacing existing route for {}", prefix);
            }
            table
                .add(&prefix, port, &mac)
                .with_context(|| format!("Invalid route {}", prefix))?;
            println!("Added route: {} -> port {}, MAC {}", prefix, port, mac);
            store::save(&table, &config.routing_table)?;
        }
        Command::Remove { prefix } => {
            let mut table = load_table(&config)?;
            if table.remove(&prefix)? {
                println!("Removed route: {}", prefix);
                store::save(&table, &config.routing_table)?;
            } else {
                println!("Route not found: {}", prefix);
            }
        }
        Command::Lookup { ip } => {
            let table = load_table(&config)?;
            match table.lookup(&ip)? {
                Some(route) => println!(
                    "{} -> {} via port {}, MAC {}",
                    ip, route.prefix, route.next_hop.port, route.next_hop.mac
                ),
                None => println!("No route to {}", ip),
            }
        }
    }

    Ok(())
}

fn load_table(config: &Config) -> anyhow::Result<routes::RouteTable> {
    store::load(&config.routing_table).with_context(|| {
        format!(
            "Failed to load routing table from {}",
            config.routing_table.display()
        )
    })
}

async fn install_routes(config: &Config) -> anyhow::Result<()> {
    let table = load_table(config)?;
    print!("{}", table);

    let rpc = config.rpc_available.then(|| {
        RpcBackend::new(
            TcpDeviceConnector::new(config.device_id),
            config.switch_address(),
            config.pipeline.clone(),
        )
    });
    let script = ScriptBackend::new(config.commands_file.clone(), config.pipeline.clone());

    let mut coordinator = InstallationCoordinator::new(config.method, rpc, script);
    let outcome = match coordinator.run(&table).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(
                "Installation stopped in state {:?}: {}",
                coordinator.state(),
                e.user_message()
            );
            return Err(e).context("Route installation failed");
        }
    };
    tracing::debug!("Install transitions: {:?}", coordinator.history());
    print!("{}", outcome.report);
    if outcome.degraded() {
        tracing::warn!(
            "Installed with the {} backend instead of {}",
            outcome.report.backend,
            config.method
        );
    }

    if config.save_table {
        store::save(&table, &config.routing_table)?;
    }

    let failed = outcome.report.failures().count();
    if failed > 0 {
        anyhow::bail!("{} route(s) failed to install", failed);
    }
    Ok(())
}
