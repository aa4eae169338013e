//! PJSIP administration service
//!
//! Runs the HTTP API by default. `pjsip-admin backups <command>` offers the
//! operator backup helpers without starting the server.

mod models;
mod server;

use std::sync::Arc;

use server::asterisk::{AsteriskCli, SudoAsteriskCli};
use server::backup::BackupService;
use server::config::AppConfig;

const USAGE: &str = "\
Usage:
  pjsip-admin                          Run the HTTP server
  pjsip-admin backups list             List available backups
  pjsip-admin backups create           Create a manual backup
  pjsip-admin backups restore <name>   Restore a specific backup
  pjsip-admin backups latest           Restore the most recent backup";

fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    // Initialize tracing
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "pjsip_admin={level},tower_http={level}",
            level = config.log_level
        ))
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match args.first().map(String::as_str) {
        None | Some("serve") => runtime.block_on(server::run_server(config)),
        Some("backups") => runtime.block_on(run_backups(config, &args[1..])),
        Some(_) => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }
}

async fn run_backups(config: AppConfig, args: &[String]) -> anyhow::Result<()> {
    let backups = BackupService::new(&config.backup_path);

    match args.first().map(String::as_str) {
        Some("list") => {
            let listed = backups.list_backups().await?;
            if listed.is_empty() {
                println!("No backups found");
                return Ok(());
            }

            println!("Available backups in {}:", backups.backup_dir().display());
            for (i, backup) in listed.iter().enumerate() {
                println!("{:2}. {}", i + 1, backup.filename);
                println!(
                    "    Created: {}",
                    backup.created.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
                );
                println!("    Size: {} bytes", backup.size);
            }
        }
        Some("create") => match backups.create_backup(&config.pjsip_config, "pjsip_manual").await? {
            Some(path) => println!("Manual backup created: {}", path.display()),
            None => println!("No PJSIP configuration file found"),
        },
        Some("restore") => {
            let Some(name) = args.get(1) else {
                anyhow::bail!("Please specify a backup file name (see `pjsip-admin backups list`)");
            };
            restore(&config, &backups, name).await?;
        }
        Some("latest") => {
            let listed = backups.list_backups().await?;
            let Some(latest) = listed.first() else {
                anyhow::bail!("No backups found");
            };
            restore(&config, &backups, &latest.filename).await?;
        }
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn restore(config: &AppConfig, backups: &BackupService, name: &str) -> anyhow::Result<()> {
    backups.restore_backup(name, &config.pjsip_config).await?;
    println!("Restored {} -> {}", name, config.pjsip_config.display());

    let asterisk: Arc<dyn AsteriskCli> = Arc::new(SudoAsteriskCli::new(&config.asterisk_user));
    let result = asterisk.reload_pjsip().await;
    if result.success {
        println!("PJSIP configuration reloaded");
    } else {
        println!("PJSIP reload failed: {}", result.output);
    }
    Ok(())
}
