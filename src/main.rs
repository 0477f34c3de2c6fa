//! Shipwright - FreeBSD jail provisioning
//!
//! Provisions sshd-ready jails behind a PF redirect: registry entry,
//! leased address, forwarded port, loopback alias, base system install
//! and packages, driven as one linear pipeline.

mod bulkhead;
mod cli;
mod console;
mod error;
mod exec;
mod manifest;
mod rcconf;
mod registry;
mod shipyard;
mod sshd;
mod store;

use cli::{Cli, Commands};
use error::Result;
use exec::HostRunner;
use shipyard::{ProvisionRequest, Shipyard};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Console { jail, user } => {
            let status = console::enter_jail(&jail, &user)?;
            std::process::exit(status.code().unwrap_or(1));
        }

        Commands::Completion { shell } => {
            Cli::generate_completion(shell);
            Ok(())
        }

        Commands::Create {
            name,
            editor,
            php,
            web_server,
            enter,
        } => {
            if !nix::unistd::getuid().is_root() {
                eprintln!("Error: This program must be run as root");
                std::process::exit(1);
            }

            let manifest = manifest::load_or_default(&cli.config)?;
            let runner = HostRunner::new().verbose(cli.verbose);
            let yard = Shipyard::new(manifest, Box::new(runner)).verbose(cli.verbose);

            let request = ProvisionRequest {
                name: name.clone(),
                editor,
                php,
                web_server,
            };
            let provisioned = yard.provision(&request)?;

            // Restart once more so sshd comes up on the rewritten port
            yard.restart_jail(&name)?;

            println!();
            println!("Jail '{}' is ready.", name);
            println!("  Address:  {}", provisioned.ip);
            println!("  SSH port: {}", provisioned.port);
            println!("  Connect with: ssh -p {} root@<host>", provisioned.port);

            if enter {
                let status = console::enter_jail(&name, "root")?;
                std::process::exit(status.code().unwrap_or(1));
            }

            Ok(())
        }

        Commands::List { json } => {
            let manifest = manifest::load_or_default(&cli.config)?;
            let jails = registry::entries(&manifest.host.registry)?;

            if json {
                let json_data: Vec<_> = jails
                    .iter()
                    .map(|jail| {
                        serde_json::json!({
                            "name": jail.name,
                            "hostname": jail.hostname,
                            "ip": jail.ip.map(|ip| ip.to_string())
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json_data).unwrap());
            } else if jails.is_empty() {
                println!("No jails registered.");
                println!("Use 'shipwright create <name>' to provision one.");
            } else {
                println!("{:<20} {:<28} {:<16}", "JAIL", "HOSTNAME", "ADDRESS");
                println!("{}", "-".repeat(64));
                for jail in jails {
                    println!(
                        "{:<20} {:<28} {:<16}",
                        jail.name,
                        jail.hostname.as_deref().unwrap_or("-"),
                        jail.ip
                            .map(|ip| ip.to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                }
            }

            Ok(())
        }

        Commands::Check => {
            let manifest = manifest::load_or_default(&cli.config)?;
            let host = &manifest.host;
            let mut ready = true;

            match registry::entries(&host.registry) {
                Ok(jails) => {
                    println!("✓ Registry {} ({} jails)", host.registry.display(), jails.len());
                }
                Err(e) => {
                    println!("✗ Registry {}: {}", host.registry.display(), e);
                    ready = false;
                }
            }

            match bulkhead::has_anchor(&host.pf_conf) {
                Ok(true) => {
                    println!(
                        "✓ PF rules {} carry '{}'",
                        host.pf_conf.display(),
                        bulkhead::ANCHOR_RULE
                    );
                }
                Ok(false) => {
                    println!(
                        "✗ PF rules {} are missing '{}'",
                        host.pf_conf.display(),
                        bulkhead::ANCHOR_RULE
                    );
                    ready = false;
                }
                Err(e) => {
                    println!("✗ PF rules {}: {}", host.pf_conf.display(), e);
                    ready = false;
                }
            }

            match rcconf::has_directive(&host.rc_conf, &manifest.network.loopback) {
                Ok(true) => {
                    println!(
                        "✓ rc.conf {} declares ipv4_addrs_{}",
                        host.rc_conf.display(),
                        manifest.network.loopback
                    );
                }
                Ok(false) => {
                    println!(
                        "✗ rc.conf {} is missing ipv4_addrs_{}",
                        host.rc_conf.display(),
                        manifest.network.loopback
                    );
                    ready = false;
                }
                Err(e) => {
                    println!("✗ rc.conf {}: {}", host.rc_conf.display(), e);
                    ready = false;
                }
            }

            if host.jail_root.is_dir() {
                println!("✓ Jail root {}", host.jail_root.display());
            } else {
                println!("✗ Jail root {} is not a directory", host.jail_root.display());
                ready = false;
            }

            if !ready {
                std::process::exit(1);
            }

            println!("\nHost is ready.");
            Ok(())
        }
    }
}
