//! Jail provisioning pipeline
//!
//! Walks a new jail through every provisioning stage in a fixed order,
//! tracked by a state machine. The first failing stage aborts the run
//! and leaves the host changes already applied in place; nothing is
//! rolled back.

use crate::bulkhead::{self, PortForward};
use crate::error::{Error, Result};
use crate::exec::{cancel_token, CancelToken, CommandRunner};
use crate::manifest::Manifest;
use crate::rcconf;
use crate::registry::{self, JailRecord};
use crate::sshd;
use clap::ValueEnum;
use ipnet::Ipv4Net;
use std::fmt;
use std::fs;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

// The state_machine! expansion refers to `Result` with two type
// parameters; it lives in its own module so this file's one-parameter
// `Result` alias cannot shadow the one the generated code means.
mod machine {
    use state_machines::state_machine;

    state_machine! {
        name: ProvisionMachine,
        dynamic: true,
        initial: Init,
        states: [
            Init,
            DirectoryPrepared,
            IpAllocated,
            PortAllocated,
            RegistryUpdated,
            FirewallUpdated,
            LoopbackUpdated,
            SystemInstalled,
            FirewallReloaded,
            NetworkRestarted,
            JailRestarted,
            PackagesInstalled,
            SshdPortSet,
            Complete,
            Failed
        ],
        events {
            prepare {
                transition: { from: Init, to: DirectoryPrepared }
            }
            lease {
                transition: { from: DirectoryPrepared, to: IpAllocated }
            }
            reserve {
                transition: { from: IpAllocated, to: PortAllocated }
            }
            register {
                transition: { from: PortAllocated, to: RegistryUpdated }
            }
            divert {
                transition: { from: RegistryUpdated, to: FirewallUpdated }
            }
            alias {
                transition: { from: FirewallUpdated, to: LoopbackUpdated }
            }
            install {
                transition: { from: LoopbackUpdated, to: SystemInstalled }
            }
            reload {
                transition: { from: SystemInstalled, to: FirewallReloaded }
            }
            reconnect {
                transition: { from: FirewallReloaded, to: NetworkRestarted }
            }
            launch {
                transition: { from: NetworkRestarted, to: JailRestarted }
            }
            stock {
                transition: { from: JailRestarted, to: PackagesInstalled }
            }
            rebind {
                transition: { from: PackagesInstalled, to: SshdPortSet }
            }
            complete {
                transition: { from: SshdPortSet, to: Complete }
            }
            fail {
                transition: { from: [Init, DirectoryPrepared, IpAllocated, PortAllocated, RegistryUpdated, FirewallUpdated, LoopbackUpdated, SystemInstalled, FirewallReloaded, NetworkRestarted, JailRestarted, PackagesInstalled, SshdPortSet], to: Failed }
            }
        }
    }
}

use machine::{DynamicProvisionMachine, ProvisionMachine, ProvisionMachineEvent};

/// Provisioning stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PrepareDirectory,
    AllocateIp,
    AllocatePort,
    UpdateRegistry,
    UpdateFirewall,
    UpdateLoopback,
    InstallSystem,
    ReloadFirewall,
    RestartNetwork,
    RestartJail,
    InstallPackages,
    SetSshdPort,
}

impl Stage {
    /// Machine event fired when the stage succeeds
    fn advance_event(self) -> ProvisionMachineEvent {
        match self {
            Stage::PrepareDirectory => ProvisionMachineEvent::Prepare,
            Stage::AllocateIp => ProvisionMachineEvent::Lease,
            Stage::AllocatePort => ProvisionMachineEvent::Reserve,
            Stage::UpdateRegistry => ProvisionMachineEvent::Register,
            Stage::UpdateFirewall => ProvisionMachineEvent::Divert,
            Stage::UpdateLoopback => ProvisionMachineEvent::Alias,
            Stage::InstallSystem => ProvisionMachineEvent::Install,
            Stage::ReloadFirewall => ProvisionMachineEvent::Reload,
            Stage::RestartNetwork => ProvisionMachineEvent::Reconnect,
            Stage::RestartJail => ProvisionMachineEvent::Launch,
            Stage::InstallPackages => ProvisionMachineEvent::Stock,
            Stage::SetSshdPort => ProvisionMachineEvent::Rebind,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PrepareDirectory => "prepare_directory",
            Stage::AllocateIp => "allocate_ip",
            Stage::AllocatePort => "allocate_port",
            Stage::UpdateRegistry => "update_registry",
            Stage::UpdateFirewall => "update_firewall",
            Stage::UpdateLoopback => "update_loopback",
            Stage::InstallSystem => "install_system",
            Stage::ReloadFirewall => "reload_firewall",
            Stage::RestartNetwork => "restart_network",
            Stage::RestartJail => "restart_jail",
            Stage::InstallPackages => "install_packages",
            Stage::SetSshdPort => "set_sshd_port",
        };
        write!(f, "{}", name)
    }
}

/// Editor installed into a new jail
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EditorPackage {
    Vim,
    Neovim,
    Nano,
}

impl EditorPackage {
    /// pkg name for the editor
    pub fn package_name(self) -> &'static str {
        match self {
            EditorPackage::Vim => "vim",
            EditorPackage::Neovim => "neovim",
            EditorPackage::Nano => "nano",
        }
    }
}

/// PHP release installed into a new jail
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhpPackage {
    Php80,
    Php81,
    Php82,
    Php83,
}

impl PhpPackage {
    /// pkg name for the PHP release
    pub fn package_name(self) -> &'static str {
        match self {
            PhpPackage::Php80 => "php80",
            PhpPackage::Php81 => "php81",
            PhpPackage::Php82 => "php82",
            PhpPackage::Php83 => "php83",
        }
    }
}

/// pkg name for the web server option
pub const WEB_SERVER_PACKAGE: &str = "apache24";

/// What to provision
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Jail name
    pub name: String,
    /// Editor to install, if any
    pub editor: Option<EditorPackage>,
    /// PHP release to install, if any
    pub php: Option<PhpPackage>,
    /// Install the web server package
    pub web_server: bool,
}

impl ProvisionRequest {
    /// pkg names selected by the request, in install order
    pub fn packages(&self) -> Vec<&'static str> {
        let mut packages = Vec::new();
        if let Some(editor) = self.editor {
            packages.push(editor.package_name());
        }
        if let Some(php) = self.php {
            packages.push(php.package_name());
        }
        if self.web_server {
            packages.push(WEB_SERVER_PACKAGE);
        }
        packages
    }
}

/// Network facts assigned to a provisioned jail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    /// Leased jail address
    pub ip: Ipv4Addr,
    /// Reserved external SSH port
    pub port: u16,
}

/// Drives provisioning runs against one host
pub struct Shipyard {
    manifest: Manifest,
    runner: Box<dyn CommandRunner>,
    cancel: CancelToken,
    verbose: bool,
}

impl Shipyard {
    /// Create a shipyard for the given host configuration
    pub fn new(manifest: Manifest, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            manifest,
            runner,
            cancel: cancel_token(),
            verbose: false,
        }
    }

    /// Enable verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Token other threads can set to abort between stages
    pub fn cancel_token(&self) -> CancelToken {
        Arc::clone(&self.cancel)
    }

    /// Provision a new jail end to end
    ///
    /// Stages run strictly in order and the first failure aborts the
    /// run. File edits already applied stay on disk so the operator can
    /// inspect and clean up; the error names the failed stage.
    pub fn provision(&self, request: &ProvisionRequest) -> Result<Provisioned> {
        let host = &self.manifest.host;
        let network = &self.manifest.network;

        if registry::contains(&host.registry, &request.name)? {
            return Err(Error::NameAlreadyExists(request.name.clone()));
        }

        let mut machine = ProvisionMachine::new(()).into_dynamic();
        let jail_dir = host.jail_root.join(&request.name);

        self.run_stage(&mut machine, Stage::PrepareDirectory, || {
            fs::create_dir_all(&jail_dir).map_err(Error::Io)
        })?;

        let ip = self.run_stage(&mut machine, Stage::AllocateIp, || {
            registry::allocate_ip(&host.registry)
        })?;
        println!("Leased address {}", ip);

        let port = self.run_stage(&mut machine, Stage::AllocatePort, || {
            bulkhead::allocate_port(&host.pf_conf, network.base_port)
        })?;
        println!("Reserved port {}", port);

        self.run_stage(&mut machine, Stage::UpdateRegistry, || {
            let record = JailRecord {
                name: request.name.clone(),
                hostname: format!("{}.{}", request.name, network.domain),
                ip,
                path: jail_dir.clone(),
                interface: network.interface.clone(),
            };
            registry::register_jail(&host.registry, &record)
        })?;

        self.run_stage(&mut machine, Stage::UpdateFirewall, || {
            let forward = PortForward::new(port, ip, port, &request.name);
            bulkhead::insert_forward_rule(&host.pf_conf, &forward)
        })?;

        self.run_stage(&mut machine, Stage::UpdateLoopback, || {
            let alias = Ipv4Net::new_assert(ip, registry::JAIL_SUBNET.prefix_len());
            rcconf::add_loopback_alias(&host.rc_conf, &network.loopback, alias)
        })?;

        let dir = jail_dir.display().to_string();
        let pf = host.pf_conf.display().to_string();
        let install_timeout = Duration::from_secs(self.manifest.timeouts.install);
        let service_timeout = Duration::from_secs(self.manifest.timeouts.service);
        let package_timeout = Duration::from_secs(self.manifest.timeouts.package);

        self.run_stage(&mut machine, Stage::InstallSystem, || {
            self.runner
                .run("bsdinstall", &["jail", &dir], install_timeout, &self.cancel)
        })?;

        self.run_stage(&mut machine, Stage::ReloadFirewall, || {
            self.runner
                .run("pfctl", &["-F", "all", "-f", &pf], service_timeout, &self.cancel)
        })?;

        self.run_stage(&mut machine, Stage::RestartNetwork, || {
            self.runner
                .run("service", &["netif", "restart"], service_timeout, &self.cancel)
        })?;

        self.run_stage(&mut machine, Stage::RestartJail, || {
            self.runner.run(
                "service",
                &["jail", "restart", &request.name],
                service_timeout,
                &self.cancel,
            )
        })?;

        self.run_stage(&mut machine, Stage::InstallPackages, || {
            for package in request.packages() {
                self.runner.run(
                    "pkg",
                    &["-j", &request.name, "install", package],
                    package_timeout,
                    &self.cancel,
                )?;
            }
            Ok(())
        })?;

        self.run_stage(&mut machine, Stage::SetSshdPort, || {
            sshd::set_jail_ssh_port(&jail_dir.join("etc/ssh/sshd_config"), port)
        })?;

        machine.handle(ProvisionMachineEvent::Complete).ok();

        Ok(Provisioned { ip, port })
    }

    /// Restart a jail so it picks up new configuration
    pub fn restart_jail(&self, name: &str) -> Result<()> {
        self.runner.run(
            "service",
            &["jail", "restart", name],
            Duration::from_secs(self.manifest.timeouts.service),
            &self.cancel,
        )
    }

    /// Run one stage and advance or fail the machine accordingly
    fn run_stage<T>(
        &self,
        machine: &mut DynamicProvisionMachine<()>,
        stage: Stage,
        op: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        if self.cancel.load(Ordering::SeqCst) {
            machine.handle(ProvisionMachineEvent::Fail).ok();
            return Err(Error::StageFailed {
                stage: stage.to_string(),
                source: Box::new(Error::Cancelled),
            });
        }

        if self.verbose {
            println!("==> {}", stage);
        }

        match op() {
            Ok(value) => {
                machine.handle(stage.advance_event()).ok();
                Ok(value)
            }
            Err(e) => {
                machine.handle(ProvisionMachineEvent::Fail).ok();
                Err(Error::StageFailed {
                    stage: stage.to_string(),
                    source: Box::new(e),
                })
            }
        }
    }
}
