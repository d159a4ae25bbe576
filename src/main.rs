mod ansible;
mod ciscocfg;
mod cli;
mod config;
mod kvm;
mod lab;
mod openstack;
mod sdwan;
mod templates;
mod utils;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ansible::RolesPlaybook;
use ciscocfg::reports::ReportWriter;
use ciscocfg::{DeviceCollection, ExtractFlags};
use cli::{Cli, Command, OpenstackArgs, OpenstackCommand, SdwanArgs, SdwanCommand, StackSelect};
use config::Config;
use kvm::KvmInstanceInfo;
use lab::{DevicesInfo, YamlToHeat};
use openstack::{Flavors, Images, Networks, OpenStackClient, Servers, Stack};
use sdwan::Viptela;
use templates::TemplateEngine;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // stdout carries inventories and tables
    let default_filter = match cli.verbose {
        0 => "netlab=info",
        1 => "netlab=debug",
        _ => "netlab=trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let code = run(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let mut cfg = Config::load();
    if let Some(dir) = cli.output_dir {
        cfg.output_dir = dir;
    }
    if let Some(dir) = cli.templates_dir {
        cfg.templates_dir = dir;
    }
    let engine = TemplateEngine::new(Some(&cfg.templates_dir))?;

    match cli.command {
        Command::Cisco(args) => {
            let mut flags = ExtractFlags {
                l3_int: args.l3,
                l2_int: args.l2,
                vlans: args.vlans,
            };
            if !(flags.l3_int || flags.l2_int || flags.vlans) {
                flags = ExtractFlags { l3_int: true, l2_int: true, vlans: true };
            }
            let collection = DeviceCollection::load(&args.config, args.cdp.as_deref(), flags)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&collection)?);
            } else {
                ReportWriter::new(&cfg.output_dir)?.write_all(&collection)?;
                tracing::info!("Reports written to {}", cfg.output_dir.display());
            }
        }
        Command::Openstack(args) => return run_openstack(args, cfg, &engine).await,
        Command::Kvm(args) => {
            let info = match (args.xml, args.uri, args.name) {
                (Some(path), _, _) => {
                    let xml = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    KvmInstanceInfo::from_xml(&xml, "")?
                }
                (None, Some(uri), Some(name)) => KvmInstanceInfo::fetch(&uri, &name, &cfg.virsh).await?,
                _ => return Err(anyhow!("Either --xml or --uri with --name is required")),
            };
            println!("{}", info);
        }
        Command::Ansible(args) => {
            let playbook = RolesPlaybook::from_file(&args.hosts)?;
            if args.dry_run {
                playbook.write(&engine, &cfg.output_dir)?;
            } else {
                return playbook.run(&cfg, &engine).await;
            }
        }
        Command::Sdwan(args) => run_sdwan(args, &cfg, engine).await?,
        Command::Lab(args) => {
            let info = DevicesInfo::load(&args.file)?;
            let mut heat = YamlToHeat::new(info, &cfg.output_dir);
            heat.net_mgmt = args.net_mgmt;
            heat.avail_zone = args.avail_zone;
            let (stack, map) = heat.generate(&engine, &cfg.neato).await?;
            println!("{}\n{}", stack.display(), map.display());
        }
    }
    Ok(0)
}

async fn load_servers(cloud: &OpenStackClient, select: &StackSelect, with_kvm: bool, cfg: &Config) -> Result<Servers> {
    Servers::load(cloud, &select.stack, !select.no_underline, with_kvm, &cfg.virsh).await
}

async fn run_openstack(args: OpenstackArgs, mut cfg: Config, engine: &TemplateEngine) -> Result<i32> {
    if let Some(cloud) = args.cloud {
        cfg.os_cloud = cloud;
    }
    let cloud = openstack::connect(&cfg).await?;

    match args.action {
        OpenstackCommand::Flavors => print!("{}", Flavors::load(&cloud).await?),
        OpenstackCommand::Images => print!("{}", Images::load(&cloud).await?),
        OpenstackCommand::Networks => print!("{}", Networks::load(&cloud).await?),
        OpenstackCommand::Servers { select, kvm: with_kvm } => {
            let servers = load_servers(&cloud, &select, with_kvm, &cfg).await?;
            print!("{}", servers);
            for info in servers.servers.iter().filter_map(|s| s.kvminfo.as_ref()) {
                println!("{}", info);
            }
        }
        OpenstackCommand::Hosts { select, net, output } => {
            let servers = load_servers(&cloud, &select, false, &cfg).await?;
            let path = output.unwrap_or_else(|| cfg.output_dir.join("hosts"));
            servers.create_ansible_hosts(engine, &net, &path)?;
        }
        OpenstackCommand::Inventory { select, net } => {
            let servers = load_servers(&cloud, &select, false, &cfg).await?;
            println!("{}", serde_json::to_string_pretty(&servers.create_dynamic_inventory(&net)?)?);
        }
        OpenstackCommand::Labs { select, net } => {
            let servers = load_servers(&cloud, &select, false, &cfg).await?;
            print!("{}", serde_yaml::to_string(&servers.get_srv_labs(&net))?);
        }
        OpenstackCommand::Wait { select, port, timeout } => {
            let servers = load_servers(&cloud, &select, false, &cfg).await?;
            match (port, timeout) {
                (None, None) => servers.check_hosts_online().await?,
                _ => {
                    let timeout = Duration::from_secs(timeout.unwrap_or(600));
                    servers.wait_online(port.unwrap_or(22), timeout).await?
                }
            }
        }
        OpenstackCommand::Stack { name, template, timeout, rollback } => {
            let mut stack = Stack::new(&cloud, &name, template);
            stack.timeout = timeout;
            stack.rollback = rollback;
            let status = stack.create().await?;
            println!("{}", status);
            if !status.ends_with("_COMPLETE") {
                return Ok(1);
            }
        }
    }
    Ok(0)
}

async fn run_sdwan(args: SdwanArgs, cfg: &Config, engine: TemplateEngine) -> Result<()> {
    let mut viptela = Viptela::load(&args.config, cfg, engine).await?;
    if matches!(args.action, SdwanCommand::Show) {
        print!("{}", viptela);
        return Ok(());
    }

    viptela.connect().await?;
    match args.action {
        SdwanCommand::Show => {}
        SdwanCommand::Controllers => viptela.initialize_controllers().await?,
        SdwanCommand::Edges => viptela.initialize_vedges().await?,
        SdwanCommand::Templates => {
            let imported = viptela.import_templates().await?;
            tracing::info!("Imported {} of {} templates", imported, viptela.templates.len());
        }
        SdwanCommand::Serial => viptela.load_serial_file().await?,
        SdwanCommand::PushCerts => viptela.push_cert_to_controllers().await?,
        SdwanCommand::Bootstrap => {
            viptela.initialize_controllers().await?;
            viptela.load_serial_file().await?;
            viptela.initialize_vedges().await?;
            viptela.push_cert_to_controllers().await?;
        }
    }
    Ok(())
}
