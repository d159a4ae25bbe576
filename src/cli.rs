use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Network lab automation: Cisco config reports, OpenStack inventory, SD-WAN bootstrap
#[derive(Parser, Debug)]
#[command(name = "netlab", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory for generated files (overrides NETLAB_OUTPUT_DIR)
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// Directory with template overrides (overrides NETLAB_TEMPLATES_DIR)
    #[arg(long, global = true)]
    pub templates_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Extract interfaces, VLANs and CDP neighbours from Cisco IOS configs
    Cisco(CiscoArgs),
    /// Query an OpenStack cloud and build Ansible inventories
    Openstack(OpenstackArgs),
    /// Show the libvirt view of an instance
    Kvm(KvmArgs),
    /// Generate and run the roles playbook for lab hosts
    Ansible(AnsibleArgs),
    /// Bootstrap a Viptela SD-WAN fabric
    Sdwan(SdwanArgs),
    /// Turn a YAML lab description into a Heat stack and a network map
    Lab(LabArgs),
}

#[derive(Args, Debug)]
pub struct CiscoArgs {
    /// Glob of configuration files, e.g. "configs/*.txt"
    #[arg(short, long)]
    pub config: String,

    /// Glob of `show cdp neighbors detail` captures
    #[arg(long)]
    pub cdp: Option<String>,

    /// Extract L3 interfaces
    #[arg(long)]
    pub l3: bool,

    /// Extract L2 interfaces
    #[arg(long)]
    pub l2: bool,

    /// Extract VLANs
    #[arg(long)]
    pub vlans: bool,

    /// Print the extracted data as JSON instead of writing CSV reports
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct OpenstackArgs {
    /// Cloud name in clouds.yaml (overrides OS_CLOUD)
    #[arg(long)]
    pub cloud: Option<String>,

    #[command(subcommand)]
    pub action: OpenstackCommand,
}

/// Servers of one stack
#[derive(Args, Debug)]
pub struct StackSelect {
    /// Stack name; servers are named `<stack>_<device>`
    pub stack: String,

    /// Match `<stack>*` instead of `<stack>_*`
    #[arg(long)]
    pub no_underline: bool,
}

#[derive(Subcommand, Debug)]
pub enum OpenstackCommand {
    /// List flavors
    Flavors,
    /// List images with their metadata
    Images,
    /// List networks
    Networks,
    /// List the active servers of a stack
    Servers {
        #[command(flatten)]
        select: StackSelect,
        /// Also read each domain from its hypervisor
        #[arg(long)]
        kvm: bool,
    },
    /// Write a static Ansible hosts file
    Hosts {
        #[command(flatten)]
        select: StackSelect,
        /// Management network
        #[arg(long, default_value = "wan0")]
        net: String,
        /// Output file (defaults to <output_dir>/hosts)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print an Ansible dynamic inventory
    Inventory {
        #[command(flatten)]
        select: StackSelect,
        #[arg(long, default_value = "wan0")]
        net: String,
    },
    /// Print the lab hosts file for the roles playbook
    Labs {
        #[command(flatten)]
        select: StackSelect,
        #[arg(long, default_value = "wan0")]
        net: String,
    },
    /// Wait until every server of a stack accepts connections
    Wait {
        #[command(flatten)]
        select: StackSelect,
        /// TCP port, 22 when omitted
        #[arg(long)]
        port: Option<u16>,
        /// Seconds, 600 when omitted
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Create a Heat stack from a template and wait for it
    Stack {
        name: String,
        template: PathBuf,
        /// Seconds
        #[arg(long, default_value_t = 3600)]
        timeout: u64,
        /// Let Heat roll back on failure
        #[arg(long)]
        rollback: bool,
    },
}

#[derive(Args, Debug)]
pub struct KvmArgs {
    /// Hypervisor URI, e.g. qemu+ssh://root@osc1/system
    #[arg(long, requires = "name")]
    pub uri: Option<String>,

    /// Domain name, e.g. instance-0000001a
    #[arg(long)]
    pub name: Option<String>,

    /// Parse a saved domain XML instead of asking the hypervisor
    #[arg(long, conflicts_with = "uri")]
    pub xml: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct AnsibleArgs {
    /// Lab hosts file
    pub hosts: PathBuf,

    /// Only write the inventory and playbook
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct SdwanArgs {
    /// SD-WAN description
    #[arg(short, long)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub action: SdwanCommand,
}

#[derive(Subcommand, Debug)]
pub enum SdwanCommand {
    /// Print the parsed fabric
    Show,
    /// Configure vManage, vSmart and vBond
    Controllers,
    /// Configure and activate vEdges and cEdges
    Edges,
    /// Import feature templates into vManage
    Templates,
    /// Upload the serial file to vManage
    Serial,
    /// Push certificates to controllers
    PushCerts,
    /// Controllers, serial file, edges and certificate push in one run
    Bootstrap,
}

#[derive(Args, Debug)]
pub struct LabArgs {
    /// Lab description
    pub file: PathBuf,

    /// Management network every device gets a port on
    #[arg(long, default_value = "wan0")]
    pub net_mgmt: String,

    /// Availability zone for devices without os_host
    #[arg(long, default_value = "nova:osc")]
    pub avail_zone: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_openstack_hosts() {
        let cli = Cli::parse_from(["netlab", "-v", "openstack", "--cloud", "lab", "hosts", "lab1", "--net", "mgmt"]);
        assert_eq!(cli.verbose, 1);
        let Command::Openstack(args) = cli.command else { panic!("expected openstack") };
        assert_eq!(args.cloud.as_deref(), Some("lab"));
        match args.action {
            OpenstackCommand::Hosts { select, net, output } => {
                assert_eq!(select.stack, "lab1");
                assert!(!select.no_underline);
                assert_eq!(net, "mgmt");
                assert!(output.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_kvm_xml_conflicts_with_uri() {
        assert!(Cli::try_parse_from(["netlab", "kvm", "--uri", "qemu:///system", "--name", "i1", "--xml", "d.xml"]).is_err());
        assert!(Cli::try_parse_from(["netlab", "kvm", "--xml", "d.xml"]).is_ok());
    }
}
