use std::net::{IpAddr, SocketAddr};

use anyhow::{anyhow, Result};
use clap::Parser;
use codec::Address;

#[derive(Parser, Debug)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS")
)]
struct Cli {
    /// This peer's own IPv4 address.
    ip: IpAddr,
    /// This peer's own TCP port.
    port: u16,

    /// Run as the tree root instead of an ordinary client.
    #[arg(long)]
    root: bool,

    /// The root's IPv4 address. Required unless `--root` is set.
    #[arg(long = "root-ip")]
    root_ip: Option<IpAddr>,

    /// The root's TCP port. Required unless `--root` is set.
    #[arg(long = "root-port")]
    root_port: Option<u16>,
}

/// Validated launch parameters: the peer's own address, whether it runs as
/// root, and the root address a client peer registers against.
pub struct Argv {
    pub address: Address,
    pub is_root: bool,
    pub root_address: Option<Address>,
}

impl Argv {
    pub fn parse() -> Result<Self> {
        let cli = Cli::parse();

        let address = to_address(cli.ip, cli.port)?;

        let root_address = if cli.root {
            if cli.root_ip.is_some() || cli.root_port.is_some() {
                return Err(anyhow!("--root-ip/--root-port are not accepted with --root"));
            }
            None
        } else {
            let ip = cli
                .root_ip
                .ok_or_else(|| anyhow!("--root-ip is required for a client peer"))?;
            let port = cli
                .root_port
                .ok_or_else(|| anyhow!("--root-port is required for a client peer"))?;
            Some(to_address(ip, port)?)
        };

        Ok(Self {
            address,
            is_root: cli.root,
            root_address,
        })
    }
}

fn to_address(ip: IpAddr, port: u16) -> Result<Address> {
    Address::from_socket_addr(SocketAddr::new(ip, port))
        .ok_or_else(|| anyhow!("only IPv4 addresses are supported"))
}
