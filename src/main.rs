mod argv;
mod buffers;
mod error;
mod logger;
mod peer;
mod transport;
mod ui;

use anyhow::Result;

fn main() -> Result<()> {
    let argv = argv::Argv::parse()?;
    logger::init()?;

    let stream = transport::Stream::bind(argv.address)?;
    let commands = buffers::CommandBuffer::default();

    let _ui = ui::spawn(argv.address, argv.is_root, commands.clone());

    let mut peer = if argv.is_root {
        log::info!("starting root peer at {}", argv.address);
        peer::Peer::new_root(argv.address, stream, commands)
    } else {
        let root_address = argv
            .root_address
            .expect("Argv::parse guarantees a root address for a client peer");
        log::info!("starting client peer at {} (root {root_address})", argv.address);
        peer::Peer::new_client(argv.address, root_address, stream, commands)
    };

    peer.run();

    Ok(())
}
