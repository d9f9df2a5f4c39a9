use std::sync::Arc;

use anyhow::{bail, Context};
use nfs4_client::connection::ServerAddress;
use nfs4_client::vfs::parse_dirents;
use nfs4_client::{Inode, MountOptions, Nfs4Client};

const LISTING_BUFFER: usize = 4096;

/// Lists a directory on an NFSv4 server.
///
/// Usage: nfs4_ls [-o OPTIONS] HOST:/EXPORT [PATH]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut options = String::new();
    let mut positional = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => options = args.next().context("-o needs a value")?,
            "--help" | "-h" => {
                eprintln!(
                    "Usage: nfs4_ls [-o OPTIONS] HOST:/EXPORT [PATH]\n\
                     \n\
                     Options:\n\
                       -o OPTIONS  Comma separated mount options (proto=udp,port=2049,timeo=50,...)\n\
                       -h, --help  Show this help and exit"
                );
                return Ok(());
            }
            _ if arg.starts_with('-') => bail!("unknown flag: {arg}"),
            _ => positional.push(arg),
        }
    }

    let (target, path) = match positional.as_slice() {
        [target] => (target.as_str(), ""),
        [target, path] => (target.as_str(), path.as_str()),
        _ => bail!("expected HOST:/EXPORT [PATH], run with --help for usage"),
    };
    let (host, export) = target.split_once(':').context("target must look like HOST:/EXPORT")?;

    let options = MountOptions::parse(&options)?;
    let address = ServerAddress::resolve(host, options.port, options.protocol).await?;
    let client = Nfs4Client::connect(address, options).await?;
    let fs = client.mount(export).await?;

    let mut dir = fs.root().await?;
    for name in path.split('/').filter(|name| !name.is_empty()) {
        dir = dir.lookup(name).await.with_context(|| format!("lookup {name}"))?;
    }
    list(&dir).await?;

    client.shutdown().await;
    Ok(())
}

async fn list(dir: &Arc<Inode>) -> anyhow::Result<()> {
    let mut cookie = dir.open_dir()?;
    loop {
        let mut buf = vec![0u8; LISTING_BUFFER];
        let count = dir.read_dir(&mut cookie, &mut buf, usize::MAX).await?;
        if count == 0 {
            return Ok(());
        }
        for entry in parse_dirents(&buf)? {
            match dir.file_system().get_inode(entry.ino).await {
                Ok(inode) => println!("{:>10} {:?} {}", entry.ino, inode.file_type(), entry.name),
                Err(_) => println!("{:>10} ? {}", entry.ino, entry.name),
            }
        }
    }
}
