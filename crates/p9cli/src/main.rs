use {
    clap::{Parser, Subcommand},
    p9fs::{
        config::{parse_ipv4, parse_ipv4_addr},
        utils::parse_dial,
        *,
    },
    std::{net::SocketAddr, time::Duration},
    tokio::io::{AsyncWriteExt, stdout},
};

mod utils;
use crate::utils::*;

/// Read buffer for `cat`; each fill is split into msize-sized reads
const CAT_BUFFER: usize = 64 * 1024;

#[derive(Debug, Parser)]
#[command(version, about = "Read-only 9P2000.L client")]
struct Cli {
    /// Server address: tcp!host!port or host[:port]
    #[arg(long, short, env = "P9_REMOTE_ADDR")]
    remote: String,

    /// Local address[:port] to connect from
    #[arg(long, env = "P9_STATION_ADDR")]
    station: Option<String>,

    /// Subnet mask of the station address
    #[arg(long, env = "P9_SUBNET_MASK")]
    subnet_mask: Option<String>,

    /// User name to attach as
    #[arg(long, short, env = "P9_UNAME", default_value = config::DEFAULT_UNAME)]
    uname: String,

    /// Export to attach to
    #[arg(long, short, env = "P9_ANAME", default_value = "")]
    aname: String,

    /// Maximum message size to propose
    #[arg(long, env = "P9_MSIZE", default_value_t = DEFAULT_MSIZE)]
    msize: u32,

    /// Give up on a transaction after this many milliseconds
    #[arg(long, env = "P9_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Show size, kind and modification time
        #[arg(long, short)]
        long: bool,
    },
    /// Copy a file to stdout
    Cat { path: String },
    /// Show attributes of a file
    Stat { path: String },
    /// Show volume usage
    Statfs,
    /// Print the target of a symbolic link
    Readlink { path: String },
}

impl Cli {
    fn config(&self) -> p9fs::Result<Config> {
        let mut config = Config::new(parse_dial(&self.remote, V9FS_PORT)?);
        if let Some(ref station) = self.station {
            config.station = Some(SocketAddr::V4(parse_ipv4_addr(station, 0)?));
        }
        if let Some(ref mask) = self.subnet_mask {
            config.subnet_mask = Some(parse_ipv4(mask)?);
        }
        config.uname = self.uname.clone();
        config.aname = self.aname.clone();
        config.msize = self.msize;
        config.timeout = self.timeout_ms.map(Duration::from_millis);
        config.validate()?;
        Ok(config)
    }
}

async fn run(volume: &Volume, command: Command) -> p9fs::Result<()> {
    let mut out = stdout();
    match command {
        Command::Ls { path, long } => {
            let mut dir = volume.open(&path).await?;
            let mut entries = Vec::new();
            while let Some(entry) = dir.read_entry().await? {
                entries.push(entry);
            }
            dir.close().await?;

            entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
            for entry in &entries {
                out.write_all(format_entry(entry, long).as_bytes()).await?;
            }
        }
        Command::Cat { path } => {
            let mut file = volume.open(&path).await?;
            let mut buf = vec![0; CAT_BUFFER];
            loop {
                let n = file.read_data(&mut buf).await?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n]).await?;
            }
            file.close().await?;
        }
        Command::Stat { path } => {
            let mut file = volume.open(&path).await?;
            let info = file.get_info().await?;
            let qid = file.qid();
            file.close().await?;
            out.write_all(format_stat(&info, &qid).as_bytes()).await?;
        }
        Command::Statfs => {
            let info = volume.fs_info().await?;
            out.write_all(format_fs_info(&info).as_bytes()).await?;
        }
        Command::Readlink { path } => {
            let mut link = volume.open(&path).await?;
            let target = link.link_target().await?.to_owned();
            link.close().await?;
            out.write_all(format!("{}\n", target).as_bytes()).await?;
        }
    }
    out.flush().await?;
    Ok(())
}

async fn p9cli_main(cli: Cli) -> p9fs::Result<i32> {
    let config = cli.config()?;
    let volume = Volume::mount(config).await?;

    let result = run(&volume, cli.command).await;
    let unmounted = volume.unmount().await;
    result.and(unmounted).and(Ok(0))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = p9cli_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        e.errno() as i32
    });

    std::process::exit(exit_code);
}
