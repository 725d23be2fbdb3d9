use clap::{Parser, Subcommand};
use log::{info, warn};
use mini_rendezvous::core::config::DEFAULT_DIRECTORY_PORT;
use mini_rendezvous::utils::setup_logging;
use mini_rendezvous::{
    Directory, DirectoryClient, DirectoryConfig, PeerConfig, PeerNode, Response, Result,
    TransportConfig,
};
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser)]
#[command(name = "mini-rendezvous")]
#[command(about = "Share resources between peers through a rendezvous directory")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the directory service
    Directory {
        /// Interface to listen on
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,
        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_DIRECTORY_PORT)]
        port: u16,
        /// Concurrent sessions served before accepting pauses
        #[arg(long, default_value_t = 64)]
        max_connections: usize,
    },
    /// Start a peer node with an interactive menu
    Peer {
        /// Peer id; prompted for when omitted
        #[arg(short, long)]
        id: Option<String>,
        /// Directory service host
        #[arg(long, env = "DIRECTORY_HOST", default_value = "127.0.0.1")]
        directory_host: String,
        /// Directory service port
        #[arg(long, env = "DIRECTORY_PORT", default_value_t = DEFAULT_DIRECTORY_PORT)]
        directory_port: u16,
        /// Address to serve resources on (defaults to the outbound interface)
        #[arg(long)]
        listen_host: Option<IpAddr>,
        /// Port to serve resources on (0 picks a free one)
        #[arg(long, default_value_t = 0)]
        listen_port: u16,
        /// Where downloaded resources are written
        #[arg(short, long, default_value = "downloaded_files")]
        download_dir: PathBuf,
    },
}

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Directory {
            host,
            port,
            max_connections,
        } => {
            let config = DirectoryConfig {
                listen_addr: SocketAddr::new(host, port),
                transport: TransportConfig {
                    max_connections,
                    ..TransportConfig::default()
                },
            };
            run_directory(config).await
        }
        Commands::Peer {
            id,
            directory_host,
            directory_port,
            listen_host,
            listen_port,
            download_dir,
        } => {
            let mut input = BufReader::new(tokio::io::stdin()).lines();
            let directory_addr = format!("{}:{}", directory_host, directory_port);

            let Some(peer_id) = choose_peer_id(&mut input, id, &directory_addr).await? else {
                return Ok(());
            };

            let config = PeerConfig {
                peer_id,
                directory_addr,
                listen_host,
                listen_port,
                download_dir,
                transport: TransportConfig::default(),
            };
            run_peer(config, &mut input).await
        }
    }
}

async fn run_directory(config: DirectoryConfig) -> Result<()> {
    let directory = Directory::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("Ctrl+C received, shutting down");

    directory.shutdown().await;
    Ok(())
}

/// Asks until the directory confirms the id is free. An id given on the
/// command line is only checked, never rejected.
async fn choose_peer_id(
    input: &mut Input,
    id: Option<String>,
    directory_addr: &str,
) -> Result<Option<String>> {
    let probe = DirectoryClient::new(directory_addr, TransportConfig::default());

    if let Some(id) = id {
        if !probe.check_peer_id_unique(&id).await {
            warn!("Continuing with peer id {} although it may be in use", id);
        }
        return Ok(Some(id));
    }

    loop {
        let Some(line) = prompt(input, "Enter peer ID: ").await? else {
            return Ok(None);
        };
        let id = line.trim();
        if id.is_empty() {
            continue;
        }
        if probe.check_peer_id_unique(id).await {
            return Ok(Some(id.to_string()));
        }
        println!("Peer ID is taken or the directory is unreachable. Please enter another.");
    }
}

async fn run_peer(config: PeerConfig, input: &mut Input) -> Result<()> {
    let node = PeerNode::new(config).await?;
    report("join network", &node.join().await);

    loop {
        println!("\n--------------------------------------");
        println!("Options:");
        println!("1. Join network");
        println!("2. Upload resource index");
        println!("3. Retrieve resource index");
        println!("4. Retrieve peers");
        println!("5. Request resource from peer");
        println!("6. Add resource to peer");
        println!("7. Leave network");
        println!("8. Exit");

        let Some(choice) = prompt(input, "Enter your choice: ").await? else {
            break;
        };

        match choice.trim() {
            "1" => report("join network", &node.join().await),
            "2" => report("upload index", &node.upload_index().await),
            "3" => report("retrieve index", &node.retrieve_index().await),
            "4" => report("retrieve peers", &node.retrieve_peers().await),
            "5" => {
                let Some(name) =
                    prompt(input, "Enter the name of the resource to request: ").await?
                else {
                    break;
                };
                println!("{}", node.request_resource_from_peer(name.trim()).await);
            }
            "6" => {
                let Some(path) = prompt(input, "Enter the path of the file to add: ").await?
                else {
                    break;
                };
                match node.add_resource(Path::new(path.trim())).await {
                    Ok(response) => report("upload index", &response),
                    Err(e) => println!("Failed to add resource: {}", e),
                }
            }
            "7" => report("leave network", &node.leave().await),
            "8" => break,
            _ => println!("Invalid choice. Please try again."),
        }
    }

    node.shutdown().await;
    Ok(())
}

async fn prompt(input: &mut Input, text: &str) -> Result<Option<String>> {
    print!("{}", text);
    std::io::stdout().flush()?;
    Ok(input.next_line().await?)
}

fn report(action: &str, response: &Response) {
    if response.is_success() {
        println!("{}: {}", action, response);
    } else {
        println!("Failed to {}: {}", action, response.error_message());
    }
}
