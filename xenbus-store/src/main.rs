use anyhow::Result;
use clap::{Parser, Subcommand};
use xenbus_store::{Store, XenStore};

/// Default store socket path.
const DEFAULT_SOCKET: &str = "/run/xenstored/socket";

#[derive(Parser)]
#[command(name = "xs")]
#[command(about = "Inspect and modify a running xenstore", long_about = None)]
struct Cli {
    /// Store socket path
    #[arg(short, long, default_value = DEFAULT_SOCKET)]
    socket: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the value of a node
    Read { path: String },

    /// Write a value to a node
    Write { path: String, value: String },

    /// List the children of a node
    Ls { path: String },

    /// Remove a node and its subtree
    Rm { path: String },

    /// Watch a subtree and print change events until interrupted
    Watch {
        path: String,

        /// Watch token to register with
        #[arg(long, default_value = "xs-cli")]
        token: String,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let store = XenStore::connect(&cli.socket).await?;

    match cli.command {
        Commands::Read { path } => {
            let value = store.read(&path).await?;
            println!("{}", String::from_utf8_lossy(&value));
        }
        Commands::Write { path, value } => {
            store.write(&path, value.as_bytes()).await?;
        }
        Commands::Ls { path } => {
            for child in store.directory(&path).await? {
                println!("{child}");
            }
        }
        Commands::Rm { path } => {
            store.rm(&path).await?;
        }
        Commands::Watch { path, token } => {
            store.watch(&path, &token).await?;
            loop {
                let event = store.next_event().await?;
                println!("{}\t{}", event.path, event.token);
            }
        }
    }

    Ok(())
}
