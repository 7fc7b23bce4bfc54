use clap::{Parser, Subcommand};

/// `ClubLLM` - tabbed LLM chat with accounts and history.
#[derive(Parser, Debug)]
#[command(name = "clubllm")]
#[command(version = "0.1.0")]
#[command(about = "Tabbed LLM chat with accounts, history and an OpenRouter proxy.", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP gateway (auth, chat proxy, history, conversations)
    Serve {
        /// Bind address (defaults to gateway.host from config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (defaults to gateway.port from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat in the terminal
    Chat {
        /// Send one message, print the reply and exit
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Show the resolved configuration
    Config,
}
