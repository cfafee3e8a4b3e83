//! rets - Command-line client for RETS servers
//!
//! Every command logs in, runs one transaction, prints the result and logs
//! out again.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use rets_client::{ClientError, Session};
use rets_protocol::LoginResponse;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rets")]
#[command(about = "Command-line client for RETS (Real Estate Transaction Standard) servers")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(long, env = "RETS_CONFIG")]
    config: Option<PathBuf>,

    /// Login URL
    #[arg(long)]
    login_url: Option<String>,

    /// Username
    #[arg(short, long)]
    username: Option<String>,

    /// Password
    #[arg(short, long)]
    password: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and show the session details
    Login,

    /// Run a search and print the records
    Search {
        /// Search type (resource), e.g. Property
        #[arg(short = 't', long = "type")]
        search_type: String,

        /// Class, e.g. RES
        #[arg(short, long)]
        class: String,

        /// DMQL2 query, e.g. (ListPrice=300000+)
        query: String,

        /// Fields to return
        #[arg(short, long, value_delimiter = ',')]
        select: Vec<String>,

        /// Maximum records to return
        #[arg(short, long)]
        limit: Option<u32>,

        /// Offset of the first record (1-based)
        #[arg(long)]
        offset: Option<u32>,

        /// Query and return standard names
        #[arg(long)]
        standard_names: bool,
    },

    /// Count the records matching a query
    Count {
        /// Search type (resource), e.g. Property
        #[arg(short = 't', long = "type")]
        search_type: String,

        /// Class, e.g. RES
        #[arg(short, long)]
        class: String,

        /// DMQL2 query
        query: String,
    },

    /// Fetch a metadata document
    Metadata {
        /// Metadata type without the METADATA- prefix
        #[arg(short = 't', long = "type", default_value = "SYSTEM")]
        metadata_type: String,

        /// Metadata id
        #[arg(long, default_value = "*")]
        id: String,

        /// Request COMPACT instead of STANDARD-XML
        #[arg(long)]
        compact: bool,

        /// Write the document to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download media objects
    GetObject {
        /// Resource, e.g. Property
        #[arg(short, long)]
        resource: String,

        /// Object type, e.g. Photo
        #[arg(short = 't', long = "type", default_value = "Photo")]
        object_type: String,

        /// Object ids: ENTITY for every object, or ENTITY:1:2
        #[arg(required = true)]
        ids: Vec<String>,

        /// Ask for object URLs instead of object data
        #[arg(long)]
        location: bool,

        /// Directory to write objects into
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    if let Some(url) = cli.login_url {
        config.server.login_url = url;
    }
    if let Some(username) = cli.username {
        config.credentials.username = username;
    }
    if let Some(password) = cli.password {
        config.credentials.password = password;
    }

    let client_config = match config.client_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    let mut session = Session::new(client_config)?;

    let login = match login(&mut session, &config) {
        Ok(login) => login,
        Err(ClientError::BrokerCodeRequired { codes }) => {
            let codes: Vec<String> = codes.iter().map(ToString::to_string).collect();
            eprintln!(
                "{}: the server requires a broker code, one of: {}",
                "Login failed".red(),
                codes.join(" ")
            );
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{}: {}", "Login failed".red(), e);
            std::process::exit(1);
        }
    };

    let result = commands::execute(&mut session, &login, cli.command, cli.json);

    if let Err(e) = session.logout() {
        tracing::warn!("Logout failed: {}", e);
    }

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}

fn login(session: &mut Session, config: &Config) -> Result<LoginResponse, ClientError> {
    let credentials = &config.credentials;
    match credentials.broker_code.as_deref().filter(|c| !c.is_empty()) {
        Some(code) => session.login_with_broker(
            &credentials.username,
            &credentials.password,
            code,
            credentials.broker_branch.as_deref(),
        ),
        None => session.login(&credentials.username, &credentials.password),
    }
}
