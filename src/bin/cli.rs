//! zlimdb CLI Client
//!
//! Runs one command against a store and prints the results.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use zlimdb_client::{
    Client, ClientConfig, ClientError, EntityView, EventHandler, TableView, DEFAULT_ADDRESS,
};

/// zlimdb CLI
#[derive(Parser, Debug)]
#[command(name = "zlimdb-cli")]
#[command(about = "Command-line client for the zlimdb table store")]
#[command(version)]
struct Args {
    /// User name
    #[arg(short, long, default_value = "root")]
    user: String,

    /// Password
    #[arg(short, long, default_value = "root")]
    password: String,

    /// Store address (host[:port])
    #[arg(default_value = DEFAULT_ADDRESS)]
    address: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all tables
    List,

    /// Create a table
    Create {
        /// Table name
        name: String,
    },

    /// Print the records of a table
    Query {
        /// Table id
        table: u32,

        /// Only records with an id greater than this
        #[arg(long)]
        since: Option<u64>,
    },

    /// Add a record to a table
    Add {
        /// Table id
        table: u32,

        /// Record value
        value: String,
    },

    /// Print a table, then records as they are written
    Subscribe {
        /// Table id
        table: u32,

        /// Stop after this many seconds
        #[arg(long, default_value = "10")]
        seconds: u64,
    },
}

/// Prints every result to stdout, failures to stderr
#[derive(Default)]
struct Printer {
    failed: AtomicBool,
}

impl EventHandler for Printer {
    fn on_table(&self, table: &TableView<'_>) {
        println!("{:>6}: {}", table.id(), table.name());
    }

    fn on_entity(&self, _table_id: u32, entity: &EntityView<'_>) {
        println!(
            "id={}, time={}, size={}, data={}",
            entity.id(),
            entity.time(),
            entity.size(),
            String::from_utf8_lossy(entity.data())
        );
    }

    fn on_table_created(&self, table_id: u64, name: &str) {
        println!("created table {} ({})", table_id, name);
    }

    fn on_table_selected(&self, _table_id: u32) {}

    fn on_record_added(&self, _table_id: u32, record_id: u64) {
        println!("added record {}", record_id);
    }

    fn on_subscribed(&self, table_id: u32) {
        println!("-- subscribed to table {}", table_id);
    }

    fn on_error(&self, action: &str, error: &ClientError) {
        eprintln!("error: {}: {}", action, error);
        self.failed.store(true, Ordering::Release);
    }
}

fn run(client: &mut Client, args: &Args) -> zlimdb_client::Result<()> {
    client.connect(&args.user, &args.password, &args.address)?;

    match &args.command {
        Commands::List => client.list_tables()?,
        Commands::Create { name } => client.create_table(name)?,
        Commands::Query { table, since } => {
            client.select_table(*table)?;
            match since {
                Some(id) => client.query_since(*id)?,
                None => client.query()?,
            }
        }
        Commands::Add { table, value } => {
            client.select_table(*table)?;
            client.add(value.as_bytes())?;
        }
        Commands::Subscribe { table, seconds } => {
            client.select_table(*table)?;
            client.subscribe()?;
            client.sync()?;
            thread::sleep(Duration::from_secs(*seconds));
        }
    }

    client.sync()
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,zlimdb_client=info"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    tracing::debug!("zlimdb CLI v{}", zlimdb_client::VERSION);

    let printer = Arc::new(Printer::default());
    let mut client = Client::with_handler(ClientConfig::default(), printer.clone());

    let result = run(&mut client, &args);
    client.disconnect();

    match result {
        Ok(()) if !printer.failed.load(Ordering::Acquire) => ExitCode::SUCCESS,
        Ok(()) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
