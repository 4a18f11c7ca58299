use clap::Parser;
use itertools::Itertools;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing::debug;

use minidis::client::{Client, ClientError};
use minidis::commands::CommandName;
use minidis::server::{DEFAULT_HOST, DEFAULT_PORT};
use minidis::Error;

#[derive(Parser, Debug)]
#[command(version, about = "Interactive client for a minidis server")]
struct Args {
    /// The server host
    #[arg(long, env = "MINIDIS_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// The server port
    #[arg(short, long, env = "MINIDIS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Seconds without traffic before the connection is dropped
    #[arg(long, env = "MINIDIS_TIMEOUT_SECS", default_value_t = 30)]
    timeout: u64,
}

/// Checks the argument count locally so obvious typos don't need a round trip.
fn check_arity(name: CommandName, args: usize) -> Result<(), &'static str> {
    let ok = match name {
        CommandName::Ping => args <= 1,
        CommandName::Echo | CommandName::Get | CommandName::Del => args == 1,
        CommandName::Set => args == 2,
    };

    if ok {
        return Ok(());
    }

    Err(match name {
        CommandName::Ping => "usage: PING [message]",
        CommandName::Echo => "usage: ECHO message",
        CommandName::Get => "usage: GET key",
        CommandName::Del => "usage: DEL key",
        CommandName::Set => "usage: SET key value",
    })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));

    let args = Args::parse();
    let client = Client::connect_with_timeout(
        (args.host.as_str(), args.port),
        Duration::from_secs(args.timeout),
    )
    .await?;

    let mut lines = BufReader::new(io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let parts = line.split_whitespace().collect_vec();
        let Some((&command, rest)) = parts.split_first() else {
            continue;
        };

        if command.eq_ignore_ascii_case("exit") {
            break;
        }

        let name = match CommandName::from_str(&command.to_uppercase()) {
            Ok(name) => name,
            Err(_) => {
                eprintln!("(error) unknown command '{}'", command);
                continue;
            }
        };

        if let Err(usage) = check_arity(name, rest.len()) {
            eprintln!("(error) {}", usage);
            continue;
        }

        let request = std::iter::once(name.as_ref()).chain(rest.iter().copied());
        match client.request(request).await {
            Ok(reply) => println!("{}", reply),
            Err(ClientError::Server(msg)) => println!("(error) {}", msg),
            Err(e @ (ClientError::ConnectionClosed | ClientError::Timeout(_))) => {
                eprintln!("{}", e);
                break;
            }
            Err(e) => eprintln!("(error) {}", e),
        }
    }

    client.disconnect().await?;
    Ok(())
}
