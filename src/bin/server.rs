use clap::Parser;
use minidis::server::{self, Config, DEFAULT_HOST, DEFAULT_PORT};
use minidis::Error;

#[derive(Parser, Debug)]
#[command(version, about = "A tiny RESP key-value server")]
struct Args {
    /// The address to bind to
    #[arg(long, env = "MINIDIS_HOST", default_value = DEFAULT_HOST)]
    host: String,

    /// The port to listen on
    #[arg(short, long, env = "MINIDIS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    server::run(Config {
        host: args.host,
        port: args.port,
    })
    .await
}
