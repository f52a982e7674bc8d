use clap::Parser;
use pollhttpd::{Server, ServerConfig};

/// Serves files, directory listings and CGI scripts from the current
/// directory (or `POLLHTTPD_ROOT`).
#[derive(Debug, Parser)]
#[command(name = "pollhttpd", version)]
struct Args {
    /// Port to listen on
    port: u16,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // clap exits with status 2 on a missing or invalid port
    let args = Args::parse();

    let config = match ServerConfig::new() {
        Ok(config) => ServerConfig {
            port: args.port,
            ..config
        },
        Err(err) => {
            log::error!("invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    let result = Server::bind(config).and_then(Server::run);
    if let Err(err) = result {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
