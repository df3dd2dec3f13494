use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use log::{error, info, warn};
use pair_chat::{Config, Server};

fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<()> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "no certificate found"));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    if rustls_pemfile::private_key(&mut key_reader)?.is_none() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "no private key found"));
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let server = Server::from_config(&config);
    let routes = server.routes(config.cors_origin.as_deref());
    let addr = ([0, 0, 0, 0], config.port);

    if let Some((cert, key)) = config.tls_paths() {
        match load_tls_config(cert, key) {
            Ok(()) => {
                info!("Starting secure server (HTTPS/WSS) on port {}", config.port);
                warp::serve(routes).tls().cert_path(cert).key_path(key).run(addr).await;
                return;
            }
            Err(e) => warn!("Failed to load TLS config ({}), falling back to HTTP/WS", e),
        }
    }

    info!("Server starting on port {}", config.port);
    warp::serve(routes).run(addr).await;
}
