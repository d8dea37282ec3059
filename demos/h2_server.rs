//! Cleartext HTTP/2 server (prior knowledge).
//!
//! ```text
//! RUST_LOG=milli_h2=debug cargo run --example h2_server
//! curl --http2-prior-knowledge http://127.0.0.1:8080/hello
//! curl --http2-prior-knowledge -d 'some body' http://127.0.0.1:8080/echo
//! ```

use std::io::Write;

use milli_h2::{Exchange, HandlerError, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

fn handle(ex: &mut Exchange) -> Result<bool, HandlerError> {
    let path = String::from_utf8_lossy(ex.request().path().unwrap_or(b"/")).into_owned();
    let method = String::from_utf8_lossy(ex.request().method().unwrap_or(b"GET")).into_owned();
    tracing::info!(%method, %path, "request");

    match path.as_str() {
        "/echo" => {
            let body = ex.request().body().clone();
            if let Some(head) = ex.response().response_mut() {
                head.add_header("content-type", "application/octet-stream");
            }
            ex.response().send(&body)?;
        }
        "/panic" => panic!("requested panic"),
        "/fail" => return Err("requested failure".into()),
        "/bye" => {
            ex.response().send(b"goodbye\n")?;
            return Ok(false);
        }
        _ => {
            if let Some(head) = ex.response().response_mut() {
                head.add_header("content-type", "text/plain");
            }
            writeln!(ex.response(), "hello from milli-h2, you asked for {path}")?;
        }
    }
    Ok(true)
}

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::default().with_worker_threads(4);
    let server = Server::bind("127.0.0.1:8080", config, handle)?;
    server.serve()
}
