use log::{error, info};
use mmap_httpd::{ignore_sigpipe, Server, ServerConfig, ServerResult, DEFAULT_DOC_ROOT};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process;

/// Filter directives for the console logger, e.g. `debug` or `mmap_httpd::slab=trace`
const LOG_ENV: &str = "MMAP_HTTPD_LOG";

fn usage(program: &str) -> ! {
    eprintln!("usage: {} <port> [doc_root]", program);
    eprintln!("  doc_root defaults to {}", DEFAULT_DOC_ROOT);
    process::exit(2);
}

fn run(config: ServerConfig) -> ServerResult<()> {
    ignore_sigpipe();

    let server = Server::bind(config)?;
    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal. Stopping server...");
        handle.trigger();
    })?;

    server.run()
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("mmap-httpd");

    let port = match args.get(1).map(|arg| arg.parse::<u16>()) {
        Some(Ok(port)) if port > 0 => port,
        _ => usage(program),
    };
    if args.len() > 3 {
        usage(program);
    }

    let mut config = ServerConfig::new().with_address("0.0.0.0", port);
    if let Some(root) = args.get(2) {
        // Relative roots are resolved against the working directory.
        let root = fs::canonicalize(root).unwrap_or_else(|_| PathBuf::from(root));
        config = config.with_doc_root(root);
    }

    let filters = env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    if let Err(e) = run(config) {
        error!("{}", e);
        process::exit(1);
    }
}
