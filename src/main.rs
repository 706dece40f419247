use blobsocks::{ProxyHandler, ProxySocket};
use clap::{App, Arg};
use env_logger::{from_env, Env};
use std::process;
use tokio::runtime::Runtime;

fn main() {
    let matches = App::new("blobsocks")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Interactive proxy for fetching container images over a socketpair")
        .arg(
            Arg::with_name("sockfd")
                .long("sockfd")
                .takes_value(true)
                .value_name("FD")
                .default_value("0")
                .help("Serve on an already-opened socketpair half (default 0/stdin)"),
        )
        .arg(
            Arg::with_name("log_level")
                .long("log-level")
                .takes_value(true)
                .value_name("LEVEL")
                .default_value("error")
                .help("Default log level filter, in env_logger syntax"),
        )
        .get_matches();

    let log_level = matches.value_of("log_level").unwrap();
    from_env(Env::default().default_filter_or(log_level)).init();

    let sockfd: i32 = match matches.value_of("sockfd").unwrap().parse() {
        Ok(fd) => fd,
        Err(_) => {
            eprintln!("blobsocks: --sockfd takes an integer file descriptor");
            process::exit(2);
        }
    };

    let runtime = Runtime::new().expect("failed to start async runtime");
    // The parent created this socket and forked us with it; from here on it
    // belongs to the dispatch loop alone.
    let socket = unsafe { ProxySocket::from_raw_fd(sockfd) };
    let mut handler = ProxyHandler::new(runtime.handle().clone());

    if let Err(err) = handler.serve(&socket) {
        log::error!("proxy terminated: {}", err);
        process::exit(1);
    }
}
