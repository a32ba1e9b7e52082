//! Line-oriented TCP client over a TUN interface.
//!
//! Dials the remote host, writes each line read from stdin to the connection
//! and prints whatever the peer sends. Closes the connection on stdin EOF.
//!
//! The interface must be configured beforehand. The kernel takes one end of
//! the point-to-point link, this client the other (`--local`), for example:
//!
//! ```text
//! sudo ip tuntap add dev tun0 mode tun user $USER
//! sudo ip addr add 10.12.0.2 peer 10.12.0.1 dev tun0
//! sudo ip link set tun0 up
//! ```

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "teacp", about = "User-space TCP client over a TUN interface", version)]
struct Args {
    /// Address of the remote host.
    remote: String,

    /// Destination port.
    port: u16,

    /// Address of this client, the peer end of the interface's link.
    #[arg(long, default_value = "10.12.0.1")]
    local: String,

    /// Name of the TUN interface.
    #[arg(long, default_value = "tun0")]
    device: String,

    /// Seed for the local port, initial sequence number and IPv4
    /// identifications.
    #[arg(long)]
    seed: Option<u64>,

    /// Bound on a single wait for the interface to become readable.
    #[arg(long, default_value_t = 1000)]
    read_timeout_ms: u64,
}

#[cfg(target_os = "linux")]
fn main() {
    use std::io::{self, BufRead, Write};
    use std::process;
    use std::thread;
    use std::time::Duration;

    use teacp::{Config, Connection};
    use tracing::{error, info};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::default()
        .with_device(args.device)
        .with_read_timeout(Duration::from_millis(args.read_timeout_ms));

    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }

    let conn = Connection::dial(&args.local, &args.remote, args.port, config).unwrap_or_else(|err| {
        error!("failed to connect to {}:{}: {err}", args.remote, args.port);
        process::exit(1);
    });

    info!("connected {} -> {}", conn.local_addr(), conn.peer_addr());

    thread::scope(|s| {
        s.spawn(|| {
            let mut stdout = io::stdout();
            let mut buf = [0u8; 4096];

            loop {
                match conn.read(&mut buf) {
                    Ok(0) => {
                        info!("peer closed its side of the connection");
                        break;
                    }
                    Ok(nbytes) => {
                        if stdout.write_all(&buf[..nbytes]).and_then(|()| stdout.flush()).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        if !matches!(err, teacp::Error::ConnectionClosed) {
                            error!("read failed: {err}");
                        }
                        break;
                    }
                }
            }
        });

        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line + "\n",
                Err(err) => {
                    error!("failed to read stdin: {err}");
                    break;
                }
            };

            if let Err(err) = (&conn).write_all(line.as_bytes()) {
                error!("write failed: {err}");
                break;
            }
        }

        if let Err(err) = conn.close() {
            error!("close failed: {err}");
        }
    });
}

#[cfg(not(target_os = "linux"))]
fn main() {
    let _ = Args::parse();
    eprintln!("teacp needs a Linux TUN interface");
    std::process::exit(1);
}
