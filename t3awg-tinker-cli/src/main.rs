use clap::Parser;
use log::info;
use std::{path::PathBuf, time::Instant};
use t3awg::{sim::SimulatedAwg, ResourceAddress, Session, SessionConfig, SessionError};
use tokio::io::{AsyncRead, AsyncWrite};

/// Sends SCPI lines from stdin to a T3AWG and dumps the answers.
///
/// Lines ending in `?` are treated as queries. An empty line quits.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// `TCPIP0::<host>::5025::SOCKET`, `TCPIP::<host>::INSTR` or `<host>[:port]`
    #[arg(required_unless_present = "simulate")]
    address: Option<ResourceAddress>,
    /// JSON session config
    #[arg(long)]
    config: Option<PathBuf>,
    /// Talk to the built-in simulated instrument instead
    #[arg(long)]
    simulate: bool,
    /// Drain the instrument's error queue after every line
    #[arg(long)]
    check_errors: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    match args.address {
        Some(address) if !args.simulate => {
            let mut session = Session::open_with_config(&address, config).await?;
            tinker(&mut session, args.check_errors).await?;
            session.close().await?;
        }
        _ => {
            let sim = SimulatedAwg::new();
            let mut session = Session::from_stream(sim.spawn_duplex(), config).await?;
            tinker(&mut session, args.check_errors).await?;
            session.close().await?;
        }
    }

    Ok(())
}

async fn tinker<S: AsyncRead + AsyncWrite + Unpin>(
    session: &mut Session<S>,
    check_errors: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("connected to {}", session.identity());

    for line in std::io::stdin().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }

        let time = Instant::now();

        if line.ends_with('?') || line.contains("? ") {
            let answer = session.query_raw(line).await;
            match answer {
                Ok(answer) => println!("{}", pretty_hex::pretty_hex(&answer)),
                Err(SessionError::Io { source }) => println!("! {source}"),
                Err(e) => return Err(e.into()),
            }
        } else {
            session.send_raw(line).await?;
        }

        if check_errors {
            match session.check_errors().await {
                Ok(()) => {}
                Err(SessionError::Instrument { source }) => println!("! {source}"),
                Err(e) => return Err(e.into()),
            }
        }

        println!("{} ms", time.elapsed().as_millis());
    }

    Ok(())
}
