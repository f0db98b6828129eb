use clap::Parser;
use imd_client::{Frame, ImdClient};
use imd_shared::ForceBatch;
use log::{info, warn};

/// Minimal IMD client: follows a running simulation and optionally pulls on
/// one atom
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8888")]
    server: String,

    /// Request a frame every N steps (0 restores the server default)
    #[arg(short = 'r', long)]
    rate: Option<i32>,

    /// Number of position frames to receive before leaving
    #[arg(short = 'n', long, default_value = "10")]
    frames: usize,

    /// Position of the atom to pull, within the tracked atoms
    #[arg(long)]
    pull_atom: Option<i32>,

    /// Pull force (kcal/mol/Å)
    #[arg(long, num_args = 3, default_values_t = [10.0f32, 0.0, 0.0], allow_negative_numbers = true)]
    force: Vec<f32>,

    /// Ask the simulation to stop instead of just disconnecting
    #[arg(long)]
    kill: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client = ImdClient::connect(&args.server).await?;
    client.go().await?;
    info!("Connected to {}", args.server);

    if let Some(rate) = args.rate {
        client.set_rate(rate).await?;
        info!("Requested a frame every {} steps", rate);
    }

    if let Some(atom) = args.pull_atom {
        let force = [args.force[0], args.force[1], args.force[2]];
        client.send_forces(&ForceBatch::new(vec![atom], vec![force])?).await?;
        info!("Pulling atom {} with {:?}", atom, force);
    }

    let mut received = 0;
    while received < args.frames {
        match client.next_frame().await? {
            Frame::Energies(record) => {
                info!(
                    "step {:>8}  T {:>8.2}  Epot {:>12.4}  Etot {:>12.4}",
                    record.step, record.temperature, record.potential, record.total
                );
            }
            Frame::Positions(x) => {
                received += 1;
                match x.first() {
                    Some(first) => println!(
                        "frame {:>4}: {} atoms, first at ({:.3}, {:.3}, {:.3}) Å",
                        received,
                        x.len(),
                        first[0],
                        first[1],
                        first[2]
                    ),
                    None => warn!("Received an empty position frame"),
                }
            }
        }
    }

    if args.pull_atom.is_some() {
        client.send_forces(&ForceBatch::default()).await?;
    }

    if args.kill {
        info!("Asking the simulation to stop");
        client.kill().await?;
    } else {
        client.disconnect().await?;
    }

    Ok(())
}
