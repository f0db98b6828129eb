use clap::Parser;
use imd_server::config::{ImdOptions, Integrator, RunConfig};
use imd_server::domain::OwnedRange;
use imd_server::energy::EnergySource;
use imd_server::error::ImdError;
use imd_server::group::{ChannelGroup, GroupComm};
use imd_server::pbc::SimBox;
use imd_server::sim::{chain_topology, energy_terms, initial_layout, ChainParams, ChainSystem};
use imd_server::{Session, StopCondition};
use log::{error, info};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Toy bead-chain simulation serving an interactive IMD session
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    imd: ImdOptions,

    /// Number of chain molecules
    #[arg(long, default_value_t = 20)]
    molecules: usize,

    /// Beads per chain
    #[arg(long, default_value_t = 8)]
    atoms_per_molecule: usize,

    /// Edge of the cubic box (nm)
    #[arg(long = "box", default_value_t = 4.0)]
    box_edge: f32,

    /// Number of steps to run
    #[arg(long, default_value_t = 1_000_000)]
    steps: i64,

    /// Time step (ps)
    #[arg(long, default_value_t = 0.002)]
    dt: f64,

    /// Number of ranks sharing the work
    #[arg(long, default_value_t = 2)]
    ranks: usize,

    /// Steps between energy evaluations, also the default update interval
    #[arg(long, default_value_t = 10)]
    nstcalcenergy: i32,

    /// Steps between repartitioning (atoms are put back into the box)
    #[arg(long, default_value_t = 10)]
    nstlist: i64,

    /// Sleep after every step, to keep the demo watchable (ms)
    #[arg(long, default_value_t = 2)]
    delay: u64,

    /// Seed for the initial layout and the thermal noise
    #[arg(long, default_value_t = 2024)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let params = ChainParams::default();
    let sim_box = SimBox::cubic(args.box_edge);
    let total = args.molecules * args.atoms_per_molecule;
    let layout = Arc::new(initial_layout(
        args.molecules,
        args.atoms_per_molecule,
        &sim_box,
        &params,
        args.seed,
    ));

    info!(
        "Starting {} chains of {} beads on {} ranks",
        args.molecules, args.atoms_per_molecule, args.ranks
    );

    let stop = StopCondition::new();
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, stopping after the current step");
                stop.request();
            }
        });
    }

    let domains = OwnedRange::partition(total, args.atoms_per_molecule, args.ranks);
    let handles: Vec<_> = ChannelGroup::create(args.ranks)
        .into_iter()
        .zip(domains)
        .map(|(group, domain)| {
            let args = args.clone();
            let layout = Arc::clone(&layout);
            let stop = stop.clone();
            thread::spawn(move || {
                let system = ChainSystem::new(
                    &layout,
                    domain,
                    args.atoms_per_molecule,
                    sim_box,
                    params,
                    args.seed,
                );
                run_rank(group, system, &args, &stop)
            })
        })
        .collect();

    let results = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    })
    .await?;

    for (rank, result) in results.into_iter().enumerate() {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!("Rank {} failed: {}", rank, e);
                return Err(e.into());
            }
            Err(_) => return Err(format!("rank {} panicked", rank).into()),
        }
    }

    info!("Simulation finished");
    Ok(())
}

/// The step loop of one rank.
fn run_rank(
    group: ChannelGroup,
    mut system: ChainSystem,
    args: &Args,
    stop: &StopCondition,
) -> Result<(), ImdError> {
    let total = args.molecules * args.atoms_per_molecule;
    let config = RunConfig {
        imd_enabled: true,
        integrator: Integrator::Brownian,
        nstcalcenergy: args.nstcalcenergy,
        multi_sim: false,
        total_atoms: total,
        imd_group: Vec::new(),
        molecules: chain_topology(args.molecules, args.atoms_per_molecule),
    };
    let temperature = ChainParams::default().temperature;
    let nstcalcenergy = i64::from(args.nstcalcenergy.max(1));
    let nstlist = args.nstlist.max(1);

    let mut session = Session::new(
        group,
        &config,
        &args.imd,
        &system.positions,
        &system.domain,
        stop,
    )?;
    if let Some(port) = session.local_port() {
        info!(
            "Serving IMD on port {} for {} atoms",
            port,
            session.tracked_atoms().len()
        );
    }

    for step in 0..args.steps {
        let time = step as f64 * args.dt;

        // Ranks must leave the loop on the same step.
        let mut stopping = stop.is_requested();
        session.group_mut().broadcast(&mut stopping)?;
        if stopping {
            info!("Stopping at step {}", step);
            break;
        }

        let repartition = step % nstlist == 0;
        if repartition {
            system.wrap();
        }

        let imd_step = session.poll_and_sync(step, time, stop)?;
        session.gather_if_needed(
            imd_step,
            repartition,
            system.sim_box(),
            &system.positions,
            &system.domain,
        )?;

        let local_energy = system.compute_forces();
        session.apply_forces(&mut system.forces, &system.domain);
        system.integrate(args.dt as f32);

        let mut energies = None;
        if step % nstcalcenergy == 0 {
            if let Some(parts) = session.group_mut().gather(local_energy)? {
                energies = Some(energy_terms(parts.iter().sum(), temperature));
            }
        }
        session.publish(step, imd_step, energies.as_ref().map(|e| e as &dyn EnergySource));

        if args.delay > 0 {
            thread::sleep(Duration::from_millis(args.delay));
        }
    }

    if session.is_terminated() {
        info!("Run terminated by the IMD client");
    }
    session.finalize();
    Ok(())
}
