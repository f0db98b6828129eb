//! The per-run IMD session and its step entry points.
//!
//! A step of the simulation loop calls, in this order:
//! 1. [`Session::poll_and_sync`]: connect/drain on the coordinator, then
//!    agree on connection, interval and forces across all ranks
//! 2. [`Session::gather_if_needed`]: collect positions on the coordinator
//! 3. [`Session::apply_forces`]: add the agreed pull forces locally
//! 4. [`Session::publish`]: send energies and positions to the client
//!
//! All of them are no-ops on a session that is not possible for this run,
//! so the loop never has to check.

use crate::assembler::{CoordinateAssembler, MoleculeGrouping};
use crate::config::{ImdOptions, RunConfig, LOOP_WAIT};
use crate::connection::ConnectionManager;
use crate::coordinator::Coordinator;
use crate::domain::Domain;
use crate::energy::{refresh_record, EnergySource};
use crate::error::ImdError;
use crate::force_log::ForceLog;
use crate::group::{GroupComm, Role};
use crate::pbc::SimBox;
use crate::stop::StopCondition;
use crate::sync::{synchronize, SharedState};
use imd_shared::{ForceBatch, Vec3};
use log::{info, warn};

pub struct Session<G: GroupComm> {
    group: G,
    possible: bool,
    tracked: Vec<usize>,
    shared: SharedState,
    coordinator: Option<Coordinator>,
    assembler: CoordinateAssembler,
}

impl<G: GroupComm> Session<G> {
    /// A session that does nothing; the run proceeds without IMD.
    pub fn inactive(group: G) -> Self {
        Self {
            group,
            possible: false,
            tracked: Vec::new(),
            shared: SharedState::new(1, false),
            coordinator: None,
            assembler: CoordinateAssembler::new(Vec::new(), MoleculeGrouping::default()),
        }
    }

    /// Sets up the session on every rank.
    ///
    /// Falls back to an inactive session when the run input does not allow
    /// IMD, the integrator cannot drive it, this is a multi-simulation, or
    /// none of wait/terminate/pull was requested. Configuration that cannot
    /// work and a listening socket that cannot be opened are errors.
    ///
    /// With `--imdwait` the coordinator blocks here until a client is
    /// connected or `stop` is requested. `x_local` are this rank's initial
    /// positions, taken as whole.
    pub fn new<D: Domain + ?Sized>(
        mut group: G,
        config: &RunConfig,
        options: &ImdOptions,
        x_local: &[Vec3],
        domain: &D,
        stop: &StopCondition,
    ) -> Result<Self, ImdError> {
        if !config.imd_enabled {
            return Ok(Self::inactive(group));
        }
        let Some(default_interval) = config.default_interval() else {
            return Ok(Self::inactive(group));
        };
        if config.multi_sim {
            warn!("IMD: Cannot use IMD for multiple simulations or replica exchange, running normally instead");
            return Ok(Self::inactive(group));
        }

        let coordinator_rank = group.role() == Role::Coordinator;
        let mut create = false;
        if coordinator_rank {
            if options.any_enabled() {
                warn!("IMD: Enabled. This simulation will accept incoming IMD connections.");
                create = true;
            } else {
                warn!("IMD: None of the --imd switches was used. This run will not accept incoming IMD connections");
            }
        }
        group.broadcast(&mut create)?;
        if !create {
            return Ok(Self::inactive(group));
        }

        config.check_integrator_parallel(group.is_parallel())?;
        let tracked = config.tracked_atoms()?;

        let mut forces_enabled = options.pull;
        group.broadcast(&mut forces_enabled)?;

        let mut coordinator = if coordinator_rank {
            Some(Self::open_coordinator(config, options, default_interval, &tracked, stop)?)
        } else {
            None
        };

        let mut shared = SharedState::new(default_interval, forces_enabled);
        synchronize(&mut group, &mut shared, coordinator.as_mut(), &tracked, 0.0)?;

        let molecules = MoleculeGrouping::from_topology(&tracked, &config.molecules);
        let mut assembler = CoordinateAssembler::new(tracked.clone(), molecules);
        assembler.initialize(&mut group, x_local, domain)?;

        Ok(Self {
            group,
            possible: true,
            tracked,
            shared,
            coordinator,
            assembler,
        })
    }

    fn open_coordinator(
        config: &RunConfig,
        options: &ImdOptions,
        default_interval: i32,
        tracked: &[usize],
        stop: &StopCondition,
    ) -> Result<Coordinator, ImdError> {
        if options.wait {
            warn!("IMD: Pausing simulation while no IMD connection present (--imdwait).");
        }
        if options.terminatable {
            warn!("IMD: Allow termination of the simulation from IMD client (--imdterm).");
        }
        if options.pull {
            warn!("IMD: Pulling from IMD remote is enabled (--imdpull).");
        }

        let force_log = match &options.force_log {
            Some(path) => Some(
                ForceLog::open(path, tracked.len(), config.total_atoms, options.append).map_err(
                    |source| ImdError::ForceLog {
                        path: path.clone(),
                        source,
                    },
                )?,
            ),
            None => None,
        };

        warn!("IMD: Setting port for connection requests to {}.", options.port);
        let mut connection = ConnectionManager::new();
        connection.listen(options.port)?;

        let mut coordinator =
            Coordinator::new(connection, default_interval, options, tracked.len(), force_log);
        if options.wait {
            coordinator.connection_mut().block_connect(stop, LOOP_WAIT);
        } else {
            warn!("IMD: --imdwait not set, starting simulation.");
        }
        Ok(coordinator)
    }

    pub fn is_possible(&self) -> bool {
        self.possible
    }

    pub fn role(&self) -> Role {
        self.group.role()
    }

    /// Connection flag as agreed at the last synchronization.
    pub fn is_connected(&self) -> bool {
        self.shared.connected
    }

    /// Whether the client terminated the run. Only known on the coordinator.
    pub fn is_terminated(&self) -> bool {
        self.coordinator
            .as_ref()
            .is_some_and(Coordinator::is_terminated)
    }

    pub fn update_interval(&self) -> i32 {
        self.shared.interval
    }

    /// Port the coordinator listens on.
    pub fn local_port(&self) -> Option<u16> {
        self.coordinator
            .as_ref()
            .map(|c| c.connection().local_port())
    }

    pub fn applied_forces(&self) -> &ForceBatch {
        &self.shared.applied
    }

    pub fn tracked_atoms(&self) -> &[usize] {
        &self.tracked
    }

    /// Positions of the last gather, in tracked order. Empty on workers.
    pub fn positions(&self) -> &[Vec3] {
        match self.role() {
            Role::Coordinator => self.assembler.positions(),
            Role::Worker => &[],
        }
    }

    /// The process group, for collectives the simulation itself needs.
    pub fn group_mut(&mut self) -> &mut G {
        &mut self.group
    }

    /// Handles the client on the coordinator, then synchronizes all ranks.
    /// Returns whether `step` is a transmission step.
    pub fn poll_and_sync(&mut self, step: i64, time: f64, stop: &StopCondition) -> Result<bool, ImdError> {
        if !self.possible {
            return Ok(false);
        }

        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.poll(stop);
        }
        synchronize(
            &mut self.group,
            &mut self.shared,
            self.coordinator.as_mut(),
            &self.tracked,
            time,
        )?;

        Ok(self.shared.is_transmission_step(step))
    }

    /// Gathers positions when they are about to be sent, and on every
    /// repartition step so the image tracking never falls behind.
    pub fn gather_if_needed<D: Domain + ?Sized>(
        &mut self,
        imd_step: bool,
        repartition: bool,
        sim_box: &SimBox,
        x_local: &[Vec3],
        domain: &D,
    ) -> Result<(), ImdError> {
        if !self.possible {
            return Ok(());
        }

        let sending = imd_step && self.shared.connected;
        if !sending && !repartition {
            return Ok(());
        }

        self.assembler
            .gather(&mut self.group, x_local, domain, sim_box, repartition)?;
        if sending && self.coordinator.is_some() {
            self.assembler.remove_molecule_shifts(sim_box);
        }
        Ok(())
    }

    /// Refreshes the energy record and, on transmission steps, sends it
    /// with the positions. `energies` is `None` when the engine has no new
    /// values this step.
    pub fn publish(&mut self, step: i64, imd_step: bool, energies: Option<&dyn EnergySource>) {
        if !self.possible {
            return;
        }
        let Some(coordinator) = self.coordinator.as_mut() else {
            return;
        };
        if !coordinator.is_connected() {
            return;
        }

        refresh_record(coordinator.energies_mut(), step, energies);
        if imd_step {
            coordinator.send_frame(self.assembler.positions());
        }
    }

    /// Adds the agreed pull forces to the locally owned atoms of `f_local`.
    pub fn apply_forces<D: Domain + ?Sized>(&self, f_local: &mut [Vec3], domain: &D) {
        if !self.possible || !self.shared.forces_enabled {
            return;
        }

        for (index, force) in self.shared.applied.iter() {
            let Some(&global) = self.tracked.get(index as usize) else {
                continue;
            };
            let Some(local) = domain.local_index(global) else {
                continue;
            };
            let Some(f) = f_local.get_mut(local) else {
                continue;
            };
            for d in 0..3 {
                f[d] += force[d];
            }
        }
    }

    /// Drops the client, closes the force log and the listening socket.
    pub fn finalize(&mut self) {
        if !self.possible {
            return;
        }
        if let Some(coordinator) = self.coordinator.as_mut() {
            coordinator.close();
            info!("IMD: Session closed.");
        }
        self.possible = false;
    }
}
