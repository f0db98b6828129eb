//! Static run configuration and the rules deciding whether a session may
//! exist at all.

use crate::error::ImdError;
use clap::Args;
use log::warn;
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// Sleep between two connection attempts while waiting for a client.
pub const LOOP_WAIT: Duration = Duration::from_secs(1);

/// How long a freshly accepted client has to send its `Go`.
pub const CONNECT_WAIT: Duration = Duration::from_secs(1);

/// Budget for reading a payload once its header has arrived.
pub const IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Poll interval while the client holds the simulation paused.
pub const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Port used when none is given on the command line.
pub const DEFAULT_PORT: u16 = 8888;

/// Command-line switches controlling the interactive session.
#[derive(Debug, Clone, Default, Args)]
pub struct ImdOptions {
    /// Pause the simulation until an IMD client connects
    #[arg(long = "imdwait")]
    pub wait: bool,

    /// Allow the IMD client to terminate the simulation
    #[arg(long = "imdterm")]
    pub terminatable: bool,

    /// Apply forces sent by the IMD client
    #[arg(long = "imdpull")]
    pub pull: bool,

    /// Port to listen on for IMD connections (0 picks a free port)
    #[arg(long = "imdport", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Log file for the applied IMD pull forces
    #[arg(long = "if", value_name = "FILE")]
    pub force_log: Option<PathBuf>,

    /// Append to an existing force log instead of starting a new one
    #[arg(long)]
    pub append: bool,
}

impl ImdOptions {
    /// A session is only created when at least one switch asks for it.
    pub fn any_enabled(&self) -> bool {
        self.wait || self.terminatable || self.pull
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrator {
    LeapFrog,
    VelocityVerlet,
    Stochastic,
    Brownian,
    SteepestDescent,
    ConjugateGradient,
    Lbfgs,
    NormalModes,
    TestParticleInsertion,
}

impl Integrator {
    pub fn is_dynamics(self) -> bool {
        matches!(
            self,
            Integrator::LeapFrog
                | Integrator::VelocityVerlet
                | Integrator::Stochastic
                | Integrator::Brownian
        )
    }

    pub fn is_minimization(self) -> bool {
        matches!(
            self,
            Integrator::SteepestDescent | Integrator::ConjugateGradient | Integrator::Lbfgs
        )
    }
}

/// What the run input says about the system and the session.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// The run input defines an IMD group and thereby permits sessions.
    pub imd_enabled: bool,
    pub integrator: Integrator,
    pub nstcalcenergy: i32,
    pub multi_sim: bool,
    pub total_atoms: usize,
    /// Global indices of the atoms visible to the client; empty means all.
    pub imd_group: Vec<usize>,
    /// Molecules of the topology as global atom ranges.
    pub molecules: Vec<Range<usize>>,
}

impl RunConfig {
    /// Minimal dynamics configuration over `total_atoms` atoms, one molecule each.
    pub fn dynamics(total_atoms: usize, nstcalcenergy: i32) -> Self {
        Self {
            imd_enabled: true,
            integrator: Integrator::LeapFrog,
            nstcalcenergy,
            multi_sim: false,
            total_atoms,
            imd_group: Vec::new(),
            molecules: (0..total_atoms).map(|i| i..i + 1).collect(),
        }
    }

    /// Update interval used whenever no client negotiated one. `None` if the
    /// integrator cannot drive a session.
    pub fn default_interval(&self) -> Option<i32> {
        if self.integrator.is_dynamics() {
            Some(self.nstcalcenergy.max(1))
        } else if self.integrator.is_minimization() {
            Some(1)
        } else {
            warn!(
                "IMD: Integrator {:?} is not supported for Interactive Molecular Dynamics, running normally instead",
                self.integrator
            );
            None
        }
    }

    pub fn check_integrator_parallel(&self, parallel: bool) -> Result<(), ImdError> {
        let minimizer = matches!(
            self.integrator,
            Integrator::SteepestDescent
                | Integrator::ConjugateGradient
                | Integrator::Lbfgs
                | Integrator::NormalModes
        );
        if parallel && minimizer {
            return Err(ImdError::UnsupportedParallelIntegrator(self.integrator));
        }
        Ok(())
    }

    /// The tracked atom set, validated to be sorted and within the system.
    pub fn tracked_atoms(&self) -> Result<Vec<usize>, ImdError> {
        if self.imd_group.is_empty() {
            return Ok((0..self.total_atoms).collect());
        }

        for (position, pair) in self.imd_group.windows(2).enumerate() {
            if pair[0] > pair[1] {
                return Err(ImdError::UnsortedIndex {
                    position,
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }

        if let Some(&index) = self.imd_group.iter().find(|&&i| i >= self.total_atoms) {
            return Err(ImdError::IndexOutOfRange {
                index,
                total: self.total_atoms,
            });
        }

        Ok(self.imd_group.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestArgs {
        #[command(flatten)]
        imd: ImdOptions,
    }

    #[test]
    fn test_options_parse_from_command_line() {
        let args = TestArgs::parse_from([
            "mdrun",
            "--imdwait",
            "--imdpull",
            "--imdport",
            "9001",
            "--if",
            "pull.xvg",
        ]);

        assert!(args.imd.wait);
        assert!(args.imd.pull);
        assert!(!args.imd.terminatable);
        assert_eq!(args.imd.port, 9001);
        assert_eq!(args.imd.force_log, Some(PathBuf::from("pull.xvg")));
        assert!(args.imd.any_enabled());
    }

    #[test]
    fn test_options_default_port() {
        let args = TestArgs::parse_from(["mdrun"]);
        assert_eq!(args.imd.port, DEFAULT_PORT);
        assert!(!args.imd.any_enabled());
    }

    #[test]
    fn test_default_interval_by_integrator() {
        let mut run = RunConfig::dynamics(10, 100);
        assert_eq!(run.default_interval(), Some(100));

        run.nstcalcenergy = 0;
        assert_eq!(run.default_interval(), Some(1));

        run.integrator = Integrator::ConjugateGradient;
        assert_eq!(run.default_interval(), Some(1));

        run.integrator = Integrator::TestParticleInsertion;
        assert_eq!(run.default_interval(), None);
    }

    #[test]
    fn test_parallel_minimization_rejected() {
        let mut run = RunConfig::dynamics(10, 10);
        assert!(run.check_integrator_parallel(true).is_ok());

        run.integrator = Integrator::SteepestDescent;
        assert!(run.check_integrator_parallel(false).is_ok());
        assert!(matches!(
            run.check_integrator_parallel(true),
            Err(ImdError::UnsupportedParallelIntegrator(Integrator::SteepestDescent))
        ));
    }

    #[test]
    fn test_tracked_atoms_defaults_to_whole_system() {
        let run = RunConfig::dynamics(4, 10);
        assert_eq!(run.tracked_atoms().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_unsorted_group_rejected() {
        let mut run = RunConfig::dynamics(20, 10);
        run.imd_group = vec![1, 5, 3, 7];

        match run.tracked_atoms() {
            Err(ImdError::UnsortedIndex {
                position,
                previous,
                next,
            }) => {
                assert_eq!(position, 1);
                assert_eq!(previous, 5);
                assert_eq!(next, 3);
            }
            other => panic!("Expected unsorted index error, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_group_rejected() {
        let mut run = RunConfig::dynamics(5, 10);
        run.imd_group = vec![0, 2, 5];
        assert!(matches!(
            run.tracked_atoms(),
            Err(ImdError::IndexOutOfRange { index: 5, total: 5 })
        ));
    }
}
