use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "lacam-fact",
    about = "Factorized LaCAM solver for MAPF on grid maps.",
    version
)]
pub struct Cli {
    #[arg(short, long, help = "Path to the map file")]
    pub map: PathBuf,

    #[arg(short = 'N', long, help = "Number of agents")]
    pub num: usize,

    #[arg(short = 'i', long, help = "Scenario file with start/goal pairs")]
    pub scen: Option<PathBuf>,

    #[arg(short, long, default_value_t = 0)]
    pub seed: u64,

    #[arg(
        short,
        long,
        default_value_t = 0,
        help = "0: warn, 1: info, 2: debug, 3+: trace"
    )]
    pub verbose: u8,

    #[arg(short, long = "time_limit_sec", default_value_t = 600)]
    pub time_limit_sec: u64,

    #[arg(short, long, default_value = "./build/result.txt")]
    pub output: PathBuf,

    #[arg(
        long = "log_short",
        help = "Omit starts, goals and the per-timestep solution from the log"
    )]
    pub log_short: bool,

    #[arg(
        short = 'O',
        long,
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=2),
        help = "0: none, 1: makespan, 2: sum_of_loss"
    )]
    pub objective: u8,

    #[arg(
        short,
        long = "restart_rate",
        default_value_t = 0.001,
        help = "Accepted for compatibility; the search always re-inserts the known node"
    )]
    pub restart_rate: f32,

    #[arg(short, long, value_enum, default_value_t = FactorizeKind::Standard)]
    pub factorize: FactorizeKind,

    #[arg(long = "multi_threading", help = "Solve sub-instances on a worker pool")]
    pub multi_threading: bool,

    #[arg(
        long = "save_stats",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Append a run record to stats.json"
    )]
    pub save_stats: bool,

    #[arg(long = "save_partitions", help = "Persist accepted splits for later FactDef replay")]
    pub save_partitions: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum FactorizeKind {
    #[value(name = "standard")]
    Standard,
    #[value(name = "FactDistance")]
    Distance,
    #[value(name = "FactBbox")]
    Bbox,
    #[value(name = "FactOrient")]
    Orient,
    #[value(name = "FactAstar")]
    Astar,
    #[value(name = "FactDef")]
    Def,
}

impl FactorizeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FactorizeKind::Standard => "standard",
            FactorizeKind::Distance => "FactDistance",
            FactorizeKind::Bbox => "FactBbox",
            FactorizeKind::Orient => "FactOrient",
            FactorizeKind::Astar => "FactAstar",
            FactorizeKind::Def => "FactDef",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli =
            Cli::try_parse_from(["lacam-fact", "--map", "room.map", "--num", "8"]).unwrap();
        assert_eq!(cli.num, 8);
        assert_eq!(cli.seed, 0);
        assert_eq!(cli.time_limit_sec, 600);
        assert_eq!(cli.objective, 0);
        assert_eq!(cli.factorize, FactorizeKind::Standard);
        assert!(cli.save_stats);
        assert!(!cli.save_partitions);
        assert!(!cli.multi_threading);
        assert!(cli.scen.is_none());
    }

    #[test]
    fn test_factorize_names() {
        let cli = Cli::try_parse_from([
            "lacam-fact",
            "--map",
            "room.map",
            "--num",
            "8",
            "--factorize",
            "FactBbox",
            "--save_stats",
            "false",
        ])
        .unwrap();
        assert_eq!(cli.factorize, FactorizeKind::Bbox);
        assert!(!cli.save_stats);

        assert!(Cli::try_parse_from([
            "lacam-fact",
            "--map",
            "room.map",
            "--num",
            "8",
            "--factorize",
            "FactNope",
        ])
        .is_err());
    }

    #[test]
    fn test_objective_range_is_validated() {
        assert!(Cli::try_parse_from([
            "lacam-fact",
            "--map",
            "room.map",
            "--num",
            "2",
            "--objective",
            "3",
        ])
        .is_err());
    }
}
