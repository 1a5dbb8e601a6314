mod common;
mod config;
mod dist;
mod factorize;
mod graph;
mod instance;
mod planner;
mod solver;
mod stat;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info, Level};

use common::{is_feasible_solution, Deadline, Objective};
use config::{Cli, FactorizeKind};
use dist::DistTable;
use factorize::FactAlgo;
use graph::Graph;
use instance::Instance;
use solver::{solve, solve_fact, solve_fact_mt};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let graph = Arc::new(Graph::from_file(&cli.map)?);
    info!("map {} loaded with {} vertices", cli.map.display(), graph.size());

    let ins = match &cli.scen {
        Some(scen) => Instance::from_scen(graph.clone(), scen, cli.num)?,
        None => bail!("a scenario file is required to define starts and goals"),
    };
    if !ins.is_valid(cli.num) {
        bail!("invalid instance, check the scenario against the map");
    }

    let objective = Objective::from_flag(cli.objective);
    let dist = Arc::new(DistTable::new(graph.clone(), &ins.goals));
    let deadline = Deadline::new(Duration::from_secs(cli.time_limit_sec));
    let seed = Some(cli.seed);

    let algo = match cli.factorize {
        FactorizeKind::Standard => None,
        FactorizeKind::Distance => Some(FactAlgo::Distance),
        FactorizeKind::Bbox => Some(FactAlgo::Bbox),
        FactorizeKind::Orient => Some(FactAlgo::Orient),
        FactorizeKind::Astar => Some(FactAlgo::Astar),
        FactorizeKind::Def => Some(FactAlgo::def_from_file(Path::new(
            "assets/temp/FactDef_partitions.json",
        ))?),
    };

    let report = match &algo {
        None => solve(&ins, dist.clone(), &deadline, objective, seed),
        Some(algo) if cli.multi_threading => solve_fact_mt(
            ins.clone(),
            dist.clone(),
            &deadline,
            algo,
            objective,
            seed,
        ),
        Some(algo) => solve_fact(ins.clone(), dist.clone(), &deadline, algo, objective, seed),
    };
    let comp_time_ms = deadline.elapsed_ms();

    if report.solution.is_empty() {
        info!("failed to solve");
    }
    let feasible = is_feasible_solution(&ins, &report.solution);
    if !feasible {
        error!("the produced solution violates feasibility");
    }

    stat::print_stats(&ins, &dist, &report.solution, comp_time_ms);

    let additional_info = format!(
        "optimal={}\nobjective={}\nloop_cnt={}\nnum_node_gen={}\n",
        u8::from(report.optimal),
        cli.objective,
        report.infos.loop_count,
        report.infos.num_node_gen,
    );
    stat::make_log(
        &ins,
        &dist,
        &report.solution,
        &cli.output,
        comp_time_ms,
        &cli.map,
        cli.seed,
        &additional_info,
        cli.log_short,
    )?;

    if cli.save_stats {
        stat::make_stats(
            Path::new("stats.json"),
            cli.factorize.as_str(),
            ins.n(),
            comp_time_ms,
            &report.infos,
            &report.solution,
            &cli.map,
            feasible && !report.solution.is_empty(),
            cli.multi_threading,
        )?;
    }

    if cli.save_partitions {
        let path = format!("assets/temp/{}_partitions.json", cli.factorize.as_str());
        factorize::write_partitions(Path::new(&path), &report.partitions)?;
    }

    Ok(())
}
