//! `geo-vrp-planner` command line.
//!
//! Resolves address batches against the gazetteer and external tiers,
//! solves routing problems, and reports on the commercial geocoding budget.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use geo_vrp_planner::budget::{Transaction, UsageLedger, UsageState};
use geo_vrp_planner::config::DistanceSource;
use geo_vrp_planner::diagnostics::{InfeasibilityCause, diagnose};
use geo_vrp_planner::failure::{FailureReport, FallbackRoute, classify, fallback_route};
use geo_vrp_planner::gazetteer::{GazetteerStore, ReferenceRow, SessionStats};
use geo_vrp_planner::haversine::HaversineMatrix;
use geo_vrp_planner::osrm::OsrmClient;
use geo_vrp_planner::schedule::{RouteSchedule, schedule_route};
use geo_vrp_planner::traits::{DistanceMatrix, DistanceMatrixProvider};
use geo_vrp_planner::{
    AddressQuery, AddressResolver, PlannerConfig, ResolutionResult, RouteOptimizer, RouteSolution,
    RoutingProblem, Strategy, TimeWindow, Vehicle,
};

#[derive(Debug, Parser)]
#[command(name = "geo-vrp-planner", version, about = "Geocode deliveries and plan vehicle routes")]
struct Cli {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve a JSON array of address queries
    Resolve {
        queries: PathBuf,
        /// Depot as LAT,LON; adds a fallback route for unresolved queries
        #[arg(long, value_parser = parse_coordinate)]
        depot: Option<(f64, f64)>,
    },
    /// Solve a routing problem file
    Optimize {
        problem: PathBuf,
        #[arg(long, default_value = "constrained")]
        strategy: Strategy,
    },
    /// Show the commercial geocoding budget
    Budget {
        /// Number of recent log lines to show
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },
    /// Seed the gazetteer from a JSON array of reference rows
    Import { rows: PathBuf },
    /// Aggregate statistics over recorded resolver sessions
    Stats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PlannerConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PlannerConfig::default(),
    };

    match cli.command {
        Command::Resolve { queries, depot } => resolve(&config, &queries, depot),
        Command::Optimize { problem, strategy } => optimize(&config, &problem, strategy),
        Command::Budget { recent } => budget(&config, recent),
        Command::Import { rows } => import(&config, &rows),
        Command::Stats => stats(&config),
    }
}

fn parse_coordinate(value: &str) -> std::result::Result<(f64, f64), String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got '{value}'"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<f64>()
            .map_err(|err| format!("bad coordinate '{part}': {err}"))
    };
    Ok((parse(lat)?, parse(lon)?))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ResolveOutput {
    results: Vec<ResolutionResult>,
    learned_persisted: usize,
    elapsed_secs: f64,
    failures: FailureReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_route: Option<FallbackRoute>,
}

fn resolve(config: &PlannerConfig, path: &Path, depot: Option<(f64, f64)>) -> Result<()> {
    let queries: Vec<AddressQuery> = read_json(path)?;
    let mut resolver = AddressResolver::from_config(config).context("opening resolver")?;

    let outcome = resolver.resolve_batch(&queries);
    resolver.close().context("closing gazetteer")?;

    let failures = classify(&queries, &outcome.results);
    eprint!("{}", failures.summary());

    let fallback = depot
        .map(|depot| fallback_route(&queries, &outcome.results, depot))
        .filter(|route| !route.is_empty());

    print_json(&ResolveOutput {
        elapsed_secs: outcome.elapsed.as_secs_f64(),
        learned_persisted: outcome.learned_persisted,
        results: outcome.results,
        failures,
        fallback_route: fallback,
    })
}

/// Routing input: either a precomputed matrix or coordinates to build one.
#[derive(Debug, Deserialize)]
struct ProblemFile {
    #[serde(default)]
    coordinates: Option<Vec<(f64, f64)>>,
    #[serde(default)]
    distance_matrix: Option<DistanceMatrix>,
    demand: Vec<f64>,
    vehicles: Vec<Vehicle>,
    #[serde(default)]
    time_windows: Option<Vec<Option<TimeWindow>>>,
}

#[derive(Serialize)]
struct OptimizeOutput {
    solution: RouteSolution,
    schedules: Vec<RouteSchedule>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    diagnostics: Vec<InfeasibilityCause>,
}

fn optimize(config: &PlannerConfig, path: &Path, strategy: Strategy) -> Result<()> {
    let file: ProblemFile = read_json(path)?;

    let matrix = match (file.distance_matrix, &file.coordinates) {
        (Some(matrix), _) => matrix,
        (None, Some(coordinates)) => match config.planning.distance_source {
            DistanceSource::Haversine => HaversineMatrix::build(coordinates),
            DistanceSource::Osrm => OsrmClient::new(config.osrm.clone())?
                .matrix_for(coordinates)
                .context("fetching OSRM distance table")?,
        },
        (None, None) => bail!("problem needs either distance_matrix or coordinates"),
    };

    let mut problem = RoutingProblem::new(matrix, file.demand, file.vehicles);
    if let Some(windows) = file.time_windows {
        problem = problem.with_time_windows(windows);
    }

    let optimizer = RouteOptimizer::new(config.optimizer.clone())
        .with_heuristic_options(config.heuristic.clone());
    let solution = optimizer.solve(&problem, strategy)?;

    let diagnostics = if solution.is_success() {
        Vec::new()
    } else {
        let causes = diagnose(&problem, optimizer.params());
        for cause in &causes {
            tracing::warn!(%cause, "no routing solution");
        }
        causes
    };

    let schedules = solution
        .routes
        .iter()
        .map(|plan| schedule_route(plan, &problem, config.planning.service_minutes))
        .collect();

    print_json(&OptimizeOutput {
        solution,
        schedules,
        diagnostics,
    })
}

#[derive(Serialize)]
struct BudgetOutput {
    usage: UsageState,
    recent_transactions: Vec<Transaction>,
}

fn budget(config: &PlannerConfig, recent: usize) -> Result<()> {
    let ledger = UsageLedger::new(config.budget.clone());
    print_json(&BudgetOutput {
        usage: ledger.status()?,
        recent_transactions: ledger.recent_transactions(recent)?,
    })
}

fn import(config: &PlannerConfig, path: &Path) -> Result<()> {
    let rows: Vec<ReferenceRow> = read_json(path)?;
    let mut store = GazetteerStore::open(&config.gazetteer.path)?;
    let imported = store.import_reference(&rows)?;
    store.close()?;
    eprintln!("imported {imported} rows into {}", config.gazetteer.path.display());
    Ok(())
}

fn stats(config: &PlannerConfig) -> Result<()> {
    let store = GazetteerStore::open(&config.gazetteer.path)?;
    let stats: SessionStats = store.session_stats()?;
    store.close()?;
    print_json(&stats)
}
