use std::env;
use std::fs::File;
use std::time::Instant;

use failure::Error;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sar::data::{stratified_split, Table};
use sar::evaluation::{evaluate_recommender, RankingOptions};
use sar::models::sar::Hyperparameters;

const SEED: u64 = 42;
const TEST_FRACTION: f64 = 0.25;
const TOP_K: usize = 10;

fn load_hyperparameters(path: Option<&str>) -> Result<Hyperparameters, Error> {
    match path {
        Some(path) => Ok(serde_json::from_reader(File::open(path)?)?),
        None => Ok(Hyperparameters::new()),
    }
}

fn run() -> Result<(), Error> {
    let args: Vec<String> = env::args().skip(1).collect();
    let data_path = args.get(0).map_or("data.csv", String::as_str);

    let hyper = load_hyperparameters(args.get(1).map(String::as_str))?;
    let columns = hyper.column_names().clone();

    let data = Table::from_path(data_path)?;
    info!(rows = data.len(), path = data_path, "loaded interactions");

    let mut rng = XorShiftRng::seed_from_u64(SEED);
    let (train, test) = stratified_split(&data, &columns.user, &mut rng, TEST_FRACTION)?;
    info!(train = train.len(), test = test.len(), "split interactions");

    let mut model = hyper.build()?;
    let options = RankingOptions::default().k(TOP_K);

    let start = Instant::now();
    let report = evaluate_recommender(&mut model, &train, &test, &options)?;
    info!(elapsed = ?start.elapsed(), "fitted and evaluated");

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        for cause in err.iter_causes() {
            eprintln!("Caused by: {}", cause);
        }
        std::process::exit(1);
    }
}
