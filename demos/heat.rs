use std::thread;

use clap::Parser;
use log::{error, info, LevelFilter};
use patchwork::box_array::BoxArray;
use patchwork::config::Config;
use patchwork::distribution::DistributionMapping;
use patchwork::fab::Fab;
use patchwork::index_space::{IndexSpace, IntVect, SPACE_DIM};
use patchwork::message::local::LocalCommunicator;
use patchwork::mf_iter::run_stencil;
use patchwork::Error;
use patchwork::rts::IterationReport;
use patchwork::task::Step;
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[clap(version = "1.0", about = "Explicit heat diffusion on a block-structured grid")]
struct Opts {
    /// TOML file with [distribution] and [runtime] sections
    #[clap(short = 'c', long)]
    config: Option<String>,

    #[clap(short = 's', long, default_value = "10")]
    steps: usize,

    /// Number of cells along each axis of the domain
    #[clap(short = 'd', long, default_value = "64")]
    domain: i64,

    #[clap(short = 'm', long, default_value = "16")]
    max_grid: usize,

    #[clap(short = 'g', long, default_value = "1")]
    ghost: i64,

    /// Number of in-process workers
    #[clap(short = 'w', long, default_value = "2")]
    workers: usize,

    #[clap(short = 'v', long)]
    verbose: bool,
}

impl Opts {
    /// Reject grids the stencil cannot run on: an empty domain, zero-sized
    /// boxes, or no ghost layer for the neighbor reads.
    fn validate(&self) -> patchwork::Result<()> {
        if self.domain < 1 {
            return Err(Error::Config(format!("domain must have at least one cell, got {}", self.domain)));
        }
        if self.max_grid == 0 {
            return Err(Error::Config("max-grid must be positive".to_string()));
        }
        if self.ghost < 1 {
            return Err(Error::Config(format!("the stencil needs at least one ghost layer, got {}", self.ghost)));
        }
        if self.workers == 0 {
            return Err(Error::NonPositiveWorkerCount);
        }
        Ok(())
    }
}

fn initial_temperature(index: IntVect, _: usize) -> f64 {
    if index.iter().all(|&i| (12..20).contains(&i)) {
        1.0
    } else {
        0.0
    }
}

fn diffuse(valid: &IndexSpace, _: Step, fab: &mut Fab) {
    let old = fab.clone();

    for index in valid {
        let u = old.get(index, 0);
        let mut laplacian = 0.0;

        for axis in 0..SPACE_DIM {
            for delta in [-1, 1] {
                let mut neighbor = index;
                neighbor[axis] += delta;
                laplacian += old.get(neighbor, 0) - u;
            }
        }
        fab.set(index, 0, u + 0.1 * laplacian)
    }
}

fn main() {
    let opts = Opts::parse();
    let level = if opts.verbose { LevelFilter::Debug } else { LevelFilter::Info };

    if let Err(e) = SimpleLogger::new().with_level(level).init() {
        eprintln!("could not install logger: {}", e);
    }
    if let Err(e) = run(&opts) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(opts: &Opts) -> patchwork::Result<()> {
    opts.validate()?;

    let config = match &opts.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let domain = IndexSpace::new([0; SPACE_DIM], [opts.domain - 1; SPACE_DIM]);
    let boxes = BoxArray::decompose(domain, opts.max_grid);
    let dm = DistributionMapping::with_config(&boxes, opts.workers, &config.distribution)?;

    info!(
        "{} boxes over {} workers, efficiency {:.3}",
        boxes.len(),
        opts.workers,
        dm.efficiency(&boxes.cell_counts())
    );

    let handles: Vec<_> = LocalCommunicator::group(opts.workers)
        .into_iter()
        .map(|comm| {
            let boxes = boxes.clone();
            let dm = dm.clone();
            let runtime = config.runtime.clone();
            let (steps, ghost) = (opts.steps, opts.ghost);

            thread::spawn(move || {
                let (fabs, report, comm) =
                    run_stencil(comm, &boxes, &dm, runtime, steps, ghost, initial_temperature, diffuse)?;
                let heat: f64 = fabs
                    .iter()
                    .map(|(_, fab)| fab.valid().iter().map(|i| fab.get(i, 0)).sum::<f64>())
                    .sum();
                Ok::<_, Error>((heat, report, comm))
            })
        })
        .collect();

    let mut total_heat = 0.0;
    let mut total = IterationReport::default();
    let mut comms = Vec::new();

    for (rank, handle) in handles.into_iter().enumerate() {
        let (heat, report, comm) = handle
            .join()
            .map_err(|_| Error::Transport(format!("worker {} panicked", rank)))??;
        info!("worker {}: {:?}", rank, report);
        total_heat += heat;
        total += report;
        comms.push(comm);
    }
    info!("total heat after {} steps: {:.6}", opts.steps, total_heat);
    info!("{:?}", total);
    Ok(())
}
