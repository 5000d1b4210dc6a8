use clap::Parser;
use patchwork::config::RuntimeConfig;
use patchwork::graph::{Mode, TaskGraph};
use patchwork::message::local::LocalCommunicator;
use patchwork::rts::Rts;
use patchwork::task::{Task, TaskContext, TaskName};
use patchwork::thread_pool::ThreadPool;
use rayon::prelude::*;

#[derive(Debug, Parser)]
#[clap(version = "1.0", about = "Compare the task scheduler's thread pool with rayon")]
struct Opts {
    #[clap(short = 't', long, default_value = "1")]
    num_threads: usize,

    #[clap(short = 'n', long, default_value = "1000")]
    num_jobs: usize,

    #[clap(short = 'w', long, default_value = "100000")]
    work_per_job: usize,
}

struct Busy {
    work: usize,
}

impl Task for Busy {
    fn dependency(&self, _: &TaskContext) -> bool {
        true
    }

    fn job(&mut self, _: &mut TaskContext) {
        let _: f64 = (0..self.work).map(|n| n as f64).sum();
    }
}

fn report(label: &str, duration: f64, opts: &Opts) {
    println!();
    println!("{}", label);
    println!("total ................. {}s", duration);
    println!(
        "cpu-s ................. {}",
        duration * opts.num_threads as f64
    );
    println!(
        "cpu-ns / job / work ... {}",
        duration * opts.num_threads as f64 / opts.num_jobs as f64 / opts.work_per_job as f64 * 1e9
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::parse();
    println!("{:?}", opts);

    let duration = {
        let pool = ThreadPool::new(opts.num_threads);
        let work = opts.work_per_job;
        let start = std::time::Instant::now();

        for _ in 0..opts.num_jobs {
            pool.spawn(move || {
                let _: f64 = (0..work).map(|n| n as f64).sum();
            });
        }
        drop(pool);
        start.elapsed().as_secs_f64()
    };
    report("patchwork::ThreadPool", duration, &opts);

    let duration = {
        let mut graph = TaskGraph::new("busy", 0, 1, Mode::Push);
        for i in 0..opts.num_jobs {
            graph.insert(TaskName::from_box(i)?, Busy { work: opts.work_per_job })?;
        }
        let config = RuntimeConfig {
            num_threads: opts.num_threads,
            ..RuntimeConfig::default()
        };
        let mut rts = Rts::init(LocalCommunicator::solo(), config);
        let start = std::time::Instant::now();
        rts.iterate(&mut graph)?;
        start.elapsed().as_secs_f64()
    };
    report("patchwork::Rts", duration, &opts);

    let duration = {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(opts.num_threads)
            .build()?;
        let work = opts.work_per_job;
        let data: Vec<_> = (0..opts.num_jobs).collect();
        let start = std::time::Instant::now();
        pool.install(|| {
            data.par_iter().for_each(|_| {
                let _: f64 = (0..work).map(|n| n as f64).sum();
            });
        });
        start.elapsed().as_secs_f64()
    };
    report("rayon::par_iter", duration, &opts);
    Ok(())
}
