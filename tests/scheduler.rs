use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::thread;

use patchwork::box_array::BoxArray;
use patchwork::config::RuntimeConfig;
use patchwork::distribution::{DistributionConfig, DistributionMapping, Strategy};
use patchwork::error::Error;
use patchwork::fab::Fab;
use patchwork::graph::{Mode, TaskGraph};
use patchwork::index_space::{IndexSpace, IntVect, SPACE_DIM};
use patchwork::message::comm::Communicator;
use patchwork::message::local::LocalCommunicator;
use patchwork::message::tcp::TcpCommunicator;
use patchwork::mf_iter::run_stencil;
use patchwork::rts::{IterationReport, Rts};
use patchwork::task::{Action, Kernel, Step, Task, TaskContext, TaskName, TaskState};




fn initial(index: IntVect, _: usize) -> f64 {
    index.iter().enumerate().map(|(a, &i)| ((a + 1) as i64 * i) as f64).sum::<f64>().sin()
}

fn smooth(valid: &IndexSpace, _: Step, fab: &mut Fab) {
    let old = fab.clone();
    for index in valid {
        let mut sum = old.get(index, 0);
        for axis in 0..SPACE_DIM {
            for delta in [-1, 1] {
                let mut neighbor = index;
                neighbor[axis] += delta;
                sum += old.get(neighbor, 0);
            }
        }
        fab.set(index, 0, sum / (2 * SPACE_DIM + 1) as f64)
    }
}

/// Run the smoothing stencil on every worker of an in-process group and
/// collect the valid cells of every box.
fn stencil_on_workers(
    domain: IndexSpace,
    max_grid: usize,
    workers: usize,
    strategy: Strategy,
    runtime: RuntimeConfig,
    steps: usize,
) -> (BTreeMap<IntVect, f64>, IterationReport) {
    let boxes = BoxArray::decompose(domain, max_grid);
    let config = DistributionConfig::default().with_strategy(strategy);
    let dm = DistributionMapping::with_config(&boxes, workers, &config).unwrap();

    let handles: Vec<_> = LocalCommunicator::group(workers)
        .into_iter()
        .map(|comm| {
            let (boxes, dm, runtime) = (boxes.clone(), dm.clone(), runtime.clone());
            thread::spawn(move || run_stencil(comm, &boxes, &dm, runtime, steps, 1, initial, smooth).unwrap())
        })
        .collect();

    let mut cells = BTreeMap::new();
    let mut total = IterationReport::default();
    let mut comms = Vec::new();

    for handle in handles {
        let (fabs, report, comm) = handle.join().unwrap();
        for (_, fab) in fabs.iter() {
            for index in fab.valid() {
                cells.insert(index, fab.get(index, 0));
            }
        }
        total += report;
        comms.push(comm);
    }
    (cells, total)
}

fn domain(n: i64) -> IndexSpace {
    IndexSpace::new([0; SPACE_DIM], [n - 1; SPACE_DIM])
}

fn loopback_addresses(n: usize) -> Vec<SocketAddr> {
    let listeners: Vec<_> = (0..n)
        .map(|_| TcpListener::bind("127.0.0.1:0").unwrap())
        .collect();
    listeners.iter().map(|l| l.local_addr().unwrap()).collect()
}




#[test]
fn decomposed_stencil_matches_a_single_box() {
    let (reference, _) = stencil_on_workers(domain(12), 12, 1, Strategy::RoundRobin, RuntimeConfig::default(), 4);

    for (workers, strategy) in [(1, Strategy::Sfc), (2, Strategy::Knapsack), (3, Strategy::RoundRobin)] {
        let (cells, report) = stencil_on_workers(domain(12), 4, workers, strategy, RuntimeConfig::default(), 4);
        assert_eq!(cells, reference, "{} workers, {:?}", workers, strategy);
        assert_eq!(report.dropped, 0);

        if workers > 1 {
            assert!(report.sent_remote > 0);
            assert_eq!(report.sent_remote, report.received_remote);
        }
    }
}

#[test]
fn thread_pool_and_pull_mode_do_not_change_the_answer() {
    let (reference, _) = stencil_on_workers(domain(8), 8, 1, Strategy::RoundRobin, RuntimeConfig::default(), 3);
    let runtime = RuntimeConfig {
        num_threads: 3,
        mode: Mode::Pull,
        ..RuntimeConfig::default()
    };
    let (cells, report) = stencil_on_workers(domain(8), 2, 2, Strategy::Sfc, runtime, 3);
    assert_eq!(cells, reference);
    assert_eq!(report.jobs_run, 3 * 4usize.pow(SPACE_DIM as u32));
}

#[test]
fn stencil_over_tcp_matches_a_single_box() {
    let (reference, _) = stencil_on_workers(domain(8), 8, 1, Strategy::RoundRobin, RuntimeConfig::default(), 3);

    let boxes = BoxArray::decompose(domain(8), 4);
    let config = DistributionConfig::default().with_strategy(Strategy::RoundRobin);
    let dm = DistributionMapping::with_config(&boxes, 2, &config).unwrap();
    let peers = loopback_addresses(2);

    let handles: Vec<_> = (0..2)
        .map(|rank| {
            let (boxes, dm, peers) = (boxes.clone(), dm.clone(), peers.clone());
            thread::spawn(move || {
                let comm = TcpCommunicator::connect(rank, peers).unwrap();
                run_stencil(comm, &boxes, &dm, RuntimeConfig::default(), 3, 1, initial, smooth).unwrap()
            })
        })
        .collect();

    let mut cells = BTreeMap::new();
    let mut total = IterationReport::default();
    let mut comms = Vec::new();

    for handle in handles {
        let (fabs, report, comm) = handle.join().unwrap();
        for (_, fab) in fabs.iter() {
            for index in fab.valid() {
                cells.insert(index, fab.get(index, 0));
            }
        }
        total += report;
        comms.push(comm);
    }
    assert_eq!(cells, reference);
    assert!(total.sent_remote > 0);
    assert_eq!(total.sent_remote, total.received_remote);
    assert_eq!(total.dropped, 0);
}

#[test]
fn zero_steps_leaves_no_result() {
    let boxes = BoxArray::decompose(domain(4), 4);
    let dm = DistributionMapping::round_robin(boxes.len(), 1).unwrap();
    let result = run_stencil(
        LocalCommunicator::solo(),
        &boxes,
        &dm,
        RuntimeConfig::default(),
        0,
        1,
        initial,
        smooth,
    );
    assert!(matches!(result, Err(Error::MissingResult(0))));
}




// ============================================================================
struct Ping {
    peer: TaskName,
    rounds: i32,
}

impl Kernel for Ping {
    fn dependency(&self, step: Step, ctx: &TaskContext) -> bool {
        ctx.depend_on(&self.peer, step.index as i32 - 1)
    }

    fn compute(&mut self, step: Step, ctx: &mut TaskContext) {
        if !step.is_first() {
            let data = ctx.pull(&self.peer, step.index as i32 - 1).unwrap();
            self.rounds += data.buffer()[0] as i32;
        }
    }

    fn post_completion(&mut self, step: Step, ctx: &mut TaskContext) {
        if !step.is_last() {
            ctx.push(self.peer, vec![1], step.index as i32)
        }
    }
}

#[test]
fn ping_pong_across_two_workers() {
    let handles: Vec<_> = LocalCommunicator::group(2)
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let rank = comm.rank();
                let me = TaskName::from(rank as i32);
                let peer = TaskName::from(1 - rank as i32);
                let mut graph = TaskGraph::new("ping", rank, 2, Mode::Push)
                    .with_owner(|name| name[0] as usize);
                graph.insert(me, Action::new(Ping { peer, rounds: 0 }, 5)).unwrap();

                let mut rts = Rts::init(comm, RuntimeConfig::default());
                let report = rts.iterate(&mut graph).unwrap();
                (report, rts.finalize())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for (report, _) in &results {
        assert_eq!(report.jobs_run, 5);
        assert_eq!(report.sent_remote, 4);
        assert_eq!(report.received_remote, 4);
        assert_eq!(report.delivered_local, 0);
    }
}




// ============================================================================
struct Parent;

struct Child {
    reply_to: TaskName,
}

struct Collector {
    sink: crossbeam_channel::Sender<(TaskName, Vec<u8>)>,
    expect: usize,
    seen: usize,
}

impl Task for Parent {
    fn dependency(&self, _: &TaskContext) -> bool {
        true
    }

    fn job(&mut self, _: &mut TaskContext) {}

    fn post_completion(&mut self, ctx: &mut TaskContext) {
        for k in 0..3 {
            let child = TaskName::from((0, k));
            ctx.push(child, vec![k as u8], 0);
            ctx.register_task(child, Child { reply_to: TaskName::from(9) });
        }
    }
}

impl Task for Child {
    fn dependency(&self, ctx: &TaskContext) -> bool {
        ctx.depend_on(&TaskName::from(0), 0)
    }

    fn job(&mut self, ctx: &mut TaskContext) {
        let data = ctx.pull(&TaskName::from(0), 0).unwrap();
        ctx.push(self.reply_to, data.into_buffer(), 1)
    }
}

impl Task for Collector {
    fn dependency(&self, ctx: &TaskContext) -> bool {
        !ctx.inputs().is_empty()
    }

    fn job(&mut self, ctx: &mut TaskContext) {
        for (src, tag) in ctx.inputs().keys() {
            while let Some(data) = ctx.pull(&src, tag) {
                self.sink.send((src, data.into_buffer())).unwrap();
                self.seen += 1;
            }
        }
        if self.seen < self.expect {
            ctx.keep_alive()
        } else {
            ctx.self_destroy()
        }
    }
}

#[test]
fn spawned_tasks_join_the_next_round() {
    let (sink, source) = crossbeam_channel::unbounded();
    let mut graph = TaskGraph::new("spawn", 0, 1, Mode::Push);
    graph.insert(TaskName::from(0), Parent).unwrap();
    graph
        .insert(TaskName::from(9), Collector { sink, expect: 3, seen: 0 })
        .unwrap();

    let mut rts = Rts::init(LocalCommunicator::solo(), RuntimeConfig::default());
    let report = rts.iterate(&mut graph).unwrap();

    let mut replies: Vec<_> = source.try_iter().collect();
    replies.sort();
    assert_eq!(
        replies,
        vec![
            (TaskName::from((0, 0)), vec![0]),
            (TaskName::from((0, 1)), vec![1]),
            (TaskName::from((0, 2)), vec![2]),
        ]
    );
    assert_eq!(report.rounds, 3);
    assert_eq!(report.jobs_run, 5);
    assert_eq!(graph.state(&TaskName::from((0, 1))), Some(TaskState::Terminal));
    assert!(graph.is_empty());
}

#[test]
fn waiting_worker_gives_up_after_the_stall_timeout() {
    let handles: Vec<_> = LocalCommunicator::group(2)
        .into_iter()
        .map(|comm| {
            thread::spawn(move || {
                let rank = comm.rank();
                let mut graph = TaskGraph::new("stall", rank, 2, Mode::Push);
                if rank == 0 {
                    let (sink, _) = crossbeam_channel::unbounded();
                    graph
                        .insert(TaskName::from(9), Collector { sink, expect: 1, seen: 0 })
                        .unwrap();
                }
                let config = RuntimeConfig {
                    stall_timeout_ms: Some(50),
                    ..RuntimeConfig::default()
                };
                let mut rts = Rts::init(comm, config);
                let result = rts.iterate(&mut graph).map(|_| ());
                (result, rts.finalize())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(matches!(&results[0].0, Err(Error::Stalled { rank: 0, .. })));
    assert!(results[1].0.is_ok());
}
