//! End-to-end scenario crossing all three resource kinds in one engine.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use platsim::compute::events::{CompFinished, CompStarted};
use platsim::compute::{CpuModel, HostId};
use platsim::core::{cast, Event, EventHandler, SimulationContext};
use platsim::kernel::{ActorRegistry, Engine, EngineOutcome, UpdateStrategy};
use platsim::network::events::DataTransferCompleted;
use platsim::network::{NetworkModel, NodeId};
use platsim::storage::events::DataWriteCompleted;
use platsim::storage::{DiskId, DiskModel};

#[derive(Clone, Serialize)]
struct Start {}

/// Runs an execution, then sends the result over the network, then writes it to disk.
struct Worker {
    cpu: Rc<RefCell<CpuModel>>,
    host: HostId,
    network: Rc<RefCell<NetworkModel>>,
    disk: Rc<RefCell<DiskModel>>,
    disk_id: DiskId,
    src: NodeId,
    dst: NodeId,
    registry: ActorRegistry,
    ctx: SimulationContext,
    trace: Vec<(f64, String)>,
}

impl EventHandler for Worker {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Start {} => {
                let host = self.host;
                self.cpu.borrow_mut().exec_start(host, 200., 1, self.ctx.id());
            }
            CompStarted { id: _ } => {}
            CompFinished { id } => {
                self.trace.push((self.ctx.time(), format!("exec-{}", id)));
                self.network
                    .borrow_mut()
                    .transfer_start(self.src, self.dst, 300., -1., self.ctx.id());
            }
            DataTransferCompleted { id } => {
                self.trace.push((self.ctx.time(), format!("transfer-{}", id)));
                let disk_id = self.disk_id;
                self.disk.borrow_mut().write(disk_id, 250, self.ctx.id());
            }
            DataWriteCompleted { request_id, size: _ } => {
                self.trace.push((self.ctx.time(), format!("write-{}", request_id)));
                self.registry.finished(self.ctx.id());
            }
        })
    }
}

fn run_pipeline(strategy: UpdateStrategy) -> Vec<(f64, String)> {
    let mut engine = Engine::new(123);

    let cpu = Rc::new(RefCell::new(CpuModel::new(strategy, engine.sim().create_context("cpu"))));
    let host = cpu.borrow_mut().create_host("host", 100., 1);
    cpu.borrow_mut().seal_host(host);
    engine.add_model(cpu.clone());

    let network = Rc::new(RefCell::new(NetworkModel::new(
        strategy,
        engine.sim().create_context("network"),
    )));
    let (src, dst, link);
    {
        let mut net = network.borrow_mut();
        src = net.add_node();
        dst = net.add_node();
        link = net.create_link("link", 100., 0.5);
        net.seal_link(link);
        net.add_route(src, dst, vec![link]);
    }
    engine.add_model(network.clone());

    let disk = Rc::new(RefCell::new(DiskModel::new(engine.sim().create_context("disk"))));
    let disk_id = disk.borrow_mut().create_disk("disk", 100., 50., 1000);
    disk.borrow_mut().seal_disk(disk_id);
    engine.add_model(disk.clone());

    let worker = Rc::new(RefCell::new(Worker {
        cpu,
        host,
        network,
        disk,
        disk_id,
        src,
        dst,
        registry: engine.actor_registry(),
        ctx: engine.sim().create_context("worker"),
        trace: Vec::new(),
    }));
    let worker_id = engine.sim().add_handler("worker", worker.clone());
    engine.actor_registry().register(worker_id, false);

    worker.borrow().ctx.emit_self(Start {}, 0.);
    assert_eq!(engine.run(), EngineOutcome::Completed);
    let trace = worker.borrow().trace.clone();
    trace
}

#[test]
fn pipeline_crosses_all_resource_kinds() {
    for strategy in [UpdateStrategy::Lazy, UpdateStrategy::Full] {
        let trace = run_pipeline(strategy);
        // exec: 200 flops at 100 flops/s, transfer: 0.5s latency + 300B at 100 B/s,
        // write: 250B at 50 B/s
        assert_eq!(trace.len(), 3);
        assert_eq!(trace[0], (2., "exec-0".to_owned()));
        assert_eq!(trace[1], (5.5, "transfer-0".to_owned()));
        assert_eq!(trace[2], (10.5, "write-0".to_owned()));
    }
}

#[test]
fn identical_scenarios_produce_identical_traces() {
    assert_eq!(run_pipeline(UpdateStrategy::Lazy), run_pipeline(UpdateStrategy::Lazy));
    assert_eq!(run_pipeline(UpdateStrategy::Full), run_pipeline(UpdateStrategy::Full));
}
