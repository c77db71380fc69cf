use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use platsim_core::{cast, Event, EventHandler, SimulationContext};
use platsim_kernel::{ActorRegistry, Engine, EngineOutcome, UpdateStrategy};

use crate::events::{CompFailed, CompFinished, CompStarted};
use crate::model::{CpuModel, HostId};
use crate::Compute;

#[derive(Clone, Serialize)]
struct Exec {
    flops: f64,
    cores: u32,
}

#[derive(Clone, Serialize)]
struct ScaleChange {
    host: HostId,
    scale: f64,
}

#[derive(Clone, Serialize)]
struct Failure {
    host: HostId,
}

#[derive(Clone, Serialize)]
struct Preempt {
    request_id: u64,
}

#[derive(Clone, Serialize)]
struct Resume {
    request_id: u64,
}

struct Client {
    model: Rc<RefCell<CpuModel>>,
    compute: Compute,
    registry: ActorRegistry,
    ctx: SimulationContext,
    expected: usize,
    started: Vec<u64>,
    completed: Vec<(f64, u64)>,
    failed: Vec<(f64, u64)>,
}

impl Client {
    fn check_done(&self) {
        if self.completed.len() + self.failed.len() == self.expected {
            self.registry.finished(self.ctx.id());
        }
    }
}

impl EventHandler for Client {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Exec { flops, cores } => {
                self.compute.run(flops, cores, self.ctx.id());
            }
            ScaleChange { host, scale } => {
                self.model.borrow_mut().set_speed_scale(host, scale);
            }
            Failure { host } => {
                self.model.borrow_mut().turn_off(host);
            }
            Preempt { request_id } => {
                self.model.borrow_mut().preempt(request_id);
            }
            Resume { request_id } => {
                self.model.borrow_mut().resume(request_id);
            }
            CompStarted { id } => {
                self.started.push(id);
            }
            CompFinished { id } => {
                self.completed.push((self.ctx.time(), id));
                self.check_done();
            }
            CompFailed { id, reason: _ } => {
                self.failed.push((self.ctx.time(), id));
                self.check_done();
            }
        })
    }
}

struct TestEnv {
    engine: Engine,
    model: Rc<RefCell<CpuModel>>,
    host: HostId,
    client: Rc<RefCell<Client>>,
}

fn setup(strategy: UpdateStrategy, speed: f64, cores: u32, expected: usize) -> TestEnv {
    let mut engine = Engine::new(123);
    let model = Rc::new(RefCell::new(CpuModel::new(strategy, engine.sim().create_context("cpu"))));
    let host = model.borrow_mut().create_host("host", speed, cores);
    model.borrow_mut().seal_host(host);
    engine.add_model(model.clone());
    let client = Rc::new(RefCell::new(Client {
        model: model.clone(),
        compute: Compute::new(model.clone(), host),
        registry: engine.actor_registry(),
        ctx: engine.sim().create_context("client"),
        expected,
        started: Vec::new(),
        completed: Vec::new(),
        failed: Vec::new(),
    }));
    let client_id = engine.sim().add_handler("client", client.clone());
    engine.actor_registry().register(client_id, false);
    TestEnv {
        engine,
        model,
        host,
        client,
    }
}

#[test]
fn equal_executions_share_host() {
    for strategy in [UpdateStrategy::Lazy, UpdateStrategy::Full] {
        let mut env = setup(strategy, 100., 1, 2);
        for _ in 0..2 {
            env.client.borrow().ctx.emit_self(Exec { flops: 200., cores: 1 }, 0.);
        }
        assert_eq!(env.engine.run(), EngineOutcome::Completed);
        let client = env.client.borrow();
        assert_eq!(client.started.len(), 2);
        assert_eq!(client.completed.len(), 2);
        for &(time, _) in &client.completed {
            assert!((time - 4.).abs() < 1e-9, "finish time {} != 4", time);
        }
    }
}

#[test]
fn multicore_execution_is_capped_by_requested_cores() {
    let mut env = setup(UpdateStrategy::Lazy, 100., 4, 1);
    env.client.borrow().ctx.emit_self(Exec { flops: 400., cores: 2 }, 0.);
    assert_eq!(env.engine.run(), EngineOutcome::Completed);
    // 2 cores x 100 flops/s, the remaining host capacity stays unused
    assert_eq!(env.client.borrow().completed, vec![(2., 0)]);
}

#[test]
fn mixed_core_counts() {
    let mut env = setup(UpdateStrategy::Lazy, 100., 4, 2);
    env.client.borrow().ctx.emit_self(Exec { flops: 320., cores: 2 }, 0.);
    env.client.borrow().ctx.emit_self(Exec { flops: 80., cores: 1 }, 0.);
    assert_eq!(env.engine.run(), EngineOutcome::Completed);
    // both run at their core-count caps, the host is not saturated
    assert_eq!(env.client.borrow().completed, vec![(0.8, 1), (1.6, 0)]);
}

#[test]
fn speed_scale_change_preserves_progress() {
    for strategy in [UpdateStrategy::Lazy, UpdateStrategy::Full] {
        let mut env = setup(strategy, 100., 1, 1);
        let host = env.host;
        env.client.borrow().ctx.emit_self(Exec { flops: 200., cores: 1 }, 0.);
        env.client.borrow().ctx.emit_self(ScaleChange { host, scale: 0.5 }, 1.);
        assert_eq!(env.engine.run(), EngineOutcome::Completed);
        // 100 flops done in the first second, the rest at 50 flops/s
        assert_eq!(env.client.borrow().completed, vec![(3., 0)]);
    }
}

#[test]
fn host_failure_fails_running_executions() {
    for strategy in [UpdateStrategy::Lazy, UpdateStrategy::Full] {
        let mut env = setup(strategy, 100., 1, 1);
        let host = env.host;
        env.client.borrow().ctx.emit_self(Exec { flops: 1000., cores: 1 }, 0.);
        env.client.borrow().ctx.emit_self(Failure { host }, 1.);
        assert_eq!(env.engine.run(), EngineOutcome::Completed);
        let client = env.client.borrow();
        assert!(client.completed.is_empty());
        assert_eq!(client.failed, vec![(1., 0)]);
        assert!(!env.model.borrow().is_host_on(host));
    }
}

#[test]
fn sleep_finishes_after_duration() {
    for strategy in [UpdateStrategy::Lazy, UpdateStrategy::Full] {
        let mut env = setup(strategy, 100., 1, 1);
        let client_id = env.client.borrow().ctx.id();
        env.client.borrow_mut().compute.sleep(5., client_id);
        assert_eq!(env.engine.run(), EngineOutcome::Completed);
        assert_eq!(env.client.borrow().completed, vec![(5., 0)]);
    }
}

#[test]
fn sleep_does_not_slow_down_executions() {
    let mut env = setup(UpdateStrategy::Lazy, 100., 1, 2);
    let client_id = env.client.borrow().ctx.id();
    env.client.borrow_mut().compute.sleep(10., client_id);
    env.client.borrow().ctx.emit_self(Exec { flops: 200., cores: 1 }, 0.);
    assert_eq!(env.engine.run(), EngineOutcome::Completed);
    // the sleep holds no capacity, the execution runs at full speed
    assert_eq!(env.client.borrow().completed, vec![(2., 1), (10., 0)]);
}

#[test]
fn preempted_execution_makes_no_progress() {
    for strategy in [UpdateStrategy::Lazy, UpdateStrategy::Full] {
        let mut env = setup(strategy, 100., 1, 1);
        let client_id = env.client.borrow().ctx.id();
        let request_id = env.client.borrow_mut().compute.run(200., 1, client_id);
        env.client.borrow().ctx.emit_self(Preempt { request_id }, 1.);
        env.client.borrow().ctx.emit_self(Resume { request_id }, 2.);
        assert_eq!(env.engine.run(), EngineOutcome::Completed);
        // one second of the work is shifted by the suspension interval
        assert_eq!(env.client.borrow().completed, vec![(3., request_id)]);
    }
}

#[test]
fn preemption_frees_capacity_for_others() {
    let mut env = setup(UpdateStrategy::Lazy, 100., 1, 2);
    let client_id = env.client.borrow().ctx.id();
    let preempted = env.client.borrow_mut().compute.run(1000., 1, client_id);
    env.client.borrow().ctx.emit_self(Exec { flops: 200., cores: 1 }, 1.);
    env.client.borrow().ctx.emit_self(Preempt { request_id: preempted }, 1.);
    env.client.borrow().ctx.emit_self(Resume { request_id: preempted }, 3.);
    assert_eq!(env.engine.run(), EngineOutcome::Completed);
    // the second execution runs alone while the first one is suspended
    let client = env.client.borrow();
    assert_eq!(client.completed[0], (3., 1));
    assert_eq!(client.completed[1].1, preempted);
    assert!((client.completed[1].0 - 12.).abs() < 1e-9);
}

#[test]
fn cancellation_releases_host_capacity() {
    let mut env = setup(UpdateStrategy::Lazy, 100., 1, 1);
    let client_id = env.client.borrow().ctx.id();
    let kept = env.client.borrow_mut().compute.run(200., 1, client_id);
    let canceled = env.client.borrow_mut().compute.run(200., 1, client_id);
    env.client.borrow_mut().compute.cancel(canceled);
    env.client.borrow_mut().expected = 1;
    assert_eq!(env.engine.run(), EngineOutcome::Completed);
    assert_eq!(env.client.borrow().completed, vec![(2., kept)]);
}

#[test]
#[should_panic(expected = "already sealed")]
fn double_seal_is_rejected() {
    let mut engine = Engine::new(123);
    let mut model = CpuModel::new(UpdateStrategy::Lazy, engine.sim().create_context("cpu"));
    let host = model.create_host("host", 100., 1);
    model.seal_host(host);
    model.seal_host(host);
}

#[test]
#[should_panic(expected = "invalid speed")]
fn non_positive_speed_is_rejected() {
    let mut engine = Engine::new(123);
    let mut model = CpuModel::new(UpdateStrategy::Lazy, engine.sim().create_context("cpu"));
    model.create_host("host", 0., 1);
}
