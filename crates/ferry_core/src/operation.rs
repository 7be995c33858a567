//! Single-threaded cooperative scheduler.
//!
//! Every asynchronous task is an explicit state machine implementing
//! [`AsyncOperation`]. The host ticks [`OperationSystem::update`] once per
//! frame; each active operation gets one `on_update` call per tick until the
//! per-tick time slice runs out.

use futures::channel::oneshot;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::future::Future;
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Error string of operations force-failed by
/// [`OperationSystem::clear_package_operation`].
pub const ABORT_ERROR: &str = "user abort";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationStatus {
    #[default]
    None,
    Processing,
    Succeed,
    Failed,
}

impl OperationStatus {
    pub fn is_done(self) -> bool {
        matches!(self, OperationStatus::Succeed | OperationStatus::Failed)
    }
}

/// State every operation carries: status, error, progress and the
/// completion listeners.
#[derive(Default)]
pub struct OperationBase {
    package_name: String,
    status: OperationStatus,
    error: String,
    progress: f32,
    finished: bool,
    callbacks: Vec<Box<dyn FnOnce()>>,
    waiters: Vec<oneshot::Sender<OperationStatus>>,
}

impl OperationBase {
    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    pub fn set_progress(&mut self, progress: f32) {
        self.progress = progress;
    }

    pub fn succeed(&mut self) {
        self.status = OperationStatus::Succeed;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = OperationStatus::Failed;
        self.error = error.into();
    }

    /// Marks the operation finished and hands back the callbacks to run.
    /// Returns nothing on every call after the first.
    fn take_completion(&mut self) -> Vec<Box<dyn FnOnce()>> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        self.progress = 1.0;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(self.status);
        }
        std::mem::take(&mut self.callbacks)
    }
}

pub trait AsyncOperation: 'static {
    fn base(&self) -> &OperationBase;
    fn base_mut(&mut self) -> &mut OperationBase;

    /// Called once when the operation is submitted.
    fn on_start(&mut self, system: &OperationSystem);

    /// Advance the current step by the minimal unit of work.
    fn on_update(&mut self, system: &OperationSystem);

    /// Release whatever the current step holds before a forced failure.
    fn on_abort(&mut self) {}

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

type SharedOperation = Rc<RefCell<dyn AsyncOperation>>;

fn finalize(operation: &SharedOperation) {
    let callbacks = operation.borrow_mut().base_mut().take_completion();
    for callback in callbacks {
        callback();
    }
}

fn abort(operation: &SharedOperation) {
    let mut guard = operation.borrow_mut();
    if !guard.base().is_done() {
        guard.on_abort();
        guard.base_mut().fail(ABORT_ERROR);
        warn!(
            package = guard.base().package_name(),
            "Async operation has been aborted: {}",
            guard.name()
        );
    }
}

enum ClearRequest {
    Package(String),
    All,
}

pub struct OperationSystem {
    new_list: RefCell<Vec<SharedOperation>>,
    operations: RefCell<Vec<SharedOperation>>,
    /// Operations taken out of `operations` by the running tick.
    stepping: Cell<usize>,
    updating: Cell<bool>,
    pending_clears: RefCell<Vec<ClearRequest>>,
    max_time_slice: Cell<Duration>,
    frame_time: Cell<Instant>,
}

impl Default for OperationSystem {
    fn default() -> Self {
        Self::new(Duration::MAX)
    }
}

impl OperationSystem {
    pub fn new(max_time_slice: Duration) -> Self {
        Self {
            new_list: RefCell::new(Vec::new()),
            operations: RefCell::new(Vec::with_capacity(100)),
            stepping: Cell::new(0),
            updating: Cell::new(false),
            pending_clears: RefCell::new(Vec::new()),
            max_time_slice: Cell::new(max_time_slice),
            frame_time: Cell::new(Instant::now()),
        }
    }

    pub fn set_max_time_slice(&self, max_time_slice: Duration) {
        self.max_time_slice.set(max_time_slice);
    }

    /// The current tick has used up its time slice.
    pub fn is_busy(&self) -> bool {
        self.frame_time.get().elapsed() >= self.max_time_slice.get()
    }

    /// Number of submitted operations not yet finalized.
    pub fn len(&self) -> usize {
        self.new_list.borrow().len() + self.operations.borrow().len() + self.stepping.get()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn update(&self) {
        self.frame_time.set(Instant::now());

        {
            let mut new_list = self.new_list.borrow_mut();
            if !new_list.is_empty() {
                self.operations.borrow_mut().append(&mut new_list);
            }
        }

        // Stepping works on a detached list so operation code may query or
        // clear the scheduler.
        let mut operations = std::mem::take(&mut *self.operations.borrow_mut());
        self.stepping.set(operations.len());
        self.updating.set(true);

        let mut finished = Vec::new();
        {
            let mut stepped = 0usize;
            let mut index = operations.len();
            while index > 0 {
                // The budget is checked between operations, never inside one,
                // and at least one step runs per tick.
                if stepped > 0 && self.is_busy() {
                    break;
                }
                index -= 1;

                let operation = operations[index].clone();
                let done = {
                    let mut guard = operation.borrow_mut();
                    if !guard.base().is_done() {
                        guard.on_update(self);
                        stepped += 1;
                    }
                    guard.base().is_done()
                };
                if done {
                    operations.remove(index);
                    self.stepping.set(operations.len());
                    finished.push(operation);
                }
            }
        }

        *self.operations.borrow_mut() = operations;
        self.stepping.set(0);
        self.updating.set(false);

        let requests = std::mem::take(&mut *self.pending_clears.borrow_mut());
        for request in requests {
            match request {
                ClearRequest::Package(package_name) => self.clear_package_operation(&package_name),
                ClearRequest::All => self.destroy(),
            }
        }

        // Listeners run with no scheduler borrow held, so they may submit or
        // clear operations.
        for operation in &finished {
            finalize(operation);
        }
    }

    pub fn start_operation<T: AsyncOperation>(
        &self,
        package_name: &str,
        operation: T,
    ) -> OperationHandle<T> {
        let handle = OperationHandle::new(operation);
        self.start(package_name, &handle);
        handle
    }

    /// Submits an operation created with [`OperationHandle::new`].
    /// Does nothing if it was already started.
    pub fn start<T: AsyncOperation>(&self, package_name: &str, handle: &OperationHandle<T>) {
        {
            let mut operation = handle.inner.borrow_mut();
            let base = operation.base_mut();
            if base.status != OperationStatus::None {
                return;
            }
            base.package_name = package_name.to_string();
            base.status = OperationStatus::Processing;
            operation.on_start(self);
        }
        let shared: SharedOperation = handle.inner.clone();
        self.new_list.borrow_mut().push(shared);
    }

    /// Force-fails every pending or active operation of `package_name`.
    ///
    /// Called while a tick is stepping, the request is applied once every
    /// step of that tick has run.
    pub fn clear_package_operation(&self, package_name: &str) {
        if self.updating.get() {
            self.pending_clears
                .borrow_mut()
                .push(ClearRequest::Package(package_name.to_string()));
            return;
        }

        let mut aborted = Vec::new();
        for list in [&self.new_list, &self.operations] {
            list.borrow_mut().retain(|operation| {
                if operation.borrow().base().package_name() == package_name {
                    aborted.push(operation.clone());
                    false
                } else {
                    true
                }
            });
        }

        for operation in &aborted {
            abort(operation);
            finalize(operation);
        }
    }

    /// Aborts everything regardless of package.
    pub fn destroy(&self) {
        if self.updating.get() {
            self.pending_clears.borrow_mut().push(ClearRequest::All);
            return;
        }

        let mut aborted: Vec<SharedOperation> = self.new_list.borrow_mut().drain(..).collect();
        aborted.extend(self.operations.borrow_mut().drain(..));
        for operation in &aborted {
            abort(operation);
            finalize(operation);
        }
    }
}

/// Caller-facing reference to a submitted operation.
pub struct OperationHandle<T: AsyncOperation> {
    inner: Rc<RefCell<T>>,
}

impl<T: AsyncOperation> Clone for OperationHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: AsyncOperation> OperationHandle<T> {
    /// Wraps an operation without submitting it.
    pub fn new(operation: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(operation)),
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.inner.borrow().base().status()
    }

    pub fn error(&self) -> String {
        self.inner.borrow().base().error().to_string()
    }

    pub fn progress(&self) -> f32 {
        self.inner.borrow().base().progress()
    }

    pub fn is_done(&self) -> bool {
        self.inner.borrow().base().is_done()
    }

    pub fn package_name(&self) -> String {
        self.inner.borrow().base().package_name().to_string()
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Runs `callback` once the operation is finalized, or right away if it
    /// already was.
    pub fn on_completed(&self, callback: impl FnOnce(&T) + 'static) {
        if self.inner.borrow().base().finished {
            callback(&*self.inner.borrow());
            return;
        }

        let weak = Rc::downgrade(&self.inner);
        self.inner
            .borrow_mut()
            .base_mut()
            .callbacks
            .push(Box::new(move || {
                if let Some(operation) = weak.upgrade() {
                    callback(&*operation.borrow());
                }
            }));
    }

    /// Resolves with the terminal status once the operation is finalized.
    pub fn task(&self) -> impl Future<Output = OperationStatus> + 'static {
        let mut operation = self.inner.borrow_mut();
        let status = operation.base().status();
        let receiver = if operation.base().finished {
            None
        } else {
            let (sender, receiver) = oneshot::channel();
            operation.base_mut().waiters.push(sender);
            Some(receiver)
        };

        async move {
            match receiver {
                Some(receiver) => receiver.await.unwrap_or(OperationStatus::Failed),
                None => status,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct CountingOperation {
        base: OperationBase,
        label: &'static str,
        steps_to_finish: usize,
        steps: usize,
        step_cost: Duration,
        log: Rc<RefCell<Vec<&'static str>>>,
        spawn_child: Option<Rc<RefCell<Option<OperationHandle<CountingOperation>>>>>,
        on_step: Option<Rc<dyn Fn(&OperationSystem)>>,
    }

    impl AsyncOperation for CountingOperation {
        fn base(&self) -> &OperationBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut OperationBase {
            &mut self.base
        }

        fn on_start(&mut self, _system: &OperationSystem) {}

        fn on_update(&mut self, system: &OperationSystem) {
            if !self.step_cost.is_zero() {
                thread::sleep(self.step_cost);
            }
            self.log.borrow_mut().push(self.label);
            self.steps += 1;
            if let Some(hook) = self.on_step.clone() {
                hook(system);
            }

            if let Some(slot) = self.spawn_child.take() {
                let child = CountingOperation {
                    label: "child",
                    steps_to_finish: 1,
                    log: self.log.clone(),
                    ..Default::default()
                };
                *slot.borrow_mut() = Some(system.start_operation("pkg", child));
            }

            if self.steps >= self.steps_to_finish {
                self.base.succeed();
            }
        }
    }

    fn counting(label: &'static str, steps: usize, log: &Rc<RefCell<Vec<&'static str>>>) -> CountingOperation {
        CountingOperation {
            label,
            steps_to_finish: steps,
            log: log.clone(),
            ..Default::default()
        }
    }

    #[test]
    fn steps_in_reverse_submission_order() {
        let system = OperationSystem::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        system.start_operation("pkg", counting("a", 2, &log));
        system.start_operation("pkg", counting("b", 2, &log));
        system.start_operation("pkg", counting("c", 2, &log));

        system.update();
        assert_eq!(*log.borrow(), ["c", "b", "a"]);
        system.update();
        assert!(system.is_empty());
    }

    #[test]
    fn operation_submitted_during_tick_waits_for_next_tick() {
        let system = OperationSystem::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let slot = Rc::new(RefCell::new(None));

        let mut parent = counting("parent", 1, &log);
        parent.spawn_child = Some(slot.clone());
        system.start_operation("pkg", parent);

        system.update();
        assert_eq!(*log.borrow(), ["parent"]);
        assert_eq!(system.len(), 1);

        system.update();
        assert_eq!(*log.borrow(), ["parent", "child"]);
        assert!(slot.borrow().as_ref().unwrap().is_done());
    }

    #[test]
    fn time_slice_limits_steps_per_tick() {
        let system = OperationSystem::new(Duration::from_millis(1));
        let log = Rc::new(RefCell::new(Vec::new()));
        for label in ["a", "b", "c"] {
            let mut operation = counting(label, 1, &log);
            operation.step_cost = Duration::from_millis(5);
            system.start_operation("pkg", operation);
        }

        system.update();
        assert_eq!(log.borrow().len(), 1);
        system.update();
        assert_eq!(log.borrow().len(), 2);
        system.update();
        assert_eq!(log.borrow().len(), 3);
        system.update();
        assert!(system.is_empty());
    }

    #[test]
    fn completion_fires_exactly_once() {
        let system = OperationSystem::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let handle = system.start_operation("pkg", counting("a", 1, &log));

        let fired = Rc::new(Cell::new(0));
        let counter = fired.clone();
        handle.on_completed(move |op| {
            assert_eq!(op.base().status(), OperationStatus::Succeed);
            counter.set(counter.get() + 1);
        });
        let task = handle.task();

        system.update();
        system.update();
        assert_eq!(fired.get(), 1);
        assert_eq!(handle.progress(), 1.0);
        assert_eq!(futures::executor::block_on(task), OperationStatus::Succeed);

        // Late listeners run immediately.
        let counter = fired.clone();
        handle.on_completed(move |_| counter.set(counter.get() + 1));
        assert_eq!(fired.get(), 2);
    }

    #[test]
    fn clearing_a_package_aborts_pending_and_active_operations() {
        let system = OperationSystem::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let active = system.start_operation("pkg", counting("active", 10, &log));
        system.update();
        let pending = system.start_operation("pkg", counting("pending", 10, &log));
        let other = system.start_operation("other", counting("other", 10, &log));

        let errors = Rc::new(RefCell::new(Vec::new()));
        for handle in [&active, &pending] {
            let errors = errors.clone();
            handle.on_completed(move |op| errors.borrow_mut().push(op.base().error().to_string()));
        }

        system.clear_package_operation("pkg");

        assert_eq!(active.status(), OperationStatus::Failed);
        assert_eq!(pending.status(), OperationStatus::Failed);
        assert_eq!(*errors.borrow(), [ABORT_ERROR, ABORT_ERROR]);
        assert_eq!(other.status(), OperationStatus::Processing);
        assert_eq!(system.len(), 1);

        system.update();
        assert_eq!(errors.borrow().len(), 2);
    }

    #[test]
    fn clearing_from_inside_a_step_applies_after_the_tick() {
        let system = OperationSystem::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen_len = Rc::new(Cell::new(0));

        let victim = system.start_operation("pkg", counting("victim", 10, &log));
        let mut clearer = counting("clearer", 10, &log);
        let seen = seen_len.clone();
        clearer.on_step = Some(Rc::new(move |system: &OperationSystem| {
            seen.set(system.len());
            system.clear_package_operation("pkg");
        }));
        let clearer = system.start_operation("pkg", clearer);

        system.update();

        // Both operations still stepped this tick.
        assert_eq!(*log.borrow(), ["clearer", "victim"]);
        assert_eq!(seen_len.get(), 2);
        assert_eq!(victim.status(), OperationStatus::Failed);
        assert_eq!(clearer.error(), ABORT_ERROR);
        assert!(system.is_empty());
    }

    #[test]
    fn completion_listener_may_clear_and_count() {
        let system = OperationSystem::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = system.start_operation("pkg", counting("first", 1, &log));
        let second = system.start_operation("pkg", counting("second", 10, &log));

        let system = Rc::new(system);
        let weak = Rc::downgrade(&system);
        let seen_len = Rc::new(Cell::new(usize::MAX));
        let seen = seen_len.clone();
        first.on_completed(move |_| {
            if let Some(system) = weak.upgrade() {
                seen.set(system.len());
                system.clear_package_operation("pkg");
            }
        });

        system.update();
        assert_eq!(seen_len.get(), 1);
        assert_eq!(first.status(), OperationStatus::Succeed);
        assert_eq!(second.status(), OperationStatus::Failed);
        assert!(system.is_empty());
    }
}
