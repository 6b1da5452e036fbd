use crate::scripts::ScriptContext;
use anyhow::Result;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum AwaitState {
    Pending,
    Resolved(Value),
    Rejected(String),
}

/// Settleable handle a coroutine can suspend on. Settles at most once;
/// later resolve/reject calls are ignored.
#[derive(Clone)]
pub struct AwaitHandle(Rc<RefCell<AwaitState>>);

impl AwaitHandle {
    pub fn pending() -> Self {
        Self(Rc::new(RefCell::new(AwaitState::Pending)))
    }

    pub fn resolved(value: Value) -> Self {
        Self(Rc::new(RefCell::new(AwaitState::Resolved(value))))
    }

    pub fn resolve(&self, value: Value) {
        let mut state = self.0.borrow_mut();
        if matches!(*state, AwaitState::Pending) {
            *state = AwaitState::Resolved(value);
        }
    }

    pub fn reject(&self, reason: impl Into<String>) {
        let mut state = self.0.borrow_mut();
        if matches!(*state, AwaitState::Pending) {
            *state = AwaitState::Rejected(reason.into());
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(*self.0.borrow(), AwaitState::Pending)
    }

    pub fn state(&self) -> AwaitState {
        self.0.borrow().clone()
    }
}

#[derive(Clone, Debug)]
pub enum ResumeInput {
    Delta(f32),
    Resolved(Value),
    Failed(String),
}

#[derive(Clone)]
pub enum Wait {
    NextTick,
    Until(AwaitHandle),
}

pub enum CoroutinePoll {
    Yielded(Wait),
    Complete,
}

/// A resumable unit of script logic. Suspension happens only by
/// returning `Yielded`.
pub trait Coroutine {
    fn resume(&mut self, ctx: &mut ScriptContext<'_, '_>, input: ResumeInput) -> Result<CoroutinePoll>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CoroutineId(pub(crate) u64);

pub(crate) struct CoroutineSlot {
    pub id: CoroutineId,
    pub body: Box<dyn Coroutine>,
    pub wait: Wait,
}

/// Waits its duration in simulated time, then emits one event.
pub struct TimerCoroutine {
    remaining: f32,
    event: String,
}

impl TimerCoroutine {
    pub fn new(seconds: f32, event: impl Into<String>) -> Self {
        Self { remaining: seconds, event: event.into() }
    }
}

impl Coroutine for TimerCoroutine {
    fn resume(&mut self, ctx: &mut ScriptContext<'_, '_>, input: ResumeInput) -> Result<CoroutinePoll> {
        if let ResumeInput::Delta(dt) = input {
            self.remaining -= dt;
        }
        if self.remaining <= 0.0 {
            let object = ctx.object();
            ctx.emit(self.event.clone(), json!({ "source": object.index() }));
            Ok(CoroutinePoll::Complete)
        } else {
            Ok(CoroutinePoll::Yielded(Wait::NextTick))
        }
    }
}
