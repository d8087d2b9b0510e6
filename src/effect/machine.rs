//! The type-erased interpreter behind [`Effect`](super::Effect).
//!
//! # Design
//!
//! ```text
//! Node = Done(value) | Fail(error) | Abort(fault) | Request(ability)
//!      | Defer(thunk) | Bind(node, k) | Recover(node, r) | Scope(node, handler)
//! ```
//!
//! [`Machine::advance`] runs a loop over the current node with an explicit
//! frame stack, so deep `flat_map` chains and recursive loops built from
//! effects never grow the native call stack. A step is taken exactly once:
//! every node and frame is moved out of the machine before it runs.

use crate::ability::AbilityRequest;
use crate::error::Fault;
use crate::handler::{ErasedHandler, dispatch};
use smallvec::SmallVec;
use std::any::Any;
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// A type-erased value flowing between steps.
pub(crate) type Value = Box<dyn Any>;

pub(crate) type Continuation = Box<dyn FnOnce(Value) -> Node>;

/// Receives an error; `Ok` continues with a node, `Err` rethrows.
pub(crate) type Recovery = Box<dyn FnOnce(Value) -> Result<Node, Value>>;

const INLINE_FRAMES: usize = 8;

pub(crate) enum Node {
    Done(Value),
    Fail(Value),
    Abort(Fault),
    Request(AbilityRequest),
    Defer(Box<dyn FnOnce() -> Node>),
    Bind(Box<Node>, Continuation),
    Recover(Box<Node>, Recovery),
    Scope(Box<Node>, Arc<dyn ErasedHandler>),
}

impl Node {
    #[inline]
    pub(crate) fn done<T: 'static>(value: T) -> Self {
        Self::Done(Box::new(value))
    }

    #[inline]
    pub(crate) fn fail<T: 'static>(error: T) -> Self {
        Self::Fail(Box::new(error))
    }

    #[inline]
    pub(crate) fn defer<F>(thunk: F) -> Self
    where
        F: FnOnce() -> Self + 'static,
    {
        Self::Defer(Box::new(thunk))
    }

    #[inline]
    pub(crate) fn bind<K>(self, continuation: K) -> Self
    where
        K: FnOnce(Value) -> Self + 'static,
    {
        Self::Bind(Box::new(self), Box::new(continuation))
    }

    #[inline]
    pub(crate) fn recover<K>(self, recovery: K) -> Self
    where
        K: FnOnce(Value) -> Result<Self, Value> + 'static,
    {
        Self::Recover(Box::new(self), Box::new(recovery))
    }

    #[inline]
    pub(crate) fn scope(self, handler: Arc<dyn ErasedHandler>) -> Self {
        Self::Scope(Box::new(self), handler)
    }

    pub(crate) const fn mismatch(context: &'static str) -> Self {
        Self::Abort(Fault::Interpreter { context })
    }
}

/// Boxes a value as a rethrown error.
#[inline]
pub(crate) fn rethrow<T: 'static>(error: T) -> Value {
    Box::new(error)
}

enum Frame {
    Bind(Continuation),
    Recover(Recovery),
    Scope(Arc<dyn ErasedHandler>),
}

/// How [`Machine::advance`] stopped.
pub(crate) enum Exit {
    Complete(Value),
    Error(Value),
    Abort(Fault),
    Suspend(AbilityRequest),
}

// =============================================================================
// Run Identity
// =============================================================================

/// Identifies one machine, and so one run of an effect, for as long as the
/// process lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RunId(u64);

static NEXT_RUN: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// The run whose steps are executing on this thread.
    static CURRENT_RUN: Cell<Option<RunId>> = const { Cell::new(None) };
}

/// The run currently advancing on this thread, if any.
///
/// Drivers interleaving several computations on one thread switch it with
/// every call to [`Machine::advance`].
pub(crate) fn current_run() -> Option<RunId> {
    CURRENT_RUN.with(Cell::get)
}

/// Marks a run as current until dropped, then restores the enclosing one.
struct Entered {
    previous: Option<RunId>,
}

impl Entered {
    fn new(run: RunId) -> Self {
        Self {
            previous: CURRENT_RUN.with(|current| current.replace(Some(run))),
        }
    }
}

impl Drop for Entered {
    fn drop(&mut self) {
        CURRENT_RUN.with(|current| current.set(self.previous));
    }
}

// =============================================================================
// Machine
// =============================================================================

pub(crate) struct Machine {
    run: RunId,
    current: Option<Node>,
    frames: SmallVec<[Frame; INLINE_FRAMES]>,
}

impl Machine {
    pub(crate) fn new(node: Node) -> Self {
        Self {
            run: RunId(NEXT_RUN.fetch_add(1, Ordering::Relaxed)),
            current: Some(node),
            frames: SmallVec::new(),
        }
    }

    /// Continues a suspended machine with the handler's output.
    pub(crate) fn feed(&mut self, value: Value) {
        self.current = Some(Node::Done(value));
    }

    /// Runs until the computation completes, fails, aborts, or reaches an
    /// ability request no enclosing scope resolves.
    pub(crate) fn advance(&mut self) -> Exit {
        let _entered = Entered::new(self.run);
        loop {
            let Some(node) = self.current.take() else {
                return Exit::Abort(Fault::Interpreter {
                    context: "machine advanced without a pending step",
                });
            };
            match node {
                Node::Done(value) => loop {
                    match self.frames.pop() {
                        None => return Exit::Complete(value),
                        Some(Frame::Bind(continuation)) => {
                            self.current = Some(continuation(value));
                            break;
                        }
                        Some(Frame::Recover(_) | Frame::Scope(_)) => {}
                    }
                },
                Node::Fail(mut error) => loop {
                    match self.frames.pop() {
                        None => return Exit::Error(error),
                        Some(Frame::Recover(recovery)) => match recovery(error) {
                            Ok(next) => {
                                self.current = Some(next);
                                break;
                            }
                            Err(rethrown) => error = rethrown,
                        },
                        Some(Frame::Bind(_) | Frame::Scope(_)) => {}
                    }
                },
                Node::Abort(fault) => {
                    self.frames.clear();
                    return Exit::Abort(fault);
                }
                Node::Request(request) => {
                    trace!(ability = request.name(), "ability requested");
                    let scopes = self.frames.iter().rev().filter_map(|frame| match frame {
                        Frame::Scope(handler) => Some(handler),
                        Frame::Bind(_) | Frame::Recover(_) => None,
                    });
                    match dispatch(scopes, request) {
                        Ok(output) => self.current = Some(Node::Done(output)),
                        Err(request) => {
                            trace!(ability = request.name(), "suspending on unhandled ability");
                            return Exit::Suspend(request);
                        }
                    }
                }
                Node::Defer(thunk) => self.current = Some(thunk()),
                Node::Bind(inner, continuation) => {
                    self.frames.push(Frame::Bind(continuation));
                    self.current = Some(*inner);
                }
                Node::Recover(inner, recovery) => {
                    self.frames.push(Frame::Recover(recovery));
                    self.current = Some(*inner);
                }
                Node::Scope(inner, handler) => {
                    self.frames.push(Frame::Scope(handler));
                    self.current = Some(*inner);
                }
            }
        }
    }
}
