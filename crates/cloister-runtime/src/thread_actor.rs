use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, RecvTimeoutError, Sender};

/// Any Send state can be an actor; it lives on its own thread and is only
/// ever touched by its handlers.
pub trait Actor: Send + 'static {}

impl<T> Actor for T where T: Send + 'static {}

pub trait Message: Send + 'static {
    type Response: Send + 'static;
}

pub trait Handler<M>: Actor + Sized
where
    M: Message,
{
    fn handle(&mut self, message: M, ctx: &mut ActorContext<Self>) -> M::Response;
}

pub struct ActorContext<A: Actor> {
    stop_requested: bool,
    _marker: PhantomData<fn() -> A>,
}

impl<A: Actor> ActorContext<A> {
    fn new() -> Self {
        Self {
            stop_requested: false,
            _marker: PhantomData,
        }
    }

    /// Stop the actor after the current message; pending mail is dropped and
    /// callers observe a closed mailbox.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested
    }
}

trait Envelope<A: Actor>: Send + 'static {
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>);
}

struct CastEnvelope<M, A>
where
    M: Message<Response = ()>,
    A: Handler<M>,
{
    message: M,
    _marker: PhantomData<fn() -> A>,
}

impl<M, A> Envelope<A> for CastEnvelope<M, A>
where
    M: Message<Response = ()>,
    A: Handler<M>,
{
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>) {
        actor.handle(self.message, ctx);
    }
}

struct CallEnvelope<M, A>
where
    M: Message,
    A: Handler<M>,
{
    message: M,
    reply_tx: Sender<M::Response>,
    _marker: PhantomData<fn() -> A>,
}

impl<M, A> Envelope<A> for CallEnvelope<M, A>
where
    M: Message,
    A: Handler<M>,
{
    fn deliver(self: Box<Self>, actor: &mut A, ctx: &mut ActorContext<A>) {
        let response = actor.handle(self.message, ctx);
        let _ = self.reply_tx.send(response);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastError {
    MailboxClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError {
    /// The actor is gone; the message was never delivered.
    MailboxClosed,
    /// The actor stopped (or its handler panicked) before replying.
    ActorStopped,
    /// No reply within the deadline; the message may still be handled later.
    Timeout,
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::MailboxClosed => write!(f, "actor mailbox is closed"),
            CallError::ActorStopped => write!(f, "actor stopped before replying"),
            CallError::Timeout => write!(f, "actor call timed out"),
        }
    }
}

pub struct ActorRef<A: Actor> {
    tx: Sender<Box<dyn Envelope<A>>>,
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A: Actor> ActorRef<A> {
    /// Fire-and-forget delivery.
    pub fn cast<M>(&self, message: M) -> Result<(), CastError>
    where
        M: Message<Response = ()>,
        A: Handler<M>,
    {
        let envelope: Box<dyn Envelope<A>> = Box::new(CastEnvelope::<M, A> {
            message,
            _marker: PhantomData,
        });
        self.tx.send(envelope).map_err(|_| CastError::MailboxClosed)
    }

    /// Blocking round-trip: park the calling thread until the actor replies
    /// or goes away. Calls do not time out on their own; an in-flight
    /// handler always runs to completion.
    pub fn call<M>(&self, message: M) -> Result<M::Response, CallError>
    where
        M: Message,
        A: Handler<M>,
    {
        let reply_rx = self.send_call(message)?;
        reply_rx.recv().map_err(|_| CallError::ActorStopped)
    }

    /// Blocking round-trip with a reply deadline.
    pub fn call_timeout<M>(&self, message: M, timeout: Duration) -> Result<M::Response, CallError>
    where
        M: Message,
        A: Handler<M>,
    {
        let reply_rx = self.send_call(message)?;
        match reply_rx.recv_timeout(timeout) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => Err(CallError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CallError::ActorStopped),
        }
    }

    fn send_call<M>(
        &self,
        message: M,
    ) -> Result<crossbeam_channel::Receiver<M::Response>, CallError>
    where
        M: Message,
        A: Handler<M>,
    {
        let (reply_tx, reply_rx) = bounded(1);
        let envelope: Box<dyn Envelope<A>> = Box::new(CallEnvelope::<M, A> {
            message,
            reply_tx,
            _marker: PhantomData,
        });
        self.tx.send(envelope).map_err(|_| CallError::MailboxClosed)?;
        Ok(reply_rx)
    }
}

pub fn spawn_actor<A: Actor>(actor: A) -> std::io::Result<(ActorRef<A>, JoinHandle<()>)> {
    spawn_actor_named(actor, "cloister-thread-actor")
}

pub fn spawn_actor_named<A: Actor>(
    actor: A,
    thread_name: impl Into<String>,
) -> std::io::Result<(ActorRef<A>, JoinHandle<()>)> {
    let (tx, rx) = unbounded::<Box<dyn Envelope<A>>>();
    let actor_ref = ActorRef { tx };
    let join = thread::Builder::new()
        .name(thread_name.into())
        .spawn(move || run_actor_loop(actor, rx))?;
    Ok((actor_ref, join))
}

fn run_actor_loop<A: Actor>(mut actor: A, rx: crossbeam_channel::Receiver<Box<dyn Envelope<A>>>) {
    let mut ctx = ActorContext::<A>::new();
    while let Ok(envelope) = rx.recv() {
        // A panic that escapes a handler poisons the actor state; stop the
        // loop so callers see ActorStopped instead of touching it again.
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            envelope.deliver(&mut actor, &mut ctx);
        }));
        if outcome.is_err() || ctx.is_stop_requested() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{spawn_actor, ActorContext, CallError, Handler, Message};

    #[derive(Default)]
    struct CounterActor {
        value: u64,
    }

    struct Inc;
    impl Message for Inc {
        type Response = ();
    }

    struct Get;
    impl Message for Get {
        type Response = u64;
    }

    struct Quit;
    impl Message for Quit {
        type Response = ();
    }

    impl Handler<Inc> for CounterActor {
        fn handle(&mut self, _message: Inc, _ctx: &mut ActorContext<Self>) {
            self.value += 1;
        }
    }

    impl Handler<Get> for CounterActor {
        fn handle(&mut self, _message: Get, _ctx: &mut ActorContext<Self>) -> u64 {
            self.value
        }
    }

    impl Handler<Quit> for CounterActor {
        fn handle(&mut self, _message: Quit, ctx: &mut ActorContext<Self>) {
            ctx.stop();
        }
    }

    #[test]
    fn cast_and_call_round_trip() {
        let (actor_ref, join) = spawn_actor(CounterActor::default()).expect("spawn actor");
        actor_ref.cast(Inc).expect("cast inc");
        actor_ref.cast(Inc).expect("cast inc");
        let value = actor_ref.call(Get).expect("call get");
        assert_eq!(value, 2);
        drop(actor_ref);
        join.join().expect("join actor thread");
    }

    #[test]
    fn call_after_stop_reports_closed_mailbox() {
        let (actor_ref, join) = spawn_actor(CounterActor::default()).expect("spawn actor");
        actor_ref.call(Quit).expect("call quit");
        join.join().expect("join actor thread");
        let err = actor_ref.call(Get).expect_err("actor is gone");
        assert!(matches!(
            err,
            CallError::MailboxClosed | CallError::ActorStopped
        ));
    }

    #[test]
    fn call_timeout_elapses_on_slow_handler() {
        struct SlowActor;

        struct SlowCall;
        impl Message for SlowCall {
            type Response = u8;
        }

        impl Handler<SlowCall> for SlowActor {
            fn handle(&mut self, _message: SlowCall, _ctx: &mut ActorContext<Self>) -> u8 {
                std::thread::sleep(Duration::from_millis(80));
                7
            }
        }

        let (actor_ref, join) = spawn_actor(SlowActor).expect("spawn actor");
        let err = actor_ref
            .call_timeout(SlowCall, Duration::from_millis(10))
            .expect_err("expected timeout");
        assert_eq!(err, CallError::Timeout);
        drop(actor_ref);
        join.join().expect("join actor thread");
    }

    #[test]
    fn panicking_handler_stops_actor_without_unwinding_caller() {
        struct PanicCall;
        impl Message for PanicCall {
            type Response = u8;
        }

        impl Handler<PanicCall> for CounterActor {
            fn handle(&mut self, _message: PanicCall, _ctx: &mut ActorContext<Self>) -> u8 {
                panic!("handler blew up");
            }
        }

        let (actor_ref, join) = spawn_actor(CounterActor::default()).expect("spawn actor");
        let err = actor_ref.call(PanicCall).expect_err("panic call fails");
        assert_eq!(err, CallError::ActorStopped);
        join.join().expect("join actor thread");
    }
}
