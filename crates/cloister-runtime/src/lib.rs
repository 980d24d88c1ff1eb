//! Worker-thread actor infrastructure.
//!
//! Every cross-boundary operation in this workspace is a synchronous,
//! blocking round-trip onto a dedicated owner thread; there is no async
//! surface. This crate provides the typed mailbox that carries those
//! round-trips.

pub mod thread_actor;

pub use thread_actor::{
    spawn_actor, spawn_actor_named, Actor, ActorContext, ActorRef, CallError, CastError, Handler,
    Message,
};
