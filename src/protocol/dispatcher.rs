//! Observer registration and fan-out for received packets.
//!
//! Observers are kept per key, either a single packet kind or [`CallbackKey::Any`].
//! For every packet the `Any` list runs first, then the list of the packet's
//! kind, each in registration order. Registration never deduplicates.

use crate::core::packet::{PacketType, ServerPacket};
use crate::error::Result;
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{error, warn};

type ObserverFn<C> = dyn FnMut(&mut C, &ServerPacket) -> Result<()> + Send + 'static;

/// A named observer. `C` is the context handed to every call.
pub struct Callback<C> {
    name: Cow<'static, str>,
    func: Box<ObserverFn<C>>,
}

impl<C> Callback<C> {
    pub fn new<F>(name: impl Into<Cow<'static, str>>, func: F) -> Self
    where
        F: FnMut(&mut C, &ServerPacket) -> Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    /// Name used in failure logs
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<C> fmt::Debug for Callback<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("name", &self.name).finish()
    }
}

/// What an observer is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKey {
    /// Every received packet, known or not
    Any,
    Kind(PacketType),
}

impl From<PacketType> for CallbackKey {
    fn from(kind: PacketType) -> Self {
        CallbackKey::Kind(kind)
    }
}

/// Where new observers go in an existing list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Position {
    #[default]
    Append,
    Prepend,
    /// Before the observer currently at this index; past the end appends
    At(usize),
    /// Counted back from the end: `FromEnd(1)` goes before the last observer,
    /// `FromEnd(0)` appends and a count past the start prepends
    FromEnd(usize),
}

/// Summary of one dispatch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub invoked: usize,
    pub failed: usize,
}

/// Per-kind ordered observer lists.
pub struct CallbackTable<C> {
    callbacks: HashMap<CallbackKey, Vec<Callback<C>>>,
}

impl<C> Default for CallbackTable<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for CallbackTable<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.callbacks.iter().map(|(key, list)| {
                (key, list.iter().map(Callback::name).collect::<Vec<_>>())
            }))
            .finish()
    }
}

impl<C> CallbackTable<C> {
    pub fn new() -> Self {
        Self {
            callbacks: HashMap::new(),
        }
    }

    /// Register one observer.
    pub fn register(&mut self, key: impl Into<CallbackKey>, callback: Callback<C>, position: Position) {
        self.register_all(key, vec![callback], position);
    }

    /// Register several observers as a block, keeping their relative order.
    pub fn register_all(
        &mut self,
        key: impl Into<CallbackKey>,
        callbacks: Vec<Callback<C>>,
        position: Position,
    ) {
        let list = self.callbacks.entry(key.into()).or_default();
        let index = match position {
            Position::Append => list.len(),
            Position::Prepend => 0,
            Position::At(index) => index.min(list.len()),
            Position::FromEnd(count) => list.len().saturating_sub(count),
        };
        list.splice(index..index, callbacks);
    }

    /// Observer names for a key, in call order
    pub fn names(&self, key: impl Into<CallbackKey>) -> Vec<&str> {
        self.callbacks
            .get(&key.into())
            .map(|list| list.iter().map(Callback::name).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, key: impl Into<CallbackKey>) -> usize {
        self.callbacks.get(&key.into()).map_or(0, Vec::len)
    }

    /// Run every observer interested in `packet`.
    ///
    /// Each call is isolated: an error or a panic is logged with the observer
    /// name and the packet, and the remaining observers still run.
    pub fn dispatch(&mut self, ctx: &mut C, packet: &ServerPacket) -> DispatchOutcome {
        let kind = packet.packet_type();
        let mut outcome = DispatchOutcome::default();

        if let Some(list) = self.callbacks.get_mut(&CallbackKey::Any) {
            run_observers(list, ctx, packet, &mut outcome);
        }

        match self.callbacks.get_mut(&CallbackKey::Kind(kind)) {
            Some(list) if !list.is_empty() => run_observers(list, ctx, packet, &mut outcome),
            _ if kind != PacketType::Unknown => {
                warn!(packet = %kind, "No callback registered for packet kind");
            }
            _ => {}
        }
        outcome
    }
}

fn run_observers<C>(
    list: &mut [Callback<C>],
    ctx: &mut C,
    packet: &ServerPacket,
    outcome: &mut DispatchOutcome,
) {
    for callback in list {
        outcome.invoked += 1;
        let result = catch_unwind(AssertUnwindSafe(|| (callback.func)(&mut *ctx, packet)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                outcome.failed += 1;
                error!(
                    observer = %callback.name,
                    kind = %packet.packet_type(),
                    packet = ?packet,
                    error = %e,
                    "Error in packet observer"
                );
            }
            Err(panic) => {
                outcome.failed += 1;
                error!(
                    observer = %callback.name,
                    kind = %packet.packet_type(),
                    packet = ?packet,
                    panic = panic_message(&*panic),
                    "Packet observer panicked"
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::{ServerDate, ServerShutdown, UnknownPacket};
    use crate::error::ProtocolError;
    use bytes::Bytes;

    type Log = Vec<String>;

    fn recorder(name: &'static str) -> Callback<Log> {
        Callback::new(name, move |log: &mut Log, _packet: &ServerPacket| {
            log.push(name.to_owned());
            Ok(())
        })
    }

    fn shutdown() -> ServerPacket {
        ServerShutdown::default().into()
    }

    #[test]
    fn test_index_and_prepend_placement() {
        let kind = PacketType::ServerWelcome;
        let mut table = CallbackTable::<Log>::new();

        table.register_all(kind, vec![recorder("cb1"), recorder("cb10")], Position::At(99));
        table.register(kind, recorder("cb2"), Position::Prepend);
        table.register(kind, recorder("cb5"), Position::At(2));
        assert_eq!(table.names(kind), ["cb2", "cb1", "cb5", "cb10"]);

        let other = PacketType::ServerProtocol;
        table.register_all(other, vec![recorder("cb3"), recorder("cb30")], Position::Prepend);
        table.register(other, recorder("cb4"), Position::At(0));
        assert_eq!(table.names(other), ["cb4", "cb3", "cb30"]);
    }

    #[test]
    fn test_placement_counted_from_end() {
        let kind = PacketType::ServerWelcome;
        let mut table = CallbackTable::<Log>::new();

        table.register_all(kind, vec![recorder("cb1"), recorder("cb10")], Position::Append);
        table.register(kind, recorder("cb5"), Position::FromEnd(1));
        assert_eq!(table.names(kind), ["cb1", "cb5", "cb10"]);

        table.register(kind, recorder("last"), Position::FromEnd(0));
        table.register(kind, recorder("first"), Position::FromEnd(99));
        assert_eq!(table.names(kind), ["first", "cb1", "cb5", "cb10", "last"]);

        // an empty list takes it either way
        let other = PacketType::ServerProtocol;
        table.register(other, recorder("only"), Position::FromEnd(1));
        assert_eq!(table.names(other), ["only"]);
    }

    #[test]
    fn test_append_accumulates_without_dedup() {
        let mut table = CallbackTable::<Log>::new();
        table.register(CallbackKey::Any, recorder("a"), Position::Append);
        table.register(CallbackKey::Any, recorder("a"), Position::default());
        table.register_all(
            CallbackKey::Any,
            vec![recorder("b"), recorder("c")],
            Position::Prepend,
        );
        assert_eq!(table.names(CallbackKey::Any), ["b", "c", "a", "a"]);
        assert_eq!(table.count(PacketType::ServerDate), 0);
    }

    #[test]
    fn test_wildcard_runs_first() {
        let mut table = CallbackTable::<Log>::new();
        table.register(PacketType::ServerShutdown, recorder("kind"), Position::Append);
        table.register(CallbackKey::Any, recorder("any"), Position::Append);
        table.register(PacketType::ServerDate, recorder("date"), Position::Append);

        let mut log = Log::new();
        let outcome = table.dispatch(&mut log, &shutdown());
        assert_eq!(log, ["any", "kind"]);
        assert_eq!(outcome, DispatchOutcome { invoked: 2, failed: 0 });
    }

    #[test]
    fn test_failures_are_isolated() {
        let mut table = CallbackTable::<Log>::new();
        table.register(
            PacketType::ServerShutdown,
            Callback::new("fails", |_: &mut Log, _: &ServerPacket| Err(ProtocolError::NotConnected)),
            Position::Append,
        );
        table.register(
            PacketType::ServerShutdown,
            Callback::new("panics", |_: &mut Log, _: &ServerPacket| -> Result<()> {
                panic!("observer bug")
            }),
            Position::Append,
        );
        table.register(PacketType::ServerShutdown, recorder("after"), Position::Append);

        let mut log = Log::new();
        let outcome = table.dispatch(&mut log, &shutdown());
        assert_eq!(log, ["after"]);
        assert_eq!(outcome, DispatchOutcome { invoked: 3, failed: 2 });
    }

    #[test]
    fn test_unknown_packets_reach_wildcard_only() {
        let mut table = CallbackTable::<Log>::new();
        table.register(CallbackKey::Any, recorder("any"), Position::Append);
        table.register(PacketType::ServerDate, recorder("date"), Position::Append);

        let unknown = ServerPacket::Unknown(UnknownPacket {
            tag: 200,
            payload: Bytes::new(),
        });
        let mut log = Log::new();
        table.dispatch(&mut log, &unknown);
        assert_eq!(log, ["any"]);

        table.dispatch(&mut log, &ServerDate::default().into());
        assert_eq!(log, ["any", "any", "date"]);
    }
}
