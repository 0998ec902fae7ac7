//! Message-map dispatch.
//!
//! Each handler type contributes one ordered table of `(message_id, handler)`
//! pairs; a type layered on another chains its table ahead of the parent's.
//! Dispatch walks the chain from the most-derived table and the first match
//! wins, so a derived handler overrides a parent's binding for the same id.

use epcore_queue::ThreadMessage;

/// A user-message handler: receives the handler state and the message.
pub type HandlerFn<H, T> = fn(&mut H, &T);

/// One handler table.
pub struct MessageMap<H, T: ThreadMessage> {
    entries: Vec<(u32, HandlerFn<H, T>)>,
}

impl<H, T: ThreadMessage> MessageMap<H, T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Binds `id` to `handler`.
    #[must_use]
    pub fn on(mut self, id: u32, handler: HandlerFn<H, T>) -> Self {
        self.entries.push((id, handler));
        self
    }

    fn find(&self, id: u32) -> Option<HandlerFn<H, T>> {
        self.entries
            .iter()
            .find(|(entry_id, _)| *entry_id == id)
            .map(|(_, f)| *f)
    }
}

impl<H, T: ThreadMessage> Default for MessageMap<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, T: ThreadMessage> std::fmt::Debug for MessageMap<H, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<u32> = self.entries.iter().map(|(id, _)| *id).collect();
        f.debug_struct("MessageMap").field("ids", &ids).finish()
    }
}

/// A chain of handler tables, most-derived first.
pub struct MessageMapChain<H, T: ThreadMessage> {
    maps: Vec<MessageMap<H, T>>,
}

impl<H, T: ThreadMessage> MessageMapChain<H, T> {
    pub fn new() -> Self {
        Self { maps: Vec::new() }
    }

    /// Appends a table to the end of the chain (i.e. as a parent of the
    /// tables already present).
    #[must_use]
    pub fn with(mut self, map: MessageMap<H, T>) -> Self {
        self.maps.push(map);
        self
    }

    /// Dispatches `msg` to the first matching handler. Returns whether a
    /// handler was found.
    pub fn dispatch(&self, handler: &mut H, msg: &T) -> bool {
        for map in &self.maps {
            if let Some(f) = map.find(msg.message_id()) {
                f(handler, msg);
                return true;
            }
        }
        false
    }
}

impl<H, T: ThreadMessage> Default for MessageMapChain<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H, T: ThreadMessage> std::fmt::Debug for MessageMapChain<H, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageMapChain")
            .field("maps", &self.maps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use epcore_queue::{EventMessage, MSG_USER};

    use super::*;

    #[derive(Default)]
    struct State {
        calls: Vec<&'static str>,
    }

    fn derived_a(state: &mut State, _msg: &EventMessage) {
        state.calls.push("derived_a");
    }

    fn parent_a(state: &mut State, _msg: &EventMessage) {
        state.calls.push("parent_a");
    }

    fn parent_b(state: &mut State, _msg: &EventMessage) {
        state.calls.push("parent_b");
    }

    #[test]
    fn test_first_match_wins_walking_up() {
        let chain = MessageMapChain::new()
            .with(MessageMap::new().on(MSG_USER, derived_a))
            .with(
                MessageMap::new()
                    .on(MSG_USER, parent_a)
                    .on(MSG_USER + 1, parent_b),
            );

        let mut state = State::default();
        assert!(chain.dispatch(&mut state, &EventMessage::new(MSG_USER)));
        assert!(chain.dispatch(&mut state, &EventMessage::new(MSG_USER + 1)));
        assert!(!chain.dispatch(&mut state, &EventMessage::new(MSG_USER + 2)));
        assert_eq!(state.calls, vec!["derived_a", "parent_b"]);
    }
}
