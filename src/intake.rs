use crate::message::Message;
use std::collections::VecDeque;

/// What a role-specific handler did with one popped message.
pub enum Disposition {
    /// The message was fully handled this tick.
    Handled,
    /// The message doesn't belong to the current role yet; keep it in
    /// FIFO order for a later tick.
    Requeue(Message),
    /// A higher-term RPC forced a role conversion; reinsert at the head
    /// so it is dispatched again immediately, under the new role.
    Redispatch(Message),
}

/// FIFO of inbound messages awaiting role-specific dispatch.
#[derive(Default)]
pub struct Intake {
    queue: VecDeque<Message>,
}

impl Intake {
    pub fn new() -> Self {
        Intake { queue: VecDeque::new() }
    }

    pub fn push_back(&mut self, msg: Message) {
        self.queue.push_back(msg);
    }

    pub fn push_front(&mut self, msg: Message) {
        self.queue.push_front(msg);
    }

    pub fn pop_front(&mut self) -> Option<Message> {
        self.queue.pop_front()
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) {
        self.queue.extend(msgs);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
