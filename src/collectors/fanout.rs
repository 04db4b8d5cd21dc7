use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each consumer queue. Kept small so a slow consumer throttles
/// the producer's pagination.
pub const FANOUT_CAPACITY: usize = 1;

/// Single-producer queue that hands a copy of every published item to each
/// subscribed consumer.
///
/// Every subscriber gets its own bounded queue. [`FanOut::publish`] returns
/// only after the item was accepted by every consumer still listening.
/// Consumers that went away are dropped from the fan-out instead of failing
/// the producer. Dropping the `FanOut` (or calling [`FanOut::close`]) closes
/// all queues, which is the completion signal consumers wait for.
#[derive(Debug)]
pub struct FanOut<T> {
    senders: Vec<(&'static str, mpsc::Sender<T>)>,
}

/// Receiving end of one consumer.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T: Clone> FanOut<T> {
    pub const fn new() -> Self {
        Self { senders: Vec::new() }
    }

    pub fn subscribe(&mut self, consumer: &'static str) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(FANOUT_CAPACITY);
        self.senders.push((consumer, tx));
        Subscription { rx }
    }

    pub fn consumers(&self) -> usize {
        self.senders.len()
    }

    /// Deliver `item` to every open consumer, waiting for queue space.
    pub async fn publish(&mut self, item: &T) {
        let mut closed = Vec::new();

        for (index, (consumer, tx)) in self.senders.iter().enumerate() {
            if tx.send(item.clone()).await.is_err() {
                debug!(consumer, "consumer stopped listening, removing it from the fan-out");
                closed.push(index);
            }
        }

        for index in closed.into_iter().rev() {
            drop(self.senders.remove(index));
        }
    }

    /// Close every queue; consumers drain what is buffered and then see the end.
    pub fn close(self) {
        drop(self);
    }
}

impl<T: Clone> Default for FanOut<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscription<T> {
    /// Next item, or `None` once the producer closed the fan-out and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}
