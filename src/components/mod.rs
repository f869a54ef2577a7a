//! Connector components
//!
//! The nodes that shape streams rather than run commands: ordered source
//! queues, the fan-out duplicator, the substream aggregator, and the
//! terminal sink.

mod aggregator;
mod duplicator;
mod queue;
mod sink;

pub use aggregator::SubstreamAggregator;
pub use duplicator::Duplicator;
pub use queue::{FileQueue, ParamQueue};
pub use sink::Sink;
