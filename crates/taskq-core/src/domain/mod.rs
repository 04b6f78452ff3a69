//! Domain model (IDs, queues, task records, events, errors, retry policy).

pub mod errors;
pub mod event;
pub mod ids;
pub mod queue;
pub mod retry;
pub mod state;
pub mod task;

pub use self::errors::{SchedulerError, StoreError, TaskError};
pub use self::event::{Event, EventBody, EventRecord};
pub use self::ids::{EventId, TaskId, WorkerId};
pub use self::queue::{QueueName, TaskCategory};
pub use self::retry::RetryPolicy;
pub use self::state::{TaskState, TaskStatus};
pub use self::task::{EncodedTask, ScheduledTask, TaskRecord};
