//! Domain model (ids, formats, task record, views, retry policy, errors).

pub mod errors;
pub mod format;
pub mod ids;
pub mod naming;
pub mod retry;
pub mod state;
pub mod task;
pub mod view;

pub use errors::{ErrorKind, FetchError, SpindleError, StoreError, TransitionError};
pub use format::{FormatError, FormatKey, FormatSpec, MediaKind};
pub use ids::{ParseTaskIdError, TaskId};
pub use retry::{Decision, RetryPolicy};
pub use state::TaskState;
pub use task::{FormatFailure, MediaInfo, ProducedFile, TaskRecord, duration_label};
pub use view::{FailureView, FileReference, FileView, TaskView};
