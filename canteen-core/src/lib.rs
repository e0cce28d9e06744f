pub mod caller;
pub mod moderation;
pub mod query;
pub mod status;
pub mod validation;

pub use caller::{Caller, Role};
pub use moderation::{transition, Decision, ModerationError, Transition};
pub use query::{PageInfo, PageRequest, Sort, SortDirection};
pub use status::ModerationStatus;
pub use validation::ValidationError;
