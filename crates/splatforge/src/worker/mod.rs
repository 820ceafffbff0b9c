pub mod dispatcher;

pub use dispatcher::{DispatchError, JobDispatcher, JobHandle};
