pub mod clock;
pub mod command;
pub mod cores;
pub mod engine;
pub mod error;
pub mod loader;
pub mod probe;

pub use clock::{Clock, SystemClock};
pub use command::{parse_command, Base, Command};
pub use cores::parse_cores;
pub use engine::Engine;
pub use error::{MsrflowError, Result, SyntaxError};
pub use loader::{BoundBackend, DynamicLoader, ModuleLoader, Registry};
pub use probe::{HostProbe, SystemProbe};

// Re-export the backend contract so module authors and the agent agree on
// one set of types.
pub use msrflow_abi::{Backend, BackendError, CoreId, CoreInfo, MsrAddr, MsrVal};
