mod command;
mod object;
mod registry;
mod state;
mod value;

pub use command::{Command, Decision};
pub use object::{AsAny, FieldTable, MAX_FIELDS, NetworkObject, ObjectCore, Priority};
pub use registry::{ObjectRegistry, Spawner};
pub use state::{ObjectId, ReplicatedState};
pub use value::{TypedValue, Value, ValueType};
