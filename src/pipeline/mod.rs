pub mod fingerprint;
pub mod node;
pub mod registry;
pub mod resolver;
pub mod value;

pub use fingerprint::{fingerprint, Fingerprint, UnhashableArgument};
pub use node::{CallMode, ConfigNode, Invocation, NodeOptions};
pub use registry::{canonical_target_id, Arguments, TargetFn, TargetRegistry, TargetSpec};
pub use resolver::{ResolveStats, Resolver};
pub use value::{OpaqueValue, Value};
