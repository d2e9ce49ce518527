mod backend;
mod backends;
mod preview;
mod registry;

pub use backend::{embedding_similarity, EngineCapability, FaceEngine};
pub use backends::{GeometryEngine, StubEngine};
pub use preview::adjust_for_preview;
pub use registry::{EngineRegistry, SharedEngine};
