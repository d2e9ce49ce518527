pub mod geometry;
pub mod stub;

pub use geometry::GeometryEngine;
pub use stub::StubEngine;
